//! Per-device collection ledger.
//!
//! The ledger owns every image captured on a device, its annotations and its
//! [`SyncState`]. It lives in a directory:
//!
//! ```text
//! <root>/
//!   ledger.json      catalog, images, annotations, sync states
//!   images/          captured files, named img_<id>.<ext>
//! ```
//!
//! A device has exactly one writer, so the ledger needs no locking; every
//! mutating operation persists `ledger.json` with write-then-rename before
//! returning.

mod status;

pub use status::LedgerStatus;

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bundle::SyncReceipt;
use crate::error::ShrinkError;
use crate::ir::fsutil::{read_json, write_atomic, write_json_atomic};
use crate::ir::labels::{has_extension, IMAGE_EXTENSIONS};
use crate::ir::{Annotation, BundleId, Checksum, CollectedImage, ImageId, Product, ProductId, SyncState};

pub const LEDGER_FILE: &str = "ledger.json";
pub const IMAGES_DIR: &str = "images";

const LEDGER_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct LedgerFile {
    format_version: u32,
    device_id: String,
    next_image_id: u64,
    next_product_id: u64,
    #[serde(default)]
    catalog: Vec<Product>,
    #[serde(default)]
    images: Vec<CollectedImage>,
}

/// What happened when the central store confirmed an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    /// EXPORTED → SYNCED.
    Synced,
    /// Already SYNCED; nothing changed.
    AlreadySynced,
    /// The image was reopened (or never exported) since the bundle was made;
    /// the confirmation is stale and ignored.
    NotExported(SyncState),
    /// No image with this checksum on this device.
    Unknown,
}

/// Receives sync confirmations from the importer.
///
/// The ledger implements this directly when the importer runs next to it;
/// otherwise the importer's [`SyncReceipt`] is carried back to the device.
pub trait SyncSink {
    fn confirm_synced(&mut self, checksum: &Checksum) -> Result<SyncOutcome, ShrinkError>;

    /// Persists confirmations recorded so far.
    fn flush(&mut self) -> Result<(), ShrinkError> {
        Ok(())
    }
}

/// Counts from applying a [`SyncReceipt`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReceiptOutcome {
    pub synced: usize,
    pub already_synced: usize,
    pub stale: usize,
    pub unknown: usize,
}

/// A device's collection ledger.
#[derive(Debug)]
pub struct Ledger {
    root: PathBuf,
    state: LedgerFile,
    dirty: bool,
}

impl Ledger {
    /// Creates a new, empty ledger at `root`.
    pub fn init(root: &Path, device_id: &str) -> Result<Self, ShrinkError> {
        let ledger_path = root.join(LEDGER_FILE);
        if ledger_path.exists() {
            return Err(ShrinkError::LedgerExists {
                path: ledger_path,
            });
        }
        if device_id.trim().is_empty() {
            return Err(ShrinkError::Config {
                message: "device_id must not be empty".to_string(),
            });
        }
        fs::create_dir_all(root.join(IMAGES_DIR))?;

        let mut ledger = Self {
            root: root.to_path_buf(),
            state: LedgerFile {
                format_version: LEDGER_FORMAT_VERSION,
                device_id: device_id.trim().to_string(),
                next_image_id: 1,
                next_product_id: 1,
                catalog: Vec::new(),
                images: Vec::new(),
            },
            dirty: true,
        };
        ledger.save()?;
        tracing::info!(root = %root.display(), device_id, "ledger initialized");
        Ok(ledger)
    }

    /// Opens an existing ledger.
    pub fn open(root: &Path) -> Result<Self, ShrinkError> {
        let ledger_path = root.join(LEDGER_FILE);
        if !ledger_path.is_file() {
            return Err(ShrinkError::LedgerNotFound {
                path: root.to_path_buf(),
            });
        }
        let state: LedgerFile = read_json(&ledger_path)?;
        check_consistency(&ledger_path, &state)?;
        Ok(Self {
            root: root.to_path_buf(),
            state,
            dirty: false,
        })
    }

    /// Writes `ledger.json` if anything changed since the last save.
    pub fn save(&mut self) -> Result<(), ShrinkError> {
        if !self.dirty {
            return Ok(());
        }
        write_json_atomic(&self.root.join(LEDGER_FILE), &self.state)?;
        self.dirty = false;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn device_id(&self) -> &str {
        &self.state.device_id
    }

    pub fn catalog(&self) -> &[Product] {
        &self.state.catalog
    }

    pub fn images(&self) -> &[CollectedImage] {
        &self.state.images
    }

    pub fn get(&self, id: ImageId) -> Option<&CollectedImage> {
        self.state.images.iter().find(|img| img.id == id)
    }

    pub fn product(&self, id: ProductId) -> Option<&Product> {
        self.state.catalog.iter().find(|p| p.id == id)
    }

    /// Absolute path of a captured image file.
    pub fn image_path(&self, image: &CollectedImage) -> PathBuf {
        self.root.join(IMAGES_DIR).join(&image.file_name)
    }

    /// Adds a product to the catalog, or returns the ID of an existing
    /// product with the same name.
    pub fn add_product(&mut self, name: &str) -> Result<ProductId, ShrinkError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ShrinkError::InvalidAnnotation {
                message: "product name must not be empty".to_string(),
            });
        }
        if let Some(existing) = self.state.catalog.iter().find(|p| p.name == name) {
            return Ok(existing.id);
        }

        let id = ProductId::new(self.state.next_product_id);
        self.state.next_product_id += 1;
        self.state.catalog.push(Product::new(id, name));
        self.dirty = true;
        self.save()?;
        tracing::info!(product_id = %id, name, "product added to catalog");
        Ok(id)
    }

    /// Captures an image file into the ledger.
    pub fn capture(&mut self, path: &Path) -> Result<ImageId, ShrinkError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let bytes = fs::read(path)?;
        self.capture_bytes(&name, &bytes)
    }

    /// Captures image bytes under the given original file name.
    ///
    /// Capturing bytes already in the ledger returns the existing image ID.
    pub fn capture_bytes(&mut self, name: &str, bytes: &[u8]) -> Result<ImageId, ShrinkError> {
        self.capture_bytes_at(name, bytes, Utc::now())
    }

    pub(crate) fn capture_bytes_at(
        &mut self,
        name: &str,
        bytes: &[u8],
        captured_at: DateTime<Utc>,
    ) -> Result<ImageId, ShrinkError> {
        if !has_extension(Path::new(name), &IMAGE_EXTENSIONS) {
            return Err(ShrinkError::UnsupportedImage {
                name: name.to_string(),
            });
        }

        let checksum = Checksum::of_bytes(bytes);
        if let Some(existing) = self.state.images.iter().find(|img| img.checksum == checksum) {
            tracing::info!(
                image_id = %existing.id,
                checksum = checksum.short(),
                "image already captured"
            );
            return Ok(existing.id);
        }

        let ext = Path::new(name)
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        let id = ImageId::new(self.state.next_image_id);
        let file_name = format!("img_{:06}.{}", id.as_u64(), ext);
        write_atomic(&self.root.join(IMAGES_DIR).join(&file_name), bytes)?;

        self.state.next_image_id += 1;
        self.state.images.push(CollectedImage {
            id,
            file_name,
            checksum: checksum.clone(),
            captured_at,
            device_id: self.state.device_id.clone(),
            sync_state: SyncState::Captured,
            annotations: Vec::new(),
            exported_in: None,
            synced_at: None,
        });
        self.dirty = true;
        self.save()?;

        tracing::info!(image_id = %id, checksum = checksum.short(), source = name, "image captured");
        Ok(id)
    }

    /// Attaches annotations to an image.
    ///
    /// All-or-nothing: if any annotation references a product outside the
    /// catalog, none are attached. Exported and synced images are locked
    /// until [`Ledger::reopen`] is called.
    pub fn annotate(
        &mut self,
        id: ImageId,
        annotations: Vec<Annotation>,
    ) -> Result<SyncState, ShrinkError> {
        if annotations.is_empty() {
            return Err(ShrinkError::InvalidAnnotation {
                message: "no annotations given".to_string(),
            });
        }
        for annotation in &annotations {
            if self.product(annotation.product_id).is_none() {
                return Err(ShrinkError::UnknownProduct(annotation.product_id));
            }
        }

        let image = self.image_mut(id)?;
        match image.sync_state {
            SyncState::Captured | SyncState::Annotated => {}
            state @ (SyncState::Exported | SyncState::Synced) => {
                return Err(ShrinkError::ImageLocked { id, state });
            }
        }
        let added = annotations.len();
        image.annotations.extend(annotations);
        image.sync_state = SyncState::Annotated;
        let total = image.annotations.len();

        self.dirty = true;
        self.save()?;
        tracing::info!(image_id = %id, added, total, "image annotated");
        Ok(SyncState::Annotated)
    }

    /// Removes all annotations from a not-yet-exported image.
    pub fn clear_annotations(&mut self, id: ImageId) -> Result<SyncState, ShrinkError> {
        let image = self.image_mut(id)?;
        match image.sync_state {
            SyncState::Captured | SyncState::Annotated => {}
            state @ (SyncState::Exported | SyncState::Synced) => {
                return Err(ShrinkError::ImageLocked { id, state });
            }
        }
        image.annotations.clear();
        image.sync_state = SyncState::Captured;
        self.dirty = true;
        self.save()?;
        Ok(SyncState::Captured)
    }

    /// Reopens an exported or synced image for correction.
    ///
    /// The image drops back to ANNOTATED (CAPTURED if it somehow has no
    /// annotations) and loses its bundle membership and sync confirmation,
    /// so the corrected version goes out in a later bundle.
    pub fn reopen(&mut self, id: ImageId) -> Result<SyncState, ShrinkError> {
        let image = self.image_mut(id)?;
        let previous = image.sync_state;
        if matches!(previous, SyncState::Captured | SyncState::Annotated) {
            return Ok(previous);
        }

        image.sync_state = if image.annotations.is_empty() {
            SyncState::Captured
        } else {
            SyncState::Annotated
        };
        image.exported_in = None;
        image.synced_at = None;
        let state = image.sync_state;

        self.dirty = true;
        self.save()?;
        tracing::info!(image_id = %id, from = %previous, to = %state, "image reopened for correction");
        Ok(state)
    }

    /// Records that an image was written into a bundle.
    ///
    /// Does not persist; the exporter saves once per run.
    pub(crate) fn mark_exported(
        &mut self,
        id: ImageId,
        bundle_id: &BundleId,
    ) -> Result<SyncState, ShrinkError> {
        let image = self.image_mut(id)?;
        match image.sync_state {
            SyncState::Annotated if image.annotations.is_empty() => Err(ShrinkError::NotExportable {
                id,
                message: "image has no annotations".to_string(),
            }),
            SyncState::Annotated => {
                image.sync_state = SyncState::Exported;
                image.exported_in = Some(bundle_id.clone());
                self.dirty = true;
                Ok(SyncState::Exported)
            }
            SyncState::Captured => Err(ShrinkError::NotExportable {
                id,
                message: "image has no annotations".to_string(),
            }),
            state @ (SyncState::Exported | SyncState::Synced) => Ok(state),
        }
    }

    /// Applies a sync confirmation for the image with `checksum`.
    ///
    /// Does not persist; call [`Ledger::save`] (or [`SyncSink::flush`]).
    pub fn confirm(&mut self, checksum: &Checksum) -> SyncOutcome {
        self.confirm_at(checksum, Utc::now())
    }

    fn confirm_at(&mut self, checksum: &Checksum, at: DateTime<Utc>) -> SyncOutcome {
        let Some(image) = self
            .state
            .images
            .iter_mut()
            .find(|img| &img.checksum == checksum)
        else {
            return SyncOutcome::Unknown;
        };

        match image.sync_state {
            SyncState::Exported => {
                image.sync_state = SyncState::Synced;
                image.synced_at = Some(at);
                self.dirty = true;
                tracing::debug!(image_id = %image.id, "image synced");
                SyncOutcome::Synced
            }
            SyncState::Synced => SyncOutcome::AlreadySynced,
            state => {
                tracing::warn!(
                    image_id = %image.id,
                    state = %state,
                    "ignoring sync confirmation for image that is not exported"
                );
                SyncOutcome::NotExported(state)
            }
        }
    }

    /// Applies every confirmation in a receipt and saves.
    pub fn apply_receipt(&mut self, receipt: &SyncReceipt) -> Result<ReceiptOutcome, ShrinkError> {
        let mut outcome = ReceiptOutcome::default();
        let at = Utc::now();
        for checksum in &receipt.confirmed {
            match self.confirm_at(checksum, at) {
                SyncOutcome::Synced => outcome.synced += 1,
                SyncOutcome::AlreadySynced => outcome.already_synced += 1,
                SyncOutcome::NotExported(_) => outcome.stale += 1,
                SyncOutcome::Unknown => outcome.unknown += 1,
            }
        }
        self.save()?;
        tracing::info!(
            bundle_id = %receipt.bundle_id,
            synced = outcome.synced,
            already_synced = outcome.already_synced,
            stale = outcome.stale,
            unknown = outcome.unknown,
            "sync receipt applied"
        );
        Ok(outcome)
    }

    /// Image counts per sync state.
    pub fn status(&self) -> LedgerStatus {
        LedgerStatus::from_ledger(self)
    }

    fn image_mut(&mut self, id: ImageId) -> Result<&mut CollectedImage, ShrinkError> {
        self.state
            .images
            .iter_mut()
            .find(|img| img.id == id)
            .ok_or(ShrinkError::ImageNotFound(id))
    }
}

impl SyncSink for Ledger {
    fn confirm_synced(&mut self, checksum: &Checksum) -> Result<SyncOutcome, ShrinkError> {
        Ok(self.confirm(checksum))
    }

    fn flush(&mut self) -> Result<(), ShrinkError> {
        self.save()
    }
}

fn check_consistency(path: &Path, state: &LedgerFile) -> Result<(), ShrinkError> {
    let corrupt = |message: String| ShrinkError::LedgerCorrupt {
        path: path.to_path_buf(),
        message,
    };

    if state.format_version != LEDGER_FORMAT_VERSION {
        return Err(corrupt(format!(
            "unsupported format_version {}",
            state.format_version
        )));
    }

    let mut ids = std::collections::HashSet::new();
    for image in &state.images {
        if !ids.insert(image.id) {
            return Err(corrupt(format!("duplicate image id {}", image.id)));
        }
        if image.id.as_u64() >= state.next_image_id {
            return Err(corrupt(format!(
                "image id {} is not below next_image_id {}",
                image.id, state.next_image_id
            )));
        }
    }

    let mut product_ids = std::collections::HashSet::new();
    for product in &state.catalog {
        if !product_ids.insert(product.id) {
            return Err(corrupt(format!("duplicate product id {}", product.id)));
        }
        if product.id.as_u64() >= state.next_product_id {
            return Err(corrupt(format!(
                "product id {} is not below next_product_id {}",
                product.id, state.next_product_id
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::NormalizedBox;

    fn bbox() -> NormalizedBox {
        NormalizedBox::new(0.5, 0.5, 0.2, 0.3).unwrap()
    }

    fn new_ledger(root: &Path) -> (Ledger, ProductId) {
        let mut ledger = Ledger::init(root, "cam-01").expect("init ledger");
        let product = ledger.add_product("SKOL 350ml").expect("add product");
        (ledger, product)
    }

    #[test]
    fn init_refuses_existing_ledger() {
        let temp = tempfile::tempdir().expect("create temp dir");
        Ledger::init(temp.path(), "cam-01").unwrap();
        assert!(matches!(
            Ledger::init(temp.path(), "cam-01"),
            Err(ShrinkError::LedgerExists { .. })
        ));
    }

    #[test]
    fn open_missing_ledger_fails() {
        let temp = tempfile::tempdir().expect("create temp dir");
        assert!(matches!(
            Ledger::open(temp.path()),
            Err(ShrinkError::LedgerNotFound { .. })
        ));
    }

    #[test]
    fn capture_stores_file_and_dedupes_by_content() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let (mut ledger, _) = new_ledger(temp.path());

        let first = ledger.capture_bytes("shelf.JPG", b"frame-a").unwrap();
        let again = ledger.capture_bytes("copy.jpg", b"frame-a").unwrap();
        let second = ledger.capture_bytes("shelf2.png", b"frame-b").unwrap();

        assert_eq!(first, again);
        assert_ne!(first, second);
        assert_eq!(ledger.images().len(), 2);

        let image = ledger.get(first).unwrap();
        assert_eq!(image.file_name, "img_000001.jpg");
        assert_eq!(image.sync_state, SyncState::Captured);
        assert_eq!(image.device_id, "cam-01");
        assert_eq!(fs::read(ledger.image_path(image)).unwrap(), b"frame-a");
    }

    #[test]
    fn capture_rejects_non_images() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let (mut ledger, _) = new_ledger(temp.path());
        assert!(matches!(
            ledger.capture_bytes("notes.txt", b"hello"),
            Err(ShrinkError::UnsupportedImage { .. })
        ));
    }

    #[test]
    fn annotate_moves_to_annotated_and_persists() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let (mut ledger, product) = new_ledger(temp.path());
        let id = ledger.capture_bytes("a.jpg", b"a").unwrap();

        let state = ledger
            .annotate(id, vec![Annotation::new(product, bbox())])
            .unwrap();
        assert_eq!(state, SyncState::Annotated);

        let reopened = Ledger::open(temp.path()).unwrap();
        let image = reopened.get(id).unwrap();
        assert_eq!(image.sync_state, SyncState::Annotated);
        assert_eq!(image.annotations.len(), 1);
    }

    #[test]
    fn annotate_is_all_or_nothing() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let (mut ledger, product) = new_ledger(temp.path());
        let id = ledger.capture_bytes("a.jpg", b"a").unwrap();

        let err = ledger
            .annotate(
                id,
                vec![
                    Annotation::new(product, bbox()),
                    Annotation::new(ProductId::new(99), bbox()),
                ],
            )
            .unwrap_err();
        assert!(matches!(err, ShrinkError::UnknownProduct(_)));

        let image = ledger.get(id).unwrap();
        assert!(image.annotations.is_empty());
        assert_eq!(image.sync_state, SyncState::Captured);
    }

    #[test]
    fn exported_image_is_locked_until_reopened() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let (mut ledger, product) = new_ledger(temp.path());
        let id = ledger.capture_bytes("a.jpg", b"a").unwrap();
        ledger
            .annotate(id, vec![Annotation::new(product, bbox())])
            .unwrap();

        let bundle = BundleId::from_timestamp(Utc::now());
        assert_eq!(
            ledger.mark_exported(id, &bundle).unwrap(),
            SyncState::Exported
        );

        let err = ledger
            .annotate(id, vec![Annotation::new(product, bbox())])
            .unwrap_err();
        assert!(matches!(
            err,
            ShrinkError::ImageLocked {
                state: SyncState::Exported,
                ..
            }
        ));

        assert_eq!(ledger.reopen(id).unwrap(), SyncState::Annotated);
        let image = ledger.get(id).unwrap();
        assert!(image.exported_in.is_none());
        assert!(ledger
            .annotate(id, vec![Annotation::new(product, bbox())])
            .is_ok());
    }

    #[test]
    fn mark_exported_requires_annotations() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let (mut ledger, _) = new_ledger(temp.path());
        let id = ledger.capture_bytes("a.jpg", b"a").unwrap();

        let bundle = BundleId::from_timestamp(Utc::now());
        assert!(matches!(
            ledger.mark_exported(id, &bundle),
            Err(ShrinkError::NotExportable { .. })
        ));
        assert_eq!(ledger.get(id).unwrap().sync_state, SyncState::Captured);
    }

    #[test]
    fn confirm_only_promotes_exported_images() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let (mut ledger, product) = new_ledger(temp.path());
        let id = ledger.capture_bytes("a.jpg", b"a").unwrap();
        let checksum = ledger.get(id).unwrap().checksum.clone();

        assert_eq!(
            ledger.confirm(&checksum),
            SyncOutcome::NotExported(SyncState::Captured)
        );

        ledger
            .annotate(id, vec![Annotation::new(product, bbox())])
            .unwrap();
        ledger
            .mark_exported(id, &BundleId::from_timestamp(Utc::now()))
            .unwrap();

        assert_eq!(ledger.confirm(&checksum), SyncOutcome::Synced);
        assert_eq!(ledger.confirm(&checksum), SyncOutcome::AlreadySynced);
        assert_eq!(
            ledger.confirm(&Checksum::of_bytes(b"elsewhere")),
            SyncOutcome::Unknown
        );

        let image = ledger.get(id).unwrap();
        assert_eq!(image.sync_state, SyncState::Synced);
        assert!(image.synced_at.is_some());

        // Synced images stay synced through further export attempts.
        assert_eq!(
            ledger
                .mark_exported(id, &BundleId::from_timestamp(Utc::now()))
                .unwrap(),
            SyncState::Synced
        );
    }

    #[test]
    fn reopen_clears_sync_markers() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let (mut ledger, product) = new_ledger(temp.path());
        let id = ledger.capture_bytes("a.jpg", b"a").unwrap();
        let checksum = ledger.get(id).unwrap().checksum.clone();
        ledger
            .annotate(id, vec![Annotation::new(product, bbox())])
            .unwrap();
        ledger
            .mark_exported(id, &BundleId::from_timestamp(Utc::now()))
            .unwrap();
        ledger.confirm(&checksum);

        assert_eq!(ledger.reopen(id).unwrap(), SyncState::Annotated);
        let image = ledger.get(id).unwrap();
        assert!(image.synced_at.is_none());
        assert!(image.exported_in.is_none());
    }

    #[test]
    fn add_product_reuses_names() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let (mut ledger, product) = new_ledger(temp.path());
        assert_eq!(ledger.add_product(" SKOL 350ml ").unwrap(), product);
        let other = ledger.add_product("Coca-Cola 2L").unwrap();
        assert_ne!(other, product);
        assert_eq!(ledger.catalog().len(), 2);
    }

    #[test]
    fn open_rejects_duplicate_image_ids() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let (mut ledger, _) = new_ledger(temp.path());
        ledger.capture_bytes("a.jpg", b"a").unwrap();

        let path = temp.path().join(LEDGER_FILE);
        let mut value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        let image = value["images"][0].clone();
        value["images"].as_array_mut().unwrap().push(image);
        fs::write(&path, serde_json::to_string(&value).unwrap()).unwrap();

        assert!(matches!(
            Ledger::open(temp.path()),
            Err(ShrinkError::LedgerCorrupt { .. })
        ));
    }
}
