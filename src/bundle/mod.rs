//! Export bundles: the unit of transfer between a device and the central store.
//!
//! A bundle is a directory written once by the exporter and never modified:
//!
//! ```text
//! <bundle_id>/
//!   images/          image files, named as in the device ledger
//!   catalog.json     device catalog snapshot: [{ "id", "name" }]
//!   manifest.json    one entry per image, with checksums and annotations
//! ```
//!
//! The manifest is written last, so a directory without one is an
//! interrupted export and is refused by the importer.

mod export;
mod import;
mod report;

pub use export::{export_bundle, ExportBundle, ExportOptions, ExportOutcome};
pub use import::import_bundle;
pub use report::{
    ExportIssue, ExportIssueCode, ExportReport, ExportSeverity, MergeReport, NewClass,
    RejectReason, RejectedEntry, SyncReceipt,
};

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ShrinkError;
use crate::ir::labels::{has_extension, IMAGE_EXTENSIONS};
use crate::ir::{Annotation, BundleId, Checksum, CollectedImage, ImageId, NormalizedBox, Product, ProductId};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const CATALOG_FILE: &str = "catalog.json";
pub const BUNDLE_IMAGES_DIR: &str = "images";

pub const BUNDLE_FORMAT_VERSION: u32 = 1;

/// Bundle manifest as written to `manifest.json`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    pub bundle_id: BundleId,
    pub created_at: DateTime<Utc>,
    pub device_id: String,
    pub entries: Vec<ManifestEntry>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub image_id: ImageId,
    /// File name inside the bundle's `images/` directory.
    pub file_name: String,
    pub checksum: Checksum,
    pub captured_at: DateTime<Utc>,
    pub device_id: String,
    pub annotations: Vec<ManifestAnnotation>,
}

impl ManifestEntry {
    pub(crate) fn from_image(image: &CollectedImage) -> Self {
        Self {
            image_id: image.id,
            file_name: image.file_name.clone(),
            checksum: image.checksum.clone(),
            captured_at: image.captured_at,
            device_id: image.device_id.clone(),
            annotations: image
                .annotations
                .iter()
                .map(ManifestAnnotation::from)
                .collect(),
        }
    }
}

/// An annotation as carried in a manifest.
///
/// The box is kept raw so that one bad box rejects its entry on import
/// rather than the whole bundle.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ManifestAnnotation {
    pub product_id: ProductId,
    pub bbox: ManifestBox,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ManifestBox {
    pub x_center: f64,
    pub y_center: f64,
    pub width: f64,
    pub height: f64,
}

impl ManifestBox {
    pub fn validate(&self) -> Result<NormalizedBox, ShrinkError> {
        NormalizedBox::new(self.x_center, self.y_center, self.width, self.height)
    }
}

impl From<&Annotation> for ManifestAnnotation {
    fn from(annotation: &Annotation) -> Self {
        let (x_center, y_center, width, height) = annotation.bbox.to_cxcywh();
        Self {
            product_id: annotation.product_id,
            bbox: ManifestBox {
                x_center,
                y_center,
                width,
                height,
            },
        }
    }
}

/// A bundle that passed structural validation.
#[derive(Clone, Debug)]
pub struct LoadedBundle {
    pub root: PathBuf,
    pub manifest: Manifest,
    /// Device catalog, product ID → name.
    pub catalog: BTreeMap<ProductId, String>,
}

impl LoadedBundle {
    pub fn image_path(&self, entry: &ManifestEntry) -> PathBuf {
        self.root.join(BUNDLE_IMAGES_DIR).join(&entry.file_name)
    }
}

/// Parses manifest bytes without structural checks.
pub fn parse_manifest(bytes: &[u8]) -> Result<Manifest, serde_json::Error> {
    serde_json::from_slice(bytes)
}

/// Reads and structurally validates a bundle directory.
///
/// Fails with [`ShrinkError::BundleMalformed`] for anything that would make
/// the whole bundle untrustworthy. Per-entry problems (bad boxes, unknown
/// products, checksum mismatches) are left to the importer.
pub fn load_bundle(dir: &Path) -> Result<LoadedBundle, ShrinkError> {
    let malformed = |message: String| ShrinkError::BundleMalformed {
        path: dir.to_path_buf(),
        message,
    };

    let manifest_bytes = fs::read(dir.join(MANIFEST_FILE))
        .map_err(|err| malformed(format!("cannot read {MANIFEST_FILE}: {err}")))?;
    let manifest = parse_manifest(&manifest_bytes)
        .map_err(|err| malformed(format!("invalid {MANIFEST_FILE}: {err}")))?;

    let catalog_bytes = fs::read(dir.join(CATALOG_FILE))
        .map_err(|err| malformed(format!("cannot read {CATALOG_FILE}: {err}")))?;
    let products: Vec<Product> = serde_json::from_slice(&catalog_bytes)
        .map_err(|err| malformed(format!("invalid {CATALOG_FILE}: {err}")))?;

    check_manifest(&manifest).map_err(malformed)?;

    let mut catalog = BTreeMap::new();
    for product in products {
        if product.name.trim().is_empty() {
            return Err(malformed(format!("product {} has an empty name", product.id)));
        }
        if catalog.insert(product.id, product.name).is_some() {
            return Err(malformed(format!("duplicate catalog id {}", product.id)));
        }
    }

    Ok(LoadedBundle {
        root: dir.to_path_buf(),
        manifest,
        catalog,
    })
}

fn check_manifest(manifest: &Manifest) -> Result<(), String> {
    if manifest.format_version != BUNDLE_FORMAT_VERSION {
        return Err(format!(
            "unsupported format_version {} (expected {})",
            manifest.format_version, BUNDLE_FORMAT_VERSION
        ));
    }

    let mut file_names = HashSet::new();
    for entry in &manifest.entries {
        if !is_safe_file_name(&entry.file_name) {
            return Err(format!(
                "entry {} has unsafe file name '{}'",
                entry.image_id, entry.file_name
            ));
        }
        if !has_extension(Path::new(&entry.file_name), &IMAGE_EXTENSIONS) {
            return Err(format!(
                "entry {} is not an image file: '{}'",
                entry.image_id, entry.file_name
            ));
        }
        if !file_names.insert(entry.file_name.as_str()) {
            return Err(format!("file name '{}' listed twice", entry.file_name));
        }
        if !entry.checksum.is_well_formed() {
            return Err(format!(
                "entry {} has malformed checksum '{}'",
                entry.image_id,
                entry.checksum.as_str()
            ));
        }
    }
    Ok(())
}

/// A bare file name: one normal path component, not hidden.
pub(crate) fn is_safe_file_name(name: &str) -> bool {
    if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
        return false;
    }
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Fuzz-only entrypoint for manifest parsing and structural checks.
#[cfg(feature = "fuzzing")]
pub fn fuzz_parse_manifest(bytes: &[u8]) -> Result<(), String> {
    let manifest = parse_manifest(bytes).map_err(|err| err.to_string())?;
    check_manifest(&manifest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_bundle(dir: &Path, manifest: &str, catalog: &str) {
        fs::create_dir_all(dir.join(BUNDLE_IMAGES_DIR)).unwrap();
        fs::write(dir.join(MANIFEST_FILE), manifest).unwrap();
        fs::write(dir.join(CATALOG_FILE), catalog).unwrap();
    }

    fn manifest_json(file_name: &str, checksum: &str, version: u32) -> String {
        format!(
            r#"{{
                "format_version": {version},
                "bundle_id": "bundle-20240601T080000.000000Z",
                "created_at": "2024-06-01T08:00:00Z",
                "device_id": "cam-01",
                "entries": [{{
                    "image_id": 1,
                    "file_name": "{file_name}",
                    "checksum": "{checksum}",
                    "captured_at": "2024-06-01T07:00:00Z",
                    "device_id": "cam-01",
                    "annotations": [
                        {{ "product_id": 1, "bbox": {{ "x_center": 0.5, "y_center": 0.5, "width": 2.0, "height": 0.1 }} }}
                    ]
                }}]
            }}"#
        )
    }

    const CATALOG: &str = r#"[{ "id": 1, "name": "SKOL 350ml" }]"#;

    #[test]
    fn loads_well_formed_bundle_with_bad_box() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let checksum = Checksum::of_bytes(b"x");
        write_bundle(
            temp.path(),
            &manifest_json("img_000001.jpg", checksum.as_str(), 1),
            CATALOG,
        );

        let bundle = load_bundle(temp.path()).unwrap();
        assert_eq!(bundle.manifest.entries.len(), 1);
        assert_eq!(bundle.catalog.get(&ProductId::new(1)).unwrap(), "SKOL 350ml");
        // Out-of-range box survives loading; the importer rejects the entry.
        assert!(bundle.manifest.entries[0].annotations[0]
            .bbox
            .validate()
            .is_err());
    }

    #[test]
    fn missing_manifest_is_malformed() {
        let temp = tempfile::tempdir().expect("create temp dir");
        fs::write(temp.path().join(CATALOG_FILE), CATALOG).unwrap();
        assert!(matches!(
            load_bundle(temp.path()),
            Err(ShrinkError::BundleMalformed { .. })
        ));
    }

    #[test]
    fn unsupported_version_is_malformed() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let checksum = Checksum::of_bytes(b"x");
        write_bundle(
            temp.path(),
            &manifest_json("img_000001.jpg", checksum.as_str(), 7),
            CATALOG,
        );
        let err = load_bundle(temp.path()).unwrap_err();
        assert!(err.to_string().contains("format_version"));
    }

    #[test]
    fn path_traversal_is_malformed() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let checksum = Checksum::of_bytes(b"x");
        write_bundle(
            temp.path(),
            &manifest_json("../escape.jpg", checksum.as_str(), 1),
            CATALOG,
        );
        assert!(matches!(
            load_bundle(temp.path()),
            Err(ShrinkError::BundleMalformed { .. })
        ));
    }

    #[test]
    fn malformed_checksum_is_malformed() {
        let temp = tempfile::tempdir().expect("create temp dir");
        write_bundle(
            temp.path(),
            &manifest_json("img_000001.jpg", "not-a-digest", 1),
            CATALOG,
        );
        let err = load_bundle(temp.path()).unwrap_err();
        assert!(err.to_string().contains("malformed checksum"));
    }

    #[test]
    fn duplicate_catalog_ids_are_malformed() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let checksum = Checksum::of_bytes(b"x");
        write_bundle(
            temp.path(),
            &manifest_json("img_000001.jpg", checksum.as_str(), 1),
            r#"[{ "id": 1, "name": "A" }, { "id": 1, "name": "B" }]"#,
        );
        let err = load_bundle(temp.path()).unwrap_err();
        assert!(err.to_string().contains("duplicate catalog id"));
    }

    #[test]
    fn safe_file_names() {
        assert!(is_safe_file_name("img_000001.jpg"));
        assert!(!is_safe_file_name(""));
        assert!(!is_safe_file_name(".hidden.jpg"));
        assert!(!is_safe_file_name("a/b.jpg"));
        assert!(!is_safe_file_name("..\\b.jpg"));
        assert!(!is_safe_file_name("/etc/passwd"));
    }
}
