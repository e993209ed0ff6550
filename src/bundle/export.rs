//! Writing export bundles from a device ledger.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use super::report::{ExportIssue, ExportIssueCode, ExportReport};
use super::{
    Manifest, ManifestEntry, BUNDLE_FORMAT_VERSION, BUNDLE_IMAGES_DIR, CATALOG_FILE, MANIFEST_FILE,
};
use crate::error::ShrinkError;
use crate::ir::fsutil::{copy_atomic, write_json_atomic};
use crate::ir::{BundleId, Checksum, CollectedImage, ImageId, Product, SyncState};
use crate::ledger::Ledger;

/// Collision suffixes tried before giving up on a bundle directory name.
const MAX_BUNDLE_SUFFIX: u32 = 1000;

#[derive(Clone, Debug, Default)]
pub struct ExportOptions {
    /// Bundle creation time; defaults to now.
    pub created_at: Option<DateTime<Utc>>,
    /// Export exactly these images instead of every ANNOTATED one.
    pub images: Option<Vec<ImageId>>,
}

/// A bundle directory as written.
#[derive(Clone, Debug)]
pub struct ExportBundle {
    pub id: BundleId,
    pub dir: PathBuf,
    pub manifest: Manifest,
    pub catalog: Vec<Product>,
}

#[derive(Clone, Debug)]
pub struct ExportOutcome {
    /// `None` when nothing was eligible; no directory is created then.
    pub bundle: Option<ExportBundle>,
    pub report: ExportReport,
}

/// Packages annotated images into a new bundle under `out_dir`.
///
/// Images that fail to copy stay ANNOTATED and are reported; the rest of
/// the bundle is still written. Images in the written manifest are marked
/// EXPORTED and the ledger is saved.
pub fn export_bundle(
    ledger: &mut Ledger,
    out_dir: &Path,
    opts: &ExportOptions,
) -> Result<ExportOutcome, ShrinkError> {
    let created_at = opts.created_at.unwrap_or_else(Utc::now);
    let mut report = ExportReport::default();

    let candidates = select_images(ledger, opts, &mut report);
    report.selected = candidates.len();
    if candidates.is_empty() {
        tracing::info!("no images eligible for export");
        return Ok(ExportOutcome {
            bundle: None,
            report,
        });
    }

    fs::create_dir_all(out_dir)?;
    let (bundle_id, bundle_dir) = reserve_bundle_dir(out_dir, created_at)?;
    let images_dir = bundle_dir.join(BUNDLE_IMAGES_DIR);
    fs::create_dir(&images_dir)?;

    let mut entries = Vec::with_capacity(candidates.len());
    for image in &candidates {
        let src = ledger.image_path(image);
        let dst = images_dir.join(&image.file_name);
        match copy_verified(&src, &dst, &image.checksum) {
            Ok(()) => {
                tracing::debug!(image_id = %image.id, bundle_id = %bundle_id, "image added to bundle");
                entries.push(ManifestEntry::from_image(image));
            }
            Err((code, message)) => {
                tracing::warn!(image_id = %image.id, "{message}");
                report.add(ExportIssue::warning(code, image.id, message));
            }
        }
    }

    if entries.is_empty() {
        fs::remove_dir_all(&bundle_dir)?;
        tracing::warn!(bundle_id = %bundle_id, "every selected image failed; bundle discarded");
        return Ok(ExportOutcome {
            bundle: None,
            report,
        });
    }

    let catalog = ledger.catalog().to_vec();
    let manifest = Manifest {
        format_version: BUNDLE_FORMAT_VERSION,
        bundle_id: bundle_id.clone(),
        created_at,
        device_id: ledger.device_id().to_string(),
        entries,
    };
    write_json_atomic(&bundle_dir.join(CATALOG_FILE), &catalog)?;
    write_json_atomic(&bundle_dir.join(MANIFEST_FILE), &manifest)?;

    for entry in &manifest.entries {
        ledger.mark_exported(entry.image_id, &bundle_id)?;
        report.exported.push(entry.image_id);
    }
    ledger.save()?;
    report.bundle_id = Some(bundle_id.clone());

    tracing::info!(
        bundle_id = %bundle_id,
        images = manifest.entries.len(),
        dir = %bundle_dir.display(),
        "bundle exported"
    );

    Ok(ExportOutcome {
        bundle: Some(ExportBundle {
            id: bundle_id,
            dir: bundle_dir,
            manifest,
            catalog,
        }),
        report,
    })
}

fn select_images(
    ledger: &Ledger,
    opts: &ExportOptions,
    report: &mut ExportReport,
) -> Vec<CollectedImage> {
    let Some(ids) = &opts.images else {
        return ledger
            .images()
            .iter()
            .filter(|img| img.is_export_eligible())
            .cloned()
            .collect();
    };

    let mut selected: Vec<CollectedImage> = Vec::new();
    for &id in ids {
        if selected.iter().any(|img| img.id == id) {
            continue;
        }
        let Some(image) = ledger.get(id) else {
            report.add(ExportIssue::warning(
                ExportIssueCode::ImageNotFound,
                id,
                "image is not in the ledger",
            ));
            continue;
        };
        match image.sync_state {
            SyncState::Captured => report.add(ExportIssue::warning(
                ExportIssueCode::NotAnnotated,
                id,
                "image has no annotations",
            )),
            SyncState::Synced => report.add(ExportIssue::info(
                ExportIssueCode::AlreadySynced,
                id,
                "image is already synced; skipped",
            )),
            SyncState::Annotated | SyncState::Exported if image.annotations.is_empty() => {
                report.add(ExportIssue::warning(
                    ExportIssueCode::NotAnnotated,
                    id,
                    "image has no annotations",
                ))
            }
            SyncState::Annotated | SyncState::Exported => selected.push(image.clone()),
        }
    }
    selected
}

/// Creates `<out_dir>/<bundle_id>`, appending `-N` on collision.
fn reserve_bundle_dir(
    out_dir: &Path,
    created_at: DateTime<Utc>,
) -> Result<(BundleId, PathBuf), ShrinkError> {
    let base = BundleId::from_timestamp(created_at);
    let mut candidate = base.clone();
    for n in 1..=MAX_BUNDLE_SUFFIX {
        let dir = out_dir.join(candidate.as_str());
        match fs::create_dir(&dir) {
            Ok(()) => return Ok((candidate, dir)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                candidate = base.with_suffix(n);
            }
            Err(err) => return Err(err.into()),
        }
    }
    Err(ShrinkError::Io(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free bundle directory name for {base} in {}", out_dir.display()),
    )))
}

fn copy_verified(
    src: &Path,
    dst: &Path,
    expected: &Checksum,
) -> Result<(), (ExportIssueCode, String)> {
    if !src.is_file() {
        return Err((
            ExportIssueCode::MissingFile,
            format!("image file {} is missing", src.display()),
        ));
    }
    let actual = Checksum::of_file(src)
        .map_err(|err| (ExportIssueCode::CopyFailed, format!("cannot read image: {err}")))?;
    if &actual != expected {
        return Err((
            ExportIssueCode::ChecksumMismatch,
            format!(
                "image content changed since capture (expected {}, found {})",
                expected.short(),
                actual.short()
            ),
        ));
    }
    copy_atomic(src, dst)
        .map(|_| ())
        .map_err(|err| (ExportIssueCode::CopyFailed, format!("copy failed: {err}")))
}
