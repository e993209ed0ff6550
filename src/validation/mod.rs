//! Ledger validation.
//!
//! Checks a device ledger before export:
//! - Catalog quality (non-empty, distinct product names)
//! - References (every annotation names a catalog product)
//! - Sync states agree with annotations and bundle markers
//! - Image files exist on disk and, optionally, still match their checksums
//!
//! Dataset stores are checked by `dataset::verify_store`, which reports
//! through the same types.

mod report;

pub use report::{IssueCode, IssueContext, Severity, ValidationIssue, ValidationReport};

use std::collections::{HashMap, HashSet};

use crate::ir::labels::{collect_files_with_extensions, IMAGE_EXTENSIONS};
use crate::ir::{Checksum, ImageId, ProductId, SyncState};
use crate::ledger::{Ledger, IMAGES_DIR};

/// Options for validation behavior.
#[derive(Clone, Debug, Default)]
pub struct ValidateOptions {
    /// If true, treat warnings as errors.
    pub strict: bool,
    /// Re-hash every image file. Slow on large ledgers.
    pub verify_checksums: bool,
}

/// Validates a ledger and returns a report of all issues found.
pub fn validate_ledger(ledger: &Ledger, opts: &ValidateOptions) -> ValidationReport {
    let mut report = ValidationReport::new();

    let product_ids: HashSet<ProductId> = ledger.catalog().iter().map(|p| p.id).collect();

    validate_catalog(ledger, &mut report);
    validate_images(ledger, &product_ids, opts, &mut report);
    find_untracked_files(ledger, &mut report);

    report
}

fn validate_catalog(ledger: &Ledger, report: &mut ValidationReport) {
    let mut seen_names: HashMap<&str, ProductId> = HashMap::new();

    for product in ledger.catalog() {
        let id = product.id.as_u64();

        if product.name.trim().is_empty() {
            report.add(ValidationIssue::warning(
                IssueCode::EmptyProductName,
                "Empty product name",
                IssueContext::Product { id },
            ));
            continue;
        }

        if let Some(first_id) = seen_names.get(product.name.as_str()) {
            report.add(ValidationIssue::warning(
                IssueCode::DuplicateProductName,
                format!(
                    "Duplicate product name '{}' (also used by product {})",
                    product.name, first_id
                ),
                IssueContext::Product { id },
            ));
        } else {
            seen_names.insert(&product.name, product.id);
        }
    }
}

fn validate_images(
    ledger: &Ledger,
    product_ids: &HashSet<ProductId>,
    opts: &ValidateOptions,
    report: &mut ValidationReport,
) {
    let mut seen_checksums: HashMap<&Checksum, ImageId> = HashMap::new();

    for image in ledger.images() {
        let id = image.id.as_u64();

        if let Some(first) = seen_checksums.get(&image.checksum) {
            report.add(ValidationIssue::error(
                IssueCode::DuplicateChecksum,
                format!("Same content as image {}", first),
                IssueContext::Image { id },
            ));
        } else {
            seen_checksums.insert(&image.checksum, image.id);
        }

        for annotation in &image.annotations {
            if !product_ids.contains(&annotation.product_id) {
                report.add(ValidationIssue::error(
                    IssueCode::MissingProductRef,
                    format!(
                        "Annotation references non-existent product {}",
                        annotation.product_id
                    ),
                    IssueContext::Image { id },
                ));
            }
        }

        validate_sync_state(image, report);

        let path = ledger.image_path(image);
        if !path.is_file() {
            report.add(ValidationIssue::error(
                IssueCode::MissingImageFile,
                format!("Image file {} is missing", path.display()),
                IssueContext::Image { id },
            ));
            continue;
        }

        if opts.verify_checksums {
            match Checksum::of_file(&path) {
                Ok(actual) if actual == image.checksum => {}
                Ok(actual) => report.add(ValidationIssue::error(
                    IssueCode::ChecksumMismatch,
                    format!(
                        "File content changed (recorded {}, found {})",
                        image.checksum.short(),
                        actual.short()
                    ),
                    IssueContext::Image { id },
                )),
                Err(err) => report.add(ValidationIssue::error(
                    IssueCode::MissingImageFile,
                    format!("Cannot read {}: {}", path.display(), err),
                    IssueContext::Image { id },
                )),
            }
        }
    }
}

fn validate_sync_state(image: &crate::ir::CollectedImage, report: &mut ValidationReport) {
    let id = image.id.as_u64();
    let context = || IssueContext::Image { id };

    match image.sync_state {
        SyncState::Captured if !image.annotations.is_empty() => {
            report.add(ValidationIssue::warning(
                IssueCode::CapturedWithAnnotations,
                format!(
                    "CAPTURED image carries {} annotation(s)",
                    image.annotations.len()
                ),
                context(),
            ));
        }
        state @ (SyncState::Annotated | SyncState::Exported | SyncState::Synced)
            if image.annotations.is_empty() =>
        {
            report.add(ValidationIssue::error(
                IssueCode::StateWithoutAnnotations,
                format!("{} image has no annotations", state),
                context(),
            ));
        }
        _ => {}
    }

    let exported = matches!(image.sync_state, SyncState::Exported | SyncState::Synced);
    if exported && image.exported_in.is_none() {
        report.add(ValidationIssue::warning(
            IssueCode::SyncMarkerMismatch,
            format!("{} image does not record its bundle", image.sync_state),
            context(),
        ));
    }
    if !exported && image.exported_in.is_some() {
        report.add(ValidationIssue::warning(
            IssueCode::SyncMarkerMismatch,
            format!("{} image still records a bundle", image.sync_state),
            context(),
        ));
    }
    if (image.sync_state == SyncState::Synced) != image.synced_at.is_some() {
        report.add(ValidationIssue::warning(
            IssueCode::SyncMarkerMismatch,
            format!(
                "{} image {} a sync timestamp",
                image.sync_state,
                if image.synced_at.is_some() { "has" } else { "lacks" }
            ),
            context(),
        ));
    }
}

fn find_untracked_files(ledger: &Ledger, report: &mut ValidationReport) {
    let images_dir = ledger.root().join(IMAGES_DIR);
    let tracked: HashSet<&str> = ledger
        .images()
        .iter()
        .map(|img| img.file_name.as_str())
        .collect();

    let files = match collect_files_with_extensions(&images_dir, &IMAGE_EXTENSIONS) {
        Ok(files) => files,
        Err(err) => {
            report.add(ValidationIssue::error(
                IssueCode::MissingImageFile,
                err.to_string(),
                IssueContext::Ledger,
            ));
            return;
        }
    };

    for file in files {
        let name = file
            .strip_prefix(&images_dir)
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| file.display().to_string());
        if !tracked.contains(name.as_str()) {
            report.add(ValidationIssue::warning(
                IssueCode::UntrackedFile,
                "Image file is not tracked by the ledger",
                IssueContext::File { path: name },
            ));
        }
    }
}
