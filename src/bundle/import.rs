//! Merging export bundles into the central dataset store.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};

use super::report::{MergeReport, NewClass, RejectReason, RejectedEntry};
use super::{load_bundle, LoadedBundle, ManifestEntry};
use crate::dataset::{
    class_dir_name, ClassIndex, DatasetEntry, DatasetStore, MergeGuard, IMAGES_DIR, LABELS_DIR,
};
use crate::error::ShrinkError;
use crate::ir::fsutil::{copy_atomic, write_atomic};
use crate::ir::labels::{format_label_line, LABEL_EXTENSION};
use crate::ir::{Checksum, NormalizedBox};
use crate::ledger::{SyncOutcome, SyncSink};

enum EntryOutcome {
    Imported(Vec<NewClass>),
    /// Same image, different annotations: the stored entry was replaced.
    Corrected(Vec<NewClass>),
    Duplicate,
}

struct Rejection {
    reason: RejectReason,
    message: String,
}

impl Rejection {
    fn new(reason: RejectReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

/// Merges one bundle into `store`.
///
/// The bundle is structurally validated before anything is written; a
/// malformed bundle fails as a whole. After that each entry is its own
/// transaction: a rejected entry leaves no files behind and does not affect
/// its siblings. An entry whose image and annotations both match the store
/// counts as a duplicate and is confirmed like a fresh import, so replaying a
/// bundle is safe and changes nothing on disk. A known image arriving with
/// different annotations is a correction: its label file and entry are
/// replaced.
///
/// When `sink` is given, every imported, corrected or duplicate checksum is
/// confirmed to it as soon as its entry commits.
pub fn import_bundle(
    bundle_dir: &Path,
    store: &DatasetStore,
    mut sink: Option<&mut dyn SyncSink>,
) -> Result<MergeReport, ShrinkError> {
    let bundle = load_bundle(bundle_dir)?;
    let mut report = MergeReport::new(bundle.manifest.bundle_id.clone());
    let imported_at = Utc::now();

    let mut guard = store.lock()?;
    tracing::info!(
        bundle_id = %bundle.manifest.bundle_id,
        entries = bundle.manifest.entries.len(),
        "merging bundle"
    );

    for entry in &bundle.manifest.entries {
        let result = merge_entry(&mut guard, &bundle, entry, imported_at);
        match result {
            Ok(EntryOutcome::Imported(new_classes)) => {
                tracing::debug!(checksum = entry.checksum.short(), "entry imported");
                report.imported.push(entry.checksum.clone());
                report.new_classes.extend(new_classes);
            }
            Ok(EntryOutcome::Corrected(new_classes)) => {
                tracing::info!(checksum = entry.checksum.short(), "entry annotations corrected");
                report.corrected.push(entry.checksum.clone());
                report.new_classes.extend(new_classes);
            }
            Ok(EntryOutcome::Duplicate) => {
                tracing::debug!(checksum = entry.checksum.short(), "entry already in dataset");
                report.duplicates.push(entry.checksum.clone());
            }
            Err(rejection) => {
                tracing::warn!(
                    image_id = %entry.image_id,
                    checksum = entry.checksum.short(),
                    reason = %rejection.reason,
                    "entry rejected: {}",
                    rejection.message
                );
                report.rejected.push(RejectedEntry {
                    image_id: entry.image_id,
                    checksum: entry.checksum.clone(),
                    reason: rejection.reason,
                    message: rejection.message,
                });
                continue;
            }
        }

        report.confirmed.push(entry.checksum.clone());
        if let Some(sink) = sink.as_deref_mut() {
            match sink.confirm_synced(&entry.checksum) {
                Ok(SyncOutcome::Synced | SyncOutcome::AlreadySynced) => {}
                Ok(other) => tracing::debug!(
                    checksum = entry.checksum.short(),
                    outcome = ?other,
                    "sync confirmation not applied"
                ),
                Err(err) => tracing::warn!(
                    checksum = entry.checksum.short(),
                    "sync confirmation failed: {err}"
                ),
            }
        }
    }
    drop(guard);

    if let Some(sink) = sink {
        sink.flush()?;
    }

    tracing::info!(
        bundle_id = %report.bundle_id,
        imported = report.imported.len(),
        corrected = report.corrected.len(),
        duplicates = report.duplicates.len(),
        rejected = report.rejected.len(),
        new_classes = report.new_classes.len(),
        "bundle merged"
    );
    Ok(report)
}

fn merge_entry(
    guard: &mut MergeGuard<'_>,
    bundle: &LoadedBundle,
    entry: &ManifestEntry,
    imported_at: DateTime<Utc>,
) -> Result<EntryOutcome, Rejection> {
    let src = bundle.image_path(entry);
    if !src.is_file() {
        return Err(Rejection::new(
            RejectReason::MissingImage,
            format!("{} is not in the bundle", entry.file_name),
        ));
    }
    let actual = Checksum::of_file(&src)
        .map_err(|err| Rejection::new(RejectReason::Io, format!("cannot read image: {err}")))?;
    if actual != entry.checksum {
        return Err(Rejection::new(
            RejectReason::ChecksumMismatch,
            format!(
                "image content hashes to {}, manifest says {}",
                actual.short(),
                entry.checksum.short()
            ),
        ));
    }

    let boxes = resolve_annotations(bundle, entry)?;

    // Resolve classes on a copy; the store's index only changes on commit.
    let mut staged = guard.state().classes().clone();
    let mut new_classes = Vec::new();
    let mut class_ids = Vec::with_capacity(boxes.len());
    for (name, _) in &boxes {
        let (id, allocated) = staged.resolve_or_allocate(name);
        if allocated {
            new_classes.push(NewClass {
                id,
                name: name.to_string(),
            });
        }
        class_ids.push(id);
    }

    let mut label = String::new();
    for ((_, bbox), class_id) in boxes.iter().zip(&class_ids) {
        label.push_str(&format_label_line(*class_id, bbox));
        label.push('\n');
    }

    let existing = guard
        .state()
        .entries()
        .iter()
        .position(|e| e.checksum == entry.checksum);
    let previous = existing.map(|idx| guard.state().entries()[idx].clone());
    let previous_label = previous
        .as_ref()
        .and_then(|prev| fs::read(guard.root().join(&prev.label_path)).ok());
    if let Some(prev) = &previous {
        if prev.class_ids == class_ids && previous_label.as_deref() == Some(label.as_bytes()) {
            return Ok(EntryOutcome::Duplicate);
        }
    }
    for class in &new_classes {
        tracing::info!(class_id = %class.id, name = %class.name, "class allocated");
    }

    let primary = class_ids[0];
    let class_dir = class_dir_name(boxes[0].0, primary);
    let ext = Path::new(&entry.file_name)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    let image_rel = Path::new(IMAGES_DIR)
        .join(&class_dir)
        .join(format!("{}.{}", entry.checksum, ext));
    let label_rel = Path::new(LABELS_DIR)
        .join(&class_dir)
        .join(format!("{}.{}", entry.checksum, LABEL_EXTENSION));

    let image_abs = guard.root().join(&image_rel);
    let label_abs = guard.root().join(&label_rel);
    let image_in_place = previous
        .as_ref()
        .is_some_and(|prev| prev.image_path == image_rel && image_abs.is_file());
    let label_in_place = previous
        .as_ref()
        .is_some_and(|prev| prev.label_path == label_rel);

    // Puts back whatever this entry overwrote or added.
    let undo = |image_abs: &Path, label_abs: &Path| {
        if !image_in_place {
            let _ = fs::remove_file(image_abs);
        }
        match (&previous_label, label_in_place) {
            (Some(bytes), true) => {
                let _ = write_atomic(label_abs, bytes);
            }
            _ => {
                let _ = fs::remove_file(label_abs);
            }
        }
    };

    let written = if image_in_place {
        Ok(())
    } else {
        copy_atomic(&src, &image_abs).map(|_| ())
    }
    .and_then(|_| write_atomic(&label_abs, label.as_bytes()));
    if let Err(err) = written {
        undo(&image_abs, &label_abs);
        return Err(Rejection::new(
            RejectReason::Io,
            format!("cannot write dataset files: {err}"),
        ));
    }

    let record = DatasetEntry {
        checksum: entry.checksum.clone(),
        image_path: image_rel.clone(),
        label_path: label_rel.clone(),
        class_id: primary,
        annotation_count: class_ids.len(),
        class_ids,
        source_bundle: bundle.manifest.bundle_id.clone(),
        device_id: entry.device_id.clone(),
        imported_at,
        trained: false,
        trained_at: None,
    };

    commit(guard, staged, record, existing, !new_classes.is_empty()).map_err(|err| {
        undo(&image_abs, &label_abs);
        Rejection::new(RejectReason::Io, format!("cannot update index: {err}"))
    })?;

    match previous {
        Some(prev) => {
            // The entry moved to another class partition; drop the old copies.
            if prev.image_path != image_rel {
                remove_quietly(&[&guard.root().join(&prev.image_path)]);
            }
            if prev.label_path != label_rel {
                remove_quietly(&[&guard.root().join(&prev.label_path)]);
            }
            Ok(EntryOutcome::Corrected(new_classes))
        }
        None => Ok(EntryOutcome::Imported(new_classes)),
    }
}

/// Validates boxes and maps product IDs to names through the bundle catalog.
fn resolve_annotations<'b>(
    bundle: &'b LoadedBundle,
    entry: &ManifestEntry,
) -> Result<Vec<(&'b str, NormalizedBox)>, Rejection> {
    if entry.annotations.is_empty() {
        return Err(Rejection::new(
            RejectReason::InvalidAnnotation,
            "entry has no annotations",
        ));
    }

    let mut boxes = Vec::with_capacity(entry.annotations.len());
    for annotation in &entry.annotations {
        let bbox = annotation
            .bbox
            .validate()
            .map_err(|err| Rejection::new(RejectReason::InvalidAnnotation, err.to_string()))?;
        let name = bundle.catalog.get(&annotation.product_id).ok_or_else(|| {
            Rejection::new(
                RejectReason::UnknownProduct,
                format!("product {} is not in the bundle catalog", annotation.product_id),
            )
        })?;
        boxes.push((name.as_str(), bbox));
    }
    Ok(boxes)
}

/// Installs the staged index and the entry, persisting both files.
///
/// `replace` is the position of the entry being corrected, if any. On
/// failure the in-memory state is rolled back and the on-disk files are left
/// as they were before this entry.
fn commit(
    guard: &mut MergeGuard<'_>,
    staged: ClassIndex,
    record: DatasetEntry,
    replace: Option<usize>,
    classes_changed: bool,
) -> Result<(), ShrinkError> {
    let previous_classes = std::mem::replace(guard.classes_mut(), staged);
    let previous_entry = match replace {
        Some(idx) => Some(std::mem::replace(&mut guard.entries_mut()[idx], record)),
        None => {
            guard.entries_mut().push(record);
            None
        }
    };

    let persisted = (|| {
        if classes_changed {
            guard.persist_classes()?;
        }
        guard.persist_entries()
    })();

    if let Err(err) = persisted {
        match (replace, previous_entry) {
            (Some(idx), Some(entry)) => guard.entries_mut()[idx] = entry,
            _ => {
                guard.entries_mut().pop();
            }
        }
        *guard.classes_mut() = previous_classes;
        if classes_changed {
            // Best effort: put the previous index back on disk.
            let _ = guard.persist_classes();
        }
        return Err(err);
    }
    Ok(())
}

fn remove_quietly(paths: &[&Path]) {
    for path in paths {
        let _ = fs::remove_file(path);
    }
}
