//! Training-side views of a dataset store.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use super::report::{ClassStats, DatasetStats};
use super::{DatasetEntry, DatasetStore, DATA_YAML_FILE, IMAGES_DIR, LABELS_DIR};
use crate::error::ShrinkError;
use crate::ir::fsutil::write_atomic;
use crate::ir::labels::{
    collect_files_with_extensions, parse_label_line, render_data_yaml, yaml_single_quoted,
    IMAGE_EXTENSIONS, LABEL_EXTENSION,
};
use crate::ir::{Checksum, ClassId};
use crate::validation::{IssueCode, IssueContext, ValidationIssue, ValidationReport};

/// Which entries a training run consumed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrainingSelection {
    /// Every entry, re-stamping ones trained before.
    All,
    /// Only entries not yet marked.
    Untrained,
    /// Entries with at least one box of these classes.
    Classes(Vec<ClassId>),
    Checksums(Vec<Checksum>),
}

impl TrainingSelection {
    fn matches(&self, entry: &DatasetEntry) -> bool {
        match self {
            TrainingSelection::All => true,
            TrainingSelection::Untrained => !entry.trained,
            TrainingSelection::Classes(ids) => entry.class_ids.iter().any(|id| ids.contains(id)),
            TrainingSelection::Checksums(sums) => sums.contains(&entry.checksum),
        }
    }
}

/// Per-class image and box counts, with the trained/untrained split.
pub fn class_stats(store: &DatasetStore) -> DatasetStats {
    let state = store.snapshot();
    let mut per_class: BTreeMap<ClassId, ClassStats> = state
        .classes()
        .iter()
        .map(|class| {
            (
                class.id,
                ClassStats {
                    id: class.id,
                    name: class.name.clone(),
                    images: 0,
                    annotations: 0,
                    trained: 0,
                    untrained: 0,
                },
            )
        })
        .collect();

    let mut stats = DatasetStats::default();
    for entry in state.entries() {
        stats.images += 1;
        stats.annotations += entry.annotation_count;
        if entry.trained {
            stats.trained += 1;
        } else {
            stats.untrained += 1;
        }

        if let Some(class) = per_class.get_mut(&entry.class_id) {
            class.images += 1;
            if entry.trained {
                class.trained += 1;
            } else {
                class.untrained += 1;
            }
        }
        for id in &entry.class_ids {
            if let Some(class) = per_class.get_mut(id) {
                class.annotations += 1;
            }
        }
    }

    stats.classes = per_class.into_values().collect();
    stats
}

/// Flags the selected entries as consumed by a training run.
///
/// Returns the number of entries updated. Sync states on devices are not
/// affected; training status lives only in the central store.
pub fn mark_trained(
    store: &DatasetStore,
    selection: &TrainingSelection,
    at: DateTime<Utc>,
) -> Result<usize, ShrinkError> {
    let mut guard = store.lock()?;
    let mut updated = 0;
    for entry in guard.entries_mut().iter_mut() {
        if selection.matches(entry) {
            entry.trained = true;
            entry.trained_at = Some(at);
            updated += 1;
        }
    }
    if updated > 0 {
        guard.persist_entries()?;
    }
    tracing::info!(updated, "entries marked as trained");
    Ok(updated)
}

/// Pins `name` to `id` in the store's class index.
pub fn register_class(store: &DatasetStore, id: ClassId, name: &str) -> Result<(), ShrinkError> {
    let mut guard = store.lock()?;
    if guard.state().classes().get(name.trim()) == Some(id) {
        return Ok(());
    }
    guard.classes_mut().register(id, name)?;
    guard.persist_classes()?;
    tracing::info!(class_id = %id, name = name.trim(), "class registered");
    Ok(())
}

/// Writes `data.yaml` for the training pipeline and returns its path.
pub fn write_data_yaml(store: &DatasetStore) -> Result<PathBuf, ShrinkError> {
    let guard = store.lock()?;
    let names = guard.state().classes().names_by_id();

    let mut yaml = format!(
        "path: {}\ntrain: {}\nval: {}\nnc: {}\n",
        yaml_single_quoted(&guard.root().to_string_lossy()),
        IMAGES_DIR,
        IMAGES_DIR,
        names.len()
    );
    yaml.push_str(&render_data_yaml(
        names
            .iter()
            .enumerate()
            .map(|(i, name)| (ClassId::new(i as u32), name.as_str())),
    ));

    let path = guard.root().join(DATA_YAML_FILE);
    write_atomic(&path, yaml.as_bytes())?;
    tracing::info!(path = %path.display(), classes = names.len(), "data.yaml written");
    Ok(path)
}

/// Cross-checks the index files against the image and label trees.
pub fn verify_store(store: &DatasetStore) -> Result<ValidationReport, ShrinkError> {
    let root = store.root();
    let state = store.snapshot();
    let mut report = ValidationReport::new();

    let mut referenced_images: HashSet<PathBuf> = HashSet::new();
    let mut referenced_labels: HashSet<PathBuf> = HashSet::new();

    for entry in state.entries() {
        let context = || IssueContext::Entry {
            checksum: entry.checksum.short().to_string(),
        };
        referenced_images.insert(root.join(&entry.image_path));
        referenced_labels.insert(root.join(&entry.label_path));

        if !root.join(&entry.image_path).is_file() {
            report.add(ValidationIssue::error(
                IssueCode::MissingImageFile,
                format!("Image {} is missing", entry.image_path.display()),
                context(),
            ));
        }

        let label_path = root.join(&entry.label_path);
        let content = match fs::read_to_string(&label_path) {
            Ok(content) => content,
            Err(_) => {
                report.add(ValidationIssue::error(
                    IssueCode::MissingLabelFile,
                    format!("Label file {} is missing", entry.label_path.display()),
                    context(),
                ));
                continue;
            }
        };

        let mut rows = 0;
        for (idx, line) in content.lines().enumerate() {
            match parse_label_line(line, &label_path, idx + 1) {
                Ok(Some(row)) => {
                    rows += 1;
                    if state.classes().name(row.class_id).is_none() {
                        report.add(ValidationIssue::error(
                            IssueCode::UnknownClassId,
                            format!("Line {} uses unknown class {}", idx + 1, row.class_id),
                            context(),
                        ));
                    }
                }
                Ok(None) => {}
                Err(err) => report.add(ValidationIssue::error(
                    IssueCode::InvalidLabelLine,
                    err.to_string(),
                    context(),
                )),
            }
        }
        if rows != entry.annotation_count {
            report.add(ValidationIssue::warning(
                IssueCode::AnnotationCountMismatch,
                format!(
                    "Label file has {} box(es), entry records {}",
                    rows, entry.annotation_count
                ),
                context(),
            ));
        }
    }

    for file in collect_files_with_extensions(&root.join(IMAGES_DIR), &IMAGE_EXTENSIONS)? {
        if !referenced_images.contains(&file) {
            report.add(ValidationIssue::warning(
                IssueCode::UntrackedFile,
                "Image is not referenced by any entry",
                IssueContext::File {
                    path: relative(root, &file),
                },
            ));
        }
    }
    for file in collect_files_with_extensions(&root.join(LABELS_DIR), &[LABEL_EXTENSION])? {
        if !referenced_labels.contains(&file) {
            report.add(ValidationIssue::warning(
                IssueCode::OrphanLabel,
                "Label file is not referenced by any entry",
                IssueContext::File {
                    path: relative(root, &file),
                },
            ));
        }
    }

    Ok(report)
}

fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}
