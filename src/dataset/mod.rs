//! Central training dataset assembled from merged bundles.
//!
//! ```text
//! <root>/
//!   classes.json                       class index
//!   entries.json                       one record per merged image
//!   images/<class_dir>/<checksum>.<ext>
//!   labels/<class_dir>/<checksum>.txt
//!   data.yaml                          written on request for training
//!   .merge.lock                        present while a merge runs
//! ```
//!
//! Entries are partitioned by the class of their first annotation. Any
//! number of importers may share a store: every mutation runs under the
//! merge lock, which combines an in-process mutex with a lock file so that
//! separate processes serialize too.

mod assemble;
mod class_index;
mod report;

pub use assemble::{
    class_stats, mark_trained, register_class, verify_store, write_data_yaml, TrainingSelection,
};
pub use class_index::{ClassEntry, ClassIndex, MAX_REGISTERED_CLASS_ID};
pub use report::{ClassStats, DatasetStats};

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use crate::error::ShrinkError;
use crate::ir::fsutil::{read_json, write_json_atomic};
use crate::ir::{BundleId, Checksum, ClassId};

pub const CLASSES_FILE: &str = "classes.json";
pub const ENTRIES_FILE: &str = "entries.json";
pub const DATA_YAML_FILE: &str = "data.yaml";
pub const IMAGES_DIR: &str = "images";
pub const LABELS_DIR: &str = "labels";
pub const LOCK_FILE: &str = ".merge.lock";

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(5000);
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// One merged image in the training dataset.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DatasetEntry {
    pub checksum: Checksum,
    /// Image path relative to the store root.
    pub image_path: PathBuf,
    /// Label path relative to the store root.
    pub label_path: PathBuf,
    /// Class of the first annotation; decides the directory partition.
    pub class_id: ClassId,
    /// Class of every box, in label file order.
    pub class_ids: Vec<ClassId>,
    pub annotation_count: usize,
    pub source_bundle: BundleId,
    pub device_id: String,
    pub imported_at: DateTime<Utc>,
    /// Set once a training run has consumed this entry.
    #[serde(rename = "treinada", default)]
    pub trained: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trained_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct EntriesFile {
    entries: Vec<DatasetEntry>,
}

/// In-memory view of the store's index files.
#[derive(Clone, Debug, Default)]
pub struct StoreState {
    classes: ClassIndex,
    entries: Vec<DatasetEntry>,
}

impl StoreState {
    pub fn classes(&self) -> &ClassIndex {
        &self.classes
    }

    pub fn entries(&self) -> &[DatasetEntry] {
        &self.entries
    }

    pub fn find(&self, checksum: &Checksum) -> Option<&DatasetEntry> {
        self.entries.iter().find(|e| &e.checksum == checksum)
    }

    fn load(root: &Path) -> Result<Self, ShrinkError> {
        let classes_path = root.join(CLASSES_FILE);
        let classes: ClassIndex = if classes_path.is_file() {
            read_json(&classes_path)?
        } else {
            ClassIndex::new()
        };
        classes.check().map_err(|message| ShrinkError::ClassIndexCorrupt {
            path: classes_path.clone(),
            message,
        })?;

        let entries_path = root.join(ENTRIES_FILE);
        let entries = if entries_path.is_file() {
            read_json::<EntriesFile>(&entries_path)?.entries
        } else {
            Vec::new()
        };

        let mut seen = std::collections::HashSet::new();
        for entry in &entries {
            if !seen.insert(&entry.checksum) {
                return Err(ShrinkError::ClassIndexCorrupt {
                    path: entries_path,
                    message: format!("checksum {} appears twice", entry.checksum),
                });
            }
            if let Some(missing) = entry
                .class_ids
                .iter()
                .chain(std::iter::once(&entry.class_id))
                .find(|id| classes.name(**id).is_none())
            {
                return Err(ShrinkError::ClassIndexCorrupt {
                    path: classes_path,
                    message: format!(
                        "entry {} references unknown class {}",
                        entry.checksum.short(),
                        missing
                    ),
                });
            }
        }

        Ok(Self { classes, entries })
    }
}

#[derive(Debug)]
struct StoreInner {
    root: PathBuf,
    lock_timeout: Duration,
    state: Mutex<StoreState>,
}

/// Handle to a dataset store on disk.
///
/// Cheap to clone; clones share the same in-process lock.
#[derive(Clone, Debug)]
pub struct DatasetStore {
    inner: Arc<StoreInner>,
}

impl DatasetStore {
    /// Opens (creating if needed) the store at `root`.
    pub fn open(root: &Path) -> Result<Self, ShrinkError> {
        Self::open_with_timeout(root, DEFAULT_LOCK_TIMEOUT)
    }

    pub fn open_with_timeout(root: &Path, lock_timeout: Duration) -> Result<Self, ShrinkError> {
        fs::create_dir_all(root.join(IMAGES_DIR))?;
        fs::create_dir_all(root.join(LABELS_DIR))?;
        let state = StoreState::load(root)?;
        tracing::debug!(
            root = %root.display(),
            classes = state.classes.len(),
            entries = state.entries.len(),
            "dataset store opened"
        );
        Ok(Self {
            inner: Arc::new(StoreInner {
                root: root.to_path_buf(),
                lock_timeout,
                state: Mutex::new(state),
            }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Copy of the current in-memory state.
    pub fn snapshot(&self) -> StoreState {
        self.inner.state.lock().clone()
    }

    /// Takes the merge lock and reloads the index files from disk.
    ///
    /// Waits up to the store's lock timeout for other holders, in this
    /// process or another, before failing with [`ShrinkError::MergeLocked`].
    pub fn lock(&self) -> Result<MergeGuard<'_>, ShrinkError> {
        let lock_path = self.inner.root.join(LOCK_FILE);
        let deadline = Instant::now() + self.inner.lock_timeout;

        let state = self
            .inner
            .state
            .try_lock_for(self.inner.lock_timeout)
            .ok_or_else(|| ShrinkError::MergeLocked {
                path: lock_path.clone(),
                holder: format!("another merge in this process ({})", std::process::id()),
            })?;

        loop {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
            {
                Ok(mut file) => {
                    // Holder PID for operators clearing a stale lock by hand.
                    let _ = writeln!(file, "{}", std::process::id());
                    break;
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    if Instant::now() >= deadline {
                        let holder = lock_holder(&lock_path);
                        tracing::warn!(
                            path = %lock_path.display(),
                            holder = %holder,
                            "merge lock is held elsewhere"
                        );
                        return Err(ShrinkError::MergeLocked {
                            path: lock_path,
                            holder,
                        });
                    }
                    thread::sleep(LOCK_RETRY_INTERVAL);
                }
                Err(err) => return Err(err.into()),
            }
        }

        let mut guard = MergeGuard {
            root: &self.inner.root,
            lock_path,
            state,
        };
        *guard.state = StoreState::load(&self.inner.root)?;
        tracing::debug!(root = %self.inner.root.display(), "merge lock acquired");
        Ok(guard)
    }
}

/// Exclusive access to a store for the duration of a merge.
///
/// Removes the lock file on drop.
pub struct MergeGuard<'a> {
    root: &'a Path,
    lock_path: PathBuf,
    state: MutexGuard<'a, StoreState>,
}

impl MergeGuard<'_> {
    pub fn root(&self) -> &Path {
        self.root
    }

    pub fn state(&self) -> &StoreState {
        &self.state
    }

    pub(crate) fn classes_mut(&mut self) -> &mut ClassIndex {
        &mut self.state.classes
    }

    pub(crate) fn entries_mut(&mut self) -> &mut Vec<DatasetEntry> {
        &mut self.state.entries
    }

    pub(crate) fn persist_classes(&self) -> Result<(), ShrinkError> {
        write_json_atomic(&self.root.join(CLASSES_FILE), &self.state.classes)
    }

    pub(crate) fn persist_entries(&self) -> Result<(), ShrinkError> {
        let file = EntriesFile {
            entries: self.state.entries.clone(),
        };
        write_json_atomic(&self.root.join(ENTRIES_FILE), &file)
    }
}

impl Drop for MergeGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.lock_path) {
            tracing::warn!(path = %self.lock_path.display(), "failed to remove merge lock: {err}");
        }
    }
}

/// Describes the holder recorded in a lock file.
fn lock_holder(lock_path: &Path) -> String {
    match fs::read_to_string(lock_path) {
        Ok(content) => match content.trim().parse::<u32>() {
            Ok(pid) => format!("process {pid}"),
            Err(_) => "an unknown process".to_string(),
        },
        Err(_) => "an unknown process".to_string(),
    }
}

/// Directory name for a class: its name lowercased, runs of anything other
/// than letters and digits collapsed to `_`, suffixed with the class ID so
/// that every class gets a directory of its own.
pub fn class_dir_name(name: &str, id: ClassId) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        format!("class-{id}")
    } else {
        format!("{trimmed}-{id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_layout() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let store = DatasetStore::open(temp.path()).unwrap();
        assert!(temp.path().join(IMAGES_DIR).is_dir());
        assert!(temp.path().join(LABELS_DIR).is_dir());
        assert!(store.snapshot().entries().is_empty());
    }

    #[test]
    fn lock_file_lives_for_the_guard() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let store = DatasetStore::open(temp.path()).unwrap();
        {
            let _guard = store.lock().unwrap();
            assert!(temp.path().join(LOCK_FILE).is_file());
        }
        assert!(!temp.path().join(LOCK_FILE).exists());
    }

    #[test]
    fn foreign_lock_file_times_out() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let store =
            DatasetStore::open_with_timeout(temp.path(), Duration::from_millis(120)).unwrap();
        fs::write(temp.path().join(LOCK_FILE), "4242\n").unwrap();

        let err = store.lock().err().expect("lock must time out");
        match &err {
            ShrinkError::MergeLocked { path, holder } => {
                assert_eq!(path, &temp.path().join(LOCK_FILE));
                assert_eq!(holder, "process 4242");
            }
            other => panic!("unexpected error: {other}"),
        }
        let message = err.to_string();
        assert!(message.contains(".merge.lock"));
        assert!(message.contains("process 4242"));
        // The other holder's lock file is left alone.
        assert!(temp.path().join(LOCK_FILE).exists());
    }

    #[test]
    fn corrupt_class_index_is_refused() {
        let temp = tempfile::tempdir().expect("create temp dir");
        fs::write(
            temp.path().join(CLASSES_FILE),
            r#"{ "next_id": 1, "classes": [{ "id": 4, "name": "X" }] }"#,
        )
        .unwrap();
        assert!(matches!(
            DatasetStore::open(temp.path()),
            Err(ShrinkError::ClassIndexCorrupt { .. })
        ));
    }

    #[test]
    fn persisted_state_is_reloaded_on_lock() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let store = DatasetStore::open(temp.path()).unwrap();
        {
            let mut guard = store.lock().unwrap();
            guard.classes_mut().resolve_or_allocate("SKOL 350ml");
            guard.persist_classes().unwrap();
        }

        let other = DatasetStore::open(temp.path()).unwrap();
        let guard = other.lock().unwrap();
        assert_eq!(guard.state().classes().get("SKOL 350ml"), Some(ClassId::new(0)));
    }

    #[test]
    fn class_dir_names() {
        assert_eq!(class_dir_name("SKOL 350ml", ClassId::new(0)), "skol_350ml-0");
        assert_eq!(class_dir_name("Coca-Cola 2L", ClassId::new(12)), "coca_cola_2l-12");
        assert_eq!(class_dir_name("  Guaraná!  ", ClassId::new(3)), "guaraná-3");
        assert_eq!(class_dir_name("***", ClassId::new(7)), "class-7");
    }

    #[test]
    fn similar_names_get_separate_dirs() {
        assert_ne!(
            class_dir_name("SKOL 350ml", ClassId::new(0)),
            class_dir_name("skol-350ml", ClassId::new(1))
        );
    }
}
