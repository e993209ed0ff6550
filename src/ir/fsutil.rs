//! Small file helpers: JSON read/write and write-then-rename.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::ShrinkError;

/// Sibling path used while a file is being written.
pub(crate) fn partial_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("file"));
    name.push(".part");
    path.with_file_name(name)
}

/// Writes `bytes` to a temporary sibling and renames it over `path`.
///
/// Readers either see the old content or the complete new content.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = partial_path(path);
    let result = (|| {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// Copies `src` to `dst` through a temporary sibling of `dst`.
pub(crate) fn copy_atomic(src: &Path, dst: &Path) -> io::Result<u64> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = partial_path(dst);
    let result = fs::copy(src, &tmp).and_then(|n| fs::rename(&tmp, dst).map(|_| n));
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ShrinkError> {
    let file = File::open(path).map_err(ShrinkError::Io)?;
    serde_json::from_reader(BufReader::new(file)).map_err(|source| ShrinkError::JsonParse {
        path: path.to_path_buf(),
        source,
    })
}

pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), ShrinkError> {
    let mut bytes = serde_json::to_vec_pretty(value).map_err(|source| ShrinkError::JsonWrite {
        path: path.to_path_buf(),
        source,
    })?;
    bytes.push(b'\n');
    write_atomic(path, &bytes).map_err(ShrinkError::Io)
}
