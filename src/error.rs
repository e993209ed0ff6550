use std::path::PathBuf;
use thiserror::Error;

use crate::ir::{ImageId, ProductId, SyncState};
use crate::validation::ValidationReport;

/// The main error type for shrinkwatch operations.
#[derive(Debug, Error)]
pub enum ShrinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse JSON from {path}: {source}")]
    JsonParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write JSON to {path}: {source}")]
    JsonWrite {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to parse YAML from {path}: {source}")]
    YamlParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid configuration: {message}")]
    Config { message: String },

    #[error("Failed to load detection model from {path}: {message}")]
    ModelLoad { path: PathBuf, message: String },

    #[error("Inference failed for frame '{frame}': {message}")]
    Inference { frame: String, message: String },

    #[error("Invalid detection: {message}")]
    InvalidDetection { message: String },

    #[error("Invalid confidence threshold {0} (expected a value in [0, 1])")]
    InvalidThreshold(f64),

    #[error("Invalid annotation: {message}")]
    InvalidAnnotation { message: String },

    #[error("Failed to read image dimensions from {path}: {source}")]
    ImageDimensionRead {
        path: PathBuf,
        #[source]
        source: imagesize::ImageError,
    },

    #[error("Failed to parse label file {path} at line {line}: {message}")]
    LabelParse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("Failed to traverse {path}: {message}")]
    Traverse { path: PathBuf, message: String },

    #[error("Unsupported image file '{name}' (expected one of: jpg, jpeg, png, bmp, webp)")]
    UnsupportedImage { name: String },

    #[error("Image {0} not found in ledger")]
    ImageNotFound(ImageId),

    #[error("Product {0} is not in the catalog")]
    UnknownProduct(ProductId),

    #[error("Image {id} is {state} and cannot be changed; reopen it first")]
    ImageLocked { id: ImageId, state: SyncState },

    #[error("Image {id} cannot be exported: {message}")]
    NotExportable { id: ImageId, message: String },

    #[error("No ledger found at {path}")]
    LedgerNotFound { path: PathBuf },

    #[error("Ledger at {path} already exists")]
    LedgerExists { path: PathBuf },

    #[error("Ledger at {path} is inconsistent: {message}")]
    LedgerCorrupt { path: PathBuf, message: String },

    #[error("Malformed bundle at {path}: {message}")]
    BundleMalformed { path: PathBuf, message: String },

    #[error("Class index at {path} is inconsistent: {message}")]
    ClassIndexCorrupt { path: PathBuf, message: String },

    #[error("Class index conflict: {message}")]
    ClassConflict { message: String },

    #[error(
        "Timed out waiting for merge lock {path} held by {holder}; \
         if that holder is gone, delete the file and retry"
    )]
    MergeLocked { path: PathBuf, holder: String },

    #[error("Validation failed with {error_count} error(s) and {warning_count} warning(s)")]
    ValidationFailed {
        error_count: usize,
        warning_count: usize,
        report: ValidationReport,
    },
}
