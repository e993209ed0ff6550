//! Core records shared by the reconciliation engine and the collection pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::bbox::{NormalizedBox, PixelBox};
use super::checksum::Checksum;
use super::ids::{BundleId, ImageId, ProductId};
use crate::error::ShrinkError;

/// A single product detection in one frame.
///
/// Ephemeral: produced per inference call and never persisted.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    /// Index of the class in the model's label list.
    pub class_id: usize,
    /// Product name the model associates with `class_id`.
    pub class_name: String,
    /// Model confidence in `[0, 1]`.
    pub confidence: f64,
    /// Box in pixel space of the source frame.
    pub bbox: PixelBox,
}

impl Detection {
    /// Creates a detection, rejecting confidences outside `[0, 1]`.
    pub fn new(
        class_id: usize,
        class_name: impl Into<String>,
        confidence: f64,
        bbox: PixelBox,
    ) -> Result<Self, ShrinkError> {
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(ShrinkError::InvalidDetection {
                message: format!("confidence {confidence} is outside [0, 1]"),
            });
        }
        Ok(Self {
            class_id,
            class_name: class_name.into(),
            confidence,
            bbox,
        })
    }
}

/// A product in a device's catalog.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
}

impl Product {
    pub fn new(id: impl Into<ProductId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// A labeled product box on a collected image.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    /// Product from the device catalog.
    pub product_id: ProductId,
    /// Box in normalized center/size form.
    pub bbox: NormalizedBox,
}

impl Annotation {
    pub fn new(product_id: impl Into<ProductId>, bbox: NormalizedBox) -> Self {
        Self {
            product_id: product_id.into(),
            bbox,
        }
    }
}

/// Lifecycle of a collected image from capture to confirmed central ingestion.
///
/// Normal operations only move forward one step at a time; going back is
/// reserved for explicit correction (see `Ledger::reopen`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncState {
    /// Image stored and hashed, no annotations yet.
    Captured,
    /// At least one annotation; eligible for export.
    Annotated,
    /// Included in an export bundle.
    Exported,
    /// Central importer confirmed ingestion.
    Synced,
}

impl SyncState {
    pub const ALL: [SyncState; 4] = [
        SyncState::Captured,
        SyncState::Annotated,
        SyncState::Exported,
        SyncState::Synced,
    ];

    /// The single state reachable from this one through normal operations.
    pub fn next(self) -> Option<SyncState> {
        match self {
            SyncState::Captured => Some(SyncState::Annotated),
            SyncState::Annotated => Some(SyncState::Exported),
            SyncState::Exported => Some(SyncState::Synced),
            SyncState::Synced => None,
        }
    }

    /// Stable upper-case name, as persisted.
    pub fn name(self) -> &'static str {
        match self {
            SyncState::Captured => "CAPTURED",
            SyncState::Annotated => "ANNOTATED",
            SyncState::Exported => "EXPORTED",
            SyncState::Synced => "SYNCED",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An image captured on a field device, with its annotations and sync state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CollectedImage {
    pub id: ImageId,

    /// File name relative to the ledger's `images/` directory.
    pub file_name: String,

    pub checksum: Checksum,

    pub captured_at: DateTime<Utc>,

    /// Device (or user) that captured the image.
    pub device_id: String,

    pub sync_state: SyncState,

    #[serde(default)]
    pub annotations: Vec<Annotation>,

    /// Bundle this image was last exported in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exported_in: Option<BundleId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<DateTime<Utc>>,
}

impl CollectedImage {
    /// Returns true if the image has annotations and can go into a bundle.
    pub fn is_export_eligible(&self) -> bool {
        self.sync_state == SyncState::Annotated && !self.annotations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_rejects_bad_confidence() {
        let bbox = PixelBox::new(0.0, 0.0, 10.0, 10.0).unwrap();
        assert!(Detection::new(0, "SKOL 350ml", 0.9, bbox).is_ok());
        assert!(Detection::new(0, "SKOL 350ml", 1.2, bbox).is_err());
        assert!(Detection::new(0, "SKOL 350ml", -0.1, bbox).is_err());
        assert!(Detection::new(0, "SKOL 350ml", f64::NAN, bbox).is_err());
    }

    #[test]
    fn sync_state_moves_forward_one_step() {
        assert_eq!(SyncState::Captured.next(), Some(SyncState::Annotated));
        assert_eq!(SyncState::Annotated.next(), Some(SyncState::Exported));
        assert_eq!(SyncState::Exported.next(), Some(SyncState::Synced));
        assert_eq!(SyncState::Synced.next(), None);
    }

    #[test]
    fn sync_state_serializes_upper_case() {
        let json = serde_json::to_string(&SyncState::Exported).unwrap();
        assert_eq!(json, "\"EXPORTED\"");
        let parsed: SyncState = serde_json::from_str("\"SYNCED\"").unwrap();
        assert_eq!(parsed, SyncState::Synced);
    }
}
