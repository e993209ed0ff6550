//! Export and merge report types.
//!
//! Per-image and per-entry failures never abort an export or an import;
//! they are collected here so the operator can see what was left behind.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ShrinkError;
use crate::ir::fsutil::{read_json, write_json_atomic};
use crate::ir::{BundleId, Checksum, ClassId, ImageId};

/// Severity of an export issue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportSeverity {
    /// The image was requested but could not be exported.
    Warning,
    /// The image was skipped on purpose.
    Info,
}

/// Stable codes for export issues.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportIssueCode {
    /// Requested image ID is not in the ledger.
    ImageNotFound,
    /// Requested image has no annotations yet.
    NotAnnotated,
    /// Requested image was already confirmed by the central store.
    AlreadySynced,
    /// The ledger's copy of the image file is gone.
    MissingFile,
    /// The ledger's copy of the image no longer matches its checksum.
    ChecksumMismatch,
    /// Copying the image into the bundle failed.
    CopyFailed,
}

#[derive(Clone, Debug, Serialize)]
pub struct ExportIssue {
    pub severity: ExportSeverity,
    pub code: ExportIssueCode,
    pub image_id: ImageId,
    pub message: String,
}

impl ExportIssue {
    pub fn warning(code: ExportIssueCode, image_id: ImageId, message: impl Into<String>) -> Self {
        Self {
            severity: ExportSeverity::Warning,
            code,
            image_id,
            message: message.into(),
        }
    }

    pub fn info(code: ExportIssueCode, image_id: ImageId, message: impl Into<String>) -> Self {
        Self {
            severity: ExportSeverity::Info,
            code,
            image_id,
            message: message.into(),
        }
    }
}

/// Outcome of one export run.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ExportReport {
    /// Set when a bundle was written.
    pub bundle_id: Option<BundleId>,
    /// Images considered for this bundle.
    pub selected: usize,
    /// Images written into the bundle.
    pub exported: Vec<ImageId>,
    pub issues: Vec<ExportIssue>,
}

impl ExportReport {
    pub fn add(&mut self, issue: ExportIssue) {
        self.issues.push(issue);
    }

    pub fn warning_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == ExportSeverity::Warning)
            .count()
    }

    pub fn info_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == ExportSeverity::Info)
            .count()
    }
}

impl fmt::Display for ExportReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.bundle_id {
            Some(id) => writeln!(
                f,
                "Exported {} of {} selected image(s) into {}",
                self.exported.len(),
                self.selected,
                id
            )?,
            None => writeln!(f, "Nothing to export: no bundle written")?,
        }

        let warnings = self.warning_count();
        if warnings > 0 {
            writeln!(f)?;
            writeln!(f, "Warnings ({}):", warnings)?;
            for issue in self
                .issues
                .iter()
                .filter(|i| i.severity == ExportSeverity::Warning)
            {
                writeln!(f, "  - image {}: {}", issue.image_id, issue.message)?;
            }
        }

        let infos = self.info_count();
        if infos > 0 {
            writeln!(f)?;
            writeln!(f, "Notes ({}):", infos)?;
            for issue in self
                .issues
                .iter()
                .filter(|i| i.severity == ExportSeverity::Info)
            {
                writeln!(f, "  - image {}: {}", issue.image_id, issue.message)?;
            }
        }

        Ok(())
    }
}

/// Why a bundle entry was not merged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    ChecksumMismatch,
    MissingImage,
    InvalidAnnotation,
    UnknownProduct,
    Io,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RejectReason::ChecksumMismatch => "checksum mismatch",
            RejectReason::MissingImage => "missing image",
            RejectReason::InvalidAnnotation => "invalid annotation",
            RejectReason::UnknownProduct => "unknown product",
            RejectReason::Io => "I/O error",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct RejectedEntry {
    pub image_id: ImageId,
    pub checksum: Checksum,
    pub reason: RejectReason,
    pub message: String,
}

/// A class first seen in this merge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NewClass {
    pub id: ClassId,
    pub name: String,
}

/// Outcome of merging one bundle into the dataset.
#[derive(Clone, Debug, Serialize)]
pub struct MergeReport {
    pub bundle_id: BundleId,
    /// Checksums written into the dataset by this merge.
    pub imported: Vec<Checksum>,
    /// Checksums already present whose annotations this merge replaced.
    pub corrected: Vec<Checksum>,
    /// Checksums already present with identical annotations.
    pub duplicates: Vec<Checksum>,
    pub rejected: Vec<RejectedEntry>,
    pub new_classes: Vec<NewClass>,
    /// Checksums the originating device may mark SYNCED.
    pub confirmed: Vec<Checksum>,
}

impl MergeReport {
    pub fn new(bundle_id: BundleId) -> Self {
        Self {
            bundle_id,
            imported: Vec::new(),
            corrected: Vec::new(),
            duplicates: Vec::new(),
            rejected: Vec::new(),
            new_classes: Vec::new(),
            confirmed: Vec::new(),
        }
    }

    /// True when every entry was imported, corrected or already present.
    pub fn is_complete(&self) -> bool {
        self.rejected.is_empty()
    }

    /// Confirmation to carry back to the originating device.
    pub fn receipt(&self) -> SyncReceipt {
        SyncReceipt {
            bundle_id: self.bundle_id.clone(),
            confirmed: self.confirmed.clone(),
        }
    }
}

impl fmt::Display for MergeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Merged bundle {}", self.bundle_id)?;
        writeln!(f, "  imported:   {}", self.imported.len())?;
        writeln!(f, "  corrected:  {}", self.corrected.len())?;
        writeln!(f, "  duplicates: {}", self.duplicates.len())?;
        writeln!(f, "  rejected:   {}", self.rejected.len())?;

        if !self.new_classes.is_empty() {
            writeln!(f)?;
            writeln!(f, "New classes ({}):", self.new_classes.len())?;
            for class in &self.new_classes {
                writeln!(f, "  - {}: {}", class.id, class.name)?;
            }
        }

        if !self.rejected.is_empty() {
            writeln!(f)?;
            writeln!(f, "Rejected ({}):", self.rejected.len())?;
            for entry in &self.rejected {
                writeln!(
                    f,
                    "  - image {} ({}): {}: {}",
                    entry.image_id,
                    entry.checksum.short(),
                    entry.reason,
                    entry.message
                )?;
            }
        }

        Ok(())
    }
}

/// Checksums the central store has ingested from one bundle.
///
/// Written by the importer and applied to the device ledger with
/// `Ledger::apply_receipt`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReceipt {
    pub bundle_id: BundleId,
    pub confirmed: Vec<Checksum>,
}

impl SyncReceipt {
    pub fn read(path: &Path) -> Result<Self, ShrinkError> {
        read_json(path)
    }

    pub fn write(&self, path: &Path) -> Result<(), ShrinkError> {
        write_json_atomic(path, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn bundle_id() -> BundleId {
        BundleId::from_timestamp(Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap())
    }

    #[test]
    fn receipt_carries_confirmed_checksums() {
        let mut report = MergeReport::new(bundle_id());
        let a = Checksum::of_bytes(b"a");
        let b = Checksum::of_bytes(b"b");
        report.imported.push(a.clone());
        report.duplicates.push(b.clone());
        report.confirmed = vec![a.clone(), b.clone()];

        let receipt = report.receipt();
        assert_eq!(receipt.bundle_id, bundle_id());
        assert_eq!(receipt.confirmed, vec![a, b]);
    }

    #[test]
    fn receipt_round_trips_through_file() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let path = temp.path().join("receipt.json");
        let receipt = SyncReceipt {
            bundle_id: bundle_id(),
            confirmed: vec![Checksum::of_bytes(b"x")],
        };
        receipt.write(&path).unwrap();
        assert_eq!(SyncReceipt::read(&path).unwrap(), receipt);
    }

    #[test]
    fn export_report_separates_warnings_and_notes() {
        let mut report = ExportReport::default();
        report.add(ExportIssue::warning(
            ExportIssueCode::ChecksumMismatch,
            ImageId::new(3),
            "file changed on disk",
        ));
        report.add(ExportIssue::info(
            ExportIssueCode::AlreadySynced,
            ImageId::new(4),
            "already synced",
        ));
        assert_eq!(report.warning_count(), 1);
        assert_eq!(report.info_count(), 1);

        let text = report.to_string();
        assert!(text.contains("Nothing to export"));
        assert!(text.contains("Warnings (1)"));
        assert!(text.contains("image 4: already synced"));
    }

    #[test]
    fn merge_report_lists_rejections() {
        let mut report = MergeReport::new(bundle_id());
        report.rejected.push(RejectedEntry {
            image_id: ImageId::new(9),
            checksum: Checksum::of_bytes(b"bad"),
            reason: RejectReason::ChecksumMismatch,
            message: "content does not match manifest".to_string(),
        });
        assert!(!report.is_complete());
        let text = report.to_string();
        assert!(text.contains("rejected:   1"));
        assert!(text.contains("checksum mismatch"));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["rejected"][0]["reason"], "checksum_mismatch");
    }
}
