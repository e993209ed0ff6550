//! Validation report types for structured error reporting.
//!
//! This module provides rich, structured validation results that can be
//! displayed to users, written to files, or processed programmatically.

use serde::Serialize;
use std::fmt;

/// The result of validating a ledger or a dataset store.
///
/// Contains all issues found during validation, categorized by severity.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ValidationReport {
    /// All issues found during validation.
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    /// Creates a new empty report.
    pub fn new() -> Self {
        Self { issues: Vec::new() }
    }

    /// Adds an issue to the report.
    pub fn add(&mut self, issue: ValidationIssue) {
        self.issues.push(issue);
    }

    /// Returns the number of errors in the report.
    pub fn error_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Error)
            .count()
    }

    /// Returns the number of warnings in the report.
    pub fn warning_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Warning)
            .count()
    }

    /// Returns true if there are no errors.
    pub fn is_ok(&self) -> bool {
        self.error_count() == 0
    }

    /// Returns true if there are no issues at all.
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn has_code(&self, code: IssueCode) -> bool {
        self.issues.iter().any(|i| i.code == code)
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.issues.is_empty() {
            return writeln!(f, "Validation passed: no issues found");
        }

        writeln!(
            f,
            "Validation completed with {} error(s) and {} warning(s):",
            self.error_count(),
            self.warning_count()
        )?;
        writeln!(f)?;

        for issue in &self.issues {
            writeln!(f, "  {}", issue)?;
        }

        Ok(())
    }
}

/// A single validation issue (error or warning).
#[derive(Clone, Debug, Serialize)]
pub struct ValidationIssue {
    pub severity: Severity,

    /// A stable code for the issue type.
    pub code: IssueCode,

    pub message: String,

    /// Where the issue occurred.
    pub context: IssueContext,
}

impl ValidationIssue {
    pub fn new(
        severity: Severity,
        code: IssueCode,
        message: impl Into<String>,
        context: IssueContext,
    ) -> Self {
        Self {
            severity,
            code,
            message: message.into(),
            context,
        }
    }

    pub fn error(code: IssueCode, message: impl Into<String>, context: IssueContext) -> Self {
        Self::new(Severity::Error, code, message, context)
    }

    pub fn warning(code: IssueCode, message: impl Into<String>, context: IssueContext) -> Self {
        Self::new(Severity::Warning, code, message, context)
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = match self.severity {
            Severity::Error => "ERROR",
            Severity::Warning => "WARN ",
        };
        write!(
            f,
            "[{}] {:?} in {}: {}",
            severity, self.code, self.context, self.message
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Suspicious but usable.
    Warning,
    /// Invalid or corrupt data.
    Error,
}

/// A stable code identifying the type of validation issue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCode {
    // Catalog issues
    /// A product has an empty name.
    EmptyProductName,
    /// Two products share a name (annotations may be split between them).
    DuplicateProductName,
    /// An annotation references a product that is not in the catalog.
    MissingProductRef,

    // Image issues
    /// Two images have the same content.
    DuplicateChecksum,
    /// The image file is gone from disk.
    MissingImageFile,
    /// The image file no longer matches its recorded checksum.
    ChecksumMismatch,
    /// A file in the images directory is not tracked.
    UntrackedFile,

    // Sync state issues
    /// ANNOTATED, EXPORTED or SYNCED image without annotations.
    StateWithoutAnnotations,
    /// CAPTURED image that carries annotations.
    CapturedWithAnnotations,
    /// Bundle or sync markers disagree with the sync state.
    SyncMarkerMismatch,

    // Dataset store issues
    /// An entry's label file is gone from disk.
    MissingLabelFile,
    /// A label file no entry points at.
    OrphanLabel,
    /// A label line could not be parsed.
    InvalidLabelLine,
    /// A label line uses a class ID outside the class index.
    UnknownClassId,
    /// The label file disagrees with the entry's annotation count.
    AnnotationCountMismatch,
}

/// Where a validation issue occurred.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IssueContext {
    Ledger,
    Image { id: u64 },
    Product { id: u64 },
    Store,
    Entry { checksum: String },
    File { path: String },
}

impl fmt::Display for IssueContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IssueContext::Ledger => write!(f, "ledger"),
            IssueContext::Image { id } => write!(f, "image {}", id),
            IssueContext::Product { id } => write!(f, "product {}", id),
            IssueContext::Store => write!(f, "store"),
            IssueContext::Entry { checksum } => write!(f, "entry {}", checksum),
            IssueContext::File { path } => write!(f, "file {}", path),
        }
    }
}
