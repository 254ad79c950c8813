//! Error types for the edgequake-pdfvalidate library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ValidatorError`]: **Fatal** for one task attempt. The source could
//!   not be opened, a page could not be extracted, storage or persistence
//!   failed. The lifecycle manager decides whether the attempt is retried
//!   ([`ValidatorError::is_retryable`]).
//!
//! * [`SectionError`]: **Non-fatal**. One sub-section of a validation
//!   report (an unreadable page during enhanced analysis, a missing outline,
//!   a thumbnail that failed to encode) degraded, but the rest of the report
//!   is intact. Its `Display` string is what lands in the report's `errors`
//!   list.

use crate::model::TaskStatus;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-pdfvalidate library.
#[derive(Debug, Error)]
pub enum ValidatorError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    /// The path exists but is a directory or other non-file.
    #[error("Not a regular file: '{path}'")]
    NotAFile { path: PathBuf },

    /// The file is empty.
    #[error("PDF file is empty: '{path}'")]
    EmptyFile { path: PathBuf },

    /// The file exceeds the configured size limit.
    #[error("PDF file too large: {size} bytes (limit {limit} bytes)")]
    FileTooLarge { size: u64, limit: u64 },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    // ── Document errors ───────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt, or the reader refused the file.
    #[error("Cannot open PDF '{path}': {detail}")]
    DocumentOpen { path: PathBuf, detail: String },

    /// Encrypted PDF that the empty password does not unlock.
    #[error("PDF '{path}' is encrypted and cannot be accessed")]
    PasswordRequired { path: PathBuf },

    /// Content of one page could not be decoded during block extraction.
    #[error("Page {page}: content extraction failed: {detail}")]
    PageExtraction { page: usize, detail: String },

    /// A page could not be rendered or encoded for its snapshot.
    #[error("Page {page}: rasterisation failed: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    // ── Storage / persistence ─────────────────────────────────────────────
    /// Object store read failed (includes missing keys).
    #[error("Storage read failed for '{key}': {detail}")]
    StorageRead { key: String, detail: String },

    /// Object store write or delete failed.
    #[error("Storage write failed for '{key}': {detail}")]
    StorageWrite { key: String, detail: String },

    /// The persistence collaborator rejected an operation.
    #[error("Persistence error: {0}")]
    Persistence(String),

    // ── Task lifecycle ────────────────────────────────────────────────────
    /// No task row exists for the delivered id.
    #[error("Task '{task_id}' not found")]
    TaskNotFound { task_id: String },

    /// The task was cancelled before it was dequeued.
    #[error("Task '{task_id}' was cancelled")]
    TaskCancelled { task_id: String },

    /// A status change the state machine does not allow.
    #[error("Task '{task_id}' cannot move from {from} to {to}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    /// Every allowed attempt failed.
    #[error("max retries exceeded after {attempts} attempts: {last_error}")]
    RetryBudgetExceeded {
        task_id: String,
        attempts: u32,
        last_error: String,
    },

    /// One attempt ran past the wall-clock limit.
    #[error("Attempt timed out after {secs}s")]
    AttemptTimeout { secs: u64 },

    /// No snapshot row for the requested page.
    #[error("No snapshot for task '{task_id}' page {page}")]
    SnapshotNotFound { task_id: String, page: u32 },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ValidatorError {
    /// Whether the lifecycle manager should spend a retry on this failure.
    ///
    /// Lookup and state-machine errors are terminal for the delivery; every
    /// processing failure (including open and extraction errors) consumes
    /// one attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ValidatorError::TaskNotFound { .. }
                | ValidatorError::TaskCancelled { .. }
                | ValidatorError::InvalidTransition { .. }
                | ValidatorError::RetryBudgetExceeded { .. }
                | ValidatorError::InvalidConfig(_)
                | ValidatorError::PdfiumBindingFailed(_)
        )
    }
}

/// A non-fatal error for one sub-section of the pipeline.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum SectionError {
    /// A page could not be loaded or decoded.
    #[error("page {page}: read failed: {detail}")]
    PageRead { page: usize, detail: String },

    /// The outline / bookmark tree could not be read.
    #[error("outline read failed: {0}")]
    Outline(String),

    /// Rendering a page to a bitmap failed.
    #[error("page {page}: rendering failed: {detail}")]
    Render { page: usize, detail: String },

    /// Encoding a page image failed.
    #[error("page {page}: image encoding failed: {detail}")]
    Encode { page: usize, detail: String },
}

impl SectionError {
    /// 1-based page number the error refers to, when there is one.
    pub fn page(&self) -> Option<usize> {
        match self {
            SectionError::PageRead { page, .. }
            | SectionError::Render { page, .. }
            | SectionError::Encode { page, .. } => Some(*page),
            SectionError::Outline(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_budget_display_mentions_max_retries() {
        let e = ValidatorError::RetryBudgetExceeded {
            task_id: "t1".into(),
            attempts: 4,
            last_error: "Storage write failed".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("max retries"), "got: {msg}");
        assert!(msg.contains("4 attempts"));
        assert!(msg.contains("Storage write failed"));
    }

    #[test]
    fn lookup_errors_are_terminal() {
        assert!(!ValidatorError::TaskNotFound { task_id: "x".into() }.is_retryable());
        assert!(!ValidatorError::TaskCancelled { task_id: "x".into() }.is_retryable());
        assert!(!ValidatorError::InvalidConfig("dpi".into()).is_retryable());
    }

    #[test]
    fn processing_errors_are_retryable() {
        assert!(ValidatorError::StorageWrite {
            key: "k".into(),
            detail: "disk full".into()
        }
        .is_retryable());
        assert!(ValidatorError::AttemptTimeout { secs: 600 }.is_retryable());
        assert!(ValidatorError::DocumentOpen {
            path: "/tmp/a.pdf".into(),
            detail: "bad xref".into()
        }
        .is_retryable());
    }

    #[test]
    fn section_error_display_and_page() {
        let e = SectionError::PageRead {
            page: 3,
            detail: "bad stream".into(),
        };
        assert_eq!(e.to_string(), "page 3: read failed: bad stream");
        assert_eq!(e.page(), Some(3));
        assert_eq!(SectionError::Outline("x".into()).page(), None);
    }
}
