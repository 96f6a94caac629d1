//! Error types for the pdf2sheet library.
//!
//! Failures are layered the same way the pipeline is:
//!
//! * [`ProcessingError`]: **fatal** for a document. Returned as
//!   `Err(ProcessingError)` from [`crate::process::DocumentProcessor::process_pdf`]
//!   (bad input file, unreadable PDF, nothing extracted, deadline exceeded).
//!
//! * [`ChunkError`]: a run of pages failed after every retry. Recorded in the
//!   record's `_processing_metadata` and processing moves on to the next chunk.
//!
//! * [`PageError`]: a single page failed (model error, timeout, empty
//!   response). Logged and skipped; absorbed by the chunk-level retry.
//!
//! * [`JobError`]: the job layer (unknown job, terminal job mutated, a
//!   document already being processed).

use std::path::PathBuf;
use thiserror::Error;

/// Why an input path was rejected before any PDF work started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputProblem {
    FileNotFound,
    NotAFile,
    EmptyFile,
}

impl std::fmt::Display for InputProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InputProblem::FileNotFound => "file not found",
            InputProblem::NotAFile => "not a file",
            InputProblem::EmptyFile => "empty file",
        };
        f.write_str(s)
    }
}

/// All fatal, document-level errors.
#[derive(Debug, Error)]
pub enum ProcessingError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The path does not point at a non-empty regular file. Never retried.
    #[error("Invalid input '{path}': {problem}")]
    InvalidInput { path: PathBuf, problem: InputProblem },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// No page-count strategy could read the document.
    #[error("PDF '{path}' is unreadable: {detail}\nTry repairing with: qpdf input.pdf output.pdf")]
    UnreadablePdf { path: PathBuf, detail: String },

    /// The document was readable but has zero pages.
    #[error("PDF '{path}' contains no pages")]
    EmptyDocument { path: PathBuf },

    // ── Outcome errors ────────────────────────────────────────────────────
    /// Every chunk was attempted and no page produced data.
    #[error("No data extracted from any page chunks. Failed chunks: {failed_chunks}/{total_chunks}")]
    NoDataExtracted {
        failed_chunks: usize,
        total_chunks: usize,
    },

    /// The overall processing deadline elapsed.
    #[error("Processing exceeded the {secs}s deadline")]
    Timeout { secs: u64 },

    // ── Provider errors ───────────────────────────────────────────────────
    /// The configured vision provider could not be initialised.
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProcessingError {
    /// Short machine-friendly name, used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessingError::InvalidInput { .. } => "invalid_input",
            ProcessingError::UnreadablePdf { .. } => "unreadable_pdf",
            ProcessingError::EmptyDocument { .. } => "empty_document",
            ProcessingError::NoDataExtracted { .. } => "no_data_extracted",
            ProcessingError::Timeout { .. } => "timeout",
            ProcessingError::ProviderNotConfigured { .. } => "provider_not_configured",
            ProcessingError::InvalidConfig(_) => "invalid_config",
            ProcessingError::Internal(_) => "internal",
        }
    }
}

/// A chunk of pages that failed on every attempt.
///
/// Not fatal for the document: the controller records it and continues.
#[derive(Debug, Clone, Error)]
#[error("Pages {}-{end} failed after {attempts} attempt(s): {detail}", .start + 1)]
pub struct ChunkError {
    /// 0-based inclusive start page.
    pub start: usize,
    /// 0-based exclusive end page.
    pub end: usize,
    pub attempts: u32,
    pub detail: String,
}

/// A non-fatal error for a single page.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// The page could not be rasterised or encoded.
    #[error("Page {page}: rendering failed: {detail}")]
    Render { page: usize, detail: String },

    /// The vision model call returned an error.
    #[error("Page {page}: model call failed: {detail}")]
    ModelCall { page: usize, detail: String },

    /// The vision model call exceeded its time box.
    #[error("Page {page}: model call timed out after {secs}s")]
    Timeout { page: usize, secs: u64 },

    /// The model answered but nothing usable could be recovered.
    #[error("Page {page}: no data could be recovered from the response")]
    EmptyResponse { page: usize },
}

/// Errors from the job layer.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job '{0}' not found")]
    NotFound(String),

    /// A completed or failed job cannot be mutated again.
    #[error("Job '{id}' is already {status}")]
    AlreadyTerminal { id: String, status: String },

    /// Another job for the same document is still pending or processing.
    #[error("Document '{document_id}' already has an active job '{job_id}'")]
    AlreadyActive { document_id: String, job_id: String },

    /// The worker side of the queue has shut down.
    #[error("Job queue is closed")]
    QueueClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_input_messages_name_the_problem() {
        let e = ProcessingError::InvalidInput {
            path: "/tmp/x.pdf".into(),
            problem: InputProblem::EmptyFile,
        };
        assert!(e.to_string().contains("empty file"), "got: {e}");

        let e = ProcessingError::InvalidInput {
            path: "/tmp".into(),
            problem: InputProblem::NotAFile,
        };
        assert!(e.to_string().contains("not a file"));
    }

    #[test]
    fn no_data_message_includes_failed_count() {
        let e = ProcessingError::NoDataExtracted {
            failed_chunks: 3,
            total_chunks: 3,
        };
        let msg = e.to_string();
        assert!(msg.contains("Failed chunks: 3"), "got: {msg}");
        assert_eq!(e.kind(), "no_data_extracted");
    }

    #[test]
    fn chunk_error_reports_one_based_range() {
        let e = ChunkError {
            start: 3,
            end: 6,
            attempts: 3,
            detail: "render failed".into(),
        };
        assert!(e.to_string().starts_with("Pages 4-6"), "got: {e}");
    }

    #[test]
    fn page_timeout_display() {
        let e = PageError::Timeout { page: 2, secs: 60 };
        assert!(e.to_string().contains("60s"));
        assert!(e.to_string().contains("Page 2"));
    }

    #[test]
    fn job_errors_are_human_readable() {
        let e = JobError::AlreadyActive {
            document_id: "doc-1".into(),
            job_id: "job-9".into(),
        };
        assert!(e.to_string().contains("doc-1"));
        assert!(e.to_string().contains("job-9"));
    }
}
