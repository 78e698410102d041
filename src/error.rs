//! Error types for the pdf2braille library.
//!
//! Failures fall into four groups, each with its own type:
//!
//! * [`ConvertError`]: **stage-fatal**: the job cannot continue (source
//!   missing, job record gone, storage unreachable, download failed). The
//!   orchestrator catches it and marks the job `failed`.
//!
//! * [`ExtractError`]: a single extraction strategy failed. The extractor
//!   logs it and moves on to the next strategy; it never reaches the job.
//!
//! * [`ServiceError`]: the AI completion service failed for one unit of
//!   work (chunk, probe, validation batch). Rate limiting is its own variant
//!   because callers short-circuit on it instead of carrying on.
//!
//! * [`StoreError`]: blob or job store failures, with distinguishable
//!   not-found variants.

use crate::job::JobStatus;
use thiserror::Error;

/// Stage-fatal errors. Returned as `Err(ConvertError)` from the orchestrator
/// and from URL extraction.
#[derive(Debug, Error)]
pub enum ConvertError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The job has no source locator to read from.
    #[error("Job '{job_id}' has no source locator")]
    MissingSource { job_id: String },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    // ── Persistence errors ────────────────────────────────────────────────
    /// The job record disappeared while the job was being processed.
    #[error("Job '{0}' not found")]
    JobNotFound(String),

    /// The job is past `pending` or already being run; terminal jobs are
    /// resubmitted as new jobs.
    #[error("Job '{id}' cannot be processed from status '{status}'")]
    JobNotRunnable { id: String, status: JobStatus },

    /// Blob or job store failure.
    #[error(transparent)]
    Storage(#[from] StoreError),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal failure of one text-extraction strategy.
#[derive(Debug, Clone, Error)]
pub enum ExtractError {
    /// No pdfium library could be bound.
    #[error("pdfium library unavailable: {0}")]
    PdfiumUnavailable(String),

    /// The strategy could not parse the document.
    #[error("{strategy}: failed to parse PDF: {detail}")]
    Parse {
        strategy: &'static str,
        detail: String,
    },

    /// Rasterising a page for OCR failed.
    #[error("Rasterisation failed for page {page}: {detail}")]
    Rasterisation { page: usize, detail: String },

    /// The OCR engine failed on a page.
    #[error("OCR failed: {0}")]
    Ocr(String),

    /// OCR of a single page exceeded its time budget.
    #[error("OCR timed out after {secs}s on page {page}")]
    OcrTimeout { page: usize, secs: u64 },

    /// A blocking worker panicked or was cancelled.
    #[error("Extraction task failed: {0}")]
    Task(String),
}

/// Failure of a single call to the AI completion service.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    /// HTTP 429 or an exhausted quota. Callers stop issuing requests.
    #[error("Rate limit or quota exceeded: {0}")]
    RateLimited(String),

    /// The call did not finish within the configured timeout.
    #[error("Completion call timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Any other provider failure.
    #[error("Completion service error: {0}")]
    Failed(String),
}

impl ServiceError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ServiceError::RateLimited(_))
    }
}

/// Blob store and job store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No blob exists at the locator.
    #[error("Blob not found: '{locator}'")]
    NotFound { locator: String },

    /// No job record exists with the id.
    #[error("Job record not found: '{id}'")]
    JobNotFound { id: String },

    /// The locator escapes the store root or is otherwise malformed.
    #[error("Invalid blob locator '{0}'")]
    InvalidLocator(String),

    /// Underlying I/O failure.
    #[error("Storage I/O error on '{locator}': {source}")]
    Io {
        locator: String,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::NotFound { .. } | StoreError::JobNotFound { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_source_display() {
        let e = ConvertError::MissingSource {
            job_id: "abc".into(),
        };
        assert!(e.to_string().contains("abc"), "got: {e}");
    }

    #[test]
    fn storage_error_is_transparent() {
        let e: ConvertError = StoreError::NotFound {
            locator: "uploads/x.pdf".into(),
        }
        .into();
        assert_eq!(e.to_string(), "Blob not found: 'uploads/x.pdf'");
    }

    #[test]
    fn rate_limit_is_distinguishable() {
        assert!(ServiceError::RateLimited("429".into()).is_rate_limited());
        assert!(!ServiceError::Failed("500".into()).is_rate_limited());
        assert!(!ServiceError::Timeout { secs: 5 }.is_rate_limited());
    }

    #[test]
    fn ocr_timeout_display() {
        let e = ExtractError::OcrTimeout { page: 3, secs: 30 };
        assert!(e.to_string().contains("30s"));
        assert!(e.to_string().contains("page 3"));
    }

    #[test]
    fn not_found_variants() {
        assert!(StoreError::NotFound {
            locator: "a".into()
        }
        .is_not_found());
        assert!(StoreError::JobNotFound { id: "b".into() }.is_not_found());
        assert!(!StoreError::InvalidLocator("../x".into()).is_not_found());
    }
}
