//! Job records: the persisted state of one conversion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where the job's source document comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// An uploaded file; the locator is a blob-store key.
    File,
    /// A remote document; the locator is an http(s) URL.
    Url,
}

/// Pipeline state of a job.
///
/// Transitions only move forward: `Pending → [Queued] → Extracting →
/// AiReviewing → Converting → Completed`, or to `Failed` from any
/// non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Queued,
    Extracting,
    AiReviewing,
    Converting,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Queued => "queued",
            JobStatus::Extracting => "extracting",
            JobStatus::AiReviewing => "ai_reviewing",
            JobStatus::Converting => "converting",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which extraction strategy produced a job's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    /// Non-PDF source read directly as text.
    PlainText,
    /// pdfium text layer.
    PdfiumTextLayer,
    /// lopdf content-stream walk.
    LopdfObjectWalk,
    /// Rasterised pages through OCR.
    Ocr,
    /// Printable characters recovered from the raw bytes.
    RawBytes,
    /// Nothing usable; the text is a diagnostic message.
    Diagnostic,
}

impl ExtractionMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            ExtractionMethod::PlainText => "plain_text",
            ExtractionMethod::PdfiumTextLayer => "pdfium_text_layer",
            ExtractionMethod::LopdfObjectWalk => "lopdf_object_walk",
            ExtractionMethod::Ocr => "ocr",
            ExtractionMethod::RawBytes => "raw_bytes",
            ExtractionMethod::Diagnostic => "diagnostic",
        }
    }
}

impl fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validation verdict for one line of output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineValidation {
    /// 1-indexed line number.
    pub line_number: usize,
    pub original: String,
    pub braille: String,
    /// 0–100.
    pub accuracy: u8,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<String>,
}

/// One conversion job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionJob {
    pub id: String,
    pub source_kind: SourceKind,
    pub source_locator: String,
    pub file_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    pub status: JobStatus,
    pub progress: u8,
    pub current_stage: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub word_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub braille_pages: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy_score: Option<u8>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enhancements: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub line_validations: Vec<LineValidation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction_method: Option<ExtractionMethod>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleaned_text_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub braille_text_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_path: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ConversionJob {
    /// Build a fresh `pending` record for an intake request.
    pub fn new(request: NewJob) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source_kind: request.source_kind,
            source_locator: request.source_locator,
            file_name: request.file_name,
            file_size: request.file_size,
            status: JobStatus::Pending,
            progress: 0,
            current_stage: "Pending".to_string(),
            total_pages: None,
            word_count: None,
            braille_pages: None,
            accuracy_score: None,
            enhancements: Vec::new(),
            line_validations: Vec::new(),
            extraction_method: None,
            cleaned_text_path: None,
            braille_text_path: None,
            report_path: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Apply a partial update in place.
    ///
    /// `completed_at` is only ever set once.
    pub fn apply(&mut self, update: JobUpdate) {
        let JobUpdate {
            status,
            progress,
            current_stage,
            file_size,
            total_pages,
            word_count,
            braille_pages,
            accuracy_score,
            enhancements,
            line_validations,
            extraction_method,
            cleaned_text_path,
            braille_text_path,
            report_path,
            error,
            completed_at,
        } = update;

        if let Some(v) = status {
            self.status = v;
        }
        if let Some(v) = progress {
            self.progress = v.min(100);
        }
        if let Some(v) = current_stage {
            self.current_stage = v;
        }
        if let Some(v) = file_size {
            self.file_size = Some(v);
        }
        if let Some(v) = total_pages {
            self.total_pages = Some(v);
        }
        if let Some(v) = word_count {
            self.word_count = Some(v);
        }
        if let Some(v) = braille_pages {
            self.braille_pages = Some(v);
        }
        if let Some(v) = accuracy_score {
            self.accuracy_score = Some(v);
        }
        if let Some(v) = enhancements {
            self.enhancements = v;
        }
        if let Some(v) = line_validations {
            self.line_validations = v;
        }
        if let Some(v) = extraction_method {
            self.extraction_method = Some(v);
        }
        if let Some(v) = cleaned_text_path {
            self.cleaned_text_path = Some(v);
        }
        if let Some(v) = braille_text_path {
            self.braille_text_path = Some(v);
        }
        if let Some(v) = report_path {
            self.report_path = Some(v);
        }
        if let Some(v) = error {
            self.error = Some(v);
        }
        if let Some(v) = completed_at {
            self.completed_at.get_or_insert(v);
        }
    }
}

/// Intake request for a new job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewJob {
    pub source_kind: SourceKind,
    pub source_locator: String,
    pub file_name: String,
    #[serde(default)]
    pub file_size: Option<u64>,
}

impl NewJob {
    /// A job for a file already stored under `locator` in the blob store.
    pub fn file(locator: impl Into<String>, file_name: impl Into<String>, size: u64) -> Self {
        Self {
            source_kind: SourceKind::File,
            source_locator: locator.into(),
            file_name: file_name.into(),
            file_size: Some(size),
        }
    }

    /// A job for a remote document. The file name is taken from the last
    /// URL path segment.
    pub fn url(url: impl Into<String>) -> Self {
        let url = url.into();
        let file_name = url
            .split(['?', '#'])
            .next()
            .and_then(|path| path.trim_end_matches('/').rsplit('/').next())
            .filter(|s| !s.is_empty() && !s.contains(':'))
            .unwrap_or("document")
            .to_string();
        Self {
            source_kind: SourceKind::Url,
            source_locator: url,
            file_name,
            file_size: None,
        }
    }
}

/// Partial update of a job record. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub progress: Option<u8>,
    pub current_stage: Option<String>,
    pub file_size: Option<u64>,
    pub total_pages: Option<usize>,
    pub word_count: Option<usize>,
    pub braille_pages: Option<usize>,
    pub accuracy_score: Option<u8>,
    pub enhancements: Option<Vec<String>>,
    pub line_validations: Option<Vec<LineValidation>>,
    pub extraction_method: Option<ExtractionMethod>,
    pub cleaned_text_path: Option<String>,
    pub braille_text_path: Option<String>,
    pub report_path: Option<String>,
    pub error: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobUpdate {
    /// Stage transition: status, label and progress together.
    pub fn stage(status: JobStatus, label: impl Into<String>, progress: u8) -> Self {
        Self {
            status: Some(status),
            current_stage: Some(label.into()),
            progress: Some(progress),
            ..Default::default()
        }
    }

    pub fn progress(progress: u8) -> Self {
        Self {
            progress: Some(progress),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_job_starts_pending() {
        let job = ConversionJob::new(NewJob::file("uploads/a.pdf", "a.pdf", 42));
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);
        assert_eq!(job.file_size, Some(42));
        assert!(job.completed_at.is_none());
        assert!(uuid::Uuid::parse_str(&job.id).is_ok());
    }

    #[test]
    fn url_job_derives_file_name() {
        assert_eq!(NewJob::url("https://x.org/docs/report.pdf?dl=1").file_name, "report.pdf");
        assert_eq!(NewJob::url("https://x.org/").file_name, "x.org");
        assert_eq!(NewJob::url("https://").file_name, "document");
    }

    #[test]
    fn apply_leaves_unset_fields() {
        let mut job = ConversionJob::new(NewJob::url("https://x.org/a.pdf"));
        job.apply(JobUpdate::stage(JobStatus::Extracting, "Extracting text", 10));
        job.apply(JobUpdate {
            word_count: Some(7),
            ..Default::default()
        });
        assert_eq!(job.status, JobStatus::Extracting);
        assert_eq!(job.progress, 10);
        assert_eq!(job.word_count, Some(7));
        assert_eq!(job.current_stage, "Extracting text");
    }

    #[test]
    fn completed_at_is_set_once() {
        let mut job = ConversionJob::new(NewJob::url("https://x.org/a.pdf"));
        let first = Utc::now();
        job.apply(JobUpdate {
            completed_at: Some(first),
            ..Default::default()
        });
        job.apply(JobUpdate {
            completed_at: Some(first + chrono::Duration::seconds(10)),
            ..Default::default()
        });
        assert_eq!(job.completed_at, Some(first));
    }

    #[test]
    fn status_serialises_snake_case() {
        let json = serde_json::to_string(&JobStatus::AiReviewing).unwrap();
        assert_eq!(json, "\"ai_reviewing\"");
        let job = ConversionJob::new(NewJob::file("k", "f.pdf", 1));
        let v = serde_json::to_value(&job).unwrap();
        assert_eq!(v["status"], "pending");
        assert_eq!(v["sourceKind"], "file");
        assert!(v.get("currentStage").is_some());
    }
}
