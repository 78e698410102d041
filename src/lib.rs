//! # pdf2braille
//!
//! Convert PDF documents and web-hosted text into Grade 1 Unicode Braille,
//! with AI-assisted cleanup of extraction noise and an AI-scored quality
//! report.
//!
//! ## Pipeline Overview
//!
//! ```text
//! job (pending)
//!  │
//!  ├─ 1. Extract    pdfium text layer → lopdf → OCR → raw bytes → diagnostic
//!  ├─ 2. Clean      chunked LLM repair of OCR errors and formatting
//!  ├─ 3. Braille    Grade 1 transliteration, 40-cell lines, 25-line pages
//!  ├─ 4. Validate   per-line accuracy scores and a text report
//!  └─ 5. Complete   artifacts in the blob store, record updated
//! ```
//!
//! Every stage persists its progress on the job record and publishes live
//! updates to subscribers of the job id.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf2braille::{
//!     ConversionConfig, JobStore, LiveBroadcaster, MemoryBlobStore, MemoryJobStore, NewJob,
//!     Orchestrator,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let orchestrator = Orchestrator::new(
//!         ConversionConfig::default(),
//!         Arc::new(MemoryJobStore::new()),
//!         Arc::new(MemoryBlobStore::new()),
//!         Arc::new(LiveBroadcaster::default()),
//!     );
//!     let job = orchestrator
//!         .jobs()
//!         .create(NewJob::url("https://example.com/paper.pdf"))
//!         .await?;
//!     let done = orchestrator.process_job(&job.id).await?;
//!     println!("{} → {:?} ({}%)", done.status, done.braille_text_path, done.progress);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2braille` binary (clap + anyhow + indicatif + tracing-subscriber) |
//! | `ocr`   | off     | Tesseract OCR fallback via leptess (needs libtesseract) |
//!
//! Without an AI credential the pipeline still runs: cleanup passes text
//! through and validation marks every line for manual review.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod job;
pub mod notify;
pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ConversionConfig, ConversionConfigBuilder};
pub use error::{ConvertError, ExtractError, ServiceError, StoreError};
pub use job::{
    ConversionJob, ExtractionMethod, JobStatus, JobUpdate, LineValidation, NewJob, SourceKind,
};
pub use notify::{JobNotifier, LiveBroadcaster, LiveUpdate, LiveUpdateSink, NullSink};
pub use orchestrator::Orchestrator;
pub use pipeline::braille::{BrailleResult, Transliterator};
pub use pipeline::cleanup::{AiCleanup, CleanupResult, TextChunk};
pub use pipeline::extract::{ExtractionResult, ExtractionStrategy, Extractor};
pub use pipeline::llm::CompletionService;
pub use pipeline::validate::{QualityValidator, ValidationReport};
pub use progress::{NoopProgress, StageProgress};
pub use store::{BlobStore, FsBlobStore, JobStore, MemoryBlobStore, MemoryJobStore};
