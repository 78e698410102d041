//! Pipeline stages for document-to-Braille conversion.
//!
//! Each submodule implements one transformation step and is usable on its
//! own; the [`Orchestrator`](crate::orchestrator::Orchestrator) strings them
//! together for a job.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ extract ──▶ cleanup ──▶ braille ──▶ validate
//! (URL)    (pdfium,     (LLM,       (Grade 1)   (LLM, report)
//!           lopdf, OCR)  chunked)
//! ```
//!
//! 1. [`input`]   : download URL sources and tell PDFs from plain text
//! 2. [`extract`] : ordered strategy chain over the PDF bytes, backed by
//!    [`render`] (pdfium) and [`ocr`] (rasterise + Tesseract)
//! 3. [`cleanup`] : chunked AI repair of OCR noise through [`llm`]
//! 4. [`braille`] : deterministic transliteration and line wrapping
//! 5. [`validate`]: per-line scoring and the quality report
//!
//! [`postprocess`] holds the pure text rules shared by several stages.

pub mod braille;
pub mod cleanup;
pub mod extract;
pub mod input;
pub mod llm;
pub mod ocr;
pub mod postprocess;
pub mod render;
pub mod validate;
