//! Text extraction: PDF bytes or a URL → plain text and a page count.
//!
//! A PDF is run through an ordered chain of [`ExtractionStrategy`]s:
//!
//! ```text
//! pdfium text layer ──▶ lopdf object walk ──▶ OCR ──▶ raw bytes ──▶ diagnostic
//! ```
//!
//! The extractor keeps the best result so far, scored by meaningful length,
//! and stops as soon as it clears [`MEANINGFUL_CHARS`]. A failing strategy is
//! logged and counts as "nothing found"; extraction itself never fails for a
//! lack of text. When nothing clears the threshold the caller gets a
//! diagnostic message instead, so later stages always have something to work
//! with.

use crate::config::ConversionConfig;
use crate::error::{ConvertError, ExtractError};
use crate::job::ExtractionMethod;
use crate::pipeline::input::{self, FetchedDocument};
use crate::pipeline::postprocess::{collapse_whitespace, meaningful_len, strip_non_printable};
use crate::pipeline::render;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[cfg(feature = "ocr")]
use crate::pipeline::ocr::{self, OcrEngine, OcrLimits, PageRasterizer};

/// Text is "meaningful" once its whitespace-collapsed length exceeds this.
pub const MEANINGFUL_CHARS: usize = 100;

/// What one strategy found.
#[derive(Debug, Clone, Default)]
pub struct StrategyOutput {
    pub text: String,
    /// `None` when the strategy cannot tell.
    pub page_count: Option<usize>,
}

/// One way of getting text out of a PDF.
#[async_trait]
pub trait ExtractionStrategy: Send + Sync {
    fn method(&self) -> ExtractionMethod;

    async fn extract(&self, pdf: Arc<[u8]>) -> Result<StrategyOutput, ExtractError>;
}

/// Final extraction outcome.
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    pub text: String,
    /// At least 1.
    pub page_count: usize,
    /// Size of the source body in bytes.
    pub byte_size: usize,
    pub method: ExtractionMethod,
}

// ── Strategies ───────────────────────────────────────────────────────────────

/// The pdfium text layer, page by page.
pub struct PdfiumTextLayer;

#[async_trait]
impl ExtractionStrategy for PdfiumTextLayer {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::PdfiumTextLayer
    }

    async fn extract(&self, pdf: Arc<[u8]>) -> Result<StrategyOutput, ExtractError> {
        let (text, pages) = tokio::task::spawn_blocking(move || render::text_layer_blocking(&pdf))
            .await
            .map_err(|e| ExtractError::Task(format!("pdfium task panicked: {}", e)))??;
        Ok(StrategyOutput {
            text,
            page_count: Some(pages),
        })
    }
}

/// Walk the content streams of every page with lopdf.
pub struct LopdfObjectWalk;

impl LopdfObjectWalk {
    fn extract_blocking(pdf: &[u8]) -> Result<StrategyOutput, ExtractError> {
        let doc = lopdf::Document::load_mem(pdf).map_err(|e| ExtractError::Parse {
            strategy: "lopdf",
            detail: e.to_string(),
        })?;

        let pages = doc.get_pages();
        let mut text = String::new();
        for page_num in pages.keys() {
            match doc.extract_text(&[*page_num]) {
                Ok(page_text) => {
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str(page_text.trim_end());
                }
                Err(e) => debug!("lopdf page {} has no extractable text: {}", page_num, e),
            }
        }

        Ok(StrategyOutput {
            text,
            page_count: Some(pages.len()),
        })
    }
}

#[async_trait]
impl ExtractionStrategy for LopdfObjectWalk {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::LopdfObjectWalk
    }

    async fn extract(&self, pdf: Arc<[u8]>) -> Result<StrategyOutput, ExtractError> {
        tokio::task::spawn_blocking(move || Self::extract_blocking(&pdf))
            .await
            .map_err(|e| ExtractError::Task(format!("lopdf task panicked: {}", e)))?
    }
}

/// Rasterise the first pages and OCR them.
#[cfg(feature = "ocr")]
pub struct OcrStrategy {
    rasterizer: Arc<dyn PageRasterizer>,
    engine: Arc<dyn OcrEngine>,
    limits: OcrLimits,
}

#[cfg(feature = "ocr")]
impl OcrStrategy {
    pub fn new(
        rasterizer: Arc<dyn PageRasterizer>,
        engine: Arc<dyn OcrEngine>,
        limits: OcrLimits,
    ) -> Self {
        Self {
            rasterizer,
            engine,
            limits,
        }
    }
}

#[cfg(feature = "ocr")]
#[async_trait]
impl ExtractionStrategy for OcrStrategy {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::Ocr
    }

    async fn extract(&self, pdf: Arc<[u8]>) -> Result<StrategyOutput, ExtractError> {
        let (text, pages) =
            ocr::ocr_pages(pdf, self.rasterizer.as_ref(), self.engine.clone(), self.limits)
                .await?;
        Ok(StrategyOutput {
            text,
            page_count: Some(pages),
        })
    }
}

/// Printable characters recovered straight from the bytes.
pub struct RawBytes;

#[async_trait]
impl ExtractionStrategy for RawBytes {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::RawBytes
    }

    async fn extract(&self, pdf: Arc<[u8]>) -> Result<StrategyOutput, ExtractError> {
        let decoded = String::from_utf8_lossy(&pdf);
        Ok(StrategyOutput {
            text: collapse_whitespace(&strip_non_printable(&decoded)),
            page_count: None,
        })
    }
}

/// Explanation returned when no strategy found meaningful text.
pub fn diagnostic_message(byte_size: usize) -> String {
    format!(
        "No readable text could be extracted from this document ({byte_size} bytes). \
         It may be a scanned image without a text layer, password-protected or encrypted, \
         or corrupted. Try a text-based PDF, or enable OCR support."
    )
}

// ── Extractor ────────────────────────────────────────────────────────────────

/// Runs the strategy chain and handles non-PDF sources.
pub struct Extractor {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
    download_timeout_secs: u64,
}

impl Extractor {
    /// The production chain for `config`. OCR is part of it only when the
    /// crate is built with the `ocr` feature.
    pub fn new(config: &ConversionConfig) -> Self {
        let mut strategies: Vec<Box<dyn ExtractionStrategy>> =
            vec![Box::new(PdfiumTextLayer), Box::new(LopdfObjectWalk)];

        #[cfg(feature = "ocr")]
        strategies.push(Box::new(OcrStrategy::new(
            Arc::new(ocr::PdfiumRasterizer),
            Arc::new(ocr::TesseractOcr::new(config.ocr_languages.clone())),
            OcrLimits {
                max_pages: config.ocr_max_pages,
                page_timeout_secs: config.ocr_page_timeout_secs,
                max_pixels: config.ocr_max_pixels,
            },
        )));

        strategies.push(Box::new(RawBytes));
        Self::with_strategies(strategies, config.download_timeout_secs)
    }

    /// A custom chain, tried in the given order.
    pub fn with_strategies(
        strategies: Vec<Box<dyn ExtractionStrategy>>,
        download_timeout_secs: u64,
    ) -> Self {
        Self {
            strategies,
            download_timeout_secs,
        }
    }

    pub fn methods(&self) -> Vec<ExtractionMethod> {
        self.strategies.iter().map(|s| s.method()).collect()
    }

    /// Extract from an uploaded file. Files that are not PDFs by name or
    /// magic bytes are read as text.
    pub async fn extract_bytes(&self, bytes: Vec<u8>, file_name: &str) -> ExtractionResult {
        if input::is_pdf(None, file_name, &bytes) {
            self.extract_pdf(Arc::from(bytes)).await
        } else {
            plain_text(&bytes)
        }
    }

    /// Download `url` and extract from it.
    pub async fn extract_url(&self, url: &str) -> Result<ExtractionResult, ConvertError> {
        let fetched = input::fetch_url(url, self.download_timeout_secs).await?;
        Ok(self.extract_fetched(fetched).await)
    }

    /// Extract from an already downloaded body.
    pub async fn extract_fetched(&self, doc: FetchedDocument) -> ExtractionResult {
        if doc.is_pdf() {
            self.extract_pdf(Arc::from(doc.bytes)).await
        } else {
            plain_text(&doc.bytes)
        }
    }

    /// Run the strategy chain over PDF bytes.
    pub async fn extract_pdf(&self, pdf: Arc<[u8]>) -> ExtractionResult {
        let byte_size = pdf.len();
        let mut best: Option<(ExtractionMethod, StrategyOutput, usize)> = None;

        for strategy in &self.strategies {
            let method = strategy.method();
            let output = match strategy.extract(pdf.clone()).await {
                Ok(output) => output,
                Err(ExtractError::PdfiumUnavailable(detail)) => {
                    debug!("{} skipped, pdfium unavailable: {}", method, detail);
                    continue;
                }
                Err(e) => {
                    warn!("{} failed: {}", method, e);
                    continue;
                }
            };

            let score = meaningful_len(&output.text);
            debug!("{} found {} meaningful chars", method, score);
            if best.as_ref().map_or(true, |(_, _, s)| score > *s) {
                best = Some((method, output, score));
            }
            if best.as_ref().is_some_and(|(_, _, s)| *s > MEANINGFUL_CHARS) {
                break;
            }
        }

        match best {
            Some((method, output, score)) if score > MEANINGFUL_CHARS => {
                info!("Extracted {} chars via {}", score, method);
                ExtractionResult {
                    text: output.text.trim().to_string(),
                    page_count: output.page_count.unwrap_or(1).max(1),
                    byte_size,
                    method,
                }
            }
            _ => {
                warn!("No strategy found meaningful text in {} bytes", byte_size);
                ExtractionResult {
                    text: diagnostic_message(byte_size),
                    page_count: 1,
                    byte_size,
                    method: ExtractionMethod::Diagnostic,
                }
            }
        }
    }
}

fn plain_text(bytes: &[u8]) -> ExtractionResult {
    ExtractionResult {
        text: String::from_utf8_lossy(bytes).into_owned(),
        page_count: 1,
        byte_size: bytes.len(),
        method: ExtractionMethod::PlainText,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        method: ExtractionMethod,
        result: Result<StrategyOutput, ExtractError>,
        calls: Arc<AtomicUsize>,
    }

    impl Fixed {
        fn text(
            method: ExtractionMethod,
            text: &str,
            calls: &Arc<AtomicUsize>,
        ) -> Box<dyn ExtractionStrategy> {
            Box::new(Self {
                method,
                result: Ok(StrategyOutput {
                    text: text.to_string(),
                    page_count: Some(3),
                }),
                calls: calls.clone(),
            })
        }

        fn failing(
            method: ExtractionMethod,
            error: ExtractError,
            calls: &Arc<AtomicUsize>,
        ) -> Box<dyn ExtractionStrategy> {
            Box::new(Self {
                method,
                result: Err(error),
                calls: calls.clone(),
            })
        }
    }

    #[async_trait]
    impl ExtractionStrategy for Fixed {
        fn method(&self) -> ExtractionMethod {
            self.method
        }

        async fn extract(&self, _pdf: Arc<[u8]>) -> Result<StrategyOutput, ExtractError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    fn long_text() -> String {
        "The quick brown fox jumps over the lazy dog. ".repeat(4)
    }

    #[tokio::test]
    async fn stops_at_first_meaningful_strategy() {
        let calls = Arc::new(AtomicUsize::new(0));
        let extractor = Extractor::with_strategies(
            vec![
                Fixed::text(ExtractionMethod::PdfiumTextLayer, &long_text(), &calls),
                Fixed::text(ExtractionMethod::LopdfObjectWalk, "never", &calls),
            ],
            5,
        );
        let result = extractor.extract_pdf(Arc::from(&b"%PDF-1.4"[..])).await;
        assert_eq!(result.method, ExtractionMethod::PdfiumTextLayer);
        assert_eq!(result.page_count, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_strategy_falls_through() {
        let calls = Arc::new(AtomicUsize::new(0));
        let extractor = Extractor::with_strategies(
            vec![
                Fixed::failing(
                    ExtractionMethod::PdfiumTextLayer,
                    ExtractError::PdfiumUnavailable("no lib".into()),
                    &calls,
                ),
                Fixed::text(ExtractionMethod::LopdfObjectWalk, &long_text(), &calls),
            ],
            5,
        );
        let result = extractor.extract_pdf(Arc::from(&b"%PDF-1.4"[..])).await;
        assert_eq!(result.method, ExtractionMethod::LopdfObjectWalk);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn short_text_everywhere_yields_diagnostic() {
        let calls = Arc::new(AtomicUsize::new(0));
        let extractor = Extractor::with_strategies(
            vec![
                Fixed::text(ExtractionMethod::PdfiumTextLayer, "Page 1", &calls),
                Fixed::text(ExtractionMethod::RawBytes, "obj endobj", &calls),
            ],
            5,
        );
        let result = extractor.extract_pdf(Arc::from(&b"%PDF-1.4 tiny"[..])).await;
        assert_eq!(result.method, ExtractionMethod::Diagnostic);
        assert_eq!(result.page_count, 1);
        assert!(meaningful_len(&result.text) > MEANINGFUL_CHARS);
        assert!(result.text.contains("13 bytes"));
    }

    #[tokio::test]
    async fn raw_bytes_recovers_printable_text() {
        let mut bytes = b"%PDF-1.4\x00\x01\x02".to_vec();
        bytes.extend_from_slice(long_text().as_bytes());
        bytes.extend_from_slice(&[0xff, 0xfe, 0x00]);

        let out = RawBytes.extract(Arc::from(bytes)).await.unwrap();
        assert!(out.text.starts_with("%PDF-1.4 The quick brown fox"));
        assert!(!out.text.contains('\u{0}'));
        assert!(!out.text.contains('\u{FFFD}'));
    }

    #[tokio::test]
    async fn lopdf_rejects_garbage() {
        let err = LopdfObjectWalk
            .extract(Arc::from(&b"%PDF-1.4 not really"[..]))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Parse { strategy: "lopdf", .. }));
    }

    #[tokio::test]
    async fn non_pdf_upload_is_plain_text() {
        let extractor = Extractor::with_strategies(Vec::new(), 5);
        let result = extractor
            .extract_bytes(b"Hello World".to_vec(), "notes.txt")
            .await;
        assert_eq!(result.text, "Hello World");
        assert_eq!(result.page_count, 1);
        assert_eq!(result.byte_size, 11);
        assert_eq!(result.method, ExtractionMethod::PlainText);
    }
}
