//! Optical character recognition over rasterised PDF pages.
//!
//! Rasterising and recognising are behind traits ([`PageRasterizer`],
//! [`OcrEngine`]) so the page loop can be exercised without pdfium or
//! Tesseract installed. The production pair is [`PdfiumRasterizer`] and,
//! with the `ocr` feature, [`TesseractOcr`].
//!
//! Pages are processed strictly one at a time and each PNG buffer is dropped
//! as soon as its page is recognised, so peak memory is one page.
//!
//! A timed-out page cannot be cancelled: its blocking task keeps running and
//! holds its image until Tesseract returns. OCR therefore stops at the first
//! timeout and keeps the pages recognised so far, so at most one such task
//! is left behind per document.

use crate::error::ExtractError;
use crate::pipeline::render;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

/// Text placed between the OCR output of consecutive pages.
pub const PAGE_SEPARATOR: &str = "\n\n";

/// Image → text.
pub trait OcrEngine: Send + Sync {
    /// Recognise the text in a PNG-encoded page image. Blocking.
    fn recognize(&self, png: &[u8]) -> Result<String, ExtractError>;
}

/// Source of page images.
#[async_trait]
pub trait PageRasterizer: Send + Sync {
    async fn page_count(&self, pdf: Arc<[u8]>) -> Result<usize, ExtractError>;

    /// PNG of page `index` (0-based), longest edge at most `max_pixels`.
    async fn render(
        &self,
        pdf: Arc<[u8]>,
        index: usize,
        max_pixels: u32,
    ) -> Result<Vec<u8>, ExtractError>;
}

/// Rasteriser backed by pdfium.
pub struct PdfiumRasterizer;

#[async_trait]
impl PageRasterizer for PdfiumRasterizer {
    async fn page_count(&self, pdf: Arc<[u8]>) -> Result<usize, ExtractError> {
        render::page_count(pdf).await
    }

    async fn render(
        &self,
        pdf: Arc<[u8]>,
        index: usize,
        max_pixels: u32,
    ) -> Result<Vec<u8>, ExtractError> {
        render::render_page_png(pdf, index, max_pixels).await
    }
}

/// Tesseract through leptess. A fresh engine is initialised per page because
/// `LepTess` is neither `Send` nor `Sync`.
#[cfg(feature = "ocr")]
pub struct TesseractOcr {
    languages: String,
}

#[cfg(feature = "ocr")]
impl TesseractOcr {
    /// `languages` uses Tesseract's `eng+deu` syntax.
    pub fn new(languages: impl Into<String>) -> Self {
        Self {
            languages: languages.into(),
        }
    }
}

#[cfg(feature = "ocr")]
impl OcrEngine for TesseractOcr {
    fn recognize(&self, png: &[u8]) -> Result<String, ExtractError> {
        let mut lt = leptess::LepTess::new(None, &self.languages)
            .map_err(|e| ExtractError::Ocr(format!("Tesseract init failed: {:?}", e)))?;
        lt.set_image_from_mem(png)
            .map_err(|e| ExtractError::Ocr(format!("Image load failed: {:?}", e)))?;
        lt.get_utf8_text()
            .map_err(|e| ExtractError::Ocr(format!("Text decode failed: {}", e)))
    }
}

/// Limits applied to one OCR run.
#[derive(Debug, Clone, Copy)]
pub struct OcrLimits {
    pub max_pages: usize,
    pub page_timeout_secs: u64,
    pub max_pixels: u32,
}

/// OCR the first `limits.max_pages` pages of `pdf`.
///
/// Returns the joined text and the document's full page count. A page that
/// fails is logged and skipped. A page that exceeds its timeout ends the run.
/// Only a failure to read the page count is an error.
pub async fn ocr_pages(
    pdf: Arc<[u8]>,
    rasterizer: &dyn PageRasterizer,
    engine: Arc<dyn OcrEngine>,
    limits: OcrLimits,
) -> Result<(String, usize), ExtractError> {
    let total_pages = rasterizer.page_count(pdf.clone()).await?;
    let pages = total_pages.min(limits.max_pages);
    info!("OCR: {} of {} pages", pages, total_pages);

    let mut texts: Vec<String> = Vec::with_capacity(pages);
    for index in 0..pages {
        let png = match rasterizer.render(pdf.clone(), index, limits.max_pixels).await {
            Ok(png) => png,
            Err(e) => {
                warn!("OCR page {} skipped: {}", index + 1, e);
                continue;
            }
        };

        let engine = engine.clone();
        let task = tokio::task::spawn_blocking(move || {
            let result = engine.recognize(&png);
            drop(png);
            result
        });

        let secs = limits.page_timeout_secs;
        match timeout(Duration::from_secs(secs), task).await {
            Ok(Ok(Ok(text))) => {
                debug!("OCR page {}: {} chars", index + 1, text.len());
                texts.push(text.trim().to_string());
            }
            Ok(Ok(Err(e))) => warn!("OCR page {} failed: {}", index + 1, e),
            Ok(Err(e)) => warn!("OCR page {} task failed: {}", index + 1, e),
            Err(_) => {
                warn!(
                    "{}; skipping the remaining pages",
                    ExtractError::OcrTimeout {
                        page: index + 1,
                        secs
                    }
                );
                break;
            }
        }
    }

    texts.retain(|t| !t.is_empty());
    Ok((texts.join(PAGE_SEPARATOR), total_pages))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakePages {
        pages: usize,
        rendered: AtomicUsize,
    }

    #[async_trait]
    impl PageRasterizer for FakePages {
        async fn page_count(&self, _pdf: Arc<[u8]>) -> Result<usize, ExtractError> {
            Ok(self.pages)
        }

        async fn render(
            &self,
            _pdf: Arc<[u8]>,
            index: usize,
            _max_pixels: u32,
        ) -> Result<Vec<u8>, ExtractError> {
            self.rendered.fetch_add(1, Ordering::SeqCst);
            Ok(vec![index as u8])
        }
    }

    /// Echoes the page index; sleeps on page 2 (index 1).
    struct EchoEngine;

    impl OcrEngine for EchoEngine {
        fn recognize(&self, png: &[u8]) -> Result<String, ExtractError> {
            if png[0] == 1 {
                std::thread::sleep(std::time::Duration::from_millis(1500));
            }
            Ok(format!("page {}", png[0] + 1))
        }
    }

    fn limits(max_pages: usize) -> OcrLimits {
        OcrLimits {
            max_pages,
            page_timeout_secs: 1,
            max_pixels: 100,
        }
    }

    #[tokio::test]
    async fn page_cap_is_respected() {
        let pages = FakePages {
            pages: 12,
            rendered: AtomicUsize::new(0),
        };
        let (_, total) = ocr_pages(Arc::from(&b"%PDF"[..]), &pages, Arc::new(EchoEngine), limits(1))
            .await
            .unwrap();
        assert_eq!(total, 12);
        assert_eq!(pages.rendered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timeout_stops_after_recognised_pages() {
        let pages = FakePages {
            pages: 3,
            rendered: AtomicUsize::new(0),
        };
        let (text, total) =
            ocr_pages(Arc::from(&b"%PDF"[..]), &pages, Arc::new(EchoEngine), limits(5))
                .await
                .unwrap();
        assert_eq!(text, "page 1");
        assert_eq!(total, 3);
        // Page 3 is never rasterised.
        assert_eq!(pages.rendered.load(Ordering::SeqCst), 2);
    }
}
