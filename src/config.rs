//! Configuration for the conversion pipeline.
//!
//! Every knob of the pipeline lives in [`ConversionConfig`], built via
//! [`ConversionConfigBuilder`]. The orchestrator shares one config across all
//! jobs behind an `Arc`.

use crate::error::ConvertError;
use std::fmt;

/// Configuration for the PDF-to-Braille pipeline.
///
/// Built via [`ConversionConfig::builder()`] or using
/// [`ConversionConfig::default()`].
///
/// # Example
/// ```rust
/// use pdf2braille::ConversionConfig;
///
/// let config = ConversionConfig::builder()
///     .chunk_size(3000)
///     .max_concurrent_jobs(4)
///     .model("gpt-4.1-nano")
///     .build()
///     .unwrap();
/// assert_eq!(config.max_concurrent_jobs, 4);
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    // ── Extraction ───────────────────────────────────────────────────────
    /// Download timeout for URL sources in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Maximum number of pages sent through OCR. Default: 5.
    ///
    /// OCR costs seconds per page; later pages of a long scanned document are
    /// skipped rather than stalling the job.
    pub ocr_max_pages: usize,

    /// Per-page OCR timeout in seconds. Default: 30.
    pub ocr_page_timeout_secs: u64,

    /// Longest edge, in pixels, of a page rasterised for OCR. Default: 1600.
    pub ocr_max_pixels: u32,

    /// Tesseract language codes joined with `+`. Default: `"eng"`.
    pub ocr_languages: String,

    // ── AI cleanup ───────────────────────────────────────────────────────
    /// LLM model identifier. If None, uses the provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    /// If None, the provider is auto-detected from the environment.
    pub provider_name: Option<String>,

    /// Target chunk size in characters for AI cleanup. Default: 4000.
    pub chunk_size: usize,

    /// Maximum tokens the model may generate per chunk. Default: 4096.
    pub max_tokens: usize,

    /// Sampling temperature for cleanup and validation. Default: 0.1.
    pub temperature: f32,

    /// Send a one-token probe before cleanup to detect an exhausted quota.
    /// Default: true.
    pub probe_quota: bool,

    /// Per-call timeout for the completion service in seconds. Default: 60.
    pub api_timeout_secs: u64,

    // ── Braille ──────────────────────────────────────────────────────────
    /// Braille cells per output line. Default: 40.
    pub line_width: usize,

    /// Braille lines per page. Default: 25.
    pub lines_per_page: usize,

    // ── Validation ───────────────────────────────────────────────────────
    /// Lines sent to the model per validation request. Default: 10.
    pub validation_batch_size: usize,

    /// Only the first N line pairs are validated. Default: 200.
    pub validation_max_lines: usize,

    /// Score given to a line when no model verdict is available. Default: 85.
    pub default_line_score: u8,

    // ── Orchestration ────────────────────────────────────────────────────
    /// Jobs allowed in active processing at once. Default: 2.
    pub max_concurrent_jobs: usize,

    /// Interval between capacity checks for a queued job, in ms. Default: 1000.
    pub queue_poll_interval_ms: u64,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            download_timeout_secs: 120,
            ocr_max_pages: 5,
            ocr_page_timeout_secs: 30,
            ocr_max_pixels: 1600,
            ocr_languages: "eng".to_string(),
            model: None,
            provider_name: None,
            chunk_size: 4000,
            max_tokens: 4096,
            temperature: 0.1,
            probe_quota: true,
            api_timeout_secs: 60,
            line_width: 40,
            lines_per_page: 25,
            validation_batch_size: 10,
            validation_max_lines: 200,
            default_line_score: 85,
            max_concurrent_jobs: 2,
            queue_poll_interval_ms: 1000,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field("ocr_max_pages", &self.ocr_max_pages)
            .field("ocr_page_timeout_secs", &self.ocr_page_timeout_secs)
            .field("ocr_max_pixels", &self.ocr_max_pixels)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("chunk_size", &self.chunk_size)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("line_width", &self.line_width)
            .field("lines_per_page", &self.lines_per_page)
            .field("validation_batch_size", &self.validation_batch_size)
            .field("validation_max_lines", &self.validation_max_lines)
            .field("max_concurrent_jobs", &self.max_concurrent_jobs)
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn ocr_max_pages(mut self, n: usize) -> Self {
        self.config.ocr_max_pages = n;
        self
    }

    pub fn ocr_page_timeout_secs(mut self, secs: u64) -> Self {
        self.config.ocr_page_timeout_secs = secs.max(1);
        self
    }

    pub fn ocr_max_pixels(mut self, px: u32) -> Self {
        self.config.ocr_max_pixels = px.max(100);
        self
    }

    pub fn ocr_languages(mut self, langs: impl Into<String>) -> Self {
        self.config.ocr_languages = langs.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn chunk_size(mut self, n: usize) -> Self {
        self.config.chunk_size = n;
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn probe_quota(mut self, v: bool) -> Self {
        self.config.probe_quota = v;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn line_width(mut self, cells: usize) -> Self {
        self.config.line_width = cells;
        self
    }

    pub fn lines_per_page(mut self, lines: usize) -> Self {
        self.config.lines_per_page = lines;
        self
    }

    pub fn validation_batch_size(mut self, n: usize) -> Self {
        self.config.validation_batch_size = n.max(1);
        self
    }

    pub fn validation_max_lines(mut self, n: usize) -> Self {
        self.config.validation_max_lines = n;
        self
    }

    pub fn default_line_score(mut self, score: u8) -> Self {
        self.config.default_line_score = score.min(100);
        self
    }

    pub fn max_concurrent_jobs(mut self, n: usize) -> Self {
        self.config.max_concurrent_jobs = n;
        self
    }

    pub fn queue_poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.queue_poll_interval_ms = ms;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, ConvertError> {
        let c = &self.config;
        if c.chunk_size < 100 {
            return Err(ConvertError::InvalidConfig(format!(
                "Chunk size must be ≥ 100 characters, got {}",
                c.chunk_size
            )));
        }
        if c.line_width < 8 {
            return Err(ConvertError::InvalidConfig(format!(
                "Line width must be ≥ 8 cells, got {}",
                c.line_width
            )));
        }
        if c.lines_per_page == 0 {
            return Err(ConvertError::InvalidConfig(
                "Lines per page must be ≥ 1".into(),
            ));
        }
        if c.max_concurrent_jobs == 0 {
            return Err(ConvertError::InvalidConfig(
                "Concurrent job limit must be ≥ 1".into(),
            ));
        }
        if c.max_tokens == 0 {
            return Err(ConvertError::InvalidConfig(
                "Max tokens must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = ConversionConfig::default();
        assert_eq!(c.line_width, 40);
        assert_eq!(c.lines_per_page, 25);
        assert_eq!(c.max_concurrent_jobs, 2);
        assert_eq!(c.default_line_score, 85);
        assert_eq!(c.ocr_max_pages, 5);
    }

    #[test]
    fn builder_rejects_zero_concurrency() {
        let err = ConversionConfig::builder()
            .max_concurrent_jobs(0)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("Concurrent job limit"));
    }

    #[test]
    fn builder_rejects_tiny_chunks() {
        assert!(ConversionConfig::builder().chunk_size(10).build().is_err());
    }

    #[test]
    fn builder_clamps_temperature_and_score() {
        let c = ConversionConfig::builder()
            .temperature(5.0)
            .default_line_score(250)
            .build()
            .unwrap();
        assert_eq!(c.temperature, 2.0);
        assert_eq!(c.default_line_score, 100);
    }
}
