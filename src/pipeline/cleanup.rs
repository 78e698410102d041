//! AI cleanup: chunk the extracted text, have the completion service repair
//! each chunk, and reassemble.
//!
//! The stage never fails. Without a service, or once the service reports a
//! rate limit, text passes through unchanged and the enhancement log says
//! why. Any other per-chunk failure costs only that chunk.

use crate::config::ConversionConfig;
use crate::notify::JobNotifier;
use crate::pipeline::llm::CompletionService;
use crate::pipeline::postprocess::clean_model_output;
use crate::progress::StageProgress;
use crate::prompts;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Enhancement note recorded when no completion service is configured.
pub const AI_DISABLED_NOTE: &str = "AI processing disabled - using original text";

/// A contiguous slice of the input handed to the model in one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextChunk<'a> {
    pub index: usize,
    /// Byte offset of `text` within the original input.
    pub offset: usize,
    pub text: &'a str,
}

/// Largest char boundary `<= idx`.
fn floor_boundary(s: &str, idx: usize) -> usize {
    let mut i = idx.min(s.len());
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Split `text` into chunks of at most `target` bytes.
///
/// Each chunk ends, in order of preference, after the last paragraph break
/// (`"\n\n"`), after the last `". "`, or after the last whitespace within the
/// window, but never earlier than half the target. Failing all three it is
/// cut at the target. Concatenating the chunks reproduces `text` exactly.
pub fn chunk_text(text: &str, target: usize) -> Vec<TextChunk<'_>> {
    let target = target.max(2);
    let min_end = target / 2;
    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < text.len() {
        let rest = &text[start..];
        let end = if rest.len() <= target {
            rest.len()
        } else {
            let window = &rest[..floor_boundary(rest, target)];
            let accept = |end: usize| (end >= min_end).then_some(end);

            window
                .rfind("\n\n")
                .and_then(|i| accept(i + 2))
                .or_else(|| window.rfind(". ").and_then(|i| accept(i + 2)))
                .or_else(|| {
                    window
                        .char_indices()
                        .rev()
                        .find(|(_, c)| c.is_whitespace())
                        .and_then(|(i, c)| accept(i + c.len_utf8()))
                })
                .unwrap_or_else(|| {
                    // A single char wider than the window still has to advance.
                    let cut = window.len();
                    if cut == 0 {
                        rest.chars().next().map_or(rest.len(), char::len_utf8)
                    } else {
                        cut
                    }
                })
        };

        chunks.push(TextChunk {
            index: chunks.len(),
            offset: start,
            text: &rest[..end],
        });
        start += end;
    }
    chunks
}

/// Whitespace-separated token count.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Output of [`AiCleanup::clean`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupResult {
    pub cleaned_text: String,
    pub word_count: usize,
    pub enhancements: Vec<String>,
}

/// The cleanup stage.
pub struct AiCleanup {
    service: Option<Arc<dyn CompletionService>>,
    chunk_size: usize,
    max_tokens: usize,
    temperature: f32,
    probe_quota: bool,
}

impl AiCleanup {
    pub fn new(config: &ConversionConfig, service: Option<Arc<dyn CompletionService>>) -> Self {
        Self {
            service,
            chunk_size: config.chunk_size,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            probe_quota: config.probe_quota,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.service.is_some()
    }

    pub async fn clean(
        &self,
        text: &str,
        progress: &dyn StageProgress,
        notifier: &JobNotifier,
    ) -> CleanupResult {
        let Some(service) = self.service.as_ref() else {
            info!("AI cleanup skipped: no completion service");
            progress.on_progress(1.0).await;
            return passthrough(text, vec![AI_DISABLED_NOTE.to_string()]);
        };

        if self.probe_quota {
            match service.complete(prompts::PROBE_PROMPT, 5, 0.0).await {
                Ok(_) => debug!("Quota probe succeeded"),
                Err(e) if e.is_rate_limited() => {
                    warn!("Quota probe rate-limited, skipping AI cleanup: {}", e);
                    notifier.notify(
                        "ai_reviewing",
                        "AI cleanup skipped",
                        Some("The AI service is rate-limited; using original text".into()),
                    );
                    progress.on_progress(1.0).await;
                    return passthrough(
                        text,
                        vec![
                            "AI cleanup skipped - service rate limit or quota exceeded; using original text"
                                .to_string(),
                        ],
                    );
                }
                Err(e) => warn!("Quota probe failed, continuing: {}", e),
            }
        }

        let chunks = chunk_text(text, self.chunk_size);
        let total = chunks.len();
        let midpoint = total.div_ceil(2);
        info!("AI cleanup: {} chunks", total);

        let mut cleaned: Vec<String> = Vec::with_capacity(total);
        let mut enhancements = Vec::new();
        let mut rate_limited = false;

        for chunk in &chunks {
            let original = chunk.text.trim();

            if original.is_empty() {
                debug!("Chunk {}/{} is blank, skipping", chunk.index + 1, total);
            } else if rate_limited {
                cleaned.push(original.to_string());
            } else {
                let prompt = prompts::cleanup_prompt(original);
                match service
                    .complete(&prompt, self.max_tokens, self.temperature)
                    .await
                {
                    Ok(answer) => {
                        let answer = clean_model_output(&answer);
                        if answer.is_empty() {
                            warn!("Chunk {} came back empty, keeping original", chunk.index + 1);
                            cleaned.push(original.to_string());
                        } else {
                            if answer != original {
                                enhancements.push(format!(
                                    "Chunk {}/{}: corrected OCR errors and formatting",
                                    chunk.index + 1,
                                    total
                                ));
                            }
                            cleaned.push(answer);
                        }
                    }
                    Err(e) if e.is_rate_limited() => {
                        warn!(
                            "Rate limited at chunk {}/{}, passing the rest through: {}",
                            chunk.index + 1,
                            total,
                            e
                        );
                        enhancements.push(format!(
                            "AI cleanup stopped at chunk {}/{} - service rate limit reached; remaining text kept as extracted",
                            chunk.index + 1,
                            total
                        ));
                        rate_limited = true;
                        cleaned.push(original.to_string());
                    }
                    Err(e) => {
                        warn!("Chunk {}/{} failed, keeping original: {}", chunk.index + 1, total, e);
                        cleaned.push(original.to_string());
                    }
                }
            }

            let done = chunk.index + 1;
            progress.on_progress(done as f64 / total as f64).await;
            if done == midpoint && done < total {
                notifier.notify(
                    "ai_reviewing",
                    "AI cleanup halfway",
                    Some(format!("{} of {} chunks processed", done, total)),
                );
            }
        }

        if total == 0 {
            progress.on_progress(1.0).await;
        }
        notifier.notify(
            "ai_reviewing",
            "AI cleanup finished",
            Some(format!(
                "{} chunks processed, {} enhancements",
                total,
                enhancements.len()
            )),
        );

        let cleaned_text = cleaned.join("\n\n");
        CleanupResult {
            word_count: word_count(&cleaned_text),
            cleaned_text,
            enhancements,
        }
    }
}

fn passthrough(text: &str, enhancements: Vec<String>) -> CleanupResult {
    CleanupResult {
        cleaned_text: text.to_string(),
        word_count: word_count(text),
        enhancements,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use crate::notify::{LiveBroadcaster, LiveUpdateSink};
    use crate::progress::{FnProgress, NoopProgress};
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn reassemble(chunks: &[TextChunk<'_>]) -> String {
        chunks.iter().map(|c| c.text).collect()
    }

    #[test]
    fn prefers_paragraph_break() {
        let text = format!("{}\n\n{}. {}", "a".repeat(60), "b".repeat(20), "c".repeat(30));
        let chunks = chunk_text(&text, 100);
        assert!(chunks[0].text.ends_with("\n\n"), "{:?}", chunks[0].text);
        assert_eq!(reassemble(&chunks), text);
    }

    #[test]
    fn falls_back_to_sentence_then_whitespace() {
        let text = format!("{}. {} {}", "a".repeat(60), "b".repeat(20), "c".repeat(30));
        let chunks = chunk_text(&text, 100);
        assert!(chunks[0].text.ends_with(". "));

        let text = format!("{} {}", "a".repeat(70), "b".repeat(70));
        let chunks = chunk_text(&text, 100);
        assert_eq!(chunks[0].text.len(), 71);
        assert_eq!(reassemble(&chunks), text);
    }

    #[test]
    fn boundary_before_half_target_is_ignored() {
        let text = format!("{}\n\n{}", "a".repeat(10), "b".repeat(200));
        let chunks = chunk_text(&text, 100);
        assert_eq!(chunks[0].text.len(), 100);
        assert_eq!(chunks[1].offset, 100);
    }

    #[test]
    fn hard_cut_is_char_boundary_safe() {
        let text = "é".repeat(120);
        let chunks = chunk_text(&text, 101);
        assert!(chunks.iter().all(|c| c.text.len() <= 101));
        assert_eq!(reassemble(&chunks), text);
        assert_eq!(chunks.iter().map(|c| c.index).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = chunk_text("hello", 4000);
        assert_eq!(chunks.len(), 1);
        assert!(chunk_text("", 4000).is_empty());
    }

    /// Upper-cases chunks; rate limits or fails on scripted call numbers.
    struct Scripted {
        calls: Mutex<usize>,
        rate_limit_at: Option<usize>,
        fail_at: Option<usize>,
    }

    impl Scripted {
        fn new(rate_limit_at: Option<usize>, fail_at: Option<usize>) -> Self {
            Self {
                calls: Mutex::new(0),
                rate_limit_at,
                fail_at,
            }
        }
    }

    #[async_trait]
    impl CompletionService for Scripted {
        async fn complete(&self, prompt: &str, _: usize, _: f32) -> Result<String, ServiceError> {
            let n = {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                *calls
            };
            if Some(n) == self.rate_limit_at {
                return Err(ServiceError::RateLimited("429".into()));
            }
            if Some(n) == self.fail_at {
                return Err(ServiceError::Failed("500".into()));
            }
            let body = prompt
                .split("\"\"\"\n")
                .nth(1)
                .and_then(|s| s.split("\n\"\"\"").next())
                .unwrap_or("");
            Ok(body.to_uppercase())
        }
    }

    fn config(chunk_size: usize) -> ConversionConfig {
        ConversionConfig::builder()
            .chunk_size(chunk_size)
            .probe_quota(false)
            .build()
            .unwrap()
    }

    fn three_paragraphs() -> String {
        ["alpha ".repeat(15), "beta ".repeat(15), "gamma ".repeat(15)]
            .map(|p| p.trim().to_string())
            .join("\n\n")
    }

    #[tokio::test]
    async fn disabled_without_service() {
        let cleanup = AiCleanup::new(&ConversionConfig::default(), None);
        let r = cleanup
            .clean("Hello World", &NoopProgress, &JobNotifier::detached())
            .await;
        assert_eq!(r.cleaned_text, "Hello World");
        assert_eq!(r.word_count, 2);
        assert_eq!(r.enhancements, vec![AI_DISABLED_NOTE.to_string()]);
    }

    #[tokio::test]
    async fn rate_limited_probe_skips_cleanup() {
        let cfg = ConversionConfig::builder().probe_quota(true).build().unwrap();
        let cleanup = AiCleanup::new(&cfg, Some(Arc::new(Scripted::new(Some(1), None))));
        let r = cleanup
            .clean("keep me", &NoopProgress, &JobNotifier::detached())
            .await;
        assert_eq!(r.cleaned_text, "keep me");
        assert_eq!(r.enhancements.len(), 1);
        assert!(r.enhancements[0].contains("rate limit"));
    }

    #[tokio::test]
    async fn rate_limit_mid_run_passes_rest_through() {
        let cleanup = AiCleanup::new(&config(100), Some(Arc::new(Scripted::new(Some(2), None))));
        let text = three_paragraphs();
        let r = cleanup
            .clean(&text, &NoopProgress, &JobNotifier::detached())
            .await;

        let parts: Vec<&str> = r.cleaned_text.split("\n\n").collect();
        assert_eq!(parts.len(), 3);
        assert!(parts[0].starts_with("ALPHA"));
        assert!(parts[1].starts_with("beta"));
        assert!(parts[2].starts_with("gamma"));
        let rate_notes = r
            .enhancements
            .iter()
            .filter(|e| e.contains("rate limit"))
            .count();
        assert_eq!(rate_notes, 1);
    }

    #[tokio::test]
    async fn generic_failure_costs_one_chunk() {
        let cleanup = AiCleanup::new(&config(100), Some(Arc::new(Scripted::new(None, Some(2)))));
        let r = cleanup
            .clean(&three_paragraphs(), &NoopProgress, &JobNotifier::detached())
            .await;
        let parts: Vec<&str> = r.cleaned_text.split("\n\n").collect();
        assert!(parts[0].starts_with("ALPHA"));
        assert!(parts[1].starts_with("beta"));
        assert!(parts[2].starts_with("GAMMA"));
        assert_eq!(r.enhancements.len(), 2);
        assert_eq!(r.word_count, 45);
    }

    #[tokio::test]
    async fn blank_chunk_is_not_sent() {
        let service = Arc::new(Scripted::new(None, None));
        let cleanup = AiCleanup::new(&config(100), Some(service.clone()));
        let text = format!("{}{}tail", "x".repeat(60), " ".repeat(150));
        assert!(chunk_text(&text, 100)[1].text.trim().is_empty());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let progress = FnProgress::new(move |f| sink.lock().unwrap().push(f));
        let r = cleanup.clean(&text, &progress, &JobNotifier::detached()).await;

        assert_eq!(*service.calls.lock().unwrap(), 2);
        assert_eq!(r.cleaned_text, format!("{}\n\nTAIL", "X".repeat(60)));
        assert_eq!(seen.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn progress_and_live_updates() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let progress = FnProgress::new(move |f| sink.lock().unwrap().push(f));

        let broadcaster = Arc::new(LiveBroadcaster::new(16));
        let mut rx = broadcaster.subscribe("job");
        let notifier = JobNotifier::new("job", broadcaster.clone() as Arc<dyn LiveUpdateSink>);

        let cleanup = AiCleanup::new(&config(100), Some(Arc::new(Scripted::new(None, None))));
        cleanup.clean(&three_paragraphs(), &progress, &notifier).await;

        let fractions = seen.lock().unwrap().clone();
        assert_eq!(fractions.len(), 3);
        assert!(fractions.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(fractions.last().copied(), Some(1.0));

        let halfway = rx.try_recv().unwrap();
        assert_eq!(halfway.detail.as_deref(), Some("2 of 3 chunks processed"));
        let finished = rx.try_recv().unwrap();
        assert_eq!(finished.message, "AI cleanup finished");
    }
}
