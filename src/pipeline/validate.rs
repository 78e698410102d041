//! Quality validation: score each Braille line against its source line and
//! summarise the result in a plain-text report.
//!
//! Source and Braille lines are paired by position. The completion service
//! scores them in batches; anything it cannot or will not score gets the
//! configured default so the job always finishes with a complete report.

use crate::config::ConversionConfig;
use crate::job::LineValidation;
use crate::notify::JobNotifier;
use crate::pipeline::llm::CompletionService;
use crate::pipeline::postprocess::extract_json_array;
use crate::prompts;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Issue attached to every line when no completion service is configured.
pub const UNAVAILABLE_ISSUE: &str = "Automated validation unavailable - manual review advised";

/// Issue attached to a line the service did not score.
pub const MANUAL_REVIEW_ISSUE: &str = "Automated check inconclusive - needs manual review";

/// Output of [`QualityValidator::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    /// Rounded mean of the per-line scores, 0–100.
    pub accuracy_score: u8,
    pub report: String,
    pub line_validations: Vec<LineValidation>,
}

/// One entry of the model's JSON answer.
#[derive(Debug, Deserialize)]
struct LineVerdict {
    line: usize,
    accuracy: f64,
    #[serde(default)]
    issues: Vec<String>,
}

/// Parse a batch answer into `line → (accuracy, issues)`.
fn parse_verdicts(answer: &str) -> Option<HashMap<usize, (u8, Vec<String>)>> {
    let json = extract_json_array(answer)?;
    let verdicts: Vec<LineVerdict> = serde_json::from_str(json).ok()?;
    Some(
        verdicts
            .into_iter()
            .filter(|v| v.accuracy.is_finite())
            .map(|v| (v.line, (v.accuracy.round().clamp(0.0, 100.0) as u8, v.issues)))
            .collect(),
    )
}

/// Excellent / Good / Needs Improvement.
pub fn quality_label(score: u8) -> &'static str {
    if score >= 95 {
        "Excellent"
    } else if score >= 85 {
        "Good"
    } else {
        "Needs Improvement"
    }
}

/// The validation stage.
pub struct QualityValidator {
    service: Option<Arc<dyn CompletionService>>,
    batch_size: usize,
    max_lines: usize,
    default_score: u8,
    max_tokens: usize,
}

impl QualityValidator {
    pub fn new(config: &ConversionConfig, service: Option<Arc<dyn CompletionService>>) -> Self {
        Self {
            service,
            batch_size: config.validation_batch_size.max(1),
            max_lines: config.validation_max_lines,
            default_score: config.default_line_score,
            max_tokens: config.max_tokens,
        }
    }

    fn default_line(&self, n: usize, original: &str, braille: &str, issue: &str) -> LineValidation {
        LineValidation {
            line_number: n,
            original: original.to_string(),
            braille: braille.to_string(),
            accuracy: self.default_score,
            issues: vec![issue.to_string()],
        }
    }

    pub async fn validate(
        &self,
        cleaned: &str,
        braille: &str,
        notifier: &JobNotifier,
    ) -> ValidationReport {
        let originals: Vec<&str> = cleaned.lines().collect();
        let cells: Vec<&str> = braille.lines().collect();
        let sampled = originals.len().max(cells.len()).min(self.max_lines);
        let pairs: Vec<(usize, &str, &str)> = (0..sampled)
            .map(|i| {
                (
                    i + 1,
                    originals.get(i).copied().unwrap_or(""),
                    cells.get(i).copied().unwrap_or(""),
                )
            })
            .collect();

        let Some(service) = self.service.as_ref() else {
            info!("Validation degraded: no completion service, {} lines defaulted", sampled);
            let lines: Vec<LineValidation> = pairs
                .iter()
                .map(|&(n, o, b)| self.default_line(n, o, b, UNAVAILABLE_ISSUE))
                .collect();
            return self.finish(lines, true, notifier);
        };

        let mut lines: Vec<LineValidation> = Vec::with_capacity(sampled);
        let mut pending: Vec<(usize, &str, &str)> = Vec::new();
        for &(n, o, b) in &pairs {
            if o.trim().is_empty() && b.trim().is_empty() {
                lines.push(LineValidation {
                    line_number: n,
                    original: o.to_string(),
                    braille: b.to_string(),
                    accuracy: 100,
                    issues: Vec::new(),
                });
            } else {
                pending.push((n, o, b));
            }
        }

        let batches: Vec<&[(usize, &str, &str)]> = pending.chunks(self.batch_size).collect();
        let mut rate_limited = false;

        for (i, batch) in batches.iter().enumerate() {
            let verdicts = if rate_limited {
                None
            } else {
                let prompt = prompts::validation_prompt(batch);
                match service.complete(&prompt, self.max_tokens, 0.0).await {
                    Ok(answer) => {
                        let parsed = parse_verdicts(&answer);
                        if parsed.is_none() {
                            warn!("Validation batch {} answer was not parseable", i + 1);
                        }
                        parsed
                    }
                    Err(e) if e.is_rate_limited() => {
                        warn!(
                            "Validation rate-limited at batch {}/{}, defaulting the rest: {}",
                            i + 1,
                            batches.len(),
                            e
                        );
                        notifier.notify(
                            "converting",
                            "Validation rate-limited",
                            Some("Remaining lines marked for manual review".into()),
                        );
                        rate_limited = true;
                        None
                    }
                    Err(e) => {
                        warn!("Validation batch {} failed: {}", i + 1, e);
                        None
                    }
                }
            };

            let mut verdicts = verdicts.unwrap_or_default();
            for &(n, o, b) in batch.iter() {
                match verdicts.remove(&n) {
                    Some((accuracy, issues)) => lines.push(LineValidation {
                        line_number: n,
                        original: o.to_string(),
                        braille: b.to_string(),
                        accuracy,
                        issues,
                    }),
                    None => lines.push(self.default_line(n, o, b, MANUAL_REVIEW_ISSUE)),
                }
            }
            debug!("Validated batch {}/{}", i + 1, batches.len());
        }

        lines.sort_by_key(|l| l.line_number);
        self.finish(lines, false, notifier)
    }

    fn finish(
        &self,
        lines: Vec<LineValidation>,
        degraded: bool,
        notifier: &JobNotifier,
    ) -> ValidationReport {
        let accuracy_score = if lines.is_empty() {
            if degraded {
                self.default_score
            } else {
                100
            }
        } else {
            let sum: u64 = lines.iter().map(|l| l.accuracy as u64).sum();
            (sum as f64 / lines.len() as f64).round() as u8
        };

        let report = render_report(&lines, accuracy_score, degraded);
        notifier.notify(
            "converting",
            "Validation finished",
            Some(format!(
                "Accuracy {}% ({})",
                accuracy_score,
                quality_label(accuracy_score)
            )),
        );
        info!("Validation: {}% over {} lines", accuracy_score, lines.len());

        ValidationReport {
            accuracy_score,
            report,
            line_validations: lines,
        }
    }
}

fn render_report(lines: &[LineValidation], score: u8, degraded: bool) -> String {
    let excellent = lines.iter().filter(|l| l.accuracy >= 95).count();
    let poor: Vec<&LineValidation> = lines.iter().filter(|l| l.accuracy < 85).collect();

    let mut out = String::new();
    out.push_str("Braille Conversion Quality Report\n");
    out.push_str("=================================\n\n");
    out.push_str(&format!(
        "Overall accuracy: {}% ({})\n",
        score,
        quality_label(score)
    ));
    out.push_str(&format!("Total lines validated: {}\n", lines.len()));
    out.push_str(&format!("Lines at 95% or above: {}\n", excellent));
    out.push_str(&format!("Lines below 85%: {}\n", poor.len()));

    if degraded {
        out.push_str(
            "\nAutomated validation was unavailable. Manual review by a Braille proofreader is advised.\n",
        );
    }

    if !poor.is_empty() {
        out.push_str("\nLines needing attention:\n");
        for l in poor {
            out.push_str(&format!("  Line {} ({}%)", l.line_number, l.accuracy));
            if !l.issues.is_empty() {
                out.push_str(&format!(": {}", l.issues.join("; ")));
            }
            out.push('\n');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Answers {
        replies: Mutex<Vec<Result<String, ServiceError>>>,
        calls: Mutex<usize>,
    }

    impl Answers {
        fn new(mut replies: Vec<Result<String, ServiceError>>) -> Arc<Self> {
            replies.reverse();
            Arc::new(Self {
                replies: Mutex::new(replies),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl CompletionService for Answers {
        async fn complete(&self, _: &str, _: usize, _: f32) -> Result<String, ServiceError> {
            *self.calls.lock().unwrap() += 1;
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok("[]".into()))
        }
    }

    fn config(batch: usize) -> ConversionConfig {
        ConversionConfig::builder()
            .validation_batch_size(batch)
            .build()
            .unwrap()
    }

    #[test]
    fn labels() {
        assert_eq!(quality_label(100), "Excellent");
        assert_eq!(quality_label(95), "Excellent");
        assert_eq!(quality_label(94), "Good");
        assert_eq!(quality_label(85), "Good");
        assert_eq!(quality_label(84), "Needs Improvement");
    }

    #[test]
    fn parses_fenced_answer() {
        let v = parse_verdicts(
            "```json\n[{\"line\": 2, \"accuracy\": 97.6, \"issues\": []}, {\"line\": 3, \"accuracy\": 140}]\n```",
        )
        .unwrap();
        assert_eq!(v[&2].0, 98);
        assert_eq!(v[&3].0, 100);
        assert!(parse_verdicts("I think it's fine").is_none());
    }

    #[tokio::test]
    async fn degraded_without_service() {
        let v = QualityValidator::new(&ConversionConfig::default(), None);
        let r = v.validate("a\nb", "⠁\n⠃", &JobNotifier::detached()).await;
        assert_eq!(r.accuracy_score, 85);
        assert_eq!(r.line_validations.len(), 2);
        assert!(r
            .line_validations
            .iter()
            .all(|l| l.accuracy == 85 && l.issues == vec![UNAVAILABLE_ISSUE.to_string()]));
        assert!(r.report.contains("Manual review"));
        assert!(r.report.contains("(Good)"));
    }

    #[tokio::test]
    async fn empty_pairs_skip_the_service() {
        let answers = Answers::new(vec![Ok(
            r#"[{"line": 1, "accuracy": 90, "issues": ["spacing"]}, {"line": 3, "accuracy": 70}]"#
                .into(),
        )]);
        let v = QualityValidator::new(&config(10), Some(answers.clone()));
        let r = v
            .validate("Ab\n\ncd", "⠠⠁⠃\n\n⠉⠙", &JobNotifier::detached())
            .await;

        assert_eq!(answers.calls(), 1);
        let scores: Vec<u8> = r.line_validations.iter().map(|l| l.accuracy).collect();
        assert_eq!(scores, vec![90, 100, 70]);
        assert_eq!(r.accuracy_score, 87);
        assert!(r.report.contains("Line 3 (70%)"));
    }

    #[tokio::test]
    async fn unparsable_batch_gets_defaults() {
        let answers = Answers::new(vec![Ok("looks good to me".into())]);
        let v = QualityValidator::new(&config(10), Some(answers));
        let r = v.validate("x", "⠭", &JobNotifier::detached()).await;
        assert_eq!(r.line_validations[0].accuracy, 85);
        assert_eq!(r.line_validations[0].issues, vec![MANUAL_REVIEW_ISSUE.to_string()]);
    }

    #[tokio::test]
    async fn rate_limit_short_circuits_remaining_batches() {
        let answers = Answers::new(vec![
            Ok(r#"[{"line": 1, "accuracy": 100}, {"line": 2, "accuracy": 100}]"#.into()),
            Err(ServiceError::RateLimited("429".into())),
        ]);
        let v = QualityValidator::new(&config(2), Some(answers.clone()));
        let text = "a\nb\nc\nd\ne\nf";
        let braille = "⠁\n⠃\n⠉\n⠙\n⠑\n⠋";
        let r = v.validate(text, braille, &JobNotifier::detached()).await;

        assert_eq!(answers.calls(), 2);
        let scores: Vec<u8> = r.line_validations.iter().map(|l| l.accuracy).collect();
        assert_eq!(scores, vec![100, 100, 85, 85, 85, 85]);
    }

    #[tokio::test]
    async fn sampling_budget_caps_lines() {
        let cfg = ConversionConfig::builder()
            .validation_max_lines(3)
            .build()
            .unwrap();
        let v = QualityValidator::new(&cfg, None);
        let r = v
            .validate("1\n2\n3\n4\n5", "⠼⠁\n⠼⠃\n⠼⠉\n⠼⠙\n⠼⠑", &JobNotifier::detached())
            .await;
        assert_eq!(r.line_validations.len(), 3);
    }
}
