//! Fractional progress reporting for long-running pipeline stages.
//!
//! The cleanup client and the transliterator report how far through their
//! input they are as a fraction in `0.0..=1.0`. The orchestrator maps that
//! fraction onto the job's progress band and persists it; tests record it.
//!
//! # Example
//!
//! ```rust
//! use pdf2braille::progress::{StageProgress, FnProgress};
//! use std::sync::{Arc, Mutex};
//!
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = seen.clone();
//! let progress = FnProgress::new(move |f| sink.lock().unwrap().push(f));
//!
//! tokio_test::block_on(progress.on_progress(0.5));
//! assert_eq!(*seen.lock().unwrap(), vec![0.5]);
//! ```

use async_trait::async_trait;

/// Receives fractional progress from a pipeline stage.
///
/// Implementations must be `Send + Sync`; the orchestrator awaits each call,
/// so an implementation may persist the value before returning. Reporting is
/// advisory: implementations swallow their own failures.
#[async_trait]
pub trait StageProgress: Send + Sync {
    /// Called after each unit of work with `done / total`.
    async fn on_progress(&self, fraction: f64);
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgress;

#[async_trait]
impl StageProgress for NoopProgress {
    async fn on_progress(&self, _fraction: f64) {}
}

/// Adapts a synchronous closure into a [`StageProgress`].
pub struct FnProgress<F>(F);

impl<F> FnProgress<F>
where
    F: Fn(f64) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> StageProgress for FnProgress<F>
where
    F: Fn(f64) + Send + Sync,
{
    async fn on_progress(&self, fraction: f64) {
        (self.0)(fraction)
    }
}

/// Map a stage-local fraction onto a `[start, end]` band of job progress.
///
/// The fraction is clamped to `0.0..=1.0` and the result rounded down, so a
/// stage never reports its end value before it has finished.
pub fn interpolate(start: u8, end: u8, fraction: f64) -> u8 {
    let f = if fraction.is_finite() {
        fraction.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let span = end.saturating_sub(start) as f64;
    start + (span * f).floor() as u8
}
