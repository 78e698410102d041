//! Live status updates fanned out to subscribers of a job id.
//!
//! The pipeline publishes through the [`LiveUpdateSink`] trait; it never
//! knows who, if anyone, is listening. [`LiveBroadcaster`] keeps one tokio
//! broadcast channel per job id so several observers can follow the same job.
//! Delivery is best-effort: a lagging or dropped subscriber never affects the
//! others or the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

/// One status notification for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveUpdate {
    /// Job the update belongs to.
    pub job_id: String,
    /// Pipeline stage, e.g. `"extracting"` or `"ai_reviewing"`.
    pub stage: String,
    /// Short human-readable message.
    pub message: String,
    /// Longer detail text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Job progress at the time of the update, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    pub timestamp: DateTime<Utc>,
}

impl LiveUpdate {
    pub fn new(job_id: &str, stage: &str, message: impl Into<String>) -> Self {
        Self {
            job_id: job_id.to_string(),
            stage: stage.to_string(),
            message: message.into(),
            detail: None,
            progress: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// Fire-and-forget destination for live updates.
pub trait LiveUpdateSink: Send + Sync {
    fn publish(&self, job_id: &str, update: LiveUpdate);

    /// No further updates will be published for `job_id`.
    fn finish(&self, _job_id: &str) {}
}

/// Sink that discards everything.
pub struct NullSink;

impl LiveUpdateSink for NullSink {
    fn publish(&self, _job_id: &str, _update: LiveUpdate) {}
}

/// Per-job broadcast channels.
pub struct LiveBroadcaster {
    capacity: usize,
    channels: Mutex<HashMap<String, broadcast::Sender<LiveUpdate>>>,
}

impl LiveBroadcaster {
    /// Creates a broadcaster whose per-job channels buffer `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to updates for `job_id`. Subscribing before the job starts is
    /// fine; the channel is created on demand.
    pub fn subscribe(&self, job_id: &str) -> broadcast::Receiver<LiveUpdate> {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels
            .entry(job_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Like [`subscribe`](Self::subscribe) but as a `Stream`. Lagged events
    /// surface as `Err` items.
    pub fn subscribe_stream(&self, job_id: &str) -> BroadcastStream<LiveUpdate> {
        BroadcastStream::new(self.subscribe(job_id))
    }

    /// Drop the channel for `job_id`; current subscribers see the stream end.
    pub fn close(&self, job_id: &str) {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels.remove(job_id);
    }

    /// Number of live subscribers for `job_id`.
    pub fn subscriber_count(&self, job_id: &str) -> usize {
        let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels
            .get(job_id)
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for LiveBroadcaster {
    fn default() -> Self {
        Self::new(64)
    }
}

impl LiveUpdateSink for LiveBroadcaster {
    fn publish(&self, job_id: &str, update: LiveUpdate) {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        let Some(sender) = channels.get(job_id) else {
            return;
        };
        // Every subscriber has gone away; forget the channel.
        if sender.send(update).is_err() {
            channels.remove(job_id);
        }
    }

    fn finish(&self, job_id: &str) {
        self.close(job_id);
    }
}

/// A sink bound to one job id, handed to the stages of that job.
#[derive(Clone)]
pub struct JobNotifier {
    job_id: String,
    sink: Arc<dyn LiveUpdateSink>,
}

impl JobNotifier {
    pub fn new(job_id: impl Into<String>, sink: Arc<dyn LiveUpdateSink>) -> Self {
        Self {
            job_id: job_id.into(),
            sink,
        }
    }

    /// Notifier that goes nowhere, for running stages outside a job.
    pub fn detached() -> Self {
        Self::new("", Arc::new(NullSink))
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn notify(&self, stage: &str, message: impl Into<String>, detail: Option<String>) {
        let mut update = LiveUpdate::new(&self.job_id, stage, message);
        update.detail = detail;
        self.sink.publish(&self.job_id, update);
    }

    pub fn send(&self, update: LiveUpdate) {
        self.sink.publish(&self.job_id, update);
    }
}
