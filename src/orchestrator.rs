//! Conversion orchestrator: runs one job through every stage and keeps its
//! record current.
//!
//! ## Stages and progress bands
//!
//! ```text
//! queued 5 ─▶ extracting 10→25 ─▶ ai_reviewing 30→70 ─▶ converting 75→90
//!                                                     └─▶ validating 95 ─▶ completed 100
//! ```
//!
//! Entering a stage persists `{status, current_stage, progress}` and
//! publishes a live update before any work starts. Artifacts go to the blob
//! store as soon as they exist and their locators are recorded before the
//! next stage, so a failure late in the pipeline keeps earlier outputs.
//!
//! A stage-fatal error marks the job `failed` with progress 0 and the error
//! message. There is no retry.
//!
//! Only `pending` jobs are run, and each id by one caller at a time. A
//! finished job is converted again by submitting a new one.
//!
//! ## Concurrency
//!
//! At most `max_concurrent_jobs` jobs run at once, gated by a semaphore the
//! orchestrator owns. A job that finds no free slot is marked `queued` and
//! polls for one every `queue_poll_interval_ms`.

use crate::config::ConversionConfig;
use crate::error::ConvertError;
use crate::job::{ConversionJob, JobStatus, JobUpdate, NewJob, SourceKind};
use crate::notify::{JobNotifier, LiveUpdate, LiveUpdateSink};
use crate::pipeline::braille::Transliterator;
use crate::pipeline::cleanup::AiCleanup;
use crate::pipeline::extract::{ExtractionResult, Extractor};
use crate::pipeline::llm::{self, CompletionService};
use crate::pipeline::validate::QualityValidator;
use crate::progress::{interpolate, StageProgress};
use crate::store::{BlobStore, JobStore};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

// ── Stage labels ─────────────────────────────────────────────────────────────

pub const LABEL_QUEUED: &str = "Queued - waiting for capacity";
pub const LABEL_EXTRACTING: &str = "Extracting text";
pub const LABEL_CLEANUP: &str = "AI review and cleanup";
pub const LABEL_BRAILLE: &str = "Converting to Braille";
pub const LABEL_VALIDATING: &str = "Validating quality";
pub const LABEL_COMPLETED: &str = "Completed";
pub const LABEL_ERROR: &str = "Error";

/// Blob locator of a job artifact, e.g. `"<job-id>/braille.txt"`.
pub fn artifact_locator(job_id: &str, name: &str) -> String {
    format!("{job_id}/{name}")
}

// ── Progress reporting ───────────────────────────────────────────────────────

/// Maps a stage fraction onto its band and persists it.
///
/// Writes only when the integer progress actually increases, and a failed
/// write is logged and dropped.
struct BandProgress {
    jobs: Arc<dyn JobStore>,
    notifier: JobNotifier,
    stage: JobStatus,
    start: u8,
    end: u8,
    last: AtomicU8,
}

impl BandProgress {
    fn new(
        jobs: Arc<dyn JobStore>,
        notifier: JobNotifier,
        stage: JobStatus,
        start: u8,
        end: u8,
    ) -> Self {
        Self {
            jobs,
            notifier,
            stage,
            start,
            end,
            last: AtomicU8::new(start),
        }
    }
}

#[async_trait]
impl StageProgress for BandProgress {
    async fn on_progress(&self, fraction: f64) {
        let value = interpolate(self.start, self.end, fraction);
        let previous = self.last.fetch_max(value, Ordering::SeqCst);
        if value <= previous {
            return;
        }
        if let Err(e) = self
            .jobs
            .update(self.notifier.job_id(), JobUpdate::progress(value))
            .await
        {
            warn!("Progress write for job {} failed: {}", self.notifier.job_id(), e);
            return;
        }
        self.notifier.send(
            LiveUpdate::new(self.notifier.job_id(), self.stage.as_str(), "Progress")
                .with_progress(value),
        );
    }
}

// ── Orchestrator ─────────────────────────────────────────────────────────────

/// Marks a job id as being run by this orchestrator until dropped.
struct Claim {
    claimed: Arc<Mutex<HashSet<String>>>,
    id: String,
}

impl Claim {
    fn take(claimed: &Arc<Mutex<HashSet<String>>>, id: &str) -> Option<Self> {
        let mut set = claimed.lock().unwrap_or_else(|e| e.into_inner());
        set.insert(id.to_string()).then(|| Self {
            claimed: claimed.clone(),
            id: id.to_string(),
        })
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        let mut set = self.claimed.lock().unwrap_or_else(|e| e.into_inner());
        set.remove(&self.id);
    }
}

struct Inner {
    config: ConversionConfig,
    jobs: Arc<dyn JobStore>,
    blobs: Arc<dyn BlobStore>,
    live: Arc<dyn LiveUpdateSink>,
    extractor: Extractor,
    cleanup: AiCleanup,
    transliterator: Transliterator,
    validator: QualityValidator,
    slots: Arc<Semaphore>,
    claimed: Arc<Mutex<HashSet<String>>>,
}

/// Runs conversion jobs. Cheap to clone; clones share stores and slots.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// Production wiring: the default extraction chain and whatever completion
    /// provider the environment offers.
    pub fn new(
        config: ConversionConfig,
        jobs: Arc<dyn JobStore>,
        blobs: Arc<dyn BlobStore>,
        live: Arc<dyn LiveUpdateSink>,
    ) -> Self {
        let extractor = Extractor::new(&config);
        let completion = llm::resolve_completion(&config);
        Self::with_services(config, jobs, blobs, live, extractor, completion)
    }

    /// Explicit wiring, used by tests and embedders.
    pub fn with_services(
        config: ConversionConfig,
        jobs: Arc<dyn JobStore>,
        blobs: Arc<dyn BlobStore>,
        live: Arc<dyn LiveUpdateSink>,
        extractor: Extractor,
        completion: Option<Arc<dyn CompletionService>>,
    ) -> Self {
        let cleanup = AiCleanup::new(&config, completion.clone());
        let validator = QualityValidator::new(&config, completion);
        info!(
            "Orchestrator ready: {} slot(s), extraction chain {:?}, AI cleanup {}",
            config.max_concurrent_jobs,
            extractor.methods(),
            if cleanup.is_enabled() { "on" } else { "off" }
        );
        let transliterator = Transliterator::new(config.line_width, config.lines_per_page);
        let slots = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        Self {
            inner: Arc::new(Inner {
                config,
                jobs,
                blobs,
                live,
                extractor,
                cleanup,
                transliterator,
                validator,
                slots,
                claimed: Arc::new(Mutex::new(HashSet::new())),
            }),
        }
    }

    pub fn config(&self) -> &ConversionConfig {
        &self.inner.config
    }

    pub fn jobs(&self) -> &Arc<dyn JobStore> {
        &self.inner.jobs
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.inner.blobs
    }

    /// Jobs currently holding a slot.
    pub fn active_jobs(&self) -> usize {
        self.inner
            .config
            .max_concurrent_jobs
            .saturating_sub(self.inner.slots.available_permits())
    }

    /// Create a `pending` record and start processing it in the background.
    pub async fn submit(&self, request: NewJob) -> Result<ConversionJob, ConvertError> {
        let job = self.inner.jobs.create(request).await?;
        info!("Job {} submitted ({})", job.id, job.file_name);

        let this = self.clone();
        let id = job.id.clone();
        tokio::spawn(async move {
            if let Err(e) = this.process_job(&id).await {
                error!("Job {} could not be processed: {}", id, e);
            }
        });
        Ok(job)
    }

    /// Run job `id` to a terminal state and return the final record.
    ///
    /// Stage failures are recorded on the job, not returned. `Err` means the
    /// record itself could not be read or written, or the job is not
    /// `pending` (including one already running here); such a job is left
    /// untouched.
    pub async fn process_job(&self, id: &str) -> Result<ConversionJob, ConvertError> {
        let job = self
            .inner
            .jobs
            .get(id)
            .await?
            .ok_or_else(|| ConvertError::JobNotFound(id.to_string()))?;
        let not_runnable = |status| ConvertError::JobNotRunnable {
            id: id.to_string(),
            status,
        };
        if job.status != JobStatus::Pending {
            return Err(not_runnable(job.status));
        }
        let Some(_claim) = Claim::take(&self.inner.claimed, id) else {
            return Err(not_runnable(job.status));
        };
        let notifier = JobNotifier::new(id, self.inner.live.clone());

        let outcome = self.drive(job, &notifier).await;
        self.inner.live.finish(id);
        outcome
    }

    /// Slot, stages and failure recording for a claimed job.
    async fn drive(
        &self,
        job: ConversionJob,
        notifier: &JobNotifier,
    ) -> Result<ConversionJob, ConvertError> {
        let id = job.id.clone();
        let _permit = self.acquire_slot(&id, notifier).await?;
        let start = Instant::now();

        match self.run(job, notifier).await {
            Ok(done) => {
                info!("Job {} completed in {:?}", id, start.elapsed());
                Ok(done)
            }
            Err(e) => {
                warn!("Job {} failed: {}", id, e);
                let failed = self
                    .inner
                    .jobs
                    .update(
                        &id,
                        JobUpdate {
                            error: Some(e.to_string()),
                            ..JobUpdate::stage(JobStatus::Failed, LABEL_ERROR, 0)
                        },
                    )
                    .await?;
                notifier.send(
                    LiveUpdate::new(&id, JobStatus::Failed.as_str(), "Conversion failed")
                        .with_detail(e.to_string())
                        .with_progress(0),
                );
                Ok(failed)
            }
        }
    }

    pub async fn clear_all(&self) -> Result<usize, ConvertError> {
        Ok(self.inner.jobs.clear_all().await?)
    }

    pub async fn clear_failed(&self) -> Result<usize, ConvertError> {
        Ok(self.inner.jobs.clear_failed().await?)
    }

    async fn acquire_slot(
        &self,
        id: &str,
        notifier: &JobNotifier,
    ) -> Result<OwnedSemaphorePermit, ConvertError> {
        let mut queued = false;
        loop {
            match self.inner.slots.clone().try_acquire_owned() {
                Ok(permit) => return Ok(permit),
                Err(tokio::sync::TryAcquireError::Closed) => {
                    return Err(ConvertError::Internal("job slots closed".into()))
                }
                Err(tokio::sync::TryAcquireError::NoPermits) => {
                    if !queued {
                        debug!("Job {} waiting for a slot", id);
                        self.enter_stage(id, notifier, JobStatus::Queued, LABEL_QUEUED, 5)
                            .await?;
                        queued = true;
                    }
                    sleep(Duration::from_millis(self.inner.config.queue_poll_interval_ms)).await;
                }
            }
        }
    }

    async fn enter_stage(
        &self,
        id: &str,
        notifier: &JobNotifier,
        status: JobStatus,
        label: &str,
        progress: u8,
    ) -> Result<ConversionJob, ConvertError> {
        let job = self
            .inner
            .jobs
            .update(id, JobUpdate::stage(status, label, progress))
            .await?;
        notifier.send(LiveUpdate::new(id, status.as_str(), label).with_progress(progress));
        Ok(job)
    }

    async fn record(&self, id: &str, update: JobUpdate) -> Result<ConversionJob, ConvertError> {
        Ok(self.inner.jobs.update(id, update).await?)
    }

    async fn store_artifact(
        &self,
        id: &str,
        name: &str,
        contents: &str,
    ) -> Result<String, ConvertError> {
        let locator = artifact_locator(id, name);
        self.inner.blobs.put(&locator, contents.as_bytes()).await?;
        Ok(locator)
    }

    fn band(&self, notifier: &JobNotifier, stage: JobStatus, start: u8, end: u8) -> BandProgress {
        BandProgress::new(self.inner.jobs.clone(), notifier.clone(), stage, start, end)
    }

    async fn extract(&self, job: &ConversionJob) -> Result<ExtractionResult, ConvertError> {
        if job.source_locator.trim().is_empty() {
            return Err(ConvertError::MissingSource {
                job_id: job.id.clone(),
            });
        }
        match job.source_kind {
            SourceKind::File => {
                let bytes = self.inner.blobs.fetch(&job.source_locator).await?;
                Ok(self.inner.extractor.extract_bytes(bytes, &job.file_name).await)
            }
            SourceKind::Url => self.inner.extractor.extract_url(&job.source_locator).await,
        }
    }

    async fn run(
        &self,
        job: ConversionJob,
        notifier: &JobNotifier,
    ) -> Result<ConversionJob, ConvertError> {
        let id = job.id.as_str();

        // ── Extraction ───────────────────────────────────────────────────────
        self.enter_stage(id, notifier, JobStatus::Extracting, LABEL_EXTRACTING, 10)
            .await?;
        let extracted = self.extract(&job).await?;
        self.record(
            id,
            JobUpdate {
                total_pages: Some(extracted.page_count),
                extraction_method: Some(extracted.method),
                file_size: (job.source_kind == SourceKind::Url)
                    .then_some(extracted.byte_size as u64),
                progress: Some(25),
                ..Default::default()
            },
        )
        .await?;
        notifier.send(
            LiveUpdate::new(id, JobStatus::Extracting.as_str(), "Text extracted")
                .with_detail(format!(
                    "{} page(s) via {}",
                    extracted.page_count, extracted.method
                ))
                .with_progress(25),
        );

        // ── AI cleanup ───────────────────────────────────────────────────────
        self.enter_stage(id, notifier, JobStatus::AiReviewing, LABEL_CLEANUP, 30)
            .await?;
        let band = self.band(notifier, JobStatus::AiReviewing, 30, 70);
        let cleaned = self
            .inner
            .cleanup
            .clean(&extracted.text, &band, notifier)
            .await;
        drop(extracted);
        let cleaned_path = self
            .store_artifact(id, "cleaned.txt", &cleaned.cleaned_text)
            .await?;
        self.record(
            id,
            JobUpdate {
                cleaned_text_path: Some(cleaned_path),
                word_count: Some(cleaned.word_count),
                enhancements: Some(cleaned.enhancements.clone()),
                progress: Some(70),
                ..Default::default()
            },
        )
        .await?;

        // ── Braille ──────────────────────────────────────────────────────────
        self.enter_stage(id, notifier, JobStatus::Converting, LABEL_BRAILLE, 75)
            .await?;
        let band = self.band(notifier, JobStatus::Converting, 75, 90);
        let braille = self
            .inner
            .transliterator
            .transliterate(&cleaned.cleaned_text, &band)
            .await;
        let braille_path = self
            .store_artifact(id, "braille.txt", &braille.braille_text)
            .await?;
        self.record(
            id,
            JobUpdate {
                braille_text_path: Some(braille_path),
                braille_pages: Some(braille.page_count),
                progress: Some(90),
                ..Default::default()
            },
        )
        .await?;

        // ── Validation ───────────────────────────────────────────────────────
        self.enter_stage(id, notifier, JobStatus::Converting, LABEL_VALIDATING, 95)
            .await?;
        let report = self
            .inner
            .validator
            .validate(&cleaned.cleaned_text, &braille.braille_text, notifier)
            .await;
        let report_path = self.store_artifact(id, "report.txt", &report.report).await?;
        self.record(
            id,
            JobUpdate {
                report_path: Some(report_path),
                accuracy_score: Some(report.accuracy_score),
                line_validations: Some(report.line_validations),
                ..Default::default()
            },
        )
        .await?;

        // ── Done ─────────────────────────────────────────────────────────────
        let done = self
            .record(
                id,
                JobUpdate {
                    completed_at: Some(Utc::now()),
                    ..JobUpdate::stage(JobStatus::Completed, LABEL_COMPLETED, 100)
                },
            )
            .await?;
        notifier.send(
            LiveUpdate::new(id, JobStatus::Completed.as_str(), LABEL_COMPLETED)
                .with_detail(format!(
                    "{} Braille page(s), accuracy {}%",
                    braille.page_count, report.accuracy_score
                ))
                .with_progress(100),
        );
        Ok(done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::notify::NullSink;
    use crate::store::{MemoryBlobStore, MemoryJobStore};

    /// Job store whose bare progress writes always fail.
    struct FailingProgressWrites(MemoryJobStore);

    #[async_trait]
    impl JobStore for FailingProgressWrites {
        async fn create(&self, request: NewJob) -> Result<ConversionJob, StoreError> {
            self.0.create(request).await
        }

        async fn get(&self, id: &str) -> Result<Option<ConversionJob>, StoreError> {
            self.0.get(id).await
        }

        async fn update(&self, id: &str, update: JobUpdate) -> Result<ConversionJob, StoreError> {
            let progress_only = update.progress.is_some()
                && update.status.is_none()
                && update.total_pages.is_none()
                && update.cleaned_text_path.is_none()
                && update.braille_text_path.is_none();
            if progress_only {
                return Err(StoreError::Io {
                    locator: id.to_string(),
                    source: std::io::Error::other("disk full"),
                });
            }
            self.0.update(id, update).await
        }

        async fn list_recent(&self, limit: usize) -> Result<Vec<ConversionJob>, StoreError> {
            self.0.list_recent(limit).await
        }

        async fn clear_all(&self) -> Result<usize, StoreError> {
            self.0.clear_all().await
        }

        async fn clear_failed(&self) -> Result<usize, StoreError> {
            self.0.clear_failed().await
        }
    }

    async fn text_job(jobs: &dyn JobStore, blobs: &MemoryBlobStore) -> ConversionJob {
        let locator = blobs.upload_locator("notes.txt").await.unwrap();
        blobs.put(&locator, b"Hello World\nSecond line").await.unwrap();
        jobs.create(NewJob::file(&locator, "notes.txt", 23))
            .await
            .unwrap()
    }

    fn orchestrator(jobs: Arc<dyn JobStore>, blobs: Arc<MemoryBlobStore>) -> Orchestrator {
        let config = ConversionConfig::builder()
            .max_concurrent_jobs(2)
            .queue_poll_interval_ms(20)
            .build()
            .unwrap();
        Orchestrator::with_services(
            config,
            jobs,
            blobs,
            Arc::new(NullSink),
            Extractor::with_strategies(Vec::new(), 5),
            None,
        )
    }

    #[test]
    fn artifact_locators() {
        assert_eq!(artifact_locator("abc", "report.txt"), "abc/report.txt");
    }

    #[tokio::test]
    async fn band_progress_is_monotonic_and_deduplicated() {
        let jobs = Arc::new(MemoryJobStore::new());
        let job = jobs.create(NewJob::url("https://x.org/a.pdf")).await.unwrap();
        let band = BandProgress::new(
            jobs.clone(),
            JobNotifier::new(&job.id, Arc::new(NullSink)),
            JobStatus::AiReviewing,
            30,
            70,
        );

        band.on_progress(0.5).await;
        assert_eq!(jobs.get(&job.id).await.unwrap().unwrap().progress, 50);
        band.on_progress(0.25).await;
        assert_eq!(jobs.get(&job.id).await.unwrap().unwrap().progress, 50);
        band.on_progress(1.0).await;
        assert_eq!(jobs.get(&job.id).await.unwrap().unwrap().progress, 70);
    }

    #[tokio::test]
    async fn job_waits_in_queue_while_slots_are_taken() {
        let jobs = Arc::new(MemoryJobStore::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let orch = orchestrator(jobs.clone(), blobs.clone());

        let locator = blobs.upload_locator("notes.txt").await.unwrap();
        blobs.put(&locator, b"Hello World").await.unwrap();
        let job = jobs
            .create(NewJob::file(&locator, "notes.txt", 11))
            .await
            .unwrap();

        let held = orch.inner.slots.clone().acquire_many_owned(2).await.unwrap();
        assert_eq!(orch.active_jobs(), 2);

        let runner = {
            let orch = orch.clone();
            let id = job.id.clone();
            tokio::spawn(async move { orch.process_job(&id).await })
        };

        sleep(Duration::from_millis(100)).await;
        let waiting = jobs.get(&job.id).await.unwrap().unwrap();
        assert_eq!(waiting.status, JobStatus::Queued);
        assert_eq!(waiting.progress, 5);
        assert_eq!(waiting.current_stage, LABEL_QUEUED);

        drop(held);
        let done = runner.await.unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.progress, 100);
        assert_eq!(orch.active_jobs(), 0);
    }

    #[tokio::test]
    async fn failed_progress_write_does_not_stop_the_job() {
        let jobs = Arc::new(FailingProgressWrites(MemoryJobStore::new()));
        let blobs = Arc::new(MemoryBlobStore::new());
        let job = text_job(jobs.as_ref(), &blobs).await;

        let band = BandProgress::new(
            jobs.clone(),
            JobNotifier::new(&job.id, Arc::new(NullSink)),
            JobStatus::Converting,
            75,
            90,
        );
        band.on_progress(0.5).await;
        assert_eq!(jobs.get(&job.id).await.unwrap().unwrap().progress, 0);

        let done = orchestrator(jobs.clone(), blobs).process_job(&job.id).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.progress, 100);
        assert!(done.error.is_none());
    }

    #[tokio::test]
    async fn finished_job_is_not_run_again() {
        let jobs = Arc::new(MemoryJobStore::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let orch = orchestrator(jobs.clone(), blobs.clone());
        let job = text_job(jobs.as_ref(), &blobs).await;

        let done = orch.process_job(&job.id).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);

        let again = orch.process_job(&job.id).await;
        assert!(matches!(
            again,
            Err(ConvertError::JobNotRunnable {
                status: JobStatus::Completed,
                ..
            })
        ));
        let stored = jobs.get(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.progress, 100);
        assert_eq!(stored.current_stage, LABEL_COMPLETED);
        assert_eq!(stored.completed_at, done.completed_at);
    }

    #[tokio::test]
    async fn claimed_job_is_not_run_twice() {
        let jobs = Arc::new(MemoryJobStore::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let orch = orchestrator(jobs.clone(), blobs.clone());
        let job = text_job(jobs.as_ref(), &blobs).await;

        let claim = Claim::take(&orch.inner.claimed, &job.id).unwrap();
        assert!(matches!(
            orch.process_job(&job.id).await,
            Err(ConvertError::JobNotRunnable {
                status: JobStatus::Pending,
                ..
            })
        ));
        assert_eq!(jobs.get(&job.id).await.unwrap().unwrap().progress, 0);

        drop(claim);
        let done = orch.process_job(&job.id).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn unknown_job_is_an_error() {
        let orch = orchestrator(
            Arc::new(MemoryJobStore::new()),
            Arc::new(MemoryBlobStore::new()),
        );
        assert!(matches!(
            orch.process_job("missing").await,
            Err(ConvertError::JobNotFound(_))
        ));
    }
}
