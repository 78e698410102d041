//! Persistence seams: blob storage for documents and artifacts, and the job
//! record store.
//!
//! Both are traits so the orchestrator can run against any backend. The
//! in-memory implementations back the tests and the CLI's job table;
//! [`FsBlobStore`] keeps artifacts on disk.

use crate::error::StoreError;
use crate::job::{ConversionJob, JobStatus, JobUpdate, NewJob};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;
use tracing::debug;

// ── Blob store ──────────────────────────────────────────────────────────────

/// Object storage for source documents and derived artifacts.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Reserve a fresh locator under which an upload of `file_name` can be put.
    async fn upload_locator(&self, file_name: &str) -> Result<String, StoreError>;

    /// Read the blob at `locator`. Missing blobs yield [`StoreError::NotFound`].
    async fn fetch(&self, locator: &str) -> Result<Vec<u8>, StoreError>;

    /// Write `bytes` at `locator`, replacing any existing blob.
    async fn put(&self, locator: &str, bytes: &[u8]) -> Result<(), StoreError>;
}

/// Keep only characters that are safe in a single path segment.
fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('.').to_string();
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

fn fresh_upload_locator(file_name: &str) -> String {
    format!(
        "uploads/{}-{}",
        uuid::Uuid::new_v4().simple(),
        sanitize_file_name(file_name)
    )
}

/// Process-local blob store.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload_locator(&self, file_name: &str) -> Result<String, StoreError> {
        Ok(fresh_upload_locator(file_name))
    }

    async fn fetch(&self, locator: &str) -> Result<Vec<u8>, StoreError> {
        let blobs = self.blobs.read().unwrap_or_else(|e| e.into_inner());
        blobs
            .get(locator)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                locator: locator.to_string(),
            })
    }

    async fn put(&self, locator: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let mut blobs = self.blobs.write().unwrap_or_else(|e| e.into_inner());
        blobs.insert(locator.to_string(), bytes.to_vec());
        Ok(())
    }
}

/// Blob store rooted at a directory. Locators are relative paths.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a locator to a path under the root, rejecting anything that
    /// could escape it.
    pub fn resolve(&self, locator: &str) -> Result<PathBuf, StoreError> {
        let rel = Path::new(locator);
        let safe = !locator.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(StoreError::InvalidLocator(locator.to_string()));
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn upload_locator(&self, file_name: &str) -> Result<String, StoreError> {
        Ok(fresh_upload_locator(file_name))
    }

    async fn fetch(&self, locator: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.resolve(locator)?;
        tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound {
                    locator: locator.to_string(),
                }
            } else {
                StoreError::Io {
                    locator: locator.to_string(),
                    source: e,
                }
            }
        })
    }

    /// Atomic write: temp file in the target directory, then rename.
    async fn put(&self, locator: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.resolve(locator)?;
        let io_err = |source: std::io::Error| StoreError::Io {
            locator: locator.to_string(),
            source,
        };
        let parent = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        tokio::fs::create_dir_all(&parent).await.map_err(io_err)?;

        let data = bytes.to_vec();
        let target = path.clone();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
            tmp.write_all(&data)?;
            tmp.persist(&target).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| io_err(std::io::Error::other(e.to_string())))?
        .map_err(io_err)?;

        debug!("Stored {} bytes at {}", bytes.len(), path.display());
        Ok(())
    }
}

// ── Job store ───────────────────────────────────────────────────────────────

/// Persistence for job records.
///
/// Every call is atomic from the caller's point of view: readers never see a
/// half-applied update.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, request: NewJob) -> Result<ConversionJob, StoreError>;

    async fn get(&self, id: &str) -> Result<Option<ConversionJob>, StoreError>;

    /// Apply `update` to job `id`; errors with [`StoreError::JobNotFound`] if
    /// the record does not exist.
    async fn update(&self, id: &str, update: JobUpdate) -> Result<ConversionJob, StoreError>;

    /// Most recently created jobs first.
    async fn list_recent(&self, limit: usize) -> Result<Vec<ConversionJob>, StoreError>;

    /// Remove every job. Returns how many were removed.
    async fn clear_all(&self) -> Result<usize, StoreError>;

    /// Remove failed jobs only. Returns how many were removed.
    async fn clear_failed(&self) -> Result<usize, StoreError>;
}

/// Job store held in process memory.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<String, ConversionJob>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully-formed record, replacing any with the same id.
    pub fn insert(&self, job: ConversionJob) {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        jobs.insert(job.id.clone(), job);
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, request: NewJob) -> Result<ConversionJob, StoreError> {
        let job = ConversionJob::new(request);
        self.insert(job.clone());
        Ok(job)
    }

    async fn get(&self, id: &str) -> Result<Option<ConversionJob>, StoreError> {
        let jobs = self.jobs.read().unwrap_or_else(|e| e.into_inner());
        Ok(jobs.get(id).cloned())
    }

    async fn update(&self, id: &str, update: JobUpdate) -> Result<ConversionJob, StoreError> {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        let job = jobs.get_mut(id).ok_or_else(|| StoreError::JobNotFound {
            id: id.to_string(),
        })?;
        job.apply(update);
        Ok(job.clone())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<ConversionJob>, StoreError> {
        let jobs = self.jobs.read().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<ConversionJob> = jobs.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all.truncate(limit);
        Ok(all)
    }

    async fn clear_all(&self) -> Result<usize, StoreError> {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        let n = jobs.len();
        jobs.clear();
        Ok(n)
    }

    async fn clear_failed(&self) -> Result<usize, StoreError> {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        let before = jobs.len();
        jobs.retain(|_, j| j.status != JobStatus::Failed);
        Ok(before - jobs.len())
    }
}
