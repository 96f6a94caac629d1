//! Job persistence.
//!
//! Every state transition goes through the store so that the terminal-state
//! rule and the one-active-job-per-document rule hold no matter who calls.

use super::{Job, JobId, JobStatus};
use crate::error::JobError;
use crate::output::MergedRecord;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;
use tracing::debug;

/// Message stored when a failure arrives without one.
pub const UNKNOWN_ERROR: &str = "Unknown error occurred";

/// Terminal jobs kept by [`InMemoryJobStore::new`].
pub const DEFAULT_TERMINAL_RETENTION: usize = 1000;

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Add a pending job. Fails with [`JobError::AlreadyActive`] when the
    /// same document already has a pending or processing job.
    async fn insert(&self, job: Job) -> Result<(), JobError>;

    async fn get(&self, id: JobId) -> Option<Job>;

    async fn list(&self) -> Vec<Job>;

    async fn mark_processing(&self, id: JobId) -> Result<(), JobError>;

    /// Raise progress to `progress` (clamped to [0, 1]). Never lowers it.
    async fn set_progress(&self, id: JobId, progress: f32) -> Result<(), JobError>;

    async fn complete(&self, id: JobId, result: MergedRecord) -> Result<(), JobError>;

    /// Mark failed. An empty message is replaced with [`UNKNOWN_ERROR`].
    async fn fail(&self, id: JobId, error: String) -> Result<(), JobError>;
}

/// `HashMap` behind a tokio `RwLock`.
///
/// Pending and processing jobs are always kept. Terminal jobs are kept up
/// to a retention cap; past it, the longest-finished ones are dropped.
pub struct InMemoryJobStore {
    inner: RwLock<Jobs>,
    retention: usize,
}

#[derive(Default)]
struct Jobs {
    by_id: HashMap<JobId, Job>,
    /// Terminal jobs, oldest first.
    finished: VecDeque<JobId>,
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::with_retention(DEFAULT_TERMINAL_RETENTION)
    }
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `retention` terminal jobs (at least one).
    pub fn with_retention(retention: usize) -> Self {
        Self {
            inner: RwLock::new(Jobs::default()),
            retention: retention.max(1),
        }
    }

    async fn mutate(&self, id: JobId, f: impl FnOnce(&mut Job)) -> Result<(), JobError> {
        let mut inner = self.inner.write().await;
        let job = inner
            .by_id
            .get_mut(&id)
            .ok_or_else(|| JobError::NotFound(id.to_string()))?;
        if job.status.is_terminal() {
            return Err(JobError::AlreadyTerminal {
                id: id.to_string(),
                status: job.status.to_string(),
            });
        }
        f(job);
        if job.status.is_terminal() {
            inner.finished.push_back(id);
            while inner.finished.len() > self.retention {
                if let Some(evicted) = inner.finished.pop_front() {
                    inner.by_id.remove(&evicted);
                    debug!("Evicted finished job {}", evicted);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: Job) -> Result<(), JobError> {
        let mut inner = self.inner.write().await;
        if let Some(active) = inner
            .by_id
            .values()
            .find(|j| j.document.id == job.document.id && !j.status.is_terminal())
        {
            return Err(JobError::AlreadyActive {
                document_id: job.document.id.clone(),
                job_id: active.id.to_string(),
            });
        }
        inner.by_id.insert(job.id, job);
        Ok(())
    }

    async fn get(&self, id: JobId) -> Option<Job> {
        self.inner.read().await.by_id.get(&id).cloned()
    }

    async fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.inner.read().await.by_id.values().cloned().collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }

    async fn mark_processing(&self, id: JobId) -> Result<(), JobError> {
        self.mutate(id, |job| {
            job.status = JobStatus::Processing;
            job.started_at = Some(Utc::now());
        })
        .await
    }

    async fn set_progress(&self, id: JobId, progress: f32) -> Result<(), JobError> {
        let progress = if progress.is_nan() { 0.0 } else { progress.clamp(0.0, 1.0) };
        self.mutate(id, |job| job.progress = job.progress.max(progress))
            .await
    }

    async fn complete(&self, id: JobId, result: MergedRecord) -> Result<(), JobError> {
        self.mutate(id, |job| {
            job.status = JobStatus::Completed;
            job.progress = 1.0;
            job.result = Some(result);
            job.error = None;
            job.finished_at = Some(Utc::now());
        })
        .await
    }

    async fn fail(&self, id: JobId, error: String) -> Result<(), JobError> {
        let error = if error.trim().is_empty() {
            UNKNOWN_ERROR.to_string()
        } else {
            error
        };
        self.mutate(id, |job| {
            job.status = JobStatus::Failed;
            job.progress = 0.0;
            job.error = Some(error);
            job.finished_at = Some(Utc::now());
        })
        .await
    }
}
