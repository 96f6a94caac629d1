//! Background jobs: one job per document, processed by a queue worker.
//!
//! ```text
//! JobRunner::enqueue ──▶ JobStore (pending) ──▶ mpsc ──▶ Worker::run
//!                                                          │
//!                         JobStore ◀── progress ◀──────────┤ process_pdf
//!                         JobStore ◀── completed / failed ◀┘
//! ```
//!
//! A job always ends in a terminal status. Processing errors, panics,
//! cancellation and shutdown all mark it failed with a non-empty message.
//! Once terminal, the store refuses further changes.

pub mod health;
pub mod runner;
pub mod store;

pub use health::{HealthMonitor, HealthReport, HealthStatus, HealthThresholds};
pub use runner::{JobRunner, Worker};
pub use store::{InMemoryJobStore, JobStore, DEFAULT_TERMINAL_RETENTION};

use crate::output::MergedRecord;
use crate::schema::ExtractionSchema;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

pub type JobId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The document a job processes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRef {
    /// Caller-chosen identity; at most one active job per id.
    pub id: String,
    pub path: PathBuf,
}

impl DocumentRef {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
        }
    }

    /// Use the path itself as the document id.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            id: path.display().to_string(),
            path,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub document: DocumentRef,
    pub schema: Option<ExtractionSchema>,
    pub status: JobStatus,
    /// In [0, 1].
    pub progress: f32,
    pub result: Option<MergedRecord>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(document: DocumentRef, schema: Option<ExtractionSchema>) -> Self {
        Self {
            id: Uuid::new_v4(),
            document,
            schema,
            status: JobStatus::Pending,
            progress: 0.0,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn report(&self) -> JobStatusReport {
        JobStatusReport {
            id: self.id,
            status: self.status,
            progress: self.progress,
            result: self.result.clone(),
            error: self.error.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

/// What a status lookup returns.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusReport {
    pub id: JobId,
    pub status: JobStatus,
    pub progress: f32,
    pub result: Option<MergedRecord>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}
