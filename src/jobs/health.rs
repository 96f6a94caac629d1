//! Periodic health checks over the job store, process memory and the
//! processing metrics.
//!
//! Checks only observe and log. A job stuck in `processing` longer than
//! `stale_after` is reported, not touched.

use super::store::JobStore;
use super::JobStatus;
use crate::metrics::ProcessingMetrics;
use crate::pipeline::memory::MemoryMonitor;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    /// Warnings present.
    Degraded,
    /// At least one critical condition.
    Unhealthy,
}

#[derive(Debug, Clone)]
pub struct HealthThresholds {
    pub memory_mb: u64,
    /// A job processing for longer than this is stale.
    pub stale_after: Duration,
    /// More pending jobs than this is a warning.
    pub max_pending: usize,
    /// Document failure rate (percent) above which the report is unhealthy.
    pub max_failure_rate: f64,
    /// Failure rate is ignored until this many documents were processed.
    pub min_documents_for_rate: u64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            memory_mb: 1000,
            stale_after: Duration::from_secs(600),
            max_pending: 100,
            max_failure_rate: 50.0,
            min_documents_for_rate: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub pending_jobs: usize,
    pub processing_jobs: usize,
    pub completed_jobs: usize,
    pub failed_jobs: usize,
    pub stale_jobs: usize,
    pub memory_mb: f64,
    pub failure_rate: Option<f64>,
    pub warnings: Vec<String>,
    pub critical: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

pub struct HealthMonitor {
    store: Arc<dyn JobStore>,
    metrics: Option<Arc<ProcessingMetrics>>,
    thresholds: HealthThresholds,
    interval: Duration,
    memory: Mutex<MemoryMonitor>,
    latest: RwLock<Option<HealthReport>>,
}

impl HealthMonitor {
    pub fn new(store: Arc<dyn JobStore>, thresholds: HealthThresholds, interval: Duration) -> Self {
        Self {
            store,
            metrics: None,
            thresholds,
            interval,
            memory: Mutex::new(MemoryMonitor::new()),
            latest: RwLock::new(None),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<ProcessingMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Most recent report from [`HealthMonitor::check`].
    pub fn latest(&self) -> Option<HealthReport> {
        self.latest.read().ok().and_then(|r| r.clone())
    }

    pub async fn check(&self) -> HealthReport {
        let now = Utc::now();
        let jobs = self.store.list().await;
        let count = |status| jobs.iter().filter(|j| j.status == status).count();
        let stale_after = chrono::Duration::from_std(self.thresholds.stale_after)
            .unwrap_or(chrono::Duration::MAX);
        let stale_jobs = jobs
            .iter()
            .filter(|j| j.status == JobStatus::Processing)
            .filter(|j| j.started_at.is_some_and(|t| now - t > stale_after))
            .count();

        let memory_mb = match self.memory.lock() {
            Ok(mut m) => m.sample_mb(),
            Err(_) => 0.0,
        };

        let mut warnings = Vec::new();
        let mut critical = Vec::new();

        let pending_jobs = count(JobStatus::Pending);
        if pending_jobs > self.thresholds.max_pending {
            warnings.push(format!(
                "{} pending jobs (limit {})",
                pending_jobs, self.thresholds.max_pending
            ));
        }
        if stale_jobs > 0 {
            warnings.push(format!(
                "{} job(s) processing for more than {}s",
                stale_jobs,
                self.thresholds.stale_after.as_secs()
            ));
        }
        if memory_mb > self.thresholds.memory_mb as f64 {
            critical.push(format!(
                "High memory usage: {:.1} MB (threshold {} MB)",
                memory_mb, self.thresholds.memory_mb
            ));
        }

        let failure_rate = self.metrics.as_ref().and_then(|m| {
            let snap = m.snapshot();
            (snap.total_documents >= self.thresholds.min_documents_for_rate).then_some(snap.failure_rate)
        });
        if let Some(rate) = failure_rate {
            if rate > self.thresholds.max_failure_rate {
                critical.push(format!("Document failure rate {:.1}%", rate));
            }
        }

        let status = if !critical.is_empty() {
            HealthStatus::Unhealthy
        } else if !warnings.is_empty() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        let report = HealthReport {
            status,
            pending_jobs,
            processing_jobs: count(JobStatus::Processing),
            completed_jobs: count(JobStatus::Completed),
            failed_jobs: count(JobStatus::Failed),
            stale_jobs,
            memory_mb,
            failure_rate,
            warnings,
            critical,
            checked_at: now,
        };
        if let Ok(mut latest) = self.latest.write() {
            *latest = Some(report.clone());
        }
        report
    }

    /// Run [`HealthMonitor::check`] every `interval` until `cancel` fires.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        debug!("Health monitor cancelled");
                        break;
                    }

                    _ = ticker.tick() => {
                        let report = self.check().await;
                        match report.status {
                            HealthStatus::Healthy => debug!(
                                "Health: ok ({} pending, {} processing, {:.1} MB)",
                                report.pending_jobs, report.processing_jobs, report.memory_mb
                            ),
                            HealthStatus::Degraded => warn!("Health: degraded: {}", report.warnings.join("; ")),
                            HealthStatus::Unhealthy => warn!(
                                "Health: unhealthy: {}",
                                report.critical.iter().chain(&report.warnings).cloned().collect::<Vec<_>>().join("; ")
                            ),
                        }
                    }
                }
            }
            info!("Health monitor stopped");
        })
    }
}
