//! Document-level processing counters.
//!
//! The controller reports every `process_pdf` outcome to an injected
//! [`MetricsSink`]. The caller owns the sink; there is no process-wide state.
//! [`ProcessingMetrics`] is the in-memory sink used by the CLI and worker.

use crate::error::ProcessingError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Receives one event per processed document.
pub trait MetricsSink: Send + Sync {
    fn record_success(&self, elapsed: Duration);
    fn record_failure(&self, error: &ProcessingError);
}

/// Discards every event.
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_success(&self, _elapsed: Duration) {}
    fn record_failure(&self, _error: &ProcessingError) {}
}

/// Thread-safe counters plus a running mean of successful processing time.
pub struct ProcessingMetrics {
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    /// Sum of successful processing times, in milliseconds.
    success_ms: AtomicU64,
    failures_by_kind: Mutex<BTreeMap<&'static str, u64>>,
    since: DateTime<Utc>,
}

impl Default for ProcessingMetrics {
    fn default() -> Self {
        Self {
            total: AtomicU64::new(0),
            successful: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            success_ms: AtomicU64::new(0),
            failures_by_kind: Mutex::new(BTreeMap::new()),
            since: Utc::now(),
        }
    }
}

/// Point-in-time copy of [`ProcessingMetrics`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub total_documents: u64,
    pub successful_documents: u64,
    pub failed_documents: u64,
    pub average_processing_time_secs: f64,
    /// Percentages in [0, 100]; 0 when nothing has been processed.
    pub success_rate: f64,
    pub failure_rate: f64,
    pub failures_by_kind: BTreeMap<&'static str, u64>,
    pub since: DateTime<Utc>,
}

impl ProcessingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let total = self.total.load(Ordering::Relaxed);
        let successful = self.successful.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let success_ms = self.success_ms.load(Ordering::Relaxed);

        let average = if successful == 0 {
            0.0
        } else {
            success_ms as f64 / successful as f64 / 1000.0
        };
        let denom = total.max(1) as f64;
        let failures_by_kind = self
            .failures_by_kind
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default();

        MetricsSnapshot {
            total_documents: total,
            successful_documents: successful,
            failed_documents: failed,
            average_processing_time_secs: average,
            success_rate: successful as f64 / denom * 100.0,
            failure_rate: failed as f64 / denom * 100.0,
            failures_by_kind,
            since: self.since,
        }
    }
}

impl MetricsSink for ProcessingMetrics {
    fn record_success(&self, elapsed: Duration) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.successful.fetch_add(1, Ordering::Relaxed);
        self.success_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
    }

    fn record_failure(&self, error: &ProcessingError) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.failed.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut m) = self.failures_by_kind.lock() {
            *m.entry(error.kind()).or_insert(0) += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_snapshot_has_zero_rates() {
        let s = ProcessingMetrics::new().snapshot();
        assert_eq!(s.total_documents, 0);
        assert_eq!(s.success_rate, 0.0);
        assert_eq!(s.average_processing_time_secs, 0.0);
    }

    #[test]
    fn records_successes_and_failures() {
        let m = ProcessingMetrics::new();
        m.record_success(Duration::from_secs(2));
        m.record_success(Duration::from_secs(4));
        m.record_failure(&ProcessingError::Timeout { secs: 300 });
        m.record_failure(&ProcessingError::Timeout { secs: 300 });

        let s = m.snapshot();
        assert_eq!(s.total_documents, 4);
        assert_eq!(s.successful_documents, 2);
        assert_eq!(s.failed_documents, 2);
        assert!((s.average_processing_time_secs - 3.0).abs() < 1e-9);
        assert!((s.success_rate - 50.0).abs() < 1e-9);
        assert_eq!(s.failures_by_kind.get("timeout"), Some(&2));
    }

    #[test]
    fn usable_as_trait_object() {
        let sink: std::sync::Arc<dyn MetricsSink> = std::sync::Arc::new(NoopMetrics);
        sink.record_success(Duration::from_millis(10));
    }
}
