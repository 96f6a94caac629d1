//! Resident-memory sampling for the current process.
//!
//! Used between chunks: when RSS is above the configured threshold the
//! controller logs a warning and releases the finished chunk's buffers
//! before the next one is rendered. The check is advisory; nothing fails
//! because memory is high.

use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, warn};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Samples this process's RSS and remembers the peak.
pub struct MemoryMonitor {
    system: System,
    pid: Option<Pid>,
    peak_mb: f64,
}

impl Default for MemoryMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMonitor {
    pub fn new() -> Self {
        let pid = sysinfo::get_current_pid().ok();
        if pid.is_none() {
            warn!("Cannot determine current pid; memory sampling disabled");
        }
        Self {
            system: System::new(),
            pid,
            peak_mb: 0.0,
        }
    }

    /// Current RSS in MB, rounded to 2 decimals. `0.0` when unavailable.
    pub fn sample_mb(&mut self) -> f64 {
        let Some(pid) = self.pid else {
            return 0.0;
        };
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        let mb = self
            .system
            .process(pid)
            .map(|p| round2(p.memory() as f64 / BYTES_PER_MB))
            .unwrap_or(0.0);
        if mb > self.peak_mb {
            self.peak_mb = mb;
        }
        mb
    }

    /// Sample and compare against `threshold_mb`. Returns `true` when the
    /// process is above it.
    pub fn check(&mut self, threshold_mb: u64) -> bool {
        let mb = self.sample_mb();
        let over = mb > threshold_mb as f64;
        if over {
            warn!(
                "Memory usage {:.1} MB exceeds threshold {} MB; releasing chunk buffers",
                mb, threshold_mb
            );
        } else {
            debug!("Memory usage {:.1} MB", mb);
        }
        over
    }

    pub fn peak_mb(&self) -> f64 {
        self.peak_mb
    }
}

pub(crate) fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
