//! Writer metrics

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics handle for recording counters
#[derive(Debug, Default)]
pub struct Metrics {
    jobs_submitted: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_abandoned: AtomicU64,
    requeues: AtomicU64,
    writers_opened: AtomicU64,
    writers_closed: AtomicU64,
    writers_evicted: AtomicU64,
    bytes_written: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_submitted(&self) {
        self.jobs_submitted.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "jobs_submitted", "Metric incremented");
    }

    pub fn job_completed(&self, bytes: u64) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
        tracing::debug!(counter = "jobs_completed", bytes, "Metric incremented");
    }

    pub fn job_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "jobs_failed", "Metric incremented");
    }

    /// A job whose caller gave up before it was written
    pub fn job_abandoned(&self) {
        self.jobs_abandoned.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "jobs_abandoned", "Metric incremented");
    }

    pub fn job_requeued(&self) {
        self.requeues.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "requeues", "Metric incremented");
    }

    pub fn writer_opened(&self) {
        self.writers_opened.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "writers_opened", "Metric incremented");
    }

    pub fn writer_closed(&self) {
        self.writers_closed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "writers_closed", "Metric incremented");
    }

    pub fn writer_evicted(&self) {
        self.writers_evicted.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "writers_evicted", "Metric incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_submitted: self.jobs_submitted.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            jobs_abandoned: self.jobs_abandoned.load(Ordering::Relaxed),
            requeues: self.requeues.load(Ordering::Relaxed),
            writers_opened: self.writers_opened.load(Ordering::Relaxed),
            writers_closed: self.writers_closed.load(Ordering::Relaxed),
            writers_evicted: self.writers_evicted.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub jobs_submitted: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub jobs_abandoned: u64,
    pub requeues: u64,
    pub writers_opened: u64,
    pub writers_closed: u64,
    pub writers_evicted: u64,
    pub bytes_written: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let metrics = Metrics::new();
        metrics.job_submitted();
        metrics.job_submitted();
        metrics.job_completed(11);
        metrics.job_failed();
        metrics.writer_opened();
        metrics.job_abandoned();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.jobs_submitted, 2);
        assert_eq!(snapshot.jobs_completed, 1);
        assert_eq!(snapshot.bytes_written, 11);
        assert_eq!(snapshot.jobs_failed, 1);
        assert_eq!(snapshot.writers_opened, 1);
        assert_eq!(snapshot.jobs_abandoned, 1);
        assert_eq!(snapshot.writers_evicted, 0);
    }

    #[test]
    fn test_snapshot_serializes() {
        let json = serde_json::to_value(Metrics::new().snapshot()).unwrap();
        assert_eq!(json["requeues"], 0);
    }
}
