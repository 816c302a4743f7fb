use serde::Serialize;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

#[derive(Debug, Default)]
struct InnerMetrics {
    rows_copied: AtomicU64,
    bytes_copied: AtomicU64,
    batches_copied: AtomicU64,
    activity_failures: AtomicU64,
    activity_retries: AtomicU64,
    replayed_events: AtomicU64,
}

/// Process-local counters shared by the worker and its activities.
#[derive(Debug, Clone)]
pub struct Metrics {
    inner: Arc<InnerMetrics>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub rows_copied: u64,
    pub bytes_copied: u64,
    pub batches_copied: u64,
    pub activity_failures: u64,
    pub activity_retries: u64,
    pub replayed_events: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics {
            inner: Arc::new(InnerMetrics::default()),
        }
    }

    pub fn increment_rows(&self, count: u64) {
        self.inner.rows_copied.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_bytes(&self, count: u64) {
        self.inner.bytes_copied.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_batches(&self, count: u64) {
        self.inner.batches_copied.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_failures(&self, count: u64) {
        self.inner
            .activity_failures
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_retries(&self, count: u64) {
        self.inner.activity_retries.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_replayed(&self, count: u64) {
        self.inner.replayed_events.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rows_copied: self.inner.rows_copied.load(Ordering::Relaxed),
            bytes_copied: self.inner.bytes_copied.load(Ordering::Relaxed),
            batches_copied: self.inner.batches_copied.load(Ordering::Relaxed),
            activity_failures: self.inner.activity_failures.load(Ordering::Relaxed),
            activity_retries: self.inner.activity_retries.load(Ordering::Relaxed),
            replayed_events: self.inner.replayed_events.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_counters() {
        let metrics = Metrics::new();
        let clone = metrics.clone();
        clone.increment_rows(100);
        clone.increment_batches(1);
        metrics.increment_retries(2);

        let snap = metrics.snapshot();
        assert_eq!(snap.rows_copied, 100);
        assert_eq!(snap.batches_copied, 1);
        assert_eq!(snap.activity_retries, 2);
        assert_eq!(snap.activity_failures, 0);
    }
}
