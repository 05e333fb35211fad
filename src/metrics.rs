//! Per-engine ingestion metrics
//!
//! Lock-free counters updated from the worker and from flush/rewrite
//! tasks. Exposed through [`EngineMetrics::snapshot`] for health
//! reporting; export formats are the embedder's concern.

use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics collector for one backend engine.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    /// Points accepted into the ingress channel
    points_received: AtomicU64,
    /// Batches handed to the task pool
    batches_flushed: AtomicU64,
    /// Batches delivered live
    batches_sent: AtomicU64,
    /// Batches dropped on permanent rejection
    batches_dropped: AtomicU64,
    /// Batches appended to the spill log
    batches_spilled: AtomicU64,
    /// Spilled records redelivered by the rewrite loop
    records_replayed: AtomicU64,
    /// Spill I/O failures (the batch was lost)
    spill_errors: AtomicU64,
}

/// Point-in-time copy of [`EngineMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Points accepted into the ingress channel
    pub points_received: u64,
    /// Batches handed to the task pool
    pub batches_flushed: u64,
    /// Batches delivered live
    pub batches_sent: u64,
    /// Batches dropped on permanent rejection
    pub batches_dropped: u64,
    /// Batches appended to the spill log
    pub batches_spilled: u64,
    /// Spilled records redelivered by the rewrite loop
    pub records_replayed: u64,
    /// Spill I/O failures
    pub spill_errors: u64,
}

impl EngineMetrics {
    /// Create a zeroed collector.
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn record_received(&self) {
        self.points_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_flushed(&self) {
        self.batches_flushed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_sent(&self) {
        self.batches_sent.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_dropped(&self) {
        self.batches_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_spilled(&self) {
        self.batches_spilled.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_replayed(&self) {
        self.records_replayed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_spill_error(&self) {
        self.spill_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a consistent-enough snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            points_received: self.points_received.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
            batches_dropped: self.batches_dropped.load(Ordering::Relaxed),
            batches_spilled: self.batches_spilled.load(Ordering::Relaxed),
            records_replayed: self.records_replayed.load(Ordering::Relaxed),
            spill_errors: self.spill_errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let m = EngineMetrics::new();
        m.record_received();
        m.record_received();
        m.record_flushed();
        m.record_spilled();

        let snap = m.snapshot();
        assert_eq!(snap.points_received, 2);
        assert_eq!(snap.batches_flushed, 1);
        assert_eq!(snap.batches_spilled, 1);
        assert_eq!(snap.batches_sent, 0);
    }
}
