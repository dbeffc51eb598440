//! Engine counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters updated while operations are in progress.
#[derive(Debug, Default)]
pub(crate) struct SyncCounters {
    immediate_syncs: AtomicU64,
    batch_flushes: AtomicU64,
    batch_syncs: AtomicU64,
    failures: AtomicU64,
    recoveries: AtomicU64,
    conflicts: AtomicU64,
}

impl SyncCounters {
    pub(crate) fn record_immediate_sync(&self) {
        self.immediate_syncs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_batch_flush(&self) {
        self.batch_flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_batch_sync(&self) {
        self.batch_syncs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_recoveries(&self, count: u64) {
        self.recoveries.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_conflict(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
    }

    /// Combines the counters with the current queue gauges.
    pub(crate) fn snapshot(
        &self,
        queue_size: usize,
        failed_size: usize,
        in_flight: usize,
    ) -> SyncStats {
        SyncStats {
            immediate_syncs: self.immediate_syncs.load(Ordering::Relaxed),
            batch_flushes: self.batch_flushes.load(Ordering::Relaxed),
            batch_syncs: self.batch_syncs.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            recoveries: self.recoveries.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            queue_size,
            failed_size,
            in_flight,
        }
    }
}

/// A point-in-time view of engine activity.
///
/// For observability only; nothing in the engine reads these values back.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncStats {
    /// Immediate deliveries started (critical saves and retries).
    pub immediate_syncs: u64,
    /// Batch flushes that found work.
    pub batch_flushes: u64,
    /// Records delivered by batch flushes.
    pub batch_syncs: u64,
    /// Failed deliveries of any kind.
    pub failures: u64,
    /// Reads served locally, plus edits re-enqueued at startup.
    pub recoveries: u64,
    /// Deliveries rejected with a conflict or other non-retryable error.
    pub conflicts: u64,
    /// Records waiting in the batch queue.
    pub queue_size: usize,
    /// Records waiting for retry.
    pub failed_size: usize,
    /// Immediate deliveries currently on the wire.
    pub in_flight: usize,
}
