//! The sync queue engine.

use crate::autosave::TransactionalAutosave;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::queue::{Attempt, Claim, DeliveryMode, FailedSyncItem, SyncItem, SyncQueues};
use crate::remote::RemoteWriter;
use crate::snapshot::{PersistedSnapshot, SnapshotStore};
use crate::stats::{SyncCounters, SyncStats};
use crate::timer::TimerSlot;
use crate::transaction::TransactionalWriteCoordinator;
use draftsync_cache::{LocalCacheStore, Namespace};
use draftsync_storage::GuardedStorage;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

/// Per-operation debug events, emitted only with `debug_logging` on.
macro_rules! trace_sync {
    ($inner:expr, $($arg:tt)+) => {
        if $inner.config.debug_logging {
            tracing::debug!($($arg)+);
        }
    };
}

/// How a record should be saved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveOptions {
    /// Deliver now instead of batching.
    pub critical: bool,
    /// Do not write a persisted snapshot first.
    pub skip_local_persist: bool,
    /// Deliver critical saves as a two-phase record + backup write.
    pub dual_write: bool,
    /// Record key of a dual write. Derived from the record when absent.
    pub record_key: Option<String>,
}

impl SaveOptions {
    /// Options for a user-initiated save.
    pub fn critical() -> Self {
        Self {
            critical: true,
            ..Self::default()
        }
    }

    /// Options for an autosave-style save.
    pub fn batched() -> Self {
        Self::default()
    }

    /// Skips the persisted snapshot.
    #[must_use]
    pub fn with_skip_local_persist(mut self) -> Self {
        self.skip_local_persist = true;
        self
    }

    /// Delivers through the transactional coordinator.
    #[must_use]
    pub fn with_dual_write(mut self, record_key: Option<String>) -> Self {
        self.dual_write = true;
        self.record_key = record_key;
        self
    }
}

/// What [`SyncQueueEngine::save`] did with the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveOutcome {
    /// The save was accepted.
    pub success: bool,
    /// The remote confirmed the record.
    pub synced: bool,
    /// The record waits in the batch queue.
    pub queued: bool,
    /// Another immediate delivery of the record was already on the wire,
    /// so this edit waits in the batch queue.
    pub in_progress: bool,
}

impl SaveOutcome {
    fn synced() -> Self {
        Self {
            success: true,
            synced: true,
            queued: false,
            in_progress: false,
        }
    }

    fn queued() -> Self {
        Self {
            success: true,
            synced: false,
            queued: true,
            in_progress: false,
        }
    }

    fn in_progress() -> Self {
        Self {
            success: true,
            synced: false,
            queued: true,
            in_progress: true,
        }
    }
}

/// A record a flush or retry round could not deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedDelivery {
    /// Record id.
    pub id: String,
    /// Failure message.
    pub error: String,
}

/// Outcome of a batch flush or retry round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Ids delivered, in order.
    pub succeeded: Vec<String>,
    /// Ids that failed, in order.
    pub failed: Vec<FailedDelivery>,
}

/// Releases an in-flight claim when dropped.
struct InFlight<'a> {
    queues: &'a Mutex<SyncQueues>,
    id: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.queues.lock().finish_immediate(&self.id);
    }
}

struct EngineInner<R: RemoteWriter> {
    config: SyncConfig,
    remote: Arc<R>,
    storage: GuardedStorage,
    snapshots: SnapshotStore,
    cache: Arc<LocalCacheStore>,
    coordinator: Arc<TransactionalWriteCoordinator<R>>,
    queues: Mutex<SyncQueues>,
    counters: SyncCounters,
    batch_timer: TimerSlot,
    retry_timer: TimerSlot,
    runtime: Option<Handle>,
    closed: AtomicBool,
}

/// Routes outgoing writes: critical saves go out immediately, everything
/// else is batched. Failed deliveries are retried with exponential backoff
/// and unsynced edits survive restarts as persisted snapshots.
///
/// Cloning is cheap; clones share one engine. Background timers stop when
/// the last clone is dropped or [`shutdown`](Self::shutdown) is called.
pub struct SyncQueueEngine<R: RemoteWriter> {
    inner: Arc<EngineInner<R>>,
}

impl<R: RemoteWriter> Clone for SyncQueueEngine<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: RemoteWriter> SyncQueueEngine<R> {
    /// Creates an engine over `storage`, with its own local cache.
    ///
    /// Re-enqueues recent unsynced edits found in `storage` and starts the
    /// batch timer. Outside a Tokio runtime the engine runs without timers.
    pub fn new(config: SyncConfig, remote: Arc<R>, storage: GuardedStorage) -> Self {
        let config = config.validated();
        let cache = Arc::new(LocalCacheStore::new(storage, config.cache.clone()));
        Self::with_cache(config, remote, cache)
    }

    /// Creates an engine sharing an existing cache and its storage.
    pub fn with_cache(config: SyncConfig, remote: Arc<R>, cache: Arc<LocalCacheStore>) -> Self {
        let config = config.validated();
        let storage = cache.storage().clone();
        let snapshots = SnapshotStore::new(
            storage.clone(),
            config.storage_key_prefix.clone(),
            &cache.config().key_prefix,
        );
        let coordinator = Arc::new(TransactionalWriteCoordinator::new(
            Arc::clone(&remote),
            Arc::clone(storage.clock()),
        ));

        let runtime = Handle::try_current().ok();
        if runtime.is_none() {
            warn!("no Tokio runtime, sync engine starts without background timers");
        }

        let inner = Arc::new(EngineInner {
            config,
            remote,
            storage,
            snapshots,
            cache,
            coordinator,
            queues: Mutex::new(SyncQueues::default()),
            counters: SyncCounters::default(),
            batch_timer: TimerSlot::default(),
            retry_timer: TimerSlot::default(),
            runtime,
            closed: AtomicBool::new(false),
        });

        inner.recover_snapshots();
        inner.start_batch_timer();

        Self { inner }
    }

    /// Returns the configuration in effect.
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Returns the local cache the engine refreshes.
    pub fn cache(&self) -> &Arc<LocalCacheStore> {
        &self.inner.cache
    }

    /// Returns the remote writer.
    pub fn remote(&self) -> &Arc<R> {
        &self.inner.remote
    }

    /// Returns the coordinator used for dual writes.
    pub fn coordinator(&self) -> &Arc<TransactionalWriteCoordinator<R>> {
        &self.inner.coordinator
    }

    /// Creates a debounced transactional autosave sharing this engine's
    /// coordinator.
    pub fn transactional_autosave(&self) -> TransactionalAutosave<R> {
        TransactionalAutosave::new(
            Arc::clone(&self.inner.coordinator),
            Arc::clone(&self.inner.remote),
            self.inner.config.autosave_debounce,
        )
    }

    /// Saves a record.
    ///
    /// The record is persisted locally first unless
    /// [`skip_local_persist`](SaveOptions::skip_local_persist) is set.
    /// Critical saves are delivered before returning and report delivery
    /// failures; a retryable failure is also queued for retry. A critical
    /// save of a record whose delivery is already on the wire joins the
    /// batch queue instead. Other saves join the batch queue and never fail.
    pub async fn save(
        &self,
        id: &str,
        data: Value,
        options: SaveOptions,
    ) -> SyncResult<SaveOutcome> {
        let inner = &self.inner;
        if !options.skip_local_persist {
            inner.snapshots.save(id, &data);
        }

        if !options.critical {
            let now = inner.storage.now_millis();
            let queue_size = {
                let mut queues = inner.queues.lock();
                queues.enqueue(id, data, DeliveryMode::Single, now)
            };
            trace_sync!(inner, id, queue_size, "queued for batch");
            if queue_size >= inner.config.max_batch_size {
                inner.spawn_flush();
            }
            return Ok(SaveOutcome::queued());
        }

        let mode = if options.dual_write {
            let record_key = match options.record_key {
                Some(key) => key,
                None => inner.coordinator.default_record_key(&data),
            };
            DeliveryMode::Dual { record_key }
        } else {
            DeliveryMode::Single
        };

        let now = inner.storage.now_millis();
        let claimed = inner.queues.lock().begin_immediate(id, data, mode, now);
        let attempt = match claimed {
            Claim::Started(attempt) => attempt,
            Claim::Deferred { queue_size } => {
                trace_sync!(inner, id, queue_size, "delivery in flight, edit queued");
                if queue_size >= inner.config.max_batch_size {
                    inner.spawn_flush();
                }
                return Ok(SaveOutcome::in_progress());
            }
        };

        let result = inner.deliver_claimed(&attempt).await;
        match result {
            Ok(()) => Ok(SaveOutcome::synced()),
            Err(e) => {
                inner.record_failure(attempt, &e);
                inner.schedule_retry();
                Err(e)
            }
        }
    }

    /// Loads a record.
    ///
    /// Tries the remote first. When the remote fails, serves the persisted
    /// snapshot, then the cached copy; only when neither exists is the
    /// remote error returned.
    pub async fn load(&self, id: &str) -> SyncResult<Value> {
        let inner = &self.inner;
        match inner.remote.read(id).await {
            Ok(data) => {
                if !inner.has_pending(id) {
                    inner.snapshots.save(id, &data);
                }
                inner.cache.refresh_from_server(id, &data);
                Ok(data)
            }
            Err(e) => {
                if let Some(snapshot) = inner.snapshots.load(id) {
                    inner.counters.record_recoveries(1);
                    warn!(id, error = %e, "remote read failed, serving persisted snapshot");
                    return Ok(snapshot.data);
                }
                if let Some(entry) = inner.cache.get(Namespace::Records, id) {
                    inner.counters.record_recoveries(1);
                    warn!(id, error = %e, "remote read failed, serving cached record");
                    return Ok(entry.data);
                }
                Err(e)
            }
        }
    }

    /// Delivers every queued record, one at a time, in queue order.
    ///
    /// Concurrent flushes are not serialized: each delivers what it found
    /// queued when it started, so overlapping flushes may send a record
    /// twice.
    pub async fn flush_batch_queue(&self) -> BatchReport {
        self.inner.flush_batch_queue().await
    }

    /// Attempts every failed record once.
    pub async fn retry_failed(&self) -> BatchReport {
        self.inner.retry_failed().await
    }

    /// Returns counters and current queue sizes.
    pub fn stats(&self) -> SyncStats {
        let queues = self.inner.queues.lock();
        self.inner.counters.snapshot(
            queues.batch.len(),
            queues.failed.len(),
            queues.in_flight.len(),
        )
    }

    /// Copies of the queued records, in delivery order.
    pub fn queued_items(&self) -> Vec<SyncItem> {
        self.inner.queues.lock().queued()
    }

    /// Copies of the records awaiting retry.
    pub fn failed_items(&self) -> Vec<FailedSyncItem> {
        self.inner.queues.lock().failures()
    }

    /// Returns the persisted snapshot of `id`.
    pub fn snapshot(&self, id: &str) -> Option<PersistedSnapshot> {
        self.inner.snapshots.load(id)
    }

    /// Returns true while a retry round is scheduled.
    pub fn is_retry_scheduled(&self) -> bool {
        self.inner.retry_timer.is_armed()
    }

    /// Forgets every pending edit: queues, in-flight claims and persisted
    /// snapshots. Cancels the retry timer.
    pub fn clear(&self) {
        self.inner.queues.lock().clear();
        let removed = self.inner.snapshots.clear_all();
        self.inner.retry_timer.cancel();
        info!(snapshots = removed, "sync state cleared");
    }

    /// Stops all timers and clears the in-memory queues. Persisted
    /// snapshots are kept for the next startup's recovery.
    pub fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.batch_timer.cancel();
        self.inner.retry_timer.cancel();
        self.inner.queues.lock().clear();
        info!("sync engine shut down");
    }
}

impl<R: RemoteWriter> EngineInner<R> {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// True if an edit of `id` is queued, failed or on the wire.
    fn has_pending(&self, id: &str) -> bool {
        let queues = self.queues.lock();
        queues.batch.contains_key(id)
            || queues.failed.contains_key(id)
            || queues.in_flight.contains(id)
    }

    async fn send(&self, attempt: &Attempt) -> SyncResult<()> {
        match &attempt.mode {
            DeliveryMode::Single => self.remote.write(&attempt.id, &attempt.payload).await,
            DeliveryMode::Dual { record_key } => self
                .coordinator
                .save_transactional(&attempt.id, &attempt.payload, Some(record_key))
                .await
                .map(|_| ()),
        }
    }

    /// Delivers an attempt whose id this caller already claimed in the
    /// in-flight set. Releases the claim and confirms on success.
    async fn deliver_claimed(&self, attempt: &Attempt) -> SyncResult<()> {
        let claim = InFlight {
            queues: &self.queues,
            id: attempt.id.clone(),
        };
        self.counters.record_immediate_sync();
        trace_sync!(self, id = %attempt.id, revision = attempt.revision, "immediate delivery");

        let result = self.send(attempt).await;
        drop(claim);

        if result.is_ok() {
            self.confirm(attempt);
        }
        result
    }

    /// Clears what `attempt` made durable and refreshes the cache.
    fn confirm(&self, attempt: &Attempt) {
        let settled = self.queues.lock().delivered(attempt);
        if settled {
            self.snapshots.remove(&attempt.id);
        }
        self.cache.refresh_from_server(&attempt.id, &attempt.payload);
        trace_sync!(self, id = %attempt.id, settled, "delivered");
    }

    fn record_failure(&self, attempt: Attempt, error: &SyncError) {
        self.counters.record_failure();
        let id = attempt.id.clone();

        if !error.is_retryable() {
            self.counters.record_conflict();
            self.queues.lock().rejected(&attempt);
            warn!(id = %id, error = %error, "delivery rejected, not retrying");
            return;
        }

        let now = self.storage.now_millis();
        let retries = self.queues.lock().record_failure(
            attempt,
            error.to_string(),
            now,
            self.config.max_retries,
        );
        match retries {
            Some(retries) => {
                warn!(id = %id, retries, error = %error, "delivery failed, queued for retry");
            }
            None => {
                trace_sync!(self, id = %id, "delivery failed, newer edit pending");
            }
        }
    }

    async fn flush_batch_queue(self: &Arc<Self>) -> BatchReport {
        let items = self.queues.lock().queued();
        let mut report = BatchReport::default();
        if items.is_empty() {
            return report;
        }

        self.counters.record_batch_flush();
        trace_sync!(self, count = items.len(), "flushing batch queue");

        for item in items {
            let attempt = Attempt::from(item);
            match self.send(&attempt).await {
                Ok(()) => {
                    self.counters.record_batch_sync();
                    self.confirm(&attempt);
                    report.succeeded.push(attempt.id);
                }
                Err(e) => {
                    report.failed.push(FailedDelivery {
                        id: attempt.id.clone(),
                        error: e.to_string(),
                    });
                    self.record_failure(attempt, &e);
                }
            }
        }

        if !report.failed.is_empty() {
            self.schedule_retry();
        }
        report
    }

    async fn retry_failed(self: &Arc<Self>) -> BatchReport {
        let items = self.queues.lock().failures();
        let mut report = BatchReport::default();

        for item in items {
            let attempt = Attempt::from(item);
            let claimed = self.queues.lock().begin_retry(&attempt);
            if !claimed {
                trace_sync!(self, id = %attempt.id, "retry skipped, superseded or in flight");
                continue;
            }

            match self.deliver_claimed(&attempt).await {
                Ok(()) => report.succeeded.push(attempt.id),
                Err(e) => {
                    report.failed.push(FailedDelivery {
                        id: attempt.id.clone(),
                        error: e.to_string(),
                    });
                    self.record_failure(attempt, &e);
                }
            }
        }

        self.schedule_retry();
        report
    }

    /// Arms the backoff timer unless one is outstanding. The delay follows
    /// the smallest retry count among the failed records.
    fn schedule_retry(self: &Arc<Self>) {
        if self.is_closed() {
            return;
        }
        let Some(runtime) = self.runtime.as_ref() else {
            return;
        };
        let Some(min_retries) = self.queues.lock().min_retries() else {
            return;
        };

        let delay = self.config.retry.delay_for_retries(min_retries);
        let engine = Arc::downgrade(self);
        let armed = self.retry_timer.arm_if_idle(|| {
            runtime.spawn(async move {
                tokio::time::sleep(delay).await;
                let Some(inner) = engine.upgrade() else {
                    return;
                };
                inner.retry_timer.disarm();
                inner.retry_failed().await;
            })
        });

        if armed {
            trace_sync!(
                self,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                min_retries,
                "retry scheduled"
            );
        }
    }

    fn spawn_flush(self: &Arc<Self>) {
        if self.is_closed() {
            return;
        }
        let Some(runtime) = self.runtime.as_ref() else {
            trace_sync!(self, "batch full, no runtime for a background flush");
            return;
        };
        let inner = Arc::clone(self);
        runtime.spawn(async move {
            inner.flush_batch_queue().await;
        });
    }

    fn start_batch_timer(self: &Arc<Self>) {
        let Some(runtime) = self.runtime.as_ref() else {
            return;
        };
        let period = self.config.batch_interval;
        let engine = Arc::downgrade(self);

        self.batch_timer.arm_if_idle(|| {
            runtime.spawn(async move {
                let start = tokio::time::Instant::now() + period;
                let mut ticks = tokio::time::interval_at(start, period);
                ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticks.tick().await;
                    let Some(inner) = engine.upgrade() else {
                        break;
                    };
                    let pending = inner.queues.lock().batch.len();
                    if pending > 0 {
                        inner.flush_batch_queue().await;
                    }
                }
            })
        });
    }

    /// Re-enqueues snapshots younger than `snapshot_max_age` and deletes
    /// the rest.
    fn recover_snapshots(self: &Arc<Self>) {
        let scan = self.snapshots.scan();
        for id in &scan.corrupt {
            warn!(id = %id, "discarding unreadable snapshot");
            self.snapshots.remove(id);
        }

        let now = self.storage.now_millis();
        let horizon = u64::try_from(self.config.snapshot_max_age.as_millis()).unwrap_or(u64::MAX);
        let (fresh, expired): (Vec<_>, Vec<_>) = scan
            .snapshots
            .into_iter()
            .partition(|(_, snapshot)| now.saturating_sub(snapshot.saved_at) < horizon);

        for (id, _) in &expired {
            self.snapshots.remove(id);
        }

        let recovered = fresh.len();
        let queue_size = {
            let mut queues = self.queues.lock();
            for (id, snapshot) in fresh {
                queues.enqueue(&id, snapshot.data, DeliveryMode::Single, now);
            }
            queues.batch.len()
        };

        if recovered > 0 || !expired.is_empty() {
            self.counters.record_recoveries(recovered as u64);
            info!(
                recovered,
                expired = expired.len(),
                "recovered unsynced edits from persisted snapshots"
            );
        }
        if queue_size >= self.config.max_batch_size {
            self.spawn_flush();
        }
    }
}
