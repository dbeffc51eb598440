//! Debounced transactional autosave.

use crate::remote::RemoteWriter;
use crate::transaction::TransactionalWriteCoordinator;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, error, warn};

#[derive(Debug, Default)]
struct Pending {
    last_generation: u64,
    armed: Option<u64>,
}

/// Saves a record transactionally once edits have paused for the debounce
/// period.
///
/// Each [`schedule`](Self::schedule) replaces the pending save. A save that
/// already started runs to completion. When the transactional save fails,
/// the record is written with plain writes under both `record_key` and the
/// record id instead; failures are logged, never returned.
pub struct TransactionalAutosave<R: RemoteWriter> {
    coordinator: Arc<TransactionalWriteCoordinator<R>>,
    remote: Arc<R>,
    debounce: Duration,
    pending: Arc<Mutex<Pending>>,
}

impl<R: RemoteWriter> TransactionalAutosave<R> {
    /// Creates an autosave with the given quiet period.
    pub fn new(
        coordinator: Arc<TransactionalWriteCoordinator<R>>,
        remote: Arc<R>,
        debounce: Duration,
    ) -> Self {
        Self {
            coordinator,
            remote,
            debounce,
            pending: Arc::new(Mutex::new(Pending::default())),
        }
    }

    /// Schedules a save of `data`, replacing any pending one.
    ///
    /// Returns false, scheduling nothing, when `record_id` or `record_key` is
    /// empty or no Tokio runtime is available.
    pub fn schedule(&self, record_id: &str, data: Value, record_key: &str) -> bool {
        if record_id.trim().is_empty() || record_key.trim().is_empty() {
            debug!(record_id, record_key, "autosave skipped, missing id or key");
            return false;
        }
        let Ok(runtime) = Handle::try_current() else {
            warn!(record_id, "autosave skipped, no Tokio runtime");
            return false;
        };

        let generation = {
            let mut pending = self.pending.lock();
            pending.last_generation += 1;
            pending.armed = Some(pending.last_generation);
            pending.last_generation
        };

        let coordinator = Arc::clone(&self.coordinator);
        let remote = Arc::clone(&self.remote);
        let pending = Arc::clone(&self.pending);
        let debounce = self.debounce;
        let record_id = record_id.to_string();
        let record_key = record_key.to_string();

        runtime.spawn(async move {
            tokio::time::sleep(debounce).await;
            {
                let mut pending = pending.lock();
                if pending.armed != Some(generation) {
                    return;
                }
                pending.armed = None;
            }

            match coordinator
                .save_transactional(&record_id, &data, Some(&record_key))
                .await
            {
                Ok(receipt) => {
                    debug!(
                        record_id = %record_id,
                        transaction_id = %receipt.transaction_id,
                        "autosave committed"
                    );
                }
                Err(e) => {
                    warn!(
                        record_id = %record_id,
                        error = %e,
                        "transactional autosave failed, writing directly"
                    );
                    for key in [record_key.as_str(), record_id.as_str()] {
                        if let Err(e) = remote.write(key, &data).await {
                            error!(key, error = %e, "autosave fallback write failed");
                        }
                    }
                }
            }
        });
        true
    }

    /// Drops the pending save, if it has not started.
    pub fn cancel(&self) {
        self.pending.lock().armed = None;
    }

    /// Returns true while a save waits for its debounce period.
    pub fn is_pending(&self) -> bool {
        self.pending.lock().armed.is_some()
    }
}

impl<R: RemoteWriter> Drop for TransactionalAutosave<R> {
    fn drop(&mut self) {
        self.cancel();
    }
}
