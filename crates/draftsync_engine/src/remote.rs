//! Remote writer abstraction.

use crate::error::{SyncError, SyncResult};
use crate::transaction::TransactionPhase;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

/// One side of a two-phase write.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionTarget {
    /// Final location of the payload.
    pub key: String,
    /// Document to store.
    pub payload: Value,
}

impl TransactionTarget {
    /// Creates a target.
    pub fn new(key: impl Into<String>, payload: Value) -> Self {
        Self {
            key: key.into(),
            payload,
        }
    }
}

/// Outcome of a rollback. Rollbacks report failure instead of returning an
/// error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackReport {
    /// Whether the staged temporaries were removed.
    pub success: bool,
    /// Why cleanup failed.
    pub error: Option<String>,
}

impl RollbackReport {
    /// A successful rollback.
    pub fn success() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    /// A failed rollback.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// The remote side of the engine: whatever wraps the server API.
///
/// `write` must be an idempotent upsert keyed by id. The engine may deliver
/// the same payload more than once.
#[async_trait]
pub trait RemoteWriter: Send + Sync + 'static {
    /// Stores `data` under `id`.
    async fn write(&self, id: &str, data: &Value) -> SyncResult<()>;

    /// Fetches the record stored under `id`.
    async fn read(&self, id: &str) -> SyncResult<Value>;

    /// Stages both targets under temporary names tied to `transaction_id`.
    async fn prepare_transaction(
        &self,
        transaction_id: &str,
        target_a: &TransactionTarget,
        target_b: &TransactionTarget,
    ) -> SyncResult<()>;

    /// Promotes both staged targets to their final keys, all or nothing.
    async fn commit_transaction(
        &self,
        transaction_id: &str,
        target_a_key: &str,
        target_b_key: &str,
        data: &Value,
    ) -> SyncResult<()>;

    /// Removes the staged temporaries. Never fails; problems are reported in
    /// the returned [`RollbackReport`].
    async fn rollback_transaction(
        &self,
        transaction_id: &str,
        target_a_key: &str,
        target_b_key: &str,
    ) -> RollbackReport;
}

/// A call received by an [`InMemoryRemote`].
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    /// `write(id, data)`.
    Write {
        /// Record id.
        id: String,
        /// Payload.
        data: Value,
    },
    /// `read(id)`.
    Read {
        /// Record id.
        id: String,
    },
    /// `prepare_transaction`.
    Prepare {
        /// Transaction id.
        transaction_id: String,
        /// Key of target A.
        target_a_key: String,
        /// Key of target B.
        target_b_key: String,
    },
    /// `commit_transaction`.
    Commit {
        /// Transaction id.
        transaction_id: String,
        /// Key of target A.
        target_a_key: String,
        /// Key of target B.
        target_b_key: String,
    },
    /// `rollback_transaction`.
    Rollback {
        /// Transaction id.
        transaction_id: String,
        /// Key of target A.
        target_a_key: String,
        /// Key of target B.
        target_b_key: String,
    },
}

#[derive(Debug, Default)]
struct RemoteState {
    records: BTreeMap<String, Value>,
    backups: BTreeMap<String, Value>,
    staged: BTreeMap<String, Value>,
    calls: Vec<RemoteCall>,
    offline: bool,
    failing_writes: u32,
    conflicts: HashSet<String>,
    failing_phases: HashSet<TransactionPhase>,
    latency: Duration,
}

impl RemoteState {
    fn check_online(&self) -> SyncResult<()> {
        if self.offline {
            return Err(SyncError::transient("remote unreachable"));
        }
        Ok(())
    }

    fn check_phase(&self, phase: TransactionPhase) -> SyncResult<()> {
        self.check_online()?;
        if self.failing_phases.contains(&phase) {
            return Err(SyncError::transient(format!("scripted {phase} failure")));
        }
        Ok(())
    }
}

fn staged_record(transaction_id: &str, key: &str) -> String {
    format!("records/.tmp_{transaction_id}_{key}")
}

fn staged_backup(transaction_id: &str, key: &str) -> String {
    format!("backups/.tmp_{transaction_id}_{key}.json")
}

/// A scriptable in-memory remote.
///
/// Keeps records, backups and staged transaction temporaries in memory and
/// logs every call. Failures are scripted with [`set_offline`],
/// [`fail_next_writes`], [`set_conflict`] and [`fail_phase`].
///
/// [`set_offline`]: InMemoryRemote::set_offline
/// [`fail_next_writes`]: InMemoryRemote::fail_next_writes
/// [`set_conflict`]: InMemoryRemote::set_conflict
/// [`fail_phase`]: InMemoryRemote::fail_phase
#[derive(Debug, Default)]
pub struct InMemoryRemote {
    state: Mutex<RemoteState>,
}

impl InMemoryRemote {
    /// Creates an empty, reachable remote.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail with a transient error (rollbacks report failure).
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Makes the next `count` writes fail with a transient error.
    pub fn fail_next_writes(&self, count: u32) {
        self.state.lock().failing_writes = count;
    }

    /// Makes writes of `id` fail with a conflict.
    pub fn set_conflict(&self, id: impl Into<String>) {
        self.state.lock().conflicts.insert(id.into());
    }

    /// Stops reporting conflicts for `id`.
    pub fn clear_conflict(&self, id: &str) {
        self.state.lock().conflicts.remove(id);
    }

    /// Makes every call of a transaction phase fail.
    pub fn fail_phase(&self, phase: TransactionPhase) {
        self.state.lock().failing_phases.insert(phase);
    }

    /// Stops failing transaction phases.
    pub fn clear_phase_failures(&self) {
        self.state.lock().failing_phases.clear();
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    /// Stores a record directly, bypassing scripting and the call log.
    pub fn insert_record(&self, id: impl Into<String>, data: Value) {
        self.state.lock().records.insert(id.into(), data);
    }

    /// Returns the record stored under `key`.
    pub fn record(&self, key: &str) -> Option<Value> {
        self.state.lock().records.get(key).cloned()
    }

    /// Returns the backup stored under `key`.
    pub fn backup(&self, key: &str) -> Option<Value> {
        self.state.lock().backups.get(key).cloned()
    }

    /// Number of staged temporaries not yet committed or rolled back.
    pub fn staged_count(&self) -> usize {
        self.state.lock().staged.len()
    }

    /// Every call received so far.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state.lock().calls.clone()
    }

    /// Payloads of every write received for `id`, in order.
    pub fn writes_for(&self, id: &str) -> Vec<Value> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                RemoteCall::Write { id: written, data } if written == id => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    /// Logs `call` and returns the configured latency.
    fn begin(&self, call: RemoteCall) -> Duration {
        let mut state = self.state.lock();
        state.calls.push(call);
        state.latency
    }

    async fn pause(latency: Duration) {
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl RemoteWriter for InMemoryRemote {
    async fn write(&self, id: &str, data: &Value) -> SyncResult<()> {
        let latency = self.begin(RemoteCall::Write {
            id: id.to_string(),
            data: data.clone(),
        });
        Self::pause(latency).await;

        let mut state = self.state.lock();
        state.check_online()?;
        if state.failing_writes > 0 {
            state.failing_writes -= 1;
            return Err(SyncError::transient("scripted write failure"));
        }
        if state.conflicts.contains(id) {
            return Err(SyncError::conflict(id, "version mismatch"));
        }
        state.records.insert(id.to_string(), data.clone());
        Ok(())
    }

    async fn read(&self, id: &str) -> SyncResult<Value> {
        let latency = self.begin(RemoteCall::Read { id: id.to_string() });
        Self::pause(latency).await;

        let state = self.state.lock();
        state.check_online()?;
        state
            .records
            .get(id)
            .or_else(|| state.backups.get(id))
            .cloned()
            .ok_or_else(|| SyncError::NotFound { id: id.to_string() })
    }

    async fn prepare_transaction(
        &self,
        transaction_id: &str,
        target_a: &TransactionTarget,
        target_b: &TransactionTarget,
    ) -> SyncResult<()> {
        let latency = self.begin(RemoteCall::Prepare {
            transaction_id: transaction_id.to_string(),
            target_a_key: target_a.key.clone(),
            target_b_key: target_b.key.clone(),
        });
        Self::pause(latency).await;

        let mut state = self.state.lock();
        state.check_phase(TransactionPhase::Prepare)?;
        if state.conflicts.contains(&target_b.key) {
            return Err(SyncError::conflict(&target_b.key, "version mismatch"));
        }
        state.staged.insert(
            staged_record(transaction_id, &target_a.key),
            target_a.payload.clone(),
        );
        state.staged.insert(
            staged_backup(transaction_id, &target_b.key),
            target_b.payload.clone(),
        );
        Ok(())
    }

    async fn commit_transaction(
        &self,
        transaction_id: &str,
        target_a_key: &str,
        target_b_key: &str,
        _data: &Value,
    ) -> SyncResult<()> {
        let latency = self.begin(RemoteCall::Commit {
            transaction_id: transaction_id.to_string(),
            target_a_key: target_a_key.to_string(),
            target_b_key: target_b_key.to_string(),
        });
        Self::pause(latency).await;

        let mut state = self.state.lock();
        state.check_phase(TransactionPhase::Commit)?;

        let record_name = staged_record(transaction_id, target_a_key);
        let backup_name = staged_backup(transaction_id, target_b_key);
        if !state.staged.contains_key(&record_name) || !state.staged.contains_key(&backup_name) {
            return Err(SyncError::remote(format!(
                "transaction {transaction_id} has no staged files"
            )));
        }

        // Both present: promote together under one lock.
        if let Some(record) = state.staged.remove(&record_name) {
            state.records.insert(target_a_key.to_string(), record);
        }
        if let Some(backup) = state.staged.remove(&backup_name) {
            state.backups.insert(target_b_key.to_string(), backup);
        }
        Ok(())
    }

    async fn rollback_transaction(
        &self,
        transaction_id: &str,
        target_a_key: &str,
        target_b_key: &str,
    ) -> RollbackReport {
        let latency = self.begin(RemoteCall::Rollback {
            transaction_id: transaction_id.to_string(),
            target_a_key: target_a_key.to_string(),
            target_b_key: target_b_key.to_string(),
        });
        Self::pause(latency).await;

        let mut state = self.state.lock();
        if let Err(e) = state.check_phase(TransactionPhase::Rollback) {
            return RollbackReport::failure(e.to_string());
        }
        state
            .staged
            .remove(&staged_record(transaction_id, target_a_key));
        state
            .staged
            .remove(&staged_backup(transaction_id, target_b_key));
        RollbackReport::success()
    }
}
