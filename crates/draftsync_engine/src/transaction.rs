//! Two-phase dual-target writes.
//!
//! A transactional save stores a record under its record key (target A)
//! and a backup copy keyed by record id (target B). The remote stages both
//! payloads, then promotes them together; any failure rolls back the staged
//! temporaries and surfaces the original error.

use crate::error::{SyncError, SyncResult};
use crate::remote::{RemoteWriter, TransactionTarget};
use draftsync_storage::Clock;
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Step of the two-phase protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionPhase {
    /// Staging both payloads.
    Prepare,
    /// Promoting the staged payloads.
    Commit,
    /// Removing the staged payloads.
    Rollback,
}

impl fmt::Display for TransactionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransactionPhase::Prepare => "prepare",
            TransactionPhase::Commit => "commit",
            TransactionPhase::Rollback => "rollback",
        })
    }
}

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Both targets are staged.
    Prepared,
    /// Both targets were promoted.
    Committed,
    /// The staged targets were discarded.
    RolledBack,
}

/// A dual-target write that passed the prepare phase.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    id: String,
    target_a: TransactionTarget,
    target_b: TransactionTarget,
    state: TransactionState,
}

impl Transaction {
    fn prepared(id: String, target_a: TransactionTarget, target_b: TransactionTarget) -> Self {
        Self {
            id,
            target_a,
            target_b,
            state: TransactionState::Prepared,
        }
    }

    /// Returns the transaction id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the record target.
    #[must_use]
    pub fn target_a(&self) -> &TransactionTarget {
        &self.target_a
    }

    /// Returns the backup target.
    #[must_use]
    pub fn target_b(&self) -> &TransactionTarget {
        &self.target_b
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }
}

/// Result of a committed transactional save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReceipt {
    /// Transaction id.
    pub transaction_id: String,
    /// Key the record was promoted to.
    pub record_key: String,
    /// Key the backup was promoted to.
    pub backup_key: String,
}

/// Generates a fresh transaction id.
pub fn new_transaction_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Derives a record key from the record's client name and the date of
/// `now_millis`: `"{client}_{YYYY-MM-DD}.json"`, with characters outside
/// `[A-Za-z0-9_.-]` replaced by `_`.
pub fn derive_record_key(data: &Value, now_millis: u64) -> String {
    let client = ["clientName", "client_name"]
        .iter()
        .filter_map(|field| data.get(*field).and_then(Value::as_str))
        .find(|name| !name.trim().is_empty())
        .unwrap_or("Unnamed");

    let date = i64::try_from(now_millis)
        .ok()
        .and_then(chrono::DateTime::<chrono::Utc>::from_timestamp_millis)
        .map(|at| at.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "1970-01-01".to_string());

    sanitize_key(&format!("{client}_{date}.json"))
}

fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Runs dual-target writes against a [`RemoteWriter`].
pub struct TransactionalWriteCoordinator<R: RemoteWriter> {
    remote: Arc<R>,
    clock: Arc<dyn Clock>,
    current_record_key: Mutex<Option<String>>,
    last_transaction: Mutex<Option<Transaction>>,
}

impl<R: RemoteWriter> TransactionalWriteCoordinator<R> {
    /// Creates a coordinator. `clock` dates derived record keys.
    pub fn new(remote: Arc<R>, clock: Arc<dyn Clock>) -> Self {
        Self {
            remote,
            clock,
            current_record_key: Mutex::new(None),
            last_transaction: Mutex::new(None),
        }
    }

    /// Key of the last committed record.
    pub fn current_record_key(&self) -> Option<String> {
        self.current_record_key.lock().clone()
    }

    /// The last transaction that passed the prepare phase.
    pub fn last_transaction(&self) -> Option<Transaction> {
        self.last_transaction.lock().clone()
    }

    /// Record key used when the caller does not provide one.
    pub fn default_record_key(&self, data: &Value) -> String {
        derive_record_key(data, self.clock.now_millis())
    }

    /// Writes `data` as record `record_key` plus a backup keyed by
    /// `record_id`, under a fresh transaction id.
    pub async fn save_transactional(
        &self,
        record_id: &str,
        data: &Value,
        record_key: Option<&str>,
    ) -> SyncResult<TransactionReceipt> {
        self.save_transactional_with_id(&new_transaction_id(), record_id, data, record_key)
            .await
    }

    /// Like [`save_transactional`](Self::save_transactional), inside an
    /// existing transaction id.
    pub async fn save_transactional_with_id(
        &self,
        transaction_id: &str,
        record_id: &str,
        data: &Value,
        record_key: Option<&str>,
    ) -> SyncResult<TransactionReceipt> {
        let record_key = match record_key {
            Some(key) => key.to_string(),
            None => self.default_record_key(data),
        };
        let target_a = TransactionTarget::new(record_key, data.clone());
        let target_b = TransactionTarget::new(record_id, data.clone());

        if let Err(e) = self
            .remote
            .prepare_transaction(transaction_id, &target_a, &target_b)
            .await
        {
            // A partially staged pair may exist.
            self.abort(transaction_id, &target_a.key, &target_b.key).await;
            return Err(SyncError::in_phase(TransactionPhase::Prepare, e));
        }

        let mut transaction =
            Transaction::prepared(transaction_id.to_string(), target_a, target_b);

        let committed = self
            .remote
            .commit_transaction(
                transaction_id,
                &transaction.target_a.key,
                &transaction.target_b.key,
                data,
            )
            .await;

        if let Err(e) = committed {
            self.abort(
                transaction_id,
                &transaction.target_a.key,
                &transaction.target_b.key,
            )
            .await;
            transaction.state = TransactionState::RolledBack;
            *self.last_transaction.lock() = Some(transaction);
            return Err(SyncError::in_phase(TransactionPhase::Commit, e));
        }

        transaction.state = TransactionState::Committed;
        let receipt = TransactionReceipt {
            transaction_id: transaction.id.clone(),
            record_key: transaction.target_a.key.clone(),
            backup_key: transaction.target_b.key.clone(),
        };
        *self.current_record_key.lock() = Some(receipt.record_key.clone());
        *self.last_transaction.lock() = Some(transaction);

        debug!(
            transaction_id,
            record_key = %receipt.record_key,
            "transaction committed"
        );
        Ok(receipt)
    }

    async fn abort(&self, transaction_id: &str, target_a_key: &str, target_b_key: &str) {
        let report = self
            .remote
            .rollback_transaction(transaction_id, target_a_key, target_b_key)
            .await;
        if !report.success {
            warn!(
                transaction_id,
                error = report.error.as_deref().unwrap_or("unknown"),
                "rollback failed, staged files may be left behind"
            );
        }
    }
}
