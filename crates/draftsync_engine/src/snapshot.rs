//! Persisted snapshots of unsynced edits.

use draftsync_storage::{GuardedStorage, WriteOutcome};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// The latest local copy of a record, kept until the remote confirms it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSnapshot {
    /// The record.
    pub data: Value,
    /// When the snapshot was written, in epoch milliseconds.
    pub saved_at: u64,
}

/// Result of scanning the medium for snapshots.
#[derive(Debug, Default)]
pub(crate) struct SnapshotScan {
    /// Readable snapshots, oldest first.
    pub(crate) snapshots: Vec<(String, PersistedSnapshot)>,
    /// Ids whose stored snapshot could not be parsed.
    pub(crate) corrupt: Vec<String>,
}

/// One snapshot per record id, stored under `{prefix}{id}`.
#[derive(Debug, Clone)]
pub(crate) struct SnapshotStore {
    storage: GuardedStorage,
    prefix: String,
    /// Keys that share the prefix but belong to someone else (the cache).
    foreign_prefix: Option<String>,
}

impl SnapshotStore {
    pub(crate) fn new(storage: GuardedStorage, prefix: String, cache_prefix: &str) -> Self {
        let foreign_prefix = cache_prefix
            .starts_with(prefix.as_str())
            .then(|| cache_prefix.to_string());
        Self {
            storage,
            prefix,
            foreign_prefix,
        }
    }

    fn key(&self, id: &str) -> String {
        format!("{}{}", self.prefix, id)
    }

    pub(crate) fn save(&self, id: &str, data: &Value) -> WriteOutcome {
        let snapshot = PersistedSnapshot {
            data: data.clone(),
            saved_at: self.storage.now_millis(),
        };
        let outcome = self.storage.write_json(&self.key(id), &snapshot);
        if !outcome.is_written() {
            warn!(id, ?outcome, "snapshot not persisted");
        }
        outcome
    }

    pub(crate) fn load(&self, id: &str) -> Option<PersistedSnapshot> {
        self.storage.read_json(&self.key(id))
    }

    pub(crate) fn remove(&self, id: &str) {
        self.storage.remove(&self.key(id));
    }

    fn snapshot_ids(&self) -> Vec<String> {
        self.storage
            .keys_with_prefix(&self.prefix)
            .into_iter()
            .filter(|key| {
                self.foreign_prefix
                    .as_deref()
                    .map_or(true, |foreign| !key.starts_with(foreign))
            })
            .filter_map(|key| key.strip_prefix(&self.prefix).map(str::to_string))
            .filter(|id| !id.is_empty())
            .collect()
    }

    pub(crate) fn scan(&self) -> SnapshotScan {
        let mut scan = SnapshotScan::default();
        for id in self.snapshot_ids() {
            match self.load(&id) {
                Some(snapshot) => scan.snapshots.push((id, snapshot)),
                None => scan.corrupt.push(id),
            }
        }
        scan.snapshots
            .sort_by(|a, b| a.1.saved_at.cmp(&b.1.saved_at).then_with(|| a.0.cmp(&b.0)));
        scan
    }

    pub(crate) fn clear_all(&self) -> usize {
        let ids = self.snapshot_ids();
        for id in &ids {
            self.remove(id);
        }
        ids.len()
    }
}
