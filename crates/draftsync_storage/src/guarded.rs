//! Failure-absorbing boundary over a storage medium.
//!
//! Nothing above this module ever sees a [`crate::StorageError`]. Reads of
//! missing, corrupt or unreachable keys come back as `None`; writes come
//! back as a [`WriteOutcome`] the caller can act on (the cache sweeps and
//! retries on [`WriteOutcome::QuotaExceeded`]) or ignore.

use crate::clock::{Clock, SystemClock};
use crate::medium::StorageMedium;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Result of a guarded write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The value was stored.
    Written,
    /// The medium is full.
    QuotaExceeded,
    /// There is no medium, or it is disabled.
    Unavailable,
    /// Serialization or I/O failed.
    Failed,
}

impl WriteOutcome {
    /// Returns true if the value was stored.
    pub fn is_written(self) -> bool {
        self == WriteOutcome::Written
    }
}

/// A storage medium handle whose operations never fail.
///
/// Cloning is cheap; clones share the medium and the clock. A handle
/// built with [`GuardedStorage::unavailable`] turns every operation into
/// a no-op, so the components above it behave as "always cache miss".
#[derive(Clone)]
pub struct GuardedStorage {
    medium: Option<Arc<dyn StorageMedium>>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for GuardedStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardedStorage")
            .field("available", &self.medium.is_some())
            .field("now_millis", &self.clock.now_millis())
            .finish()
    }
}

impl GuardedStorage {
    /// Wraps a medium, using the system clock.
    pub fn new(medium: Arc<dyn StorageMedium>) -> Self {
        Self::from_option(Some(medium))
    }

    /// Wraps an optional medium. `None` yields a no-op store.
    pub fn from_option(medium: Option<Arc<dyn StorageMedium>>) -> Self {
        Self {
            medium,
            clock: Arc::new(SystemClock),
        }
    }

    /// A no-op store for environments without a storage medium.
    pub fn unavailable() -> Self {
        Self::from_option(None)
    }

    /// Replaces the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns true if a medium is attached.
    pub fn is_attached(&self) -> bool {
        self.medium.is_some()
    }

    /// Returns the clock shared by everything built on this storage.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Current wall-clock time in milliseconds.
    pub fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }

    /// Reads the raw string under `key`.
    pub fn read_raw(&self, key: &str) -> Option<String> {
        let medium = self.medium.as_ref()?;
        match medium.get(key) {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "storage read failed");
                None
            }
        }
    }

    /// Reads and parses the JSON document under `key`.
    ///
    /// Missing keys, unreadable media and documents that do not parse as
    /// `T` all yield `None`.
    pub fn read_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.read_raw(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "ignoring corrupt stored document");
                None
            }
        }
    }

    /// Serializes `value` and stores it under `key`.
    pub fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> WriteOutcome {
        let Some(medium) = self.medium.as_ref() else {
            return WriteOutcome::Unavailable;
        };

        let text = match serde_json::to_string(value) {
            Ok(text) => text,
            Err(e) => {
                warn!(key, error = %e, "failed to serialize document");
                return WriteOutcome::Failed;
            }
        };

        match medium.set(key, &text) {
            Ok(()) => WriteOutcome::Written,
            Err(e) if e.is_quota_exceeded() => {
                warn!(key, error = %e, "storage quota exceeded");
                WriteOutcome::QuotaExceeded
            }
            Err(crate::StorageError::Unavailable) => WriteOutcome::Unavailable,
            Err(e) => {
                warn!(key, error = %e, "storage write failed");
                WriteOutcome::Failed
            }
        }
    }

    /// Removes `key`. Returns false if the medium could not be reached.
    pub fn remove(&self, key: &str) -> bool {
        let Some(medium) = self.medium.as_ref() else {
            return false;
        };
        match medium.remove(key) {
            Ok(()) => true,
            Err(e) => {
                warn!(key, error = %e, "storage remove failed");
                false
            }
        }
    }

    /// Lists every key starting with `prefix`.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let Some(medium) = self.medium.as_ref() else {
            return Vec::new();
        };
        match medium.keys() {
            Ok(keys) => keys.into_iter().filter(|k| k.starts_with(prefix)).collect(),
            Err(e) => {
                warn!(prefix, error = %e, "storage key enumeration failed");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::memory::InMemoryMedium;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Doc {
        total: u32,
    }

    #[test]
    fn round_trip_json() {
        let storage = GuardedStorage::new(Arc::new(InMemoryMedium::new()));
        assert!(storage.write_json("doc", &Doc { total: 100 }).is_written());
        assert_eq!(storage.read_json::<Doc>("doc"), Some(Doc { total: 100 }));
    }

    #[test]
    fn corrupt_json_reads_as_absent() {
        let medium = Arc::new(InMemoryMedium::new());
        medium.raw_set("doc", "{\"total\": ");
        let storage = GuardedStorage::new(medium);
        assert_eq!(storage.read_json::<Doc>("doc"), None);
        assert_eq!(storage.read_raw("doc").as_deref(), Some("{\"total\": "));
    }

    #[test]
    fn wrong_shape_reads_as_absent() {
        let medium = Arc::new(InMemoryMedium::new());
        medium.raw_set("doc", "[1, 2, 3]");
        let storage = GuardedStorage::new(medium);
        assert_eq!(storage.read_json::<Doc>("doc"), None);
    }

    #[test]
    fn quota_is_reported_not_thrown() {
        let storage = GuardedStorage::new(Arc::new(InMemoryMedium::with_quota(8)));
        let outcome = storage.write_json("doc", &Doc { total: 123_456 });
        assert_eq!(outcome, WriteOutcome::QuotaExceeded);
        assert_eq!(storage.read_json::<Doc>("doc"), None);
    }

    #[test]
    fn missing_medium_is_a_no_op() {
        let storage = GuardedStorage::unavailable();
        assert!(!storage.is_attached());
        assert_eq!(
            storage.write_json("doc", &Doc { total: 1 }),
            WriteOutcome::Unavailable
        );
        assert_eq!(storage.read_json::<Doc>("doc"), None);
        assert!(!storage.remove("doc"));
        assert!(storage.keys_with_prefix("").is_empty());
    }

    #[test]
    fn disabled_medium_is_a_no_op() {
        let medium = Arc::new(InMemoryMedium::new());
        let storage = GuardedStorage::new(medium.clone());
        storage.write_json("doc", &Doc { total: 1 });

        medium.set_available(false);
        assert_eq!(storage.read_json::<Doc>("doc"), None);
        assert_eq!(
            storage.write_json("doc", &Doc { total: 2 }),
            WriteOutcome::Unavailable
        );
        assert!(storage.keys_with_prefix("").is_empty());
    }

    #[test]
    fn keys_filtered_by_prefix() {
        let storage = GuardedStorage::new(Arc::new(InMemoryMedium::new()));
        storage.write_json("app_a", &1);
        storage.write_json("app_b", &2);
        storage.write_json("other", &3);

        let mut keys = storage.keys_with_prefix("app_");
        keys.sort();
        assert_eq!(keys, vec!["app_a".to_string(), "app_b".to_string()]);
    }

    #[test]
    fn clock_is_shared_by_clones() {
        let clock = Arc::new(ManualClock::new(42));
        let storage = GuardedStorage::unavailable().with_clock(clock.clone());
        let clone = storage.clone();
        clock.set(99);
        assert_eq!(clone.now_millis(), 99);
    }
}
