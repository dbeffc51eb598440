//! In-memory storage medium for testing.

use crate::error::{StorageError, StorageResult};
use crate::medium::StorageMedium;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// An in-memory storage medium.
///
/// This medium keeps all entries in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Sessions that don't need to survive a restart
///
/// It can simulate the two failure modes of a real browser medium: an
/// exhausted quota ([`InMemoryMedium::with_quota`]) and a disabled medium
/// ([`InMemoryMedium::set_available`]).
///
/// # Example
///
/// ```rust
/// use draftsync_storage::{InMemoryMedium, StorageMedium};
///
/// let medium = InMemoryMedium::new();
/// medium.set("k", "v").unwrap();
/// assert_eq!(medium.get("k").unwrap().as_deref(), Some("v"));
/// ```
#[derive(Debug)]
pub struct InMemoryMedium {
    entries: RwLock<BTreeMap<String, String>>,
    quota: Option<usize>,
    available: AtomicBool,
}

impl Default for InMemoryMedium {
    fn default() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            quota: None,
            available: AtomicBool::new(true),
        }
    }
}

impl InMemoryMedium {
    /// Creates a new empty medium without a quota.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new empty medium that holds at most `quota` bytes
    /// (sum of key and value lengths).
    #[must_use]
    pub fn with_quota(quota: usize) -> Self {
        Self {
            quota: Some(quota),
            ..Self::default()
        }
    }

    /// Enables or disables the medium. A disabled medium fails every call
    /// with [`StorageError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Stores a value bypassing quota and availability checks.
    ///
    /// Useful for seeding corrupt or aged state in tests.
    pub fn raw_set(&self, key: &str, value: &str) {
        self.entries.write().insert(key.to_string(), value.to_string());
    }

    /// Returns the number of bytes currently used.
    #[must_use]
    pub fn used_bytes(&self) -> usize {
        footprint(&self.entries.read())
    }

    /// Returns the number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if no keys are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn ensure_available(&self) -> StorageResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::Unavailable)
        }
    }
}

/// Bytes held by a key space, counting keys and values.
pub(crate) fn footprint(entries: &BTreeMap<String, String>) -> usize {
    entries.iter().map(|(k, v)| k.len() + v.len()).sum()
}

/// Bytes a key space would hold after replacing `key` with `value`.
pub(crate) fn footprint_after_set(
    entries: &BTreeMap<String, String>,
    key: &str,
    value: &str,
) -> usize {
    let existing = entries.get(key).map(|v| key.len() + v.len()).unwrap_or(0);
    footprint(entries) - existing + key.len() + value.len()
}

impl StorageMedium for InMemoryMedium {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        self.ensure_available()?;
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.ensure_available()?;
        let mut entries = self.entries.write();

        if let Some(quota) = self.quota {
            let needed = footprint_after_set(&entries, key, value);
            if needed > quota {
                return Err(StorageError::QuotaExceeded { needed, quota });
            }
        }

        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.ensure_available()?;
        self.entries.write().remove(key);
        Ok(())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        self.ensure_available()?;
        Ok(self.entries.read().keys().cloned().collect())
    }
}
