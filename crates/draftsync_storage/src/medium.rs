//! Storage medium trait definition.

use crate::error::StorageResult;

/// A same-device key-value storage medium.
///
/// Media are **opaque string stores** with the semantics of a browser's
/// `localStorage`: synchronous, string keys, string values, and a finite
/// quota that can reject writes.
///
/// # Invariants
///
/// - `get` returns exactly the last value `set` for that key, or `None`
/// - `set` either stores the whole value or fails without changing the key
/// - `remove` of a missing key succeeds
/// - Media must be `Send + Sync` so one medium can back several components
///
/// # Implementors
///
/// - [`super::InMemoryMedium`] - For testing
/// - [`super::FileMedium`] - For persistent storage
pub trait StorageMedium: Send + Sync {
    /// Reads the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the medium is unavailable.
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::QuotaExceeded`] if the medium is full,
    /// or another error if the medium is unavailable or I/O fails.
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Removes `key`. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the medium is unavailable or I/O fails.
    fn remove(&self, key: &str) -> StorageResult<()>;

    /// Enumerates all keys currently stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the medium is unavailable.
    fn keys(&self) -> StorageResult<Vec<String>>;
}
