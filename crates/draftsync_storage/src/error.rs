//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage medium operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The medium refused a write because its quota would be exceeded.
    #[error("storage quota exceeded: write needs {needed} bytes, quota is {quota} bytes")]
    QuotaExceeded {
        /// Total bytes the medium would hold after the write.
        needed: usize,
        /// The configured quota.
        quota: usize,
    },

    /// The medium is disabled or otherwise unusable.
    #[error("storage medium unavailable")]
    Unavailable,

    /// Another process holds the medium's lock.
    #[error("storage medium is locked by another process")]
    Locked,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The medium's own persisted form could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    /// Returns true if this error is a quota rejection.
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, StorageError::QuotaExceeded { .. })
    }
}
