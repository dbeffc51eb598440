//! Error types for the sync engine.
//!
//! A full local medium and an unreadable persisted document never reach
//! callers: the storage layer reports them as
//! `WriteOutcome::QuotaExceeded` and as an absent value.

use crate::transaction::TransactionPhase;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    /// Network failure or server-side error. Drives the retry path.
    #[error("transient remote error: {message}")]
    TransientRemote {
        /// Error message.
        message: String,
    },

    /// The remote rejected the write because of a version mismatch.
    #[error("conflict on record {id}: {message}")]
    Conflict {
        /// Record id.
        id: String,
        /// Error message.
        message: String,
    },

    /// The record does not exist remotely.
    #[error("record {id} not found")]
    NotFound {
        /// Record id.
        id: String,
    },

    /// The remote rejected the request and retrying will not help.
    #[error("remote rejected request: {message}")]
    Remote {
        /// Error message.
        message: String,
    },

    /// A two-phase write failed. `source` is the original failure.
    #[error("transaction failed during {phase}: {source}")]
    TransactionPhase {
        /// Phase that failed.
        phase: TransactionPhase,
        /// The failure reported by the remote.
        source: Box<SyncError>,
    },
}

impl SyncError {
    /// Creates a transient remote error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::TransientRemote {
            message: message.into(),
        }
    }

    /// Creates a conflict error.
    pub fn conflict(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Conflict {
            id: id.into(),
            message: message.into(),
        }
    }

    /// Creates a non-retryable remote rejection.
    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
        }
    }

    /// Wraps `source` as a failure of `phase`.
    pub fn in_phase(phase: TransactionPhase, source: SyncError) -> Self {
        Self::TransactionPhase {
            phase,
            source: Box::new(source),
        }
    }

    /// Returns true if a later attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::TransientRemote { .. } => true,
            SyncError::TransactionPhase { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Returns true for version conflicts, including wrapped ones.
    pub fn is_conflict(&self) -> bool {
        match self {
            SyncError::Conflict { .. } => true,
            SyncError::TransactionPhase { source, .. } => source.is_conflict(),
            _ => false,
        }
    }
}
