//! # draftsync Engine
//!
//! Offline-tolerant write path for draft records.
//!
//! This crate provides:
//! - Critical saves delivered immediately, with synchronous error reporting
//! - Batched saves coalesced per record and flushed on an interval or when
//!   the queue fills up
//! - Retry of failed deliveries with exponential backoff
//! - Persisted snapshots that survive restarts and serve offline reads
//! - A two-phase record + backup write with rollback
//! - A debounced transactional autosave
//!
//! ## Architecture
//!
//! [`SyncQueueEngine`] owns all delivery state. Writes go through a
//! [`RemoteWriter`]; local state lives in a
//! [`GuardedStorage`](draftsync_storage::GuardedStorage) shared with the
//! [`LocalCacheStore`](draftsync_cache::LocalCacheStore) the engine keeps
//! up to date. Background timers are Tokio tasks that hold only a weak
//! reference to the engine.
//!
//! ## Key Invariants
//!
//! - A record appears at most once in the batch queue; the latest edit wins
//! - At most one immediate delivery per record is on the wire
//! - A delivery outcome never discards an edit made after it started
//! - A snapshot is removed only once the remote holds the latest edit
//! - At most one retry timer is outstanding

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod autosave;
mod config;
mod engine;
mod error;
mod queue;
mod remote;
mod snapshot;
mod stats;
mod timer;
mod transaction;

pub use autosave::TransactionalAutosave;
pub use config::{RetryConfig, SyncConfig, DEFAULT_STORAGE_KEY_PREFIX};
pub use engine::{BatchReport, FailedDelivery, SaveOptions, SaveOutcome, SyncQueueEngine};
pub use error::{SyncError, SyncResult};
pub use queue::{DeliveryMode, FailedSyncItem, SyncItem};
pub use remote::{InMemoryRemote, RemoteCall, RemoteWriter, RollbackReport, TransactionTarget};
pub use snapshot::PersistedSnapshot;
pub use stats::SyncStats;
pub use transaction::{
    derive_record_key, new_transaction_id, Transaction, TransactionPhase, TransactionReceipt,
    TransactionState, TransactionalWriteCoordinator,
};
