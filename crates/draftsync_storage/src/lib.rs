//! # draftsync Storage
//!
//! Storage medium trait and implementations for draftsync.
//!
//! This crate provides the lowest-level storage abstraction: a synchronous,
//! string-keyed key-value medium with a finite quota, in the shape of a
//! browser's `localStorage`. Media are **opaque string stores** - they do
//! not interpret the JSON documents written into them.
//!
//! ## Design Principles
//!
//! - Media are simple string stores (get, set, remove, enumerate keys)
//! - A medium may reject a write because its quota is exhausted
//! - A medium may be absent entirely; nothing above this crate may fail
//!   because of that
//! - [`GuardedStorage`] is the only way the cache and the sync engine touch
//!   a medium: every failure becomes an outcome value or a `None`
//!
//! ## Available Media
//!
//! - [`InMemoryMedium`] - For testing and ephemeral sessions
//! - [`FileMedium`] - Persistent, single JSON file with atomic replacement
//!
//! ## Example
//!
//! ```rust
//! use draftsync_storage::{GuardedStorage, InMemoryMedium, WriteOutcome};
//! use std::sync::Arc;
//!
//! let storage = GuardedStorage::new(Arc::new(InMemoryMedium::new()));
//! assert_eq!(storage.write_json("greeting", &"hello"), WriteOutcome::Written);
//! let value: Option<String> = storage.read_json("greeting");
//! assert_eq!(value.as_deref(), Some("hello"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod error;
mod file;
mod guarded;
mod medium;
mod memory;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{StorageError, StorageResult};
pub use file::FileMedium;
pub use guarded::{GuardedStorage, WriteOutcome};
pub use medium::StorageMedium;
pub use memory::InMemoryMedium;
