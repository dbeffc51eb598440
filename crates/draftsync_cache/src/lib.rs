//! # draftsync Cache
//!
//! The read-side mirror of the remote store.
//!
//! [`LocalCacheStore`] keeps server-confirmed records in a storage medium so
//! reads are answered locally between remote round-trips. Records live in
//! [`Namespace`]s; full records and catalogs are expensive and bounded,
//! list summaries and settings are cheap and unbounded.
//!
//! ## Key Invariants
//!
//! - A bounded namespace never holds more entries than its capacity; on
//!   overflow the entry with the oldest `last_accessed_at` (falling back to
//!   `cached_at`) is evicted first
//! - Entries of a bounded namespace older than `max_cache_age` are purged at
//!   startup and never served
//! - Storage failures never reach the caller: corrupt documents read as
//!   absent, a full medium triggers one sweep and one retry, and a missing
//!   medium turns the cache into an "always miss" no-op

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod entry;
mod store;

pub use config::{CacheConfig, NamespacePolicy};
pub use entry::{CacheEntry, CacheMetadata, ListSummary, Namespace};
pub use store::{CacheStats, LocalCacheStore};
