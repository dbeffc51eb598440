//! Configuration for the local cache.

use crate::entry::Namespace;
use std::time::Duration;

/// Capacity and staleness rules of one namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamespacePolicy {
    /// At most `capacity` entries, none older than `max_age`.
    Bounded {
        /// Maximum number of entries.
        capacity: usize,
        /// Maximum age measured from `cached_at`.
        max_age: Duration,
    },
    /// No capacity or age limit.
    Unbounded,
}

/// Configuration for [`crate::LocalCacheStore`].
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of full records kept.
    pub max_full_record_cache_size: usize,
    /// Maximum number of catalogs kept.
    pub max_catalog_cache_size: usize,
    /// Maximum age of a full record or catalog.
    pub max_cache_age: Duration,
    /// Prefix of every key the cache writes to the medium.
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_full_record_cache_size: 10,
            max_catalog_cache_size: 5,
            max_cache_age: Duration::from_secs(7 * 24 * 60 * 60),
            key_prefix: "cache_".to_string(),
        }
    }
}

impl CacheConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the full record capacity.
    #[must_use]
    pub fn with_max_full_record_cache_size(mut self, size: usize) -> Self {
        self.max_full_record_cache_size = size;
        self
    }

    /// Sets the catalog capacity.
    #[must_use]
    pub fn with_max_catalog_cache_size(mut self, size: usize) -> Self {
        self.max_catalog_cache_size = size;
        self
    }

    /// Sets the staleness horizon of bounded namespaces.
    #[must_use]
    pub fn with_max_cache_age(mut self, age: Duration) -> Self {
        self.max_cache_age = age;
        self
    }

    /// Sets the key prefix.
    #[must_use]
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Returns the policy that applies to `namespace`.
    pub fn policy(&self, namespace: Namespace) -> NamespacePolicy {
        match namespace {
            Namespace::Records => NamespacePolicy::Bounded {
                capacity: self.max_full_record_cache_size.max(1),
                max_age: self.max_cache_age,
            },
            Namespace::Catalogs => NamespacePolicy::Bounded {
                capacity: self.max_catalog_cache_size.max(1),
                max_age: self.max_cache_age,
            },
            Namespace::List | Namespace::Settings => NamespacePolicy::Unbounded,
        }
    }

    /// Storage key holding `namespace`.
    pub fn namespace_key(&self, namespace: Namespace) -> String {
        format!("{}{}", self.key_prefix, namespace.as_str())
    }

    /// Storage key holding the cache metadata.
    pub fn metadata_key(&self) -> String {
        format!("{}metadata", self.key_prefix)
    }
}
