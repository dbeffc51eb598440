//! Configuration for the sync engine.

use draftsync_cache::CacheConfig;
use std::time::Duration;

/// Prefix used for persisted snapshots when none is configured.
pub const DEFAULT_STORAGE_KEY_PREFIX: &str = "syncManager_";

/// Configuration for [`crate::SyncQueueEngine`].
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Interval of the background batch flush.
    pub batch_interval: Duration,
    /// Queue size that triggers an immediate batch flush.
    pub max_batch_size: usize,
    /// Retry count after which a failed item is reported as exhausted.
    ///
    /// Advisory: retries continue past this count.
    pub max_retries: u32,
    /// Backoff of the failed-item retry timer.
    pub retry: RetryConfig,
    /// Prefix of every persisted snapshot key.
    pub storage_key_prefix: String,
    /// Snapshots older than this are discarded at startup instead of resent.
    pub snapshot_max_age: Duration,
    /// Quiet period of the transactional autosave.
    pub autosave_debounce: Duration,
    /// Emit per-operation `debug` events.
    pub debug_logging: bool,
    /// Configuration of the local cache the engine refreshes.
    pub cache: CacheConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_interval: Duration::from_secs(30),
            max_batch_size: 10,
            max_retries: 3,
            retry: RetryConfig::default(),
            storage_key_prefix: DEFAULT_STORAGE_KEY_PREFIX.to_string(),
            snapshot_max_age: Duration::from_secs(24 * 60 * 60),
            autosave_debounce: Duration::from_secs(8),
            debug_logging: false,
            cache: CacheConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the batch flush interval.
    #[must_use]
    pub fn with_batch_interval(mut self, interval: Duration) -> Self {
        self.batch_interval = interval;
        self
    }

    /// Sets the queue size that triggers an immediate flush.
    #[must_use]
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    /// Sets the advisory retry limit.
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the retry backoff.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the snapshot key prefix.
    #[must_use]
    pub fn with_storage_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.storage_key_prefix = prefix.into();
        self
    }

    /// Sets the snapshot recovery horizon.
    #[must_use]
    pub fn with_snapshot_max_age(mut self, age: Duration) -> Self {
        self.snapshot_max_age = age;
        self
    }

    /// Sets the autosave debounce.
    #[must_use]
    pub fn with_autosave_debounce(mut self, debounce: Duration) -> Self {
        self.autosave_debounce = debounce;
        self
    }

    /// Enables or disables per-operation debug events.
    #[must_use]
    pub fn with_debug_logging(mut self, enabled: bool) -> Self {
        self.debug_logging = enabled;
        self
    }

    /// Sets the cache configuration.
    #[must_use]
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Replaces out-of-range values with usable ones.
    ///
    /// Applied once when the engine is constructed.
    #[must_use]
    pub fn validated(mut self) -> Self {
        let defaults = Self::default();
        if self.max_batch_size == 0 {
            self.max_batch_size = 1;
        }
        if self.batch_interval.is_zero() {
            self.batch_interval = defaults.batch_interval;
        }
        if self.retry.base_delay.is_zero() {
            self.retry.base_delay = defaults.retry.base_delay;
        }
        if self.retry.max_delay < self.retry.base_delay {
            self.retry.max_delay = self.retry.base_delay;
        }
        // An empty prefix would make every key of the medium look like a snapshot.
        if self.storage_key_prefix.is_empty() {
            self.storage_key_prefix = defaults.storage_key_prefix;
        }
        self
    }
}

/// Exponential backoff of the retry timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Delay for an item that has never been retried.
    pub base_delay: Duration,
    /// Upper bound of any delay.
    pub max_delay: Duration,
}

impl RetryConfig {
    /// Creates a backoff starting at `base_delay`.
    pub fn new(base_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay: Duration::from_secs(5 * 60),
        }
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Delay before the next retry round, given the smallest retry count
    /// among the failed items: `base_delay * 2^retries`, capped at
    /// `max_delay`.
    pub fn delay_for_retries(&self, retries: u32) -> Duration {
        let factor = 1u128 << retries.min(64);
        let millis = self
            .base_delay
            .as_millis()
            .saturating_mul(factor)
            .min(self.max_delay.as_millis());
        Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}
