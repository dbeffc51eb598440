//! The local cache store.

use crate::config::{CacheConfig, NamespacePolicy};
use crate::entry::{data_version_of, CacheEntry, CacheMetadata, ListSummary, Namespace};
use draftsync_storage::{GuardedStorage, WriteOutcome};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

type NamespaceMap = BTreeMap<String, CacheEntry>;

const USER_SETTINGS_ID: &str = "user";
const ORG_SETTINGS_ID: &str = "organization";

/// Counts describing the cache contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Entries in [`Namespace::Records`].
    pub records: usize,
    /// Entries in [`Namespace::Catalogs`].
    pub catalogs: usize,
    /// Entries in [`Namespace::List`].
    pub list: usize,
    /// Entries in [`Namespace::Settings`].
    pub settings: usize,
    /// Last synchronization time, in epoch milliseconds.
    pub last_sync: Option<u64>,
    /// Milliseconds since the last synchronization.
    pub last_sync_age_ms: Option<u64>,
    /// User the cache belongs to.
    pub user_id: Option<String>,
    /// Organization the cache belongs to.
    pub organization_id: Option<String>,
}

/// A bounded, namespaced key-value mirror backed by a storage medium.
///
/// Each namespace is one JSON object in the medium, keyed by record id.
/// Every public operation is a read-modify-write of that object under an
/// internal lock, so one store can be shared across tasks.
///
/// # Example
///
/// ```rust
/// use draftsync_cache::{CacheConfig, LocalCacheStore, Namespace};
/// use draftsync_storage::{GuardedStorage, InMemoryMedium};
/// use serde_json::json;
/// use std::sync::Arc;
///
/// let storage = GuardedStorage::new(Arc::new(InMemoryMedium::new()));
/// let cache = LocalCacheStore::new(storage, CacheConfig::default());
///
/// cache.put(Namespace::Records, "q1", json!({"total": 100}), Some(1));
/// let entry = cache.get(Namespace::Records, "q1").unwrap();
/// assert_eq!(entry.data, json!({"total": 100}));
/// ```
#[derive(Debug)]
pub struct LocalCacheStore {
    storage: GuardedStorage,
    config: CacheConfig,
    lock: Mutex<()>,
}

impl LocalCacheStore {
    /// Opens the cache over `storage`.
    ///
    /// Creates the metadata document if it is missing and sweeps stale
    /// entries before returning.
    pub fn new(storage: GuardedStorage, config: CacheConfig) -> Self {
        let store = Self {
            storage,
            config,
            lock: Mutex::new(()),
        };

        {
            let _guard = store.lock.lock();
            if store.read_metadata().is_none() {
                let metadata = CacheMetadata::empty(store.storage.now_millis());
                store.write_with_recovery(&store.config.metadata_key(), &metadata);
            }
            store.sweep_locked();
        }

        store
    }

    /// Returns the configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Returns the storage handle the cache writes through.
    pub fn storage(&self) -> &GuardedStorage {
        &self.storage
    }

    /// Reads an entry and marks it as recently used.
    ///
    /// Entries of a bounded namespace that are past their staleness horizon
    /// are dropped instead of served.
    pub fn get(&self, namespace: Namespace, id: &str) -> Option<CacheEntry> {
        let _guard = self.lock.lock();
        let mut map = self.read_namespace(namespace);
        let now = self.storage.now_millis();

        let stale = match (map.get(id), self.config.policy(namespace)) {
            (None, _) => return None,
            (Some(entry), NamespacePolicy::Bounded { max_age, .. }) => {
                entry.age_millis(now) > max_age.as_millis() as u64
            }
            (Some(_), NamespacePolicy::Unbounded) => false,
        };

        if stale {
            map.remove(id);
            self.write_with_recovery(&self.config.namespace_key(namespace), &map);
            debug!(namespace = %namespace, id, "dropped stale cache entry on read");
            return None;
        }

        let entry = map.get_mut(id)?;
        entry.last_accessed_at = Some(now);
        let hit = entry.clone();
        self.write_with_recovery(&self.config.namespace_key(namespace), &map);
        Some(hit)
    }

    /// Stores an entry, fully replacing any existing one.
    ///
    /// Inserting a new id into a bounded namespace at capacity evicts the
    /// least recently used entry first.
    pub fn put(&self, namespace: Namespace, id: &str, data: Value, version: Option<u64>) {
        let _guard = self.lock.lock();
        self.put_locked(namespace, id, data, version, true);
    }

    /// Stores an entry only if a bounded namespace has room for it.
    ///
    /// Never evicts, though stale entries do not take up room. Returns true
    /// if the entry was stored. Unbounded namespaces always have room.
    pub fn put_if_space(
        &self,
        namespace: Namespace,
        id: &str,
        data: Value,
        version: Option<u64>,
    ) -> bool {
        let _guard = self.lock.lock();
        self.put_locked(namespace, id, data, version, false)
    }

    /// Caller must hold `self.lock`. Returns false if the namespace was
    /// full and `evict` is off.
    fn put_locked(
        &self,
        namespace: Namespace,
        id: &str,
        data: Value,
        version: Option<u64>,
        evict: bool,
    ) -> bool {
        let mut map = self.read_namespace(namespace);
        let now = self.storage.now_millis();

        if let NamespacePolicy::Bounded { capacity, max_age } = self.config.policy(namespace) {
            purge_stale(&mut map, now, max_age.as_millis() as u64);
            if !map.contains_key(id) {
                if !evict && map.len() >= capacity {
                    return false;
                }
                while map.len() >= capacity {
                    match evict_lru(&mut map) {
                        Some(evicted) => {
                            debug!(namespace = %namespace, evicted = %evicted, "LRU eviction")
                        }
                        None => break,
                    }
                }
            }
        }

        map.insert(
            id.to_string(),
            CacheEntry {
                id: id.to_string(),
                data,
                data_version: version,
                cached_at: now,
                last_accessed_at: Some(now),
            },
        );
        self.write_with_recovery(&self.config.namespace_key(namespace), &map);
        true
    }

    /// Removes one entry.
    pub fn remove(&self, namespace: Namespace, id: &str) {
        let _guard = self.lock.lock();
        let mut map = self.read_namespace(namespace);
        if map.remove(id).is_some() {
            self.write_with_recovery(&self.config.namespace_key(namespace), &map);
        }
    }

    /// Drops every entry of a namespace, e.g. after a bulk remote refresh.
    pub fn invalidate_namespace(&self, namespace: Namespace) {
        let _guard = self.lock.lock();
        self.write_with_recovery(&self.config.namespace_key(namespace), &NamespaceMap::new());
    }

    /// Drops every namespace and resets the metadata.
    pub fn clear_all(&self) {
        self.clear_except(&[]);
    }

    /// Drops every namespace except those listed, and resets the metadata.
    pub fn clear_except(&self, keep: &[Namespace]) {
        let _guard = self.lock.lock();
        for namespace in Namespace::ALL {
            if !keep.contains(&namespace) {
                self.write_with_recovery(
                    &self.config.namespace_key(namespace),
                    &NamespaceMap::new(),
                );
            }
        }
        let metadata = CacheMetadata::empty(self.storage.now_millis());
        self.write_with_recovery(&self.config.metadata_key(), &metadata);
    }

    /// Removes entries of bounded namespaces older than their horizon.
    ///
    /// Returns the number of entries removed.
    pub fn sweep_stale(&self) -> usize {
        let _guard = self.lock.lock();
        self.sweep_locked()
    }

    /// Lists every entry of a namespace, ordered by id.
    pub fn list(&self, namespace: Namespace) -> Vec<CacheEntry> {
        let _guard = self.lock.lock();
        self.read_namespace(namespace).into_values().collect()
    }

    /// Number of entries in a namespace.
    pub fn len(&self, namespace: Namespace) -> usize {
        let _guard = self.lock.lock();
        self.read_namespace(namespace).len()
    }

    /// Records server-confirmed state: the full record goes to
    /// [`Namespace::Records`], its summary to [`Namespace::List`].
    pub fn refresh_from_server(&self, id: &str, data: &Value) {
        let version = data_version_of(data);
        self.put(Namespace::Records, id, data.clone(), version);

        let summary = ListSummary::from_record(id, data);
        match serde_json::to_value(&summary) {
            Ok(value) => self.put(Namespace::List, id, value, version),
            Err(e) => warn!(id, error = %e, "failed to build list summary"),
        }
    }

    /// Reads the summaries of [`Namespace::List`].
    pub fn summaries(&self) -> Vec<ListSummary> {
        self.list(Namespace::List)
            .into_iter()
            .filter_map(|entry| serde_json::from_value(entry.data).ok())
            .collect()
    }

    /// Reads the user settings, or an empty object.
    pub fn user_settings(&self) -> Value {
        self.settings(USER_SETTINGS_ID)
    }

    /// Replaces the user settings.
    pub fn save_user_settings(&self, settings: Value) {
        self.put(Namespace::Settings, USER_SETTINGS_ID, settings, None);
    }

    /// Reads the organization settings, or an empty object.
    pub fn org_settings(&self) -> Value {
        self.settings(ORG_SETTINGS_ID)
    }

    /// Replaces the organization settings.
    pub fn save_org_settings(&self, settings: Value) {
        self.put(Namespace::Settings, ORG_SETTINGS_ID, settings, None);
    }

    fn settings(&self, id: &str) -> Value {
        self.get(Namespace::Settings, id)
            .map(|entry| entry.data)
            .unwrap_or_else(|| Value::Object(Default::default()))
    }

    /// Reads the cache metadata.
    pub fn metadata(&self) -> Option<CacheMetadata> {
        let _guard = self.lock.lock();
        self.read_metadata()
    }

    /// Stamps `last_sync = now`, updating the owner ids when given.
    pub fn update_sync_metadata(&self, user_id: Option<&str>, organization_id: Option<&str>) {
        let _guard = self.lock.lock();
        let now = self.storage.now_millis();
        let mut metadata = self
            .read_metadata()
            .unwrap_or_else(|| CacheMetadata::empty(now));

        if let Some(user_id) = user_id {
            metadata.user_id = Some(user_id.to_string());
        }
        if let Some(organization_id) = organization_id {
            metadata.organization_id = Some(organization_id.to_string());
        }
        metadata.last_sync = Some(now);

        self.write_with_recovery(&self.config.metadata_key(), &metadata);
    }

    /// Last synchronization time, or 0 if unknown.
    pub fn last_sync_timestamp(&self) -> u64 {
        self.metadata().and_then(|m| m.last_sync).unwrap_or(0)
    }

    /// Returns counts describing the cache contents.
    pub fn stats(&self) -> CacheStats {
        let _guard = self.lock.lock();
        let now = self.storage.now_millis();
        let metadata = self.read_metadata();
        let last_sync = metadata.as_ref().and_then(|m| m.last_sync);

        CacheStats {
            records: self.read_namespace(Namespace::Records).len(),
            catalogs: self.read_namespace(Namespace::Catalogs).len(),
            list: self.read_namespace(Namespace::List).len(),
            settings: self.read_namespace(Namespace::Settings).len(),
            last_sync,
            last_sync_age_ms: last_sync.map(|t| now.saturating_sub(t)),
            user_id: metadata.as_ref().and_then(|m| m.user_id.clone()),
            organization_id: metadata.and_then(|m| m.organization_id),
        }
    }

    fn read_namespace(&self, namespace: Namespace) -> NamespaceMap {
        self.storage
            .read_json(&self.config.namespace_key(namespace))
            .unwrap_or_default()
    }

    fn read_metadata(&self) -> Option<CacheMetadata> {
        self.storage.read_json(&self.config.metadata_key())
    }

    fn sweep_locked(&self) -> usize {
        let now = self.storage.now_millis();
        let mut removed = 0;

        for namespace in Namespace::ALL {
            let NamespacePolicy::Bounded { max_age, .. } = self.config.policy(namespace) else {
                continue;
            };
            let mut map = self.read_namespace(namespace);
            let purged = purge_stale(&mut map, now, max_age.as_millis() as u64);
            if purged > 0 {
                // A plain write: a sweep only ever shrinks the document.
                self.storage
                    .write_json(&self.config.namespace_key(namespace), &map);
                removed += purged;
            }
        }

        if removed > 0 {
            info!(removed, "removed stale cache entries");
        }
        removed
    }

    /// Writes a document; on a full medium sweeps once and retries once.
    /// Gives up silently after that.
    fn write_with_recovery<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> WriteOutcome {
        match self.storage.write_json(key, value) {
            WriteOutcome::QuotaExceeded => {
                warn!(key, "cache write hit the storage quota, sweeping stale entries");
                self.sweep_locked();
                let outcome = self.storage.write_json(key, value);
                if !outcome.is_written() {
                    warn!(key, ?outcome, "cache write dropped after sweep");
                }
                outcome
            }
            outcome => outcome,
        }
    }
}

/// Removes entries older than `max_age_ms`. Returns how many were removed.
fn purge_stale(map: &mut NamespaceMap, now: u64, max_age_ms: u64) -> usize {
    let before = map.len();
    map.retain(|_, entry| entry.age_millis(now) <= max_age_ms);
    before - map.len()
}

/// Removes the least recently used entry, ties broken by id.
fn evict_lru(map: &mut NamespaceMap) -> Option<String> {
    let oldest = map
        .values()
        .min_by(|a, b| {
            a.lru_timestamp()
                .cmp(&b.lru_timestamp())
                .then_with(|| a.id.cmp(&b.id))
        })
        .map(|entry| entry.id.clone())?;
    map.remove(&oldest);
    Some(oldest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use draftsync_storage::{InMemoryMedium, ManualClock};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn setup(config: CacheConfig) -> (LocalCacheStore, Arc<InMemoryMedium>, Arc<ManualClock>) {
        let medium = Arc::new(InMemoryMedium::new());
        let clock = Arc::new(ManualClock::new(1_000_000));
        let storage = GuardedStorage::new(medium.clone()).with_clock(clock.clone());
        (LocalCacheStore::new(storage, config), medium, clock)
    }

    #[test]
    fn put_then_get() {
        let (cache, _, _) = setup(CacheConfig::default());
        cache.put(Namespace::Records, "q1", json!({"total": 100}), Some(3));

        let entry = cache.get(Namespace::Records, "q1").unwrap();
        assert_eq!(entry.data, json!({"total": 100}));
        assert_eq!(entry.data_version, Some(3));
        assert!(cache.get(Namespace::Records, "missing").is_none());
    }

    #[test]
    fn put_overwrites_without_merging() {
        let (cache, _, _) = setup(CacheConfig::default());
        cache.put(Namespace::Records, "q1", json!({"a": 1, "b": 2}), None);
        cache.put(Namespace::Records, "q1", json!({"a": 3}), None);

        let entry = cache.get(Namespace::Records, "q1").unwrap();
        assert_eq!(entry.data, json!({"a": 3}));
        assert_eq!(cache.len(Namespace::Records), 1);
    }

    #[test]
    fn get_touches_last_accessed() {
        let (cache, _, clock) = setup(CacheConfig::default());
        cache.put(Namespace::Records, "q1", json!(1), None);
        clock.advance(Duration::from_secs(5));

        let entry = cache.get(Namespace::Records, "q1").unwrap();
        assert_eq!(entry.last_accessed_at, Some(1_005_000));
        assert_eq!(entry.cached_at, 1_000_000);
    }

    #[test]
    fn eviction_removes_least_recently_accessed() {
        let config = CacheConfig::new().with_max_full_record_cache_size(3);
        let (cache, _, clock) = setup(config);

        for id in ["a", "b", "c"] {
            cache.put(Namespace::Records, id, json!(id), None);
            clock.advance(Duration::from_millis(10));
        }
        // "a" becomes the most recently used.
        cache.get(Namespace::Records, "a").unwrap();
        clock.advance(Duration::from_millis(10));

        cache.put(Namespace::Records, "d", json!("d"), None);

        assert_eq!(cache.len(Namespace::Records), 3);
        assert!(cache.get(Namespace::Records, "b").is_none());
        assert!(cache.get(Namespace::Records, "a").is_some());
        assert!(cache.get(Namespace::Records, "c").is_some());
        assert!(cache.get(Namespace::Records, "d").is_some());
    }

    #[test]
    fn overwrite_at_capacity_does_not_evict() {
        let config = CacheConfig::new().with_max_full_record_cache_size(2);
        let (cache, _, clock) = setup(config);
        cache.put(Namespace::Records, "a", json!(1), None);
        clock.advance(Duration::from_millis(1));
        cache.put(Namespace::Records, "b", json!(2), None);
        clock.advance(Duration::from_millis(1));
        cache.put(Namespace::Records, "a", json!(3), None);

        assert_eq!(cache.len(Namespace::Records), 2);
        assert!(cache.get(Namespace::Records, "b").is_some());
    }

    #[test]
    fn list_namespace_is_unbounded() {
        let config = CacheConfig::new().with_max_full_record_cache_size(2);
        let (cache, _, _) = setup(config);
        for i in 0..25 {
            cache.put(Namespace::List, &format!("q{i}"), json!({"i": i}), None);
        }
        assert_eq!(cache.len(Namespace::List), 25);
    }

    #[test]
    fn stale_entries_swept_at_startup() {
        let medium = Arc::new(InMemoryMedium::new());
        let clock = Arc::new(ManualClock::new(0));
        let storage = GuardedStorage::new(medium.clone()).with_clock(clock.clone());

        {
            let cache = LocalCacheStore::new(storage.clone(), CacheConfig::default());
            cache.put(Namespace::Records, "old", json!(1), None);
            cache.put(Namespace::List, "old", json!(1), None);
            clock.advance(6 * DAY);
            cache.put(Namespace::Records, "fresh", json!(2), None);
        }

        clock.advance(2 * DAY);
        let cache = LocalCacheStore::new(storage, CacheConfig::default());
        let ids: Vec<_> = cache
            .list(Namespace::Records)
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec!["fresh".to_string()]);
        // Unbounded namespaces are not aged.
        assert_eq!(cache.len(Namespace::List), 1);
    }

    #[test]
    fn stale_entry_is_never_served() {
        let (cache, _, clock) = setup(CacheConfig::default());
        cache.put(Namespace::Records, "q1", json!(1), None);
        clock.advance(8 * DAY);
        assert!(cache.get(Namespace::Records, "q1").is_none());
        assert_eq!(cache.len(Namespace::Records), 0);
    }

    #[test]
    fn stale_entries_do_not_count_against_capacity() {
        let config = CacheConfig::new().with_max_full_record_cache_size(2);
        let (cache, _, clock) = setup(config);
        cache.put(Namespace::Records, "old1", json!(1), None);
        cache.put(Namespace::Records, "old2", json!(2), None);
        clock.advance(8 * DAY);
        cache.put(Namespace::Records, "new1", json!(3), None);
        clock.advance(Duration::from_millis(1));
        cache.put(Namespace::Records, "new2", json!(4), None);

        let ids: Vec<_> = cache
            .list(Namespace::Records)
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec!["new1".to_string(), "new2".to_string()]);
    }

    #[test]
    fn corrupt_namespace_reads_as_empty() {
        let (cache, medium, _) = setup(CacheConfig::default());
        medium.raw_set("cache_records", "{{{ not json");
        assert!(cache.get(Namespace::Records, "q1").is_none());

        cache.put(Namespace::Records, "q1", json!(1), None);
        assert!(cache.get(Namespace::Records, "q1").is_some());
    }

    #[test]
    fn quota_pressure_sweeps_and_retries() {
        let medium = Arc::new(InMemoryMedium::with_quota(600));
        let clock = Arc::new(ManualClock::new(0));
        let storage = GuardedStorage::new(medium.clone()).with_clock(clock.clone());
        let cache = LocalCacheStore::new(storage, CacheConfig::default());

        cache.put(Namespace::Catalogs, "big", json!("x".repeat(300)), None);
        assert_eq!(cache.len(Namespace::Catalogs), 1);
        clock.advance(8 * DAY);

        // Does not fit next to the stale catalog; the sweep frees it.
        cache.put(Namespace::Records, "q1", json!("y".repeat(300)), None);
        assert_eq!(cache.len(Namespace::Catalogs), 0);
        assert!(cache.get(Namespace::Records, "q1").is_some());
    }

    #[test]
    fn quota_pressure_without_stale_data_drops_write_silently() {
        let medium = Arc::new(InMemoryMedium::with_quota(300));
        let storage = GuardedStorage::new(medium);
        let cache = LocalCacheStore::new(storage, CacheConfig::default());

        cache.put(Namespace::Records, "huge", json!("z".repeat(1_000)), None);
        assert!(cache.get(Namespace::Records, "huge").is_none());
    }

    #[test]
    fn unavailable_storage_is_always_miss() {
        let cache = LocalCacheStore::new(GuardedStorage::unavailable(), CacheConfig::default());
        cache.put(Namespace::Records, "q1", json!(1), None);
        assert!(cache.get(Namespace::Records, "q1").is_none());
        assert_eq!(cache.sweep_stale(), 0);
        assert!(cache.metadata().is_none());
        assert_eq!(cache.stats(), CacheStats::default());
    }

    #[test]
    fn disabled_medium_degrades_to_no_op() {
        let (cache, medium, _) = setup(CacheConfig::default());
        medium.set_available(false);
        cache.put(Namespace::Records, "q1", json!(1), None);
        cache.invalidate_namespace(Namespace::Records);
        cache.clear_all();
        assert!(cache.get(Namespace::Records, "q1").is_none());
    }

    #[test]
    fn invalidate_and_clear_except() {
        let (cache, _, _) = setup(CacheConfig::default());
        cache.put(Namespace::Records, "q1", json!(1), None);
        cache.put(Namespace::Catalogs, "c1", json!(1), None);
        cache.save_user_settings(json!({"theme": "dark"}));

        cache.invalidate_namespace(Namespace::Catalogs);
        assert_eq!(cache.len(Namespace::Catalogs), 0);
        assert_eq!(cache.len(Namespace::Records), 1);

        cache.clear_except(&[Namespace::Settings]);
        assert_eq!(cache.len(Namespace::Records), 0);
        assert_eq!(cache.user_settings(), json!({"theme": "dark"}));

        cache.clear_all();
        assert_eq!(cache.user_settings(), json!({}));
    }

    #[test]
    fn put_if_space_never_evicts() {
        let config = CacheConfig::new().with_max_catalog_cache_size(1);
        let (cache, _, _) = setup(config);
        assert!(cache.put_if_space(Namespace::Catalogs, "c1", json!(1), None));
        assert!(!cache.put_if_space(Namespace::Catalogs, "c2", json!(2), None));
        assert!(cache.put_if_space(Namespace::Catalogs, "c1", json!(3), None));
        assert!(cache.put_if_space(Namespace::List, "anything", json!(4), None));
        assert_eq!(cache.get(Namespace::Catalogs, "c1").unwrap().data, json!(3));
    }

    #[test]
    fn concurrent_put_if_space_never_overfills() {
        let config = CacheConfig::new().with_max_catalog_cache_size(4);
        let (cache, _, _) = setup(config);

        let stored = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..16)
                .map(|i| {
                    let cache = &cache;
                    scope.spawn(move || {
                        cache.put_if_space(Namespace::Catalogs, &format!("c{i}"), json!(i), None)
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().unwrap())
                .filter(|stored| *stored)
                .count()
        });

        assert_eq!(stored, 4);
        assert_eq!(cache.len(Namespace::Catalogs), 4);
    }

    #[test]
    fn put_if_space_reclaims_stale_slots() {
        let config = CacheConfig::new().with_max_catalog_cache_size(1);
        let (cache, _, clock) = setup(config);
        assert!(cache.put_if_space(Namespace::Catalogs, "old", json!(1), None));
        clock.advance(8 * DAY);

        assert!(cache.put_if_space(Namespace::Catalogs, "new", json!(2), None));
        let ids: Vec<_> = cache
            .list(Namespace::Catalogs)
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec!["new".to_string()]);
    }

    #[test]
    fn refresh_from_server_writes_record_and_summary() {
        let (cache, _, _) = setup(CacheConfig::default());
        let data = json!({
            "filename": "Acme_2025-01-01.json",
            "client_name": "Acme",
            "data_version": 4,
            "total": 150
        });
        cache.refresh_from_server("q1", &data);

        let record = cache.get(Namespace::Records, "q1").unwrap();
        assert_eq!(record.data, data);
        assert_eq!(record.data_version, Some(4));

        let summaries = cache.summaries();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].client_name.as_deref(), Some("Acme"));
        assert_eq!(summaries[0].data_version, Some(4));
    }

    #[test]
    fn metadata_and_stats() {
        let (cache, _, clock) = setup(CacheConfig::default());
        assert_eq!(cache.last_sync_timestamp(), 1_000_000);

        clock.advance(Duration::from_secs(60));
        cache.update_sync_metadata(Some("u1"), Some("org1"));
        assert_eq!(cache.last_sync_timestamp(), 1_060_000);

        cache.put(Namespace::Records, "q1", json!(1), None);
        clock.advance(Duration::from_secs(1));

        let stats = cache.stats();
        assert_eq!(stats.records, 1);
        assert_eq!(stats.last_sync_age_ms, Some(1_000));
        assert_eq!(stats.user_id.as_deref(), Some("u1"));
        assert_eq!(stats.organization_id.as_deref(), Some("org1"));

        // A partial update keeps the other owner id.
        cache.update_sync_metadata(None, Some("org2"));
        let metadata = cache.metadata().unwrap();
        assert_eq!(metadata.user_id.as_deref(), Some("u1"));
        assert_eq!(metadata.organization_id.as_deref(), Some("org2"));
    }
}
