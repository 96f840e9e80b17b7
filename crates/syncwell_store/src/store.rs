// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The two-tier store.

use std::collections::{BTreeSet, HashMap};
use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tick::Clock;

use crate::telemetry::{StoreActivity, record};
use crate::{CacheEntry, KvError, NoopKv, PersistentKv, system_clock, unix_millis};

/// Volatile-tier capacity used when none is configured.
pub const DEFAULT_CAPACITY: usize = 100;

/// Prefix prepended to every key written to the persistent tier.
pub const DEFAULT_PREFIX: &str = "api_cache_";

const DEFAULT_NAME: &str = "syncwell";

/// Share of persisted entries dropped when the persistent tier runs out of quota.
const PRUNE_DIVISOR: usize = 5;

/// A key/value cache with a bounded volatile tier and a best-effort persistent tier.
///
/// All operations are infallible: persistent-tier failures are logged and absorbed.
/// Every operation runs under one lock, so a tiered read that rehydrates the volatile tier
/// cannot interleave with a write to the same key.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use serde_json::json;
/// use syncwell_store::TieredStore;
///
/// let store = TieredStore::builder().build();
/// store.set("orders", json!({"open": 3}));
///
/// assert!(store.has("orders"));
/// assert_eq!(store.get("orders", None), Some(json!({"open": 3})));
///
/// store.clear(Some("orders"));
/// assert_eq!(store.get("orders", Some(Duration::from_secs(1))), None);
/// ```
pub struct TieredStore<V = Value> {
    name: &'static str,
    capacity: usize,
    prefix: String,
    clock: Clock,
    persistent: Arc<dyn PersistentKv>,
    volatile: Mutex<HashMap<String, CacheEntry<V>>>,
}

impl<V> Debug for TieredStore<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredStore")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("prefix", &self.prefix)
            .field("persistent", &self.persistent)
            .finish_non_exhaustive()
    }
}

impl TieredStore {
    /// Creates a builder for a store of JSON values.
    #[must_use]
    pub fn builder() -> StoreBuilder<Value> {
        StoreBuilder::new()
    }

    /// Returns the process-wide default store.
    ///
    /// It is created on first use with default settings and no persistent tier. Components
    /// that need a configured store should receive one explicitly instead.
    #[must_use]
    pub fn global() -> &'static Arc<Self> {
        static GLOBAL: LazyLock<Arc<TieredStore>> = LazyLock::new(|| Arc::new(TieredStore::builder().name("global").build()));
        &GLOBAL
    }
}

impl<V> TieredStore<V> {
    /// Returns the name used in log events.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the volatile-tier capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the clock used to stamp entries.
    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Returns the number of entries currently held by the volatile tier.
    #[must_use]
    pub fn volatile_len(&self) -> usize {
        self.volatile.lock().len()
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }

    fn remove_persistent(&self, key: &str) {
        if let Err(error) = self.persistent.remove(&self.storage_key(key)) {
            self.persist_failed(key, &error);
        }
    }

    fn persist_failed(&self, key: &str, error: &KvError) {
        tracing::warn!(
            store.name = self.name,
            store.key = key,
            store.activity = StoreActivity::PersistFailed.as_str(),
            error = %error,
            "persistent tier operation failed"
        );
    }

    /// Lists persisted keys that belong to this store, with the prefix stripped.
    fn persistent_keys(&self) -> Vec<String> {
        match self.persistent.keys() {
            Ok(keys) => keys
                .into_iter()
                .filter_map(|key| key.strip_prefix(self.prefix.as_str()).map(str::to_owned))
                .collect(),
            Err(error) => {
                self.persist_failed("*", &error);
                Vec::new()
            }
        }
    }

    /// Evicts least-accessed entries until the volatile tier fits its capacity.
    fn evict_if_needed(&self, volatile: &mut HashMap<String, CacheEntry<V>>) {
        while volatile.len() > self.capacity {
            let Some(victim) = volatile
                .iter()
                .min_by_key(|(_, entry)| (entry.access_count(), entry.timestamp()))
                .map(|(key, _)| key.clone())
            else {
                break;
            };
            volatile.remove(&victim);
            record(self.name, &victim, StoreActivity::Evicted);
        }
    }

    /// Drops the oldest fifth (at least one) of this store's persisted entries.
    fn prune_persistent(&self) {
        #[derive(serde::Deserialize)]
        struct Stamp {
            timestamp: u64,
        }

        let mut stamped: Vec<(u64, String)> = self
            .persistent_keys()
            .into_iter()
            .map(|key| {
                let timestamp = self
                    .persistent
                    .get(&self.storage_key(&key))
                    .ok()
                    .flatten()
                    .and_then(|raw| serde_json::from_str::<Stamp>(&raw).ok())
                    .map_or(0, |stamp| stamp.timestamp);
                (timestamp, key)
            })
            .collect();
        stamped.sort_unstable();

        let count = stamped.len().div_ceil(PRUNE_DIVISOR);
        for (_, key) in stamped.into_iter().take(count) {
            self.remove_persistent(&key);
            record(self.name, &key, StoreActivity::Pruned);
        }
    }

    /// Removes `key` from both tiers, or every key when `key` is `None`.
    pub fn clear(&self, key: Option<&str>) {
        let mut volatile = self.volatile.lock();
        match key {
            Some(key) => {
                volatile.remove(key);
                self.remove_persistent(key);
                record(self.name, key, StoreActivity::Invalidated);
            }
            None => {
                volatile.clear();
                for key in self.persistent_keys() {
                    self.remove_persistent(&key);
                }
                record(self.name, "*", StoreActivity::Cleared);
            }
        }
    }

    /// Returns `true` if either tier holds `key`, regardless of its age.
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        let volatile = self.volatile.lock();
        volatile.contains_key(key) || matches!(self.persistent.get(&self.storage_key(key)), Ok(Some(_)))
    }

    /// Returns every key held by either tier.
    #[must_use]
    pub fn keys(&self) -> BTreeSet<String> {
        let volatile = self.volatile.lock();
        let mut keys: BTreeSet<String> = volatile.keys().cloned().collect();
        keys.extend(self.persistent_keys());
        keys
    }

    /// Returns the number of distinct keys held by either tier.
    #[must_use]
    pub fn size(&self) -> usize {
        self.keys().len()
    }
}

impl<V> TieredStore<V>
where
    V: Clone + Serialize + DeserializeOwned,
{
    /// Reads `key`, treating entries older than `max_age` as absent.
    ///
    /// The volatile tier is consulted first. On a volatile miss the persistent tier is read
    /// and a valid hit is copied back into the volatile tier. Expired entries are removed
    /// from the tier they were found in and from the persistent tier.
    pub fn get(&self, key: &str, max_age: Option<Duration>) -> Option<V> {
        let now = unix_millis(&self.clock);
        let mut volatile = self.volatile.lock();

        let volatile_expired = volatile.get(key).map(|entry| entry.is_expired(now, max_age));
        match volatile_expired {
            Some(true) => {
                volatile.remove(key);
                self.remove_persistent(key);
                record(self.name, key, StoreActivity::Expired);
                return None;
            }
            Some(false) => {
                let entry = volatile.get_mut(key)?;
                entry.record_hit();
                record(self.name, key, StoreActivity::Hit);
                return Some(entry.data().clone());
            }
            None => {}
        }

        let Some(mut entry) = self.read_persistent(key) else {
            record(self.name, key, StoreActivity::Miss);
            return None;
        };

        if entry.is_expired(now, max_age) {
            self.remove_persistent(key);
            record(self.name, key, StoreActivity::Expired);
            return None;
        }

        entry.record_hit();
        let data = entry.data().clone();
        volatile.insert(key.to_owned(), entry);
        self.evict_if_needed(&mut volatile);
        record(self.name, key, StoreActivity::Rehydrated);
        Some(data)
    }

    /// Writes a fresh entry for `key` to both tiers.
    ///
    /// The persistent write is best effort. When it reports a full quota, the oldest persisted
    /// entries are pruned and the write is attempted once more.
    pub fn set(&self, key: &str, data: V) {
        let entry = CacheEntry::new(data, unix_millis(&self.clock));
        let encoded = serde_json::to_string(&entry);

        let mut volatile = self.volatile.lock();
        volatile.insert(key.to_owned(), entry);
        self.evict_if_needed(&mut volatile);
        record(self.name, key, StoreActivity::Inserted);

        match encoded {
            Ok(encoded) => self.write_persistent(key, &encoded),
            Err(error) => self.persist_failed(key, &error.into()),
        }
    }

    fn write_persistent(&self, key: &str, encoded: &str) {
        let storage_key = self.storage_key(key);
        match self.persistent.set(&storage_key, encoded) {
            Ok(()) => {}
            Err(KvError::QuotaExceeded) => {
                self.prune_persistent();
                if let Err(error) = self.persistent.set(&storage_key, encoded) {
                    self.persist_failed(key, &error);
                }
            }
            Err(error) => self.persist_failed(key, &error),
        }
    }

    fn read_persistent(&self, key: &str) -> Option<CacheEntry<V>> {
        let raw = match self.persistent.get(&self.storage_key(key)) {
            Ok(raw) => raw?,
            Err(error) => {
                self.persist_failed(key, &error);
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(entry) => Some(entry),
            Err(error) => {
                self.persist_failed(key, &error.into());
                self.remove_persistent(key);
                None
            }
        }
    }
}

/// Builder for [`TieredStore`].
///
/// # Examples
///
/// ```
/// use syncwell_store::{MemoryKv, StoreBuilder, TieredStore};
///
/// let store: TieredStore<String> = StoreBuilder::new()
///     .name("profiles")
///     .capacity(10)
///     .prefix("profiles_")
///     .persistent(MemoryKv::new())
///     .build();
/// assert_eq!(store.capacity(), 10);
/// ```
pub struct StoreBuilder<V> {
    name: &'static str,
    capacity: usize,
    prefix: String,
    clock: Option<Clock>,
    persistent: Arc<dyn PersistentKv>,
    _phantom: PhantomData<V>,
}

impl<V> Debug for StoreBuilder<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreBuilder")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl<V> Default for StoreBuilder<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> StoreBuilder<V> {
    /// Creates a builder with the default capacity and prefix and no persistent tier.
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: DEFAULT_NAME,
            capacity: DEFAULT_CAPACITY,
            prefix: DEFAULT_PREFIX.to_owned(),
            clock: None,
            persistent: Arc::new(NoopKv),
            _phantom: PhantomData,
        }
    }

    /// Sets the name reported in log events.
    #[must_use]
    pub fn name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Sets the maximum number of entries kept in the volatile tier.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be at least 1");
        self.capacity = capacity;
        self
    }

    /// Sets the prefix applied to persistent-tier keys.
    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Sets the clock used to stamp and age entries.
    #[must_use]
    pub fn clock(mut self, clock: Clock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sets the persistent tier.
    #[must_use]
    pub fn persistent(mut self, persistent: impl PersistentKv + 'static) -> Self {
        self.persistent = Arc::new(persistent);
        self
    }

    /// Sets an already shared persistent tier.
    #[must_use]
    pub fn shared_persistent(mut self, persistent: Arc<dyn PersistentKv>) -> Self {
        self.persistent = persistent;
        self
    }

    /// Builds the store.
    #[must_use]
    pub fn build(self) -> TieredStore<V> {
        TieredStore {
            name: self.name,
            capacity: self.capacity,
            prefix: self.prefix,
            clock: self.clock.unwrap_or_else(system_clock),
            persistent: self.persistent,
            volatile: Mutex::new(HashMap::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use tick::ClockControl;

    use super::*;
    use crate::MemoryKv;

    fn store_with(control: &ClockControl, kv: MemoryKv, capacity: usize) -> TieredStore {
        TieredStore::builder()
            .capacity(capacity)
            .clock(control.to_clock())
            .persistent(kv)
            .build()
    }

    #[test]
    fn set_writes_prefixed_entry_to_persistent_tier() {
        let control = ClockControl::new();
        let kv = MemoryKv::new();
        let store = store_with(&control, kv.clone(), 4);

        store.set("users", json!([1, 2, 3]));

        let raw = kv.get("api_cache_users").unwrap().expect("persisted");
        let entry: CacheEntry<Value> = serde_json::from_str(&raw).unwrap();
        assert_eq!(entry.data(), &json!([1, 2, 3]));
        assert_eq!(entry.timestamp(), unix_millis(&control.to_clock()));
        assert_eq!(entry.access_count(), 1);
    }

    #[test]
    fn eviction_prefers_lowest_access_count() {
        let control = ClockControl::new();
        let store = store_with(&control, MemoryKv::new(), 2);

        store.set("a", json!(1));
        store.set("b", json!(2));
        // "a" is read twice, "b" never: "b" is the least accessed.
        store.get("a", None);
        store.get("a", None);
        control.advance(Duration::from_millis(1));
        store.set("c", json!(3));

        assert_eq!(store.volatile_len(), 2);
        let volatile: BTreeSet<String> = store.volatile.lock().keys().cloned().collect();
        assert_eq!(volatile, BTreeSet::from(["a".to_string(), "c".to_string()]));
    }

    #[test]
    fn eviction_ties_go_to_the_oldest_entry() {
        let control = ClockControl::new();
        let store = store_with(&control, MemoryKv::new(), 2);

        store.set("old", json!(1));
        control.advance(Duration::from_millis(10));
        store.set("middle", json!(2));
        control.advance(Duration::from_millis(10));
        store.set("new", json!(3));

        assert!(!store.volatile.lock().contains_key("old"));
        assert!(store.volatile.lock().contains_key("new"));
    }

    #[test]
    fn evicted_entries_are_rehydrated_from_persistent_tier() {
        let control = ClockControl::new();
        let store = store_with(&control, MemoryKv::new(), 1);

        store.set("first", json!("one"));
        control.advance(Duration::from_millis(1));
        store.set("second", json!("two"));
        assert_eq!(store.volatile_len(), 1);

        assert_eq!(store.get("first", None), Some(json!("one")));
        assert!(store.volatile.lock().contains_key("first"));
        assert_eq!(store.volatile_len(), 1);
    }

    #[test]
    fn corrupt_persistent_value_is_dropped() {
        let control = ClockControl::new();
        let kv = MemoryKv::new();
        kv.set("api_cache_broken", "{not json").unwrap();
        let store = store_with(&control, kv.clone(), 4);

        assert_eq!(store.get("broken", None), None);
        assert_eq!(kv.get("api_cache_broken").unwrap(), None);
    }

    #[test]
    fn quota_exhaustion_prunes_oldest_persisted_entries() {
        let control = ClockControl::new();
        let probe = serde_json::to_string(&CacheEntry::new(json!("x"), unix_millis(&control.to_clock()))).unwrap();
        // Room for five entries of this shape, not six.
        let per_entry = "api_cache_k0".len() + probe.len();
        let kv = MemoryKv::with_quota(per_entry * 5);
        let store = store_with(&control, kv.clone(), 100);

        for index in 0..5 {
            store.set(&format!("k{index}"), json!("x"));
            control.advance(Duration::from_millis(1));
        }
        store.set("k5", json!("x"));

        assert_eq!(kv.get("api_cache_k0").unwrap(), None);
        assert!(kv.get("api_cache_k5").unwrap().is_some());
        assert_eq!(kv.len(), 5);
    }

    #[test]
    fn clear_all_leaves_foreign_persistent_keys_alone() {
        let control = ClockControl::new();
        let kv = MemoryKv::new();
        kv.set("theme", "dark").unwrap();
        let store = store_with(&control, kv.clone(), 4);

        store.set("a", json!(1));
        store.set("b", json!(2));
        store.clear(None);

        assert_eq!(store.size(), 0);
        assert_eq!(kv.keys().unwrap(), vec!["theme".to_string()]);
    }

    #[test]
    fn keys_span_both_tiers() {
        let control = ClockControl::new();
        let kv = MemoryKv::new();
        kv.set("api_cache_persisted", &serde_json::to_string(&CacheEntry::new(json!(0), 0)).unwrap())
            .unwrap();
        let store = store_with(&control, kv, 4);
        store.set("volatile", json!(1));

        assert_eq!(
            store.keys(),
            BTreeSet::from(["persisted".to_string(), "volatile".to_string()])
        );
        assert_eq!(store.size(), 2);
        assert!(store.has("persisted"));
    }

    #[test]
    fn global_store_is_shared() {
        let first = TieredStore::global();
        let second = TieredStore::global();
        assert!(Arc::ptr_eq(first, second));
        assert_eq!(first.name(), "global");
    }
}
