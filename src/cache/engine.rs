//! Cache Engine Module
//!
//! The `Cache` facade. Every public operation follows the same shape: plugin
//! "before" hooks, backend I/O, one short critical section on the entry
//! store, plugin "after" hooks, then event delivery. Only the critical section
//! holds the lock, so plugins and event handlers may call back into the cache.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::cache::clock::Clock;
use crate::cache::dump::{CacheDump, PersistedEntry};
use crate::cache::events::{CacheEvent, EventBus, EventHandler, EventKind, SubscriptionId};
use crate::cache::eviction::EvictionStrategy;
use crate::cache::namespace::Namespace;
use crate::cache::size::estimate_size;
use crate::cache::{CacheEntry, CacheStats, EntryStore, SetOptions};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::plugins::{PendingWrite, PluginPipeline};
use crate::serializer::Serializer;
use crate::storage::{StorageAdapter, StorageBackend};
use crate::tasks::ExpirationSweeper;

// == Set Many Report ==
/// Outcome of [`Cache::set_many`]. Elements fail independently.
#[derive(Debug, Default)]
pub struct SetManyReport {
    /// Keys written, in input order
    pub stored: Vec<String>,
    /// Keys skipped and why
    pub failed: Vec<(String, CacheError)>,
}

impl SetManyReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

// == Shared State ==
pub(crate) struct CacheInner {
    store: Mutex<EntryStore>,
    strategy: Arc<dyn EvictionStrategy>,
    default_ttl: Option<u64>,
    default_stale_ttl: Option<u64>,
    storage: StorageBackend,
    plugins: PluginPipeline,
    serializer: Arc<dyn Serializer>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    sweeper: Option<ExpirationSweeper>,
    created_at: u64,
    destroyed: AtomicBool,
}

// == Cache ==
/// Handle to one cache instance. Clones share the same instance.
#[derive(Clone)]
pub struct Cache {
    inner: Arc<CacheInner>,
}

/// Non-owning handle, used by the sweeper and by plugins that need to reach
/// the cache they are attached to.
#[derive(Clone)]
pub struct WeakCache {
    inner: Weak<CacheInner>,
}

impl WeakCache {
    pub fn upgrade(&self) -> Option<Cache> {
        self.inner.upgrade().map(|inner| Cache { inner })
    }
}

impl fmt::Debug for WeakCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakCache")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl Cache {
    // == Constructor ==
    /// Validates `config` and builds the cache.
    ///
    /// Plugin `on_init` hooks run before this returns. When a sweep interval
    /// is configured and a tokio runtime is available the sweeper is started;
    /// outside a runtime it stays idle until [`Cache::start_sweeper`].
    pub fn new(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        let CacheConfig {
            strategy,
            max_size,
            max_memory,
            ttl,
            stale_ttl,
            check_interval,
            storage,
            plugins,
            serializer,
            clock,
        } = config;

        let created_at = clock.now_ms();
        let cache = Cache {
            inner: Arc::new(CacheInner {
                store: Mutex::new(EntryStore::new(max_size, max_memory)),
                strategy,
                default_ttl: ttl,
                default_stale_ttl: stale_ttl,
                storage,
                plugins: PluginPipeline::new(plugins),
                serializer,
                clock,
                events: EventBus::new(),
                sweeper: check_interval.map(|ms| ExpirationSweeper::new(Duration::from_millis(ms))),
                created_at,
                destroyed: AtomicBool::new(false),
            }),
        };
        info!(
            strategy = cache.strategy_name(),
            max_size,
            storage = cache.inner.storage.label(),
            plugins = cache.inner.plugins.len(),
            "Cache initialized"
        );

        cache.inner.plugins.init(&cache);
        if cache.inner.sweeper.is_some() {
            if Handle::try_current().is_ok() {
                cache.start_sweeper()?;
            } else {
                debug!("No tokio runtime available, expiration sweeper left idle");
            }
        }
        Ok(cache)
    }

    pub fn downgrade(&self) -> WeakCache {
        WeakCache {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn strategy_name(&self) -> &str {
        self.inner.strategy.name()
    }

    /// Current time according to this cache's clock.
    pub fn now_ms(&self) -> u64 {
        self.inner.clock.now_ms()
    }

    // == Critical Section ==
    /// Runs `op` under the store lock. Events are returned, not delivered.
    fn locked<R>(
        &self,
        op: impl FnOnce(&mut EntryStore, u64, &dyn EvictionStrategy, &mut Vec<CacheEvent>) -> R,
    ) -> (R, Vec<CacheEvent>) {
        let now = self.now_ms();
        let mut events = Vec::new();
        let mut store = self.inner.store.lock();
        let result = op(&mut *store, now, self.inner.strategy.as_ref(), &mut events);
        drop(store);
        (result, events)
    }

    /// Runs `op` under the store lock, then delivers its events.
    fn with_store<R>(
        &self,
        op: impl FnOnce(&mut EntryStore, u64, &dyn EvictionStrategy, &mut Vec<CacheEvent>) -> R,
    ) -> R {
        let (result, events) = self.locked(op);
        self.deliver(&events);
        result
    }

    /// Delivers events produced under the lock. Entries that left memory by
    /// eviction or expiry are dropped from the storage backend first, so a
    /// later read cannot bring them back.
    fn deliver(&self, events: &[CacheEvent]) {
        self.forget_persisted(events);
        self.inner.events.emit_all(events);
    }

    fn forget_persisted(&self, events: &[CacheEvent]) {
        let keys: Vec<&str> = events
            .iter()
            .filter_map(|event| match event {
                CacheEvent::Evict { key, .. } | CacheEvent::Expire { key } => Some(key.as_str()),
                _ => None,
            })
            .collect();
        if keys.is_empty() {
            return;
        }
        match &self.inner.storage {
            StorageBackend::Memory => {}
            StorageBackend::Sync(adapter) => {
                for key in keys {
                    if let Err(e) = adapter.delete(key) {
                        warn!(key, error = %e, "Failed to drop removed entry from storage");
                    }
                }
            }
            StorageBackend::Async(adapter) => {
                let Ok(handle) = Handle::try_current() else {
                    warn!(count = keys.len(), "No runtime to drop removed entries from storage");
                    return;
                };
                let adapter = Arc::clone(adapter);
                let keys: Vec<String> = keys.into_iter().map(str::to_string).collect();
                handle.spawn(async move {
                    for key in keys {
                        if let Err(e) = adapter.delete(&key).await {
                            warn!(key = %key, error = %e, "Failed to drop removed entry from storage");
                        }
                    }
                });
            }
        }
    }

    // == Get ==
    /// Returns the value for `key`, or None if it is absent or expired.
    ///
    /// On an in-memory miss the sync storage backend and then the plugins'
    /// `on_miss` hooks are consulted; a value found there is promoted into
    /// the store before being returned.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.plugins.before_get(key);
        if let Some(value) = self.read_memory(key) {
            return Some(self.inner.plugins.after_get(key, value));
        }
        let recovered = self
            .read_persisted(key)
            .or_else(|| self.recover_from_plugins(key));
        self.finish_lookup(key, recovered)
    }

    fn read_memory(&self, key: &str) -> Option<Value> {
        self.with_store(|store, now, strategy, events| {
            store.get(key, now, strategy, events)
        })
    }

    /// An entry supplied by an `on_miss` hook keeps its own deadlines, tags
    /// and metadata.
    fn recover_from_plugins(&self, key: &str) -> Option<CacheEntry> {
        let mut entry = self.inner.plugins.on_miss(key)?;
        entry.key = key.to_string();
        Some(entry)
    }

    /// Promotes a recovered entry and reads it back, or records the miss.
    fn finish_lookup(&self, key: &str, recovered: Option<CacheEntry>) -> Option<Value> {
        let value = self.with_store(move |store, now, strategy, events| {
            if let Some(entry) = recovered {
                debug!(key = %entry.key, "Promoting entry into memory");
                store.insert_existing(entry, now, strategy, events);
                if let Some(value) = store.get(key, now, strategy, events) {
                    return Some(value);
                }
            }
            store.record_miss(key, events);
            None
        })?;
        Some(self.inner.plugins.after_get(key, value))
    }

    // == Set ==
    /// Stores `value` under `key`.
    ///
    /// A plugin veto fails with `CacheError::Storage` and leaves the cache
    /// untouched. With a sync storage backend the entry is persisted first;
    /// a backend failure is returned and memory is not modified.
    pub fn set(&self, key: &str, value: impl Into<Value>, options: SetOptions) -> Result<()> {
        let write = self.prepare_write(key, value.into(), options)?;
        if let Some(adapter) = self.sync_backend() {
            let raw = self.encode_record(&self.preview_entry(key, &write))?;
            adapter.set(key, &raw)?;
        }
        self.commit(key, write);
        Ok(())
    }

    fn prepare_write(&self, key: &str, value: Value, options: SetOptions) -> Result<PendingWrite> {
        if options.ttl == Some(0) {
            return Err(CacheError::Configuration(format!(
                "ttl for '{}' must be greater than zero",
                key
            )));
        }
        let write = self
            .inner
            .plugins
            .before_set(key, PendingWrite { value, options })
            .map_err(|veto| {
                CacheError::Storage(format!("Write of '{}' vetoed by {}", key, veto))
            })?;
        Ok(PendingWrite {
            value: write.value,
            options: self.effective_options(write.options),
        })
    }

    fn effective_options(&self, mut options: SetOptions) -> SetOptions {
        if options.ttl.is_none() {
            options.ttl = self.inner.default_ttl;
        }
        if options.stale_ttl.is_none() {
            options.stale_ttl = self.inner.default_stale_ttl;
        }
        options
    }

    /// The entry a write would create, for persistence ahead of the commit.
    fn preview_entry(&self, key: &str, write: &PendingWrite) -> CacheEntry {
        let size = estimate_size(&write.value);
        CacheEntry::new(
            key.to_string(),
            write.value.clone(),
            size,
            write.options.clone(),
            self.now_ms(),
            0,
        )
    }

    fn commit(&self, key: &str, write: PendingWrite) -> CacheEntry {
        let PendingWrite { value, options } = write;
        let owned_key = key.to_string();
        let (entry, events) = self.locked(move |store, now, strategy, events| {
            store.set(owned_key, value, options, now, strategy, events)
        });
        debug!(key, size = entry.size, "Stored entry");
        self.inner.plugins.after_set(key, &entry);
        self.deliver(&events);
        entry
    }

    // == Has ==
    /// Existence check with lazy expiration; access statistics are untouched.
    pub fn has(&self, key: &str) -> bool {
        self.has_in_memory(key) || self.read_persisted(key).is_some()
    }

    fn has_in_memory(&self, key: &str) -> bool {
        self.with_store(|store, now, _, events| {
            store.contains(key, now, events)
        })
    }

    // == Delete ==
    /// Removes `key`. Returns whether an entry was removed from memory or
    /// from the storage backend.
    ///
    /// A plugin veto fails with `CacheError::Storage`.
    pub fn delete(&self, key: &str) -> Result<bool> {
        self.check_delete(key)?;
        let mut persisted = false;
        if let Some(adapter) = self.sync_backend() {
            persisted = adapter.has(key)?;
            adapter.delete(key)?;
        }
        Ok(self.remove(key) || persisted)
    }

    fn check_delete(&self, key: &str) -> Result<()> {
        match self.inner.plugins.before_delete(key) {
            Some(plugin) => Err(CacheError::Storage(format!(
                "Delete of '{}' vetoed by {}",
                key, plugin
            ))),
            None => Ok(()),
        }
    }

    fn remove(&self, key: &str) -> bool {
        let (removed, events) =
            self.locked(|store, _, _, events| store.delete(key, events));
        if let Some(entry) = &removed {
            self.inner.plugins.after_delete(key, &entry.value);
        }
        self.deliver(&events);
        removed.is_some()
    }

    // == Clear ==
    /// Removes every entry (and every persisted record).
    pub fn clear(&self) -> Result<()> {
        if let Some(adapter) = self.sync_backend() {
            adapter.clear()?;
        }
        let count = self.with_store(|store, _, _, events| store.clear(events));
        debug!(count, "Cleared cache");
        Ok(())
    }

    // == Prune ==
    /// Removes every expired entry. Returns how many were removed.
    pub fn prune(&self) -> usize {
        self.with_store(|store, now, _, events| store.prune(now, events).len())
    }

    // == Touch / Expire ==
    /// Re-grants the entry's original ttl from now. False if absent or expired.
    pub fn touch(&self, key: &str) -> bool {
        self.with_store(|store, now, _, events| {
            store.touch(key, now, events)
        })
    }

    /// Expires `key` immediately. False if it was absent or already expired.
    pub fn expire(&self, key: &str) -> bool {
        self.with_store(|store, now, _, events| {
            store.expire(key, now, events)
        })
    }

    // == Introspection ==
    /// Remaining lifetime in milliseconds. None if absent, expired or immortal.
    pub fn ttl(&self, key: &str) -> Option<u64> {
        let now = self.now_ms();
        self.inner
            .store
            .lock()
            .peek(key, now)
            .and_then(|entry| entry.ttl_remaining(now))
    }

    /// Snapshot of a live entry, without touching access statistics.
    pub fn entry(&self, key: &str) -> Option<CacheEntry> {
        let now = self.now_ms();
        self.inner.store.lock().peek(key, now).cloned()
    }

    /// True when `key` is live but past its staleness deadline.
    pub fn is_stale(&self, key: &str) -> bool {
        let now = self.now_ms();
        self.inner
            .store
            .lock()
            .peek(key, now)
            .is_some_and(|entry| entry.is_stale(now))
    }

    /// Live keys in insertion order.
    pub fn keys(&self) -> Vec<String> {
        let now = self.now_ms();
        self.inner.store.lock().keys(now)
    }

    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let now = self.now_ms();
        self.inner.store.lock().keys_with_prefix(prefix, now)
    }

    /// Stored entries, including expired ones not yet removed.
    pub fn len(&self) -> usize {
        self.inner.store.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.store.lock().is_empty()
    }

    /// Sum of entry sizes in bytes.
    pub fn memory_usage(&self) -> usize {
        self.inner.store.lock().memory_usage()
    }

    // == Batch Operations ==
    /// Values in the order of `keys`.
    pub fn get_many<I, K>(&self, keys: I) -> Vec<Option<Value>>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        keys.into_iter().map(|key| self.get(key.as_ref())).collect()
    }

    /// Writes every item with the same options. A failing element is
    /// reported and skipped; the rest are still written.
    pub fn set_many<I, K>(&self, items: I, options: SetOptions) -> SetManyReport
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut report = SetManyReport::default();
        for (key, value) in items {
            let key = key.into();
            match self.set(&key, value, options.clone()) {
                Ok(()) => report.stored.push(key),
                Err(e) => {
                    debug!(key = %key, error = %e, "Skipped element of set_many");
                    report.failed.push((key, e));
                }
            }
        }
        report
    }

    /// Returns how many entries were removed. Stops at the first failure.
    pub fn delete_many<I, K>(&self, keys: I) -> Result<usize>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let mut removed = 0;
        for key in keys {
            if self.delete(key.as_ref())? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn has_many<I, K>(&self, keys: I) -> Vec<bool>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        keys.into_iter().map(|key| self.has(key.as_ref())).collect()
    }

    // == Get Or Set ==
    /// Returns the cached value, or computes, stores and returns a new one.
    ///
    /// There is no single-flight: two callers that both miss will both run
    /// their factory, and the last write wins.
    pub fn get_or_set<F, V>(&self, key: &str, factory: F, options: SetOptions) -> Result<Value>
    where
        F: FnOnce() -> V,
        V: Into<Value>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }
        let value = factory().into();
        self.set(key, value.clone(), options)?;
        Ok(value)
    }

    /// Like [`Cache::get_or_set`] with a fallible factory. A factory error is
    /// returned as `CacheError::Factory` and nothing is stored.
    pub fn try_get_or_set<F, E>(&self, key: &str, factory: F, options: SetOptions) -> Result<Value>
    where
        F: FnOnce() -> std::result::Result<Value, E>,
        E: fmt::Display,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }
        let value = factory().map_err(|e| CacheError::Factory(e.to_string()))?;
        self.set(key, value.clone(), options)?;
        Ok(value)
    }

    pub async fn get_or_set_async<F, Fut, E>(
        &self,
        key: &str,
        factory: F,
        options: SetOptions,
    ) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Value, E>>,
        E: fmt::Display,
    {
        if let Some(value) = self.get_async(key).await {
            return Ok(value);
        }
        let value = factory()
            .await
            .map_err(|e| CacheError::Factory(e.to_string()))?;
        self.set_async(key, value.clone(), options).await?;
        Ok(value)
    }

    /// Stale-while-revalidate read.
    ///
    /// A fresh value is returned as is. A stale (but unexpired) value is
    /// returned immediately while `fetch` runs on a background task and
    /// replaces it. Absent or expired keys are fetched inline.
    pub async fn get_or_revalidate_async<F, Fut, E>(
        &self,
        key: &str,
        fetch: F,
        options: SetOptions,
    ) -> Result<Value>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<Value, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        if !self.is_stale(key) {
            return self.get_or_set_async(key, fetch, options).await;
        }
        let Some(served) = self.get(key) else {
            return self.get_or_set_async(key, fetch, options).await;
        };

        let cache = self.clone();
        let owned_key = key.to_string();
        tokio::spawn(async move {
            match fetch().await {
                Ok(value) => {
                    if let Err(e) = cache.set_async(&owned_key, value, options).await {
                        warn!(key = %owned_key, error = %e, "Failed to store revalidated value");
                    } else {
                        debug!(key = %owned_key, "Revalidated stale entry");
                    }
                }
                Err(e) => warn!(key = %owned_key, error = %e, "Revalidation fetch failed"),
            }
        });
        Ok(served)
    }

    // == Memoize ==
    /// Wraps `f` so results are cached under `"<prefix>:<json of argument>"`.
    pub fn memoize<A, R, F>(
        &self,
        prefix: &str,
        options: SetOptions,
        f: F,
    ) -> impl Fn(&A) -> Result<R>
    where
        A: Serialize,
        R: Serialize + DeserializeOwned,
        F: Fn(&A) -> R,
    {
        let cache = self.clone();
        let prefix = prefix.to_string();
        move |arg: &A| -> Result<R> {
            let key = crate::cache::namespace::prefixed_key(&prefix, &serde_json::to_string(arg)?);
            if let Some(hit) = cache.get_typed::<R>(&key)? {
                return Ok(hit);
            }
            let result = f(arg);
            cache.set_typed(&key, &result, options.clone())?;
            Ok(result)
        }
    }

    // == Typed Access ==
    /// Reads and deserializes a value. A value of the wrong shape is an error.
    pub fn get_typed<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.get(key)
            .map(serde_json::from_value)
            .transpose()
            .map_err(CacheError::from)
    }

    pub fn set_typed<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        options: SetOptions,
    ) -> Result<()> {
        self.set(key, serde_json::to_value(value)?, options)
    }

    // == Tags ==
    /// Live `(key, value)` pairs carrying `tag`, in insertion order.
    pub fn get_by_tag(&self, tag: &str) -> Vec<(String, Value)> {
        self.get_keys_by_tag(tag)
            .into_iter()
            .filter_map(|key| self.get(&key).map(|value| (key, value)))
            .collect()
    }

    pub fn get_keys_by_tag(&self, tag: &str) -> Vec<String> {
        let now = self.now_ms();
        self.inner.store.lock().keys_by_tag(tag, now)
    }

    /// Deletes every key carrying `tag`, one `delete` per key.
    pub fn delete_by_tag(&self, tag: &str) -> Result<usize> {
        let keys = self.get_keys_by_tag(tag);
        let removed = self.delete_many(&keys)?;
        debug!(tag, removed, "Deleted entries by tag");
        Ok(removed)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        let now = self.now_ms();
        self.inner.store.lock().has_tag(tag, now)
    }

    /// Sorted tags of a live entry.
    pub fn tags(&self, key: &str) -> Option<Vec<String>> {
        let now = self.now_ms();
        self.inner.store.lock().tags_of(key, now)
    }

    // == Namespaces ==
    pub fn namespace(&self, name: &str) -> Namespace<'_> {
        Namespace::new(self, name.to_string())
    }

    // == Statistics ==
    pub fn stats(&self) -> CacheStats {
        let uptime = self.now_ms().saturating_sub(self.inner.created_at);
        self.inner.store.lock().stats(uptime)
    }

    pub fn reset_stats(&self) {
        self.inner.store.lock().reset_stats();
    }

    // == Events ==
    /// Registers a handler for every event.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(Arc::new(handler) as EventHandler)
    }

    /// Registers a handler for one kind of event.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(kind, Arc::new(handler) as EventHandler)
    }

    pub fn off(&self, id: SubscriptionId) -> bool {
        self.inner.events.off(id)
    }

    // == Dump / Restore ==
    /// Snapshot of every live entry. Entries whose value fails to serialize
    /// are left out.
    pub fn dump(&self) -> CacheDump {
        let now = self.now_ms();
        let entries: Vec<CacheEntry> = self
            .inner
            .store
            .lock()
            .live_entries(now)
            .into_iter()
            .cloned()
            .collect();

        let records = entries
            .iter()
            .filter_map(|entry| match self.encode_value(&entry.value) {
                Ok(encoded) => Some(PersistedEntry::from_entry(entry, encoded)),
                Err(e) => {
                    warn!(key = %entry.key, error = %e, "Skipping entry that failed to serialize");
                    None
                }
            })
            .collect();
        CacheDump::new(self.strategy_name(), records)
    }

    pub fn dump_json(&self) -> Result<String> {
        self.dump().to_json()
    }

    /// Loads entries from a dump, keeping their timestamps and rebuilding the
    /// tag index. Entries already expired, or whose value fails to
    /// deserialize, are skipped. Returns how many entries were restored.
    pub fn restore(&self, dump: &CacheDump) -> Result<usize> {
        dump.check_version()?;
        if dump.strategy != self.strategy_name() {
            debug!(
                from = %dump.strategy,
                to = self.strategy_name(),
                "Restoring dump taken under a different strategy"
            );
        }

        let now = self.now_ms();
        let mut entries = Vec::with_capacity(dump.len());
        for record in &dump.entries {
            if record.is_expired(now) {
                debug!(key = %record.key, "Skipping expired entry from dump");
                continue;
            }
            match self.decode_value(&record.value) {
                Ok(value) => entries.push(record.clone().into_entry(value)),
                Err(e) => warn!(key = %record.key, error = %e, "Skipping entry that failed to deserialize"),
            }
        }
        let restored = self.hydrate(entries);
        info!(restored, skipped = dump.len() - restored, "Restored cache dump");
        Ok(restored)
    }

    pub fn restore_json(&self, raw: &str) -> Result<usize> {
        self.restore(&CacheDump::from_json(raw)?)
    }

    fn hydrate(&self, entries: Vec<CacheEntry>) -> usize {
        let count = entries.len();
        self.with_store(move |store, now, strategy, events| {
            for entry in entries {
                store.insert_existing(entry, now, strategy, events);
            }
        });
        count
    }

    // == Persistence ==
    fn sync_backend(&self) -> Option<&Arc<dyn StorageAdapter>> {
        match &self.inner.storage {
            StorageBackend::Sync(adapter) => Some(adapter),
            _ => None,
        }
    }

    fn encode_value(&self, value: &Value) -> Result<String> {
        let prepared = self.inner.plugins.before_serialize(value.clone());
        self.inner.serializer.serialize(&prepared)
    }

    fn decode_value(&self, raw: &str) -> Result<Value> {
        let value = self.inner.serializer.deserialize(raw)?;
        Ok(self.inner.plugins.after_deserialize(value))
    }

    fn encode_record(&self, entry: &CacheEntry) -> Result<String> {
        let record = PersistedEntry::from_entry(entry, self.encode_value(&entry.value)?);
        Ok(serde_json::to_string(&record)?)
    }

    /// None for expired records.
    fn decode_record(&self, raw: &str, now: u64) -> Result<Option<CacheEntry>> {
        let record: PersistedEntry = serde_json::from_str(raw)?;
        if record.is_expired(now) {
            return Ok(None);
        }
        let value = self.decode_value(&record.value)?;
        Ok(Some(record.into_entry(value)))
    }

    /// Fail-soft decode for read paths.
    fn decode_or_warn(&self, key: &str, raw: Option<String>) -> Option<CacheEntry> {
        match self.decode_record(&raw?, self.now_ms()) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key, error = %e, "Ignoring unreadable persisted entry");
                None
            }
        }
    }

    /// Live persisted entry from the sync backend, if any.
    fn read_persisted(&self, key: &str) -> Option<CacheEntry> {
        let adapter = self.sync_backend()?;
        match adapter.get(key) {
            Ok(raw) => self.decode_or_warn(key, raw),
            Err(e) => {
                warn!(key, error = %e, "Storage read failed, treating as a miss");
                None
            }
        }
    }

    /// Populates memory from the sync backend. Returns how many live entries
    /// were loaded.
    pub fn load(&self) -> Result<usize> {
        let adapter = match &self.inner.storage {
            StorageBackend::Memory => return Ok(0),
            StorageBackend::Sync(adapter) => adapter,
            StorageBackend::Async(_) => {
                return Err(CacheError::Configuration(
                    "Asynchronous storage must be loaded with load_async".to_string(),
                ))
            }
        };
        let mut entries = Vec::new();
        for key in adapter.keys()? {
            let raw = match adapter.get(&key) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping unreadable persisted entry");
                    continue;
                }
            };
            entries.extend(self.decode_or_warn(&key, raw));
        }
        let loaded = self.hydrate(entries);
        info!(loaded, "Loaded entries from storage");
        Ok(loaded)
    }

    // == Async Storage Dispatch ==
    async fn backend_get(&self, key: &str) -> Result<Option<String>> {
        match &self.inner.storage {
            StorageBackend::Memory => Ok(None),
            StorageBackend::Sync(adapter) => adapter.get(key),
            StorageBackend::Async(adapter) => adapter.get(key).await,
        }
    }

    async fn backend_set(&self, key: &str, raw: &str) -> Result<()> {
        match &self.inner.storage {
            StorageBackend::Memory => Ok(()),
            StorageBackend::Sync(adapter) => adapter.set(key, raw),
            StorageBackend::Async(adapter) => adapter.set(key, raw).await,
        }
    }

    async fn backend_delete(&self, key: &str) -> Result<()> {
        match &self.inner.storage {
            StorageBackend::Memory => Ok(()),
            StorageBackend::Sync(adapter) => adapter.delete(key),
            StorageBackend::Async(adapter) => adapter.delete(key).await,
        }
    }

    async fn backend_has(&self, key: &str) -> Result<bool> {
        match &self.inner.storage {
            StorageBackend::Memory => Ok(false),
            StorageBackend::Sync(adapter) => adapter.has(key),
            StorageBackend::Async(adapter) => adapter.has(key).await,
        }
    }

    async fn backend_clear(&self) -> Result<()> {
        match &self.inner.storage {
            StorageBackend::Memory => Ok(()),
            StorageBackend::Sync(adapter) => adapter.clear(),
            StorageBackend::Async(adapter) => adapter.clear().await,
        }
    }

    async fn backend_keys(&self) -> Result<Vec<String>> {
        match &self.inner.storage {
            StorageBackend::Memory => Ok(Vec::new()),
            StorageBackend::Sync(adapter) => adapter.keys(),
            StorageBackend::Async(adapter) => adapter.keys().await,
        }
    }

    async fn read_persisted_async(&self, key: &str) -> Option<CacheEntry> {
        match self.backend_get(key).await {
            Ok(raw) => self.decode_or_warn(key, raw),
            Err(e) => {
                warn!(key, error = %e, "Storage read failed, treating as a miss");
                None
            }
        }
    }

    // == Async Operations ==
    /// [`Cache::get`] with read-through from either kind of backend.
    pub async fn get_async(&self, key: &str) -> Option<Value> {
        self.inner.plugins.before_get(key);
        if let Some(value) = self.read_memory(key) {
            return Some(self.inner.plugins.after_get(key, value));
        }
        let recovered = match self.read_persisted_async(key).await {
            Some(entry) => Some(entry),
            None => self.recover_from_plugins(key),
        };
        self.finish_lookup(key, recovered)
    }

    /// [`Cache::set`] with write-through to either kind of backend.
    pub async fn set_async(
        &self,
        key: &str,
        value: impl Into<Value>,
        options: SetOptions,
    ) -> Result<()> {
        let write = self.prepare_write(key, value.into(), options)?;
        if self.inner.storage.is_persistent() {
            let raw = self.encode_record(&self.preview_entry(key, &write))?;
            self.backend_set(key, &raw).await?;
        }
        self.commit(key, write);
        Ok(())
    }

    pub async fn delete_async(&self, key: &str) -> Result<bool> {
        self.check_delete(key)?;
        let persisted = self.backend_has(key).await?;
        self.backend_delete(key).await?;
        Ok(self.remove(key) || persisted)
    }

    pub async fn has_async(&self, key: &str) -> bool {
        self.has_in_memory(key) || self.read_persisted_async(key).await.is_some()
    }

    pub async fn clear_async(&self) -> Result<()> {
        self.backend_clear().await?;
        self.with_store(|store, _, _, events| store.clear(events));
        Ok(())
    }

    /// Populates memory from either kind of backend.
    pub async fn load_async(&self) -> Result<usize> {
        let mut entries = Vec::new();
        for key in self.backend_keys().await? {
            match self.backend_get(&key).await {
                Ok(raw) => entries.extend(self.decode_or_warn(&key, raw)),
                Err(e) => warn!(key = %key, error = %e, "Skipping unreadable persisted entry"),
            }
        }
        let loaded = self.hydrate(entries);
        info!(loaded, "Loaded entries from storage");
        Ok(loaded)
    }

    // == Sweeper ==
    /// Starts the expiration sweeper. Returns false if it was already
    /// running. Fails without a configured interval or a tokio runtime.
    pub fn start_sweeper(&self) -> Result<bool> {
        let sweeper = self.inner.sweeper.as_ref().ok_or_else(|| {
            CacheError::Configuration("No check_interval configured".to_string())
        })?;
        sweeper.start(self.downgrade())
    }

    /// Returns false if the sweeper was not running.
    pub fn stop_sweeper(&self) -> bool {
        self.inner
            .sweeper
            .as_ref()
            .is_some_and(ExpirationSweeper::stop)
    }

    pub fn is_sweeping(&self) -> bool {
        self.inner
            .sweeper
            .as_ref()
            .is_some_and(ExpirationSweeper::is_running)
    }

    // == Destroy ==
    /// Stops the sweeper, runs plugin `on_destroy` hooks and detaches every
    /// event handler. Entries stay readable. Only the first call has effect.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop_sweeper();
        self.inner.plugins.destroy(self);
        self.inner.events.clear();
        debug!(strategy = self.strategy_name(), "Cache destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("strategy", &self.strategy_name())
            .field("storage", &self.inner.storage)
            .field("plugins", &self.inner.plugins)
            .field("default_ttl", &self.inner.default_ttl)
            .finish_non_exhaustive()
    }
}
