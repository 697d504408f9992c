//! Entry Store Module
//!
//! Authoritative map from key to entry, plus the tag index and capacity
//! arbitration. Every mutating method appends the events it produced to an
//! outbox supplied by the caller; delivery happens after the store lock is
//! released.

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::eviction::{EvictionContext, EvictionStrategy};
use crate::cache::events::{CacheEvent, DeleteReason};
use crate::cache::size::estimate_size;
use crate::cache::{CacheEntry, CacheStats, SetOptions};

// == Entry Store ==
#[derive(Debug)]
pub struct EntryStore {
    /// Key-value storage
    entries: HashMap<String, CacheEntry>,
    /// tag -> keys carrying it; empty sets are removed
    tags: HashMap<String, HashSet<String>>,
    /// Sum of entry sizes
    memory_usage: usize,
    /// Next insertion sequence number
    next_seq: u64,
    /// Cumulative counters
    stats: CacheStats,
    /// Maximum number of entries allowed
    max_size: usize,
    /// Optional byte ceiling
    max_memory: Option<usize>,
}

impl EntryStore {
    // == Constructor ==
    pub fn new(max_size: usize, max_memory: Option<usize>) -> Self {
        Self {
            entries: HashMap::new(),
            tags: HashMap::new(),
            memory_usage: 0,
            next_seq: 0,
            stats: CacheStats::new(),
            max_size,
            max_memory,
        }
    }

    // == Get ==
    /// Reads a live entry, recording the access and a hit.
    ///
    /// An expired entry is removed on the spot with an `Expire` event. Misses
    /// are *not* recorded here; see [`EntryStore::record_miss`].
    pub fn get(
        &mut self,
        key: &str,
        now: u64,
        strategy: &dyn EvictionStrategy,
        events: &mut Vec<CacheEvent>,
    ) -> Option<Value> {
        if !self.contains(key, now, events) {
            return None;
        }
        let tick = self.take_seq();
        let entry = self.entries.get_mut(key)?;
        entry.record_access(now);
        entry.recency = tick;
        strategy.on_access(entry);
        let value = entry.value.clone();
        self.stats.record_hit();
        events.push(CacheEvent::Hit {
            key: key.to_string(),
        });
        Some(value)
    }

    pub fn record_miss(&mut self, key: &str, events: &mut Vec<CacheEvent>) {
        self.stats.record_miss();
        events.push(CacheEvent::Miss {
            key: key.to_string(),
        });
    }

    // == Contains ==
    /// Existence check with lazy expiration; access stats are untouched.
    pub fn contains(&mut self, key: &str, now: u64, events: &mut Vec<CacheEvent>) -> bool {
        match self.entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                self.expire_entry(key, events);
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Live entry without side effects.
    pub fn peek(&self, key: &str, now: u64) -> Option<&CacheEntry> {
        self.entries.get(key).filter(|e| !e.is_expired(now))
    }

    // == Set ==
    /// Creates or replaces an entry and returns a copy of what was stored.
    ///
    /// `options.ttl` must already carry the effective lifetime.
    pub fn set(
        &mut self,
        key: String,
        value: Value,
        options: SetOptions,
        now: u64,
        strategy: &dyn EvictionStrategy,
        events: &mut Vec<CacheEvent>,
    ) -> CacheEntry {
        let size = estimate_size(&value);
        let entry = match self.entries.get(&key) {
            Some(previous) => previous.replaced_by(value, size, options, now),
            None => {
                let seq = self.take_seq();
                CacheEntry::new(key, value, size, options, now, seq)
            }
        };
        self.put(entry, now, strategy, events)
    }

    /// Inserts a fully formed entry (restore and hydration paths), keeping its
    /// timestamps. The insertion sequence is reassigned.
    pub fn insert_existing(
        &mut self,
        mut entry: CacheEntry,
        now: u64,
        strategy: &dyn EvictionStrategy,
        events: &mut Vec<CacheEvent>,
    ) -> CacheEntry {
        entry.size = estimate_size(&entry.value);
        entry.seq = match self.entries.get(&entry.key) {
            Some(previous) => previous.seq,
            None => self.take_seq(),
        };
        entry.recency = self.take_seq();
        self.put(entry, now, strategy, events)
    }

    fn put(
        &mut self,
        entry: CacheEntry,
        now: u64,
        strategy: &dyn EvictionStrategy,
        events: &mut Vec<CacheEvent>,
    ) -> CacheEntry {
        let previous_size = self.entries.get(&entry.key).map(|e| e.size);
        self.make_room(&entry.key, entry.size, previous_size, now, strategy, events);

        if let Some(previous) = self.entries.remove(&entry.key) {
            let dropped: Vec<String> = previous.tags.difference(&entry.tags).cloned().collect();
            self.unindex(&previous.key, dropped.iter());
            self.memory_usage = self.memory_usage.saturating_sub(previous.size);
        }
        for tag in &entry.tags {
            self.tags
                .entry(tag.clone())
                .or_default()
                .insert(entry.key.clone());
        }
        self.memory_usage += entry.size;
        self.entries.insert(entry.key.clone(), entry.clone());

        strategy.on_set(&entry);
        self.stats.record_set();
        events.push(CacheEvent::Set {
            key: entry.key.clone(),
            size: entry.size,
        });
        entry
    }

    // == Make Room ==
    /// Runs the single eviction pass for a pending write of `key`.
    fn make_room(
        &mut self,
        key: &str,
        incoming_size: usize,
        previous_size: Option<usize>,
        now: u64,
        strategy: &dyn EvictionStrategy,
        events: &mut Vec<CacheEvent>,
    ) {
        let current_count = self.entries.len();
        let count_to_evict = if previous_size.is_none() && current_count >= self.max_size {
            current_count - self.max_size + 1
        } else {
            0
        };
        let projected_memory =
            self.memory_usage.saturating_sub(previous_size.unwrap_or(0)) + incoming_size;
        let bytes_to_free = self
            .max_memory
            .map_or(0, |max| projected_memory.saturating_sub(max));

        if count_to_evict == 0 && bytes_to_free == 0 {
            return;
        }

        let ctx = EvictionContext {
            now,
            max_size: self.max_size,
            max_memory: self.max_memory,
            current_count,
            current_memory: self.memory_usage,
            incoming_size,
            count_to_evict,
            bytes_to_free,
        };
        let mut candidates: Vec<&CacheEntry> =
            self.entries.values().filter(|e| e.key != key).collect();
        candidates.sort_by_key(|e| e.seq);

        let victims = strategy.should_evict(&candidates, &ctx);
        if victims.len() < count_to_evict {
            debug!(
                strategy = strategy.name(),
                requested = count_to_evict,
                selected = victims.len(),
                "Eviction left the cache over capacity"
            );
        }

        for victim in victims {
            if victim == key {
                continue;
            }
            match self.remove_entry(&victim) {
                Some(_) => {
                    debug!(key = %victim, strategy = strategy.name(), "Evicted entry");
                    self.stats.record_eviction();
                    events.push(CacheEvent::Evict {
                        key: victim,
                        strategy: strategy.name().to_string(),
                    });
                }
                None => warn!(
                    key = %victim,
                    strategy = strategy.name(),
                    "Eviction strategy selected an unknown key"
                ),
            }
        }
    }

    // == Delete ==
    /// Manual removal. Returns the removed entry.
    pub fn delete(&mut self, key: &str, events: &mut Vec<CacheEvent>) -> Option<CacheEntry> {
        let removed = self.remove_entry(key)?;
        self.stats.record_delete();
        events.push(CacheEvent::Delete {
            key: key.to_string(),
            reason: DeleteReason::Manual,
        });
        Some(removed)
    }

    // == Clear ==
    /// Removes everything. Returns the prior entry count.
    pub fn clear(&mut self, events: &mut Vec<CacheEvent>) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        self.tags.clear();
        self.memory_usage = 0;
        events.push(CacheEvent::Clear { count });
        count
    }

    // == Prune ==
    /// Removes every expired entry. Returns the removed keys.
    pub fn prune(&mut self, now: u64, events: &mut Vec<CacheEvent>) -> Vec<String> {
        let mut expired: Vec<(u64, String)> = self
            .entries
            .values()
            .filter(|entry| entry.is_expired(now))
            .map(|entry| (entry.seq, entry.key.clone()))
            .collect();
        expired.sort();

        let keys: Vec<String> = expired.into_iter().map(|(_, key)| key).collect();
        for key in &keys {
            self.expire_entry(key, events);
        }
        events.push(CacheEvent::Prune { count: keys.len() });
        keys
    }

    // == Touch ==
    /// Re-grants the entry's lifetime. False if absent or expired.
    pub fn touch(&mut self, key: &str, now: u64, events: &mut Vec<CacheEvent>) -> bool {
        if !self.contains(key, now, events) {
            return false;
        }
        if let Some(entry) = self.entries.get_mut(key) {
            entry.refresh(now);
        }
        true
    }

    // == Expire ==
    /// Forces immediate expiration. False if absent or already expired.
    pub fn expire(&mut self, key: &str, now: u64, events: &mut Vec<CacheEvent>) -> bool {
        if !self.contains(key, now, events) {
            return false;
        }
        if let Some(entry) = self.entries.get_mut(key) {
            entry.expires_at = Some(now);
            entry.stale_at = Some(entry.stale_at.map_or(now, |s| s.min(now)));
        }
        self.expire_entry(key, events);
        true
    }

    fn expire_entry(&mut self, key: &str, events: &mut Vec<CacheEvent>) {
        if self.remove_entry(key).is_some() {
            self.stats.record_expiration();
            events.push(CacheEvent::Expire {
                key: key.to_string(),
            });
        }
    }

    // == Removal ==
    /// Drops an entry and every index reference to it.
    fn remove_entry(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.unindex(key, entry.tags.iter());
        self.memory_usage = self.memory_usage.saturating_sub(entry.size);
        Some(entry)
    }

    fn unindex<'t>(&mut self, key: &str, tags: impl Iterator<Item = &'t String>) {
        for tag in tags {
            if let Some(keys) = self.tags.get_mut(tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.tags.remove(tag);
                }
            }
        }
    }

    // == Tags ==
    /// Live keys carrying `tag`, in insertion order.
    pub fn keys_by_tag(&self, tag: &str, now: u64) -> Vec<String> {
        let Some(keys) = self.tags.get(tag) else {
            return Vec::new();
        };
        let mut live: Vec<&CacheEntry> = keys.iter().filter_map(|k| self.peek(k, now)).collect();
        live.sort_by_key(|e| e.seq);
        live.into_iter().map(|e| e.key.clone()).collect()
    }

    pub fn has_tag(&self, tag: &str, now: u64) -> bool {
        self.tags
            .get(tag)
            .is_some_and(|keys| keys.iter().any(|k| self.peek(k, now).is_some()))
    }

    /// Tags of a live entry, sorted.
    pub fn tags_of(&self, key: &str, now: u64) -> Option<Vec<String>> {
        self.peek(key, now)
            .map(|entry| entry.tags.iter().cloned().collect())
    }

    /// Number of distinct tags currently indexed.
    pub fn tag_count(&self) -> usize {
        self.tags.len()
    }

    // == Enumeration ==
    /// Live entries in insertion order.
    pub fn live_entries(&self, now: u64) -> Vec<&CacheEntry> {
        let mut live: Vec<&CacheEntry> = self
            .entries
            .values()
            .filter(|e| !e.is_expired(now))
            .collect();
        live.sort_by_key(|e| e.seq);
        live
    }

    pub fn keys(&self, now: u64) -> Vec<String> {
        self.live_entries(now)
            .into_iter()
            .map(|e| e.key.clone())
            .collect()
    }

    pub fn keys_with_prefix(&self, prefix: &str, now: u64) -> Vec<String> {
        self.live_entries(now)
            .into_iter()
            .filter(|e| e.key.starts_with(prefix))
            .map(|e| e.key.clone())
            .collect()
    }

    // == Stats ==
    /// Snapshot of the counters plus point-in-time size figures.
    pub fn stats(&self, uptime_ms: u64) -> CacheStats {
        let mut stats = self.stats.clone();
        stats.size = self.entries.len();
        stats.memory_usage = self.memory_usage;
        stats.uptime_ms = uptime_ms;
        stats
    }

    pub fn reset_stats(&mut self) {
        self.stats.reset();
    }

    // == Length ==
    /// Number of stored entries, including expired ones not yet removed.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn memory_usage(&self) -> usize {
        self.memory_usage
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::eviction::{LruStrategy, TtlStrategy};
    use serde_json::json;

    fn set(store: &mut EntryStore, key: &str, value: Value, options: SetOptions, now: u64) {
        let mut events = Vec::new();
        store.set(key.to_string(), value, options, now, &LruStrategy, &mut events);
    }

    fn get(store: &mut EntryStore, key: &str, now: u64) -> Option<Value> {
        let mut events = Vec::new();
        store.get(key, now, &LruStrategy, &mut events)
    }

    #[test]
    fn test_store_new() {
        let store = EntryStore::new(100, None);
        assert_eq!(store.len(), 0);
        assert!(store.is_empty());
        assert_eq!(store.memory_usage(), 0);
    }

    #[test]
    fn test_store_set_and_get() {
        let mut store = EntryStore::new(100, None);

        set(&mut store, "key1", json!("value1"), SetOptions::new(), 0);

        assert_eq!(get(&mut store, "key1", 1), Some(json!("value1")));
        assert_eq!(store.len(), 1);
        assert_eq!(store.memory_usage(), 12);
    }

    #[test]
    fn test_store_overwrite() {
        let mut store = EntryStore::new(100, None);

        set(&mut store, "key1", json!("value1"), SetOptions::new(), 0);
        set(&mut store, "key1", json!("v2"), SetOptions::new(), 5);

        assert_eq!(get(&mut store, "key1", 6), Some(json!("v2")));
        assert_eq!(store.len(), 1);
        assert_eq!(store.memory_usage(), 4);
        assert_eq!(store.peek("key1", 6).unwrap().created_at, 0);
        assert_eq!(store.peek("key1", 6).unwrap().updated_at, 5);
    }

    #[test]
    fn test_store_lazy_expiration_emits_expire() {
        let mut store = EntryStore::new(100, None);
        set(&mut store, "key1", json!(1), SetOptions::new().ttl(100), 0);

        let mut events = Vec::new();
        assert!(store.get("key1", 100, &LruStrategy, &mut events).is_none());

        assert_eq!(events, vec![CacheEvent::Expire { key: "key1".into() }]);
        assert!(store.is_empty());
        assert_eq!(store.stats(0).expirations, 1);
    }

    #[test]
    fn test_store_lru_eviction() {
        let mut store = EntryStore::new(3, None);

        set(&mut store, "key1", json!(1), SetOptions::new(), 0);
        set(&mut store, "key2", json!(2), SetOptions::new(), 1);
        set(&mut store, "key3", json!(3), SetOptions::new(), 2);

        let mut events = Vec::new();
        store.set("key4".into(), json!(4), SetOptions::new(), 3, &LruStrategy, &mut events);

        assert_eq!(store.len(), 3);
        assert!(store.peek("key1", 3).is_none());
        assert!(events.contains(&CacheEvent::Evict {
            key: "key1".into(),
            strategy: "lru".into()
        }));
        assert_eq!(store.stats(0).evictions, 1);
    }

    #[test]
    fn test_store_lru_touch_on_get() {
        let mut store = EntryStore::new(3, None);

        set(&mut store, "key1", json!(1), SetOptions::new(), 0);
        set(&mut store, "key2", json!(2), SetOptions::new(), 1);
        set(&mut store, "key3", json!(3), SetOptions::new(), 2);

        get(&mut store, "key1", 3);
        set(&mut store, "key4", json!(4), SetOptions::new(), 4);

        assert!(store.peek("key1", 4).is_some());
        assert!(store.peek("key2", 4).is_none());
    }

    #[test]
    fn test_store_lru_same_millisecond_read() {
        let mut store = EntryStore::new(3, None);

        for key in ["a", "b", "c"] {
            set(&mut store, key, json!(key), SetOptions::new(), 7);
        }
        get(&mut store, "b", 7);
        get(&mut store, "a", 7);
        set(&mut store, "d", json!("d"), SetOptions::new(), 7);

        assert_eq!(store.keys(7).len(), 3);
        assert!(store.peek("c", 7).is_none());
        assert!(store.peek("a", 7).is_some());
        assert!(store.peek("b", 7).is_some());
    }

    #[test]
    fn test_store_overwrite_at_capacity_does_not_evict() {
        let mut store = EntryStore::new(2, None);

        set(&mut store, "a", json!(1), SetOptions::new(), 0);
        set(&mut store, "b", json!(2), SetOptions::new(), 1);
        set(&mut store, "a", json!(3), SetOptions::new(), 2);

        assert_eq!(store.keys(3), vec!["a", "b"]);
    }

    #[test]
    fn test_store_memory_limit() {
        let mut store = EntryStore::new(100, Some(20));

        set(&mut store, "a", json!("12345"), SetOptions::new(), 0); // 10 bytes
        set(&mut store, "b", json!("12345"), SetOptions::new(), 1); // 10 bytes
        set(&mut store, "c", json!("123"), SetOptions::new(), 2); // 6 bytes

        assert_eq!(store.keys(3), vec!["b", "c"]);
        assert_eq!(store.memory_usage(), 16);
    }

    #[test]
    fn test_store_ttl_strategy_may_stay_over_capacity() {
        let mut store = EntryStore::new(1, None);
        let mut events = Vec::new();

        store.set("a".into(), json!(1), SetOptions::new(), 0, &TtlStrategy, &mut events);
        store.set("b".into(), json!(2), SetOptions::new(), 1, &TtlStrategy, &mut events);

        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_store_tag_index_follows_entries() {
        let mut store = EntryStore::new(100, None);

        set(&mut store, "a", json!(1), SetOptions::new().tags(["x", "y"]), 0);
        set(&mut store, "b", json!(2), SetOptions::new().tag("x"), 1);
        assert_eq!(store.keys_by_tag("x", 2), vec!["a", "b"]);

        // retag a: drops y
        set(&mut store, "a", json!(1), SetOptions::new().tag("x"), 2);
        assert!(!store.has_tag("y", 3));
        assert_eq!(store.tag_count(), 1);

        let mut events = Vec::new();
        store.delete("b", &mut events);
        assert_eq!(store.keys_by_tag("x", 3), vec!["a"]);

        store.delete("a", &mut events);
        assert!(!store.has_tag("x", 3));
        assert_eq!(store.tag_count(), 0);
    }

    #[test]
    fn test_store_delete() {
        let mut store = EntryStore::new(100, None);
        set(&mut store, "key1", json!(1), SetOptions::new(), 0);

        let mut events = Vec::new();
        assert!(store.delete("key1", &mut events).is_some());
        assert!(store.delete("key1", &mut events).is_none());

        assert!(store.is_empty());
        assert_eq!(events.len(), 1);
        assert_eq!(store.stats(0).deletes, 1);
    }

    #[test]
    fn test_store_prune() {
        let mut store = EntryStore::new(100, None);
        set(&mut store, "key1", json!(1), SetOptions::new().ttl(10), 0);
        set(&mut store, "key2", json!(2), SetOptions::new().ttl(1_000), 0);
        set(&mut store, "key3", json!(3), SetOptions::new().ttl(20), 0);

        let mut events = Vec::new();
        let removed = store.prune(500, &mut events);

        assert_eq!(removed, vec!["key1", "key3"]);
        assert_eq!(store.len(), 1);
        assert_eq!(events.last(), Some(&CacheEvent::Prune { count: 2 }));
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn test_store_touch_and_expire() {
        let mut store = EntryStore::new(100, None);
        set(&mut store, "a", json!(1), SetOptions::new().ttl(100), 0);
        set(&mut store, "b", json!(2), SetOptions::new(), 0);

        let mut events = Vec::new();
        assert!(store.touch("a", 90, &mut events));
        assert_eq!(store.peek("a", 90).unwrap().expires_at, Some(190));
        assert!(store.touch("b", 90, &mut events));
        assert!(!store.touch("missing", 90, &mut events));

        assert!(store.expire("b", 95, &mut events));
        assert!(store.peek("b", 95).is_none());
        assert_eq!(events, vec![CacheEvent::Expire { key: "b".into() }]);
    }

    #[test]
    fn test_store_clear() {
        let mut store = EntryStore::new(100, None);
        set(&mut store, "a", json!(1), SetOptions::new().tag("t"), 0);
        set(&mut store, "b", json!(2), SetOptions::new(), 0);

        let mut events = Vec::new();
        assert_eq!(store.clear(&mut events), 2);
        assert!(store.is_empty());
        assert_eq!(store.tag_count(), 0);
        assert_eq!(store.memory_usage(), 0);
        assert_eq!(events, vec![CacheEvent::Clear { count: 2 }]);
    }

    #[test]
    fn test_store_stats() {
        let mut store = EntryStore::new(100, None);
        set(&mut store, "key1", json!("value1"), SetOptions::new(), 0);
        get(&mut store, "key1", 1);
        let mut events = Vec::new();
        store.record_miss("nonexistent", &mut events);

        let stats = store.stats(42);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
        assert_eq!(stats.uptime_ms, 42);

        store.reset_stats();
        assert_eq!(store.stats(0).hits, 0);
        assert_eq!(store.stats(0).size, 1);
    }

    #[test]
    fn test_store_keys_with_prefix() {
        let mut store = EntryStore::new(100, None);
        set(&mut store, "a:1", json!(1), SetOptions::new(), 0);
        set(&mut store, "ab:1", json!(1), SetOptions::new(), 0);
        set(&mut store, "a:2", json!(1), SetOptions::new(), 0);

        assert_eq!(store.keys_with_prefix("a:", 1), vec!["a:1", "a:2"]);
    }
}
