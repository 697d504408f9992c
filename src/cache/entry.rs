//! Cache Entry Module
//!
//! Defines individual cache entries and the options accepted by writes.

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use crate::cache::clock;

// == Set Options ==
/// Per-write options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetOptions {
    /// Lifetime in milliseconds; overrides the cache default
    pub ttl: Option<u64>,
    /// Milliseconds after which the entry is served as stale
    pub stale_ttl: Option<u64>,
    /// Tags for group lookup and invalidation
    pub tags: Vec<String>,
    /// Opaque user/plugin data
    pub metadata: Map<String, Value>,
    /// Namespace path that produced the key, recorded for introspection
    pub namespace: Option<String>,
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttl(mut self, ttl_ms: u64) -> Self {
        self.ttl = Some(ttl_ms);
        self
    }

    pub fn stale_ttl(mut self, stale_ms: u64) -> Self {
        self.stale_ttl = Some(stale_ms);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

// == Cache Entry ==
/// A single stored item and its bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Unique key in the flat key space
    pub key: String,
    /// The stored payload
    pub value: Value,
    /// Creation timestamp (Unix milliseconds)
    pub created_at: u64,
    /// Last value mutation (Unix milliseconds)
    pub updated_at: u64,
    /// Last successful read (Unix milliseconds)
    pub accessed_at: u64,
    /// Number of successful reads
    pub access_count: u64,
    /// Estimated footprint of `value` in bytes
    pub size: usize,
    /// Lifetime requested at the last write
    pub ttl: Option<u64>,
    /// Expiration deadline, None = never expires
    pub expires_at: Option<u64>,
    /// Staleness deadline, always <= expires_at
    pub stale_at: Option<u64>,
    pub tags: BTreeSet<String>,
    pub namespace: Option<String>,
    pub metadata: Map<String, Value>,
    /// Insertion sequence, used to break eviction ties
    pub(crate) seq: u64,
    /// Logical read recency; orders reads that share a millisecond
    pub(crate) recency: u64,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates a fresh entry written at `now`.
    ///
    /// `ttl` and `stale_ttl` are the effective values after defaults have
    /// been applied.
    pub fn new(
        key: String,
        value: Value,
        size: usize,
        options: SetOptions,
        now: u64,
        seq: u64,
    ) -> Self {
        let SetOptions {
            ttl,
            stale_ttl,
            tags,
            metadata,
            namespace,
        } = options;

        Self {
            key,
            value,
            created_at: now,
            updated_at: now,
            accessed_at: now,
            access_count: 0,
            size,
            ttl,
            expires_at: clock::expires_at(now, ttl),
            stale_at: clock::stale_at(now, ttl, stale_ttl),
            tags: tags.into_iter().collect(),
            namespace,
            metadata,
            seq,
            recency: seq,
        }
    }

    // == Replace ==
    /// Builds the successor of `self` for an overwrite at `now`.
    ///
    /// Creation time, insertion sequence and access history carry over; the
    /// value, lifetime, tags and metadata come from the new write.
    pub fn replaced_by(&self, value: Value, size: usize, options: SetOptions, now: u64) -> Self {
        let mut next = Self::new(self.key.clone(), value, size, options, now, self.seq);
        next.created_at = self.created_at;
        next.accessed_at = self.accessed_at.max(self.created_at);
        next.access_count = self.access_count;
        next.recency = self.recency;
        next
    }

    // == Is Expired ==
    /// Expired once `now >= expires_at`.
    pub fn is_expired(&self, now: u64) -> bool {
        clock::is_past(self.expires_at, now)
    }

    /// Past the staleness deadline but possibly not yet expired.
    pub fn is_stale(&self, now: u64) -> bool {
        clock::is_past(self.stale_at, now)
    }

    // == Time To Live ==
    /// Remaining lifetime in milliseconds, None if the entry never expires.
    pub fn ttl_remaining(&self, now: u64) -> Option<u64> {
        clock::remaining(self.expires_at, now)
    }

    // == Record Access ==
    pub fn record_access(&mut self, now: u64) {
        self.accessed_at = now.max(self.created_at);
        self.access_count += 1;
    }

    // == Refresh ==
    /// Re-grants the original lifetime relative to `now`.
    ///
    /// Keeps the distance between stale and expiry deadlines.
    pub fn refresh(&mut self, now: u64) {
        let Some(ttl) = self.ttl else {
            return;
        };
        let stale_window = match (self.stale_at, self.expires_at) {
            (Some(stale), Some(expires)) => Some(ttl.saturating_sub(expires - stale.min(expires))),
            _ => None,
        };
        self.updated_at = now.max(self.created_at);
        self.expires_at = clock::expires_at(self.updated_at, Some(ttl));
        self.stale_at = clock::stale_at(self.updated_at, Some(ttl), stale_window);
    }

    /// Namespace-relative portion of the key, if the key is namespaced.
    pub fn local_key(&self) -> &str {
        match &self.namespace {
            Some(ns) => self
                .key
                .strip_prefix(ns.as_str())
                .and_then(|rest| rest.strip_prefix(':'))
                .unwrap_or(&self.key),
            None => &self.key,
        }
    }
}
