//! Dump Module
//!
//! Versioned snapshot format shared by `dump`/`restore` and by the storage
//! write-through path (one `PersistedEntry` per backend key).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::cache::CacheEntry;
use crate::error::{CacheError, Result};

/// Current dump format version.
pub const DUMP_VERSION: u32 = 1;

// == Persisted Entry ==
/// A `CacheEntry` with its value already encoded by the cache's serializer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedEntry {
    pub key: String,
    /// Serializer output for the stored value
    pub value: String,
    pub created_at: u64,
    pub updated_at: u64,
    pub accessed_at: u64,
    #[serde(default)]
    pub access_count: u64,
    #[serde(default)]
    pub size: usize,
    #[serde(default)]
    pub ttl: Option<u64>,
    #[serde(default)]
    pub expires_at: Option<u64>,
    #[serde(default)]
    pub stale_at: Option<u64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl PersistedEntry {
    pub fn from_entry(entry: &CacheEntry, encoded_value: String) -> Self {
        Self {
            key: entry.key.clone(),
            value: encoded_value,
            created_at: entry.created_at,
            updated_at: entry.updated_at,
            accessed_at: entry.accessed_at,
            access_count: entry.access_count,
            size: entry.size,
            ttl: entry.ttl,
            expires_at: entry.expires_at,
            stale_at: entry.stale_at,
            tags: entry.tags.iter().cloned().collect(),
            namespace: entry.namespace.clone(),
            metadata: entry.metadata.clone(),
        }
    }

    pub fn is_expired(&self, now: u64) -> bool {
        crate::cache::clock::is_past(self.expires_at, now)
    }

    /// Rebuilds the entry around its decoded value.
    ///
    /// Timestamps are clamped so that externally edited records still satisfy
    /// `accessed_at >= created_at` and `updated_at >= created_at`. The size
    /// and insertion sequence are assigned by the store on insert.
    pub fn into_entry(self, value: Value) -> CacheEntry {
        let stale_at = match (self.stale_at, self.expires_at) {
            (Some(stale), Some(expires)) => Some(stale.min(expires)),
            (stale, _) => stale,
        };
        CacheEntry {
            key: self.key,
            value,
            created_at: self.created_at,
            updated_at: self.updated_at.max(self.created_at),
            accessed_at: self.accessed_at.max(self.created_at),
            access_count: self.access_count,
            size: self.size,
            ttl: self.ttl,
            expires_at: self.expires_at,
            stale_at,
            tags: self.tags.into_iter().collect(),
            namespace: self.namespace,
            metadata: self.metadata,
            seq: 0,
            recency: 0,
        }
    }
}

// == Cache Dump ==
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheDump {
    pub version: u32,
    /// Name of the strategy of the cache that produced the dump
    pub strategy: String,
    pub created_at: DateTime<Utc>,
    /// Live entries in insertion order
    pub entries: Vec<PersistedEntry>,
}

impl CacheDump {
    pub fn new(strategy: impl Into<String>, entries: Vec<PersistedEntry>) -> Self {
        Self {
            version: DUMP_VERSION,
            strategy: strategy.into(),
            created_at: Utc::now(),
            entries,
        }
    }

    pub fn check_version(&self) -> Result<()> {
        if self.version == DUMP_VERSION {
            Ok(())
        } else {
            Err(CacheError::Serialization(format!(
                "Unsupported dump version {} (expected {})",
                self.version, DUMP_VERSION
            )))
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SetOptions;
    use serde_json::json;

    fn sample_entry() -> CacheEntry {
        CacheEntry::new(
            "users:1".into(),
            json!({"name": "ada"}),
            14,
            SetOptions::new().ttl(5_000).stale_ttl(1_000).tag("users"),
            1_000,
            3,
        )
    }

    #[test]
    fn test_persisted_entry_preserves_fields() {
        let entry = sample_entry();
        let record = PersistedEntry::from_entry(&entry, "{\"name\":\"ada\"}".into());

        assert_eq!(record.expires_at, Some(6_000));
        assert_eq!(record.stale_at, Some(2_000));
        assert_eq!(record.tags, vec!["users"]);

        let restored = record.into_entry(entry.value.clone());
        assert_eq!(restored.key, entry.key);
        assert_eq!(restored.expires_at, entry.expires_at);
        assert_eq!(restored.tags, entry.tags);
    }

    #[test]
    fn test_into_entry_clamps_timestamps() {
        let mut record = PersistedEntry::from_entry(&sample_entry(), "null".into());
        record.accessed_at = 0;
        record.updated_at = 0;
        record.stale_at = Some(99_999);

        let entry = record.into_entry(Value::Null);
        assert_eq!(entry.accessed_at, entry.created_at);
        assert_eq!(entry.updated_at, entry.created_at);
        assert_eq!(entry.stale_at, entry.expires_at);
    }

    #[test]
    fn test_is_expired() {
        let record = PersistedEntry::from_entry(&sample_entry(), "null".into());
        assert!(!record.is_expired(5_999));
        assert!(record.is_expired(6_000));
    }

    #[test]
    fn test_dump_json_and_version() {
        let record = PersistedEntry::from_entry(&sample_entry(), "1".into());
        let dump = CacheDump::new("lru", vec![record]);

        let parsed = CacheDump::from_json(&dump.to_json().unwrap()).unwrap();
        assert_eq!(parsed, dump);
        assert!(parsed.check_version().is_ok());

        let mut future = parsed;
        future.version = 2;
        assert!(matches!(
            future.check_version(),
            Err(CacheError::Serialization(_))
        ));
    }

    #[test]
    fn test_lenient_record_parsing() {
        let raw = r#"{"key":"k","value":"1","created_at":5,"updated_at":5,"accessed_at":5}"#;
        let record: PersistedEntry = serde_json::from_str(raw).unwrap();
        assert!(record.tags.is_empty());
        assert_eq!(record.expires_at, None);
    }
}
