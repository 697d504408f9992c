//! Two-tier caching.
//!
//! The plugin owns a second `Cache` acting as the backing tier. Writes and
//! deletes on the primary are mirrored into it, and a primary miss is served
//! from it. The primary promotes the whole entry, so ttl and tags survive.

use serde_json::Value;
use tracing::warn;

use crate::cache::{Cache, CacheEntry, SetOptions};
use crate::plugins::Plugin;

#[derive(Debug)]
pub struct TieringPlugin {
    secondary: Cache,
}

impl TieringPlugin {
    /// Takes ownership of `secondary`. The primary cache never touches it
    /// directly.
    pub fn new(secondary: Cache) -> Self {
        Self { secondary }
    }

    /// Read access to the backing tier, for inspection.
    pub fn secondary(&self) -> &Cache {
        &self.secondary
    }

    fn mirrored_options(entry: &CacheEntry) -> SetOptions {
        let stale_ttl = match (entry.stale_at, entry.expires_at) {
            (Some(stale), Some(_)) => Some(stale.saturating_sub(entry.updated_at)),
            _ => None,
        };
        SetOptions {
            ttl: entry.ttl,
            stale_ttl,
            tags: entry.tags.iter().cloned().collect(),
            metadata: entry.metadata.clone(),
            namespace: entry.namespace.clone(),
        }
    }
}

impl Plugin for TieringPlugin {
    fn name(&self) -> &str {
        "tiering"
    }

    fn on_destroy(&self, _cache: &Cache) {
        self.secondary.destroy();
    }

    fn on_miss(&self, key: &str) -> Option<CacheEntry> {
        let value = self.secondary.get(key)?;
        let entry = self.secondary.entry(key)?;
        Some(CacheEntry { value, ..entry })
    }

    fn after_set(&self, key: &str, entry: &CacheEntry) {
        let options = Self::mirrored_options(entry);
        if let Err(e) = self.secondary.set(key, entry.value.clone(), options) {
            warn!(key, error = %e, "Failed to mirror write into secondary tier");
        }
    }

    fn after_delete(&self, key: &str, _value: &Value) {
        if let Err(e) = self.secondary.delete(key) {
            warn!(key, error = %e, "Failed to mirror delete into secondary tier");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::ManualClock;
    use crate::config::CacheConfig;
    use serde_json::json;
    use std::sync::Arc;

    fn tiered(primary_size: usize) -> (Cache, Cache) {
        let secondary = Cache::new(CacheConfig::default().with_max_size(100)).unwrap();
        let plugin = TieringPlugin::new(secondary.clone());
        let primary = Cache::new(
            CacheConfig::default()
                .with_max_size(primary_size)
                .with_shared_plugin(Arc::new(plugin)),
        )
        .unwrap();
        (primary, secondary)
    }

    #[test]
    fn test_writes_and_deletes_are_mirrored() {
        let (primary, secondary) = tiered(10);

        primary
            .set("k", json!("v"), SetOptions::new().ttl(60_000).tag("t"))
            .unwrap();
        assert_eq!(secondary.get("k"), Some(json!("v")));
        assert_eq!(secondary.tags("k"), Some(vec!["t".to_string()]));
        assert!(secondary.ttl("k").is_some());

        primary.delete("k").unwrap();
        assert!(!secondary.has("k"));
    }

    #[test]
    fn test_primary_miss_promotes_from_secondary() {
        let (primary, secondary) = tiered(2);

        primary.set("a", json!(1), SetOptions::new()).unwrap();
        primary.set("b", json!(2), SetOptions::new()).unwrap();
        primary.set("c", json!(3), SetOptions::new()).unwrap();

        // "a" overflowed out of the primary but lives on in the backing tier
        assert!(!primary.has("a"));
        assert!(secondary.has("a"));

        assert_eq!(primary.get("a"), Some(json!(1)));
        assert!(primary.has("a"));
    }

    #[test]
    fn test_promotion_keeps_ttl_and_tags() {
        let clock = Arc::new(ManualClock::starting_at(1_000_000));
        let secondary = Cache::new(
            CacheConfig::default()
                .with_max_size(100)
                .with_clock(clock.clone()),
        )
        .unwrap();
        let primary = Cache::new(
            CacheConfig::default()
                .with_max_size(1)
                .with_clock(clock.clone())
                .with_plugin(TieringPlugin::new(secondary)),
        )
        .unwrap();

        primary
            .set("a", json!(1), SetOptions::new().ttl(1_000).tag("t"))
            .unwrap();
        primary.set("b", json!(2), SetOptions::new()).unwrap();
        assert!(!primary.has("a"));

        assert_eq!(primary.get("a"), Some(json!(1)));
        assert_eq!(primary.ttl("a"), Some(1_000));
        assert_eq!(primary.get_keys_by_tag("t"), vec!["a".to_string()]);

        clock.advance(5_000);
        assert_eq!(primary.get("a"), None);
    }

    #[test]
    fn test_miss_in_both_tiers() {
        let (primary, _secondary) = tiered(2);
        assert_eq!(primary.get("nowhere"), None);
        assert_eq!(primary.stats().misses, 1);
    }

    #[test]
    fn test_mirrored_stale_window() {
        let entry = CacheEntry::new(
            "k".into(),
            json!(1),
            8,
            SetOptions::new().ttl(1_000).stale_ttl(400),
            10_000,
            0,
        );
        let options = TieringPlugin::mirrored_options(&entry);
        assert_eq!(options.ttl, Some(1_000));
        assert_eq!(options.stale_ttl, Some(400));
    }
}
