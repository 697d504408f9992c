//! Namespace Module
//!
//! Prefix-scoped views over a root `Cache`. A namespace is not stored
//! anywhere; it only rewrites `key` to `"<path>:<key>"` before delegating.

use serde_json::Value;

use crate::cache::{Cache, SetOptions};
use crate::error::Result;

/// Separator between namespace path segments and the local key.
pub const SEPARATOR: char = ':';

/// `"<path>:<key>"`.
pub fn prefixed_key(path: &str, key: &str) -> String {
    format!("{}{}{}", path, SEPARATOR, key)
}

/// Appends `child` to a namespace path; an empty parent is the root.
pub fn join_path(parent: &str, child: &str) -> String {
    if parent.is_empty() {
        child.to_string()
    } else {
        prefixed_key(parent, child)
    }
}

// == Namespace View ==
/// Borrowed view; the root cache outlives every view taken from it.
///
/// Capacity and eviction are shared with the root, so entries of any
/// namespace may be evicted to make room for another.
#[derive(Debug, Clone)]
pub struct Namespace<'a> {
    cache: &'a Cache,
    path: String,
}

impl<'a> Namespace<'a> {
    pub(crate) fn new(cache: &'a Cache, path: String) -> Self {
        Self { cache, path }
    }

    /// Colon-joined chain of ancestor names, e.g. `"app:users"`.
    pub fn full_path(&self) -> &str {
        &self.path
    }

    pub fn key(&self, local: &str) -> String {
        prefixed_key(&self.path, local)
    }

    fn prefix(&self) -> String {
        prefixed_key(&self.path, "")
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.cache.get(&self.key(key))
    }

    pub fn set(&self, key: &str, value: impl Into<Value>, options: SetOptions) -> Result<()> {
        let mut options = options;
        options.namespace = Some(self.path.clone());
        self.cache.set(&self.key(key), value, options)
    }

    pub fn has(&self, key: &str) -> bool {
        self.cache.has(&self.key(key))
    }

    pub fn delete(&self, key: &str) -> Result<bool> {
        self.cache.delete(&self.key(key))
    }

    /// Remaining lifetime of a namespaced key.
    pub fn ttl(&self, key: &str) -> Option<u64> {
        self.cache.ttl(&self.key(key))
    }

    pub fn get_or_set<F, V>(&self, key: &str, factory: F, options: SetOptions) -> Result<Value>
    where
        F: FnOnce() -> V,
        V: Into<Value>,
    {
        let mut options = options;
        options.namespace = Some(self.path.clone());
        self.cache.get_or_set(&self.key(key), factory, options)
    }

    /// Local keys of live entries under this namespace, child namespaces
    /// included (`"child:key"`).
    pub fn keys(&self) -> Vec<String> {
        let prefix = self.prefix();
        self.cache
            .keys_with_prefix(&prefix)
            .into_iter()
            .filter_map(|key| key.strip_prefix(prefix.as_str()).map(str::to_string))
            .collect()
    }

    /// Deletes every key under this namespace, leaving the rest of the cache
    /// alone. Returns the number of entries removed.
    pub fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        for key in self.cache.keys_with_prefix(&self.prefix()) {
            if self.cache.delete(&key)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn namespace(&self, child: &str) -> Namespace<'a> {
        Namespace::new(self.cache, join_path(&self.path, child))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use serde_json::json;

    fn cache() -> Cache {
        Cache::new(CacheConfig::default()).unwrap()
    }

    #[test]
    fn test_key_helpers() {
        assert_eq!(prefixed_key("a", "1"), "a:1");
        assert_eq!(join_path("", "a"), "a");
        assert_eq!(join_path("a", "b"), "a:b");
    }

    #[test]
    fn test_namespaces_do_not_collide() {
        let cache = cache();
        cache.namespace("a").set("1", json!("x"), SetOptions::new()).unwrap();
        cache.namespace("b").set("1", json!("y"), SetOptions::new()).unwrap();

        assert_eq!(cache.get("a:1"), Some(json!("x")));
        assert_eq!(cache.get("b:1"), Some(json!("y")));
        assert_eq!(cache.namespace("a").get("1"), Some(json!("x")));
    }

    #[test]
    fn test_nested_paths() {
        let cache = cache();
        let users = cache.namespace("app").namespace("users");
        assert_eq!(users.full_path(), "app:users");

        users.set("42", json!({"name": "ada"}), SetOptions::new()).unwrap();
        assert!(cache.has("app:users:42"));
        assert_eq!(cache.namespace("app").keys(), vec!["users:42"]);

        let entry = cache.entry("app:users:42").unwrap();
        assert_eq!(entry.namespace.as_deref(), Some("app:users"));
        assert_eq!(entry.local_key(), "42");
    }

    #[test]
    fn test_clear_only_touches_own_prefix() {
        let cache = cache();
        let a = cache.namespace("a");
        a.set("1", json!(1), SetOptions::new()).unwrap();
        a.set("2", json!(2), SetOptions::new()).unwrap();
        cache.namespace("ab").set("1", json!(3), SetOptions::new()).unwrap();
        cache.set("a", json!(4), SetOptions::new()).unwrap();

        assert_eq!(a.clear().unwrap(), 2);
        assert!(a.keys().is_empty());
        assert!(cache.has("ab:1"));
        assert!(cache.has("a"));
        assert_eq!(cache.stats().deletes, 2);
    }

    #[test]
    fn test_get_or_set_and_delete() {
        let cache = cache();
        let ns = cache.namespace("calc");

        let value = ns.get_or_set("sum", || json!(3), SetOptions::new()).unwrap();
        assert_eq!(value, json!(3));
        assert_eq!(ns.get_or_set("sum", || json!(99), SetOptions::new()).unwrap(), json!(3));

        assert!(ns.delete("sum").unwrap());
        assert!(!ns.has("sum"));
    }
}
