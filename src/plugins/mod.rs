//! Plugin Module
//!
//! Ordered interception of cache operations. Every hook has a no-op default,
//! so a plugin implements only what it needs. Hooks run in registration order
//! (the "after" hooks too), outside the store lock, so a plugin may call back
//! into the cache it is attached to.
//!
//! # Built-in plugins
//! - `CompressionPlugin` - run-length encoding for large strings
//! - `CipherPlugin` - XOR obfuscation (not encryption)
//! - `LoggingPlugin` - structured operation logs through `tracing`
//! - `TieringPlugin` - secondary cache as a backing tier

mod cipher;
mod compression;
mod logging;
mod tiering;

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::Value;
use tracing::error;

use crate::cache::{Cache, CacheEntry, SetOptions};

pub use cipher::CipherPlugin;
pub use compression::CompressionPlugin;
pub use logging::{LogLevel, LogRecord, LoggingPlugin};
pub use tiering::TieringPlugin;

// == Pending Write ==
/// The value and options a `set` is about to store.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingWrite {
    pub value: Value,
    pub options: SetOptions,
}

/// A plugin's refusal of a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Veto(pub String);

impl Veto {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

impl fmt::Display for Veto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// == Plugin Trait ==
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// Called once when the cache is built. Plugins must not keep a strong
    /// handle to `cache`; use [`Cache::downgrade`] if one is needed.
    fn on_init(&self, _cache: &Cache) {}

    fn on_destroy(&self, _cache: &Cache) {}

    fn before_get(&self, _key: &str) {}

    /// Transforms a value on its way out. Chained.
    fn after_get(&self, _key: &str, value: Value) -> Value {
        value
    }

    /// Supplies an entry for a key the cache does not hold. The value must be
    /// in stored form (as `after_set` saw it). The entry is promoted with its
    /// own deadlines and tags, and the value then passes through the
    /// `after_get` chain.
    fn on_miss(&self, _key: &str) -> Option<CacheEntry> {
        None
    }

    /// Transforms or rejects a write. Chained.
    fn before_set(&self, _key: &str, write: PendingWrite) -> Result<PendingWrite, Veto> {
        Ok(write)
    }

    fn after_set(&self, _key: &str, _entry: &CacheEntry) {}

    /// Returning false vetoes the delete.
    fn before_delete(&self, _key: &str) -> bool {
        true
    }

    fn after_delete(&self, _key: &str, _value: &Value) {}

    fn before_serialize(&self, value: Value) -> Value {
        value
    }

    fn after_deserialize(&self, value: Value) -> Value {
        value
    }
}

// == Pipeline ==
/// Registered plugins, in order.
#[derive(Clone, Default)]
pub struct PluginPipeline {
    plugins: Vec<Arc<dyn Plugin>>,
}

/// Runs `hook`, logging instead of propagating a panic.
fn guarded<T>(plugin: &str, hook: &str, f: impl FnOnce() -> T) -> Option<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => Some(result),
        Err(_) => {
            error!(plugin, hook, "Plugin hook panicked");
            None
        }
    }
}

impl PluginPipeline {
    pub fn new(plugins: Vec<Arc<dyn Plugin>>) -> Self {
        Self { plugins }
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn names(&self) -> Vec<String> {
        self.plugins.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn init(&self, cache: &Cache) {
        for plugin in &self.plugins {
            guarded(plugin.name(), "on_init", || plugin.on_init(cache));
        }
    }

    pub fn destroy(&self, cache: &Cache) {
        for plugin in &self.plugins {
            guarded(plugin.name(), "on_destroy", || plugin.on_destroy(cache));
        }
    }

    pub fn before_get(&self, key: &str) {
        for plugin in &self.plugins {
            guarded(plugin.name(), "before_get", || plugin.before_get(key));
        }
    }

    /// A panicking transform passes its input through unchanged.
    pub fn after_get(&self, key: &str, value: Value) -> Value {
        self.plugins.iter().fold(value, |value, plugin| {
            let input = value.clone();
            guarded(plugin.name(), "after_get", || plugin.after_get(key, input)).unwrap_or(value)
        })
    }

    /// First plugin to supply a value wins.
    pub fn on_miss(&self, key: &str) -> Option<CacheEntry> {
        self.plugins.iter().find_map(|plugin| {
            guarded(plugin.name(), "on_miss", || plugin.on_miss(key)).flatten()
        })
    }

    /// Threads the write through every plugin; the first veto stops the chain
    /// and names the plugin that raised it. A panic counts as a veto.
    pub fn before_set(&self, key: &str, write: PendingWrite) -> Result<PendingWrite, Veto> {
        let mut write = write;
        for plugin in &self.plugins {
            let input = write;
            write = match guarded(plugin.name(), "before_set", || plugin.before_set(key, input)) {
                Some(Ok(next)) => next,
                Some(Err(veto)) => return Err(Veto(format!("{}: {}", plugin.name(), veto))),
                None => return Err(Veto(format!("{}: hook panicked", plugin.name()))),
            };
        }
        Ok(write)
    }

    pub fn after_set(&self, key: &str, entry: &CacheEntry) {
        for plugin in &self.plugins {
            guarded(plugin.name(), "after_set", || plugin.after_set(key, entry));
        }
    }

    /// Returns the name of the first vetoing plugin, if any.
    pub fn before_delete(&self, key: &str) -> Option<String> {
        self.plugins
            .iter()
            .find(|plugin| {
                !guarded(plugin.name(), "before_delete", || plugin.before_delete(key))
                    .unwrap_or(false)
            })
            .map(|plugin| plugin.name().to_string())
    }

    pub fn after_delete(&self, key: &str, value: &Value) {
        for plugin in &self.plugins {
            guarded(plugin.name(), "after_delete", || plugin.after_delete(key, value));
        }
    }

    pub fn before_serialize(&self, value: Value) -> Value {
        self.plugins.iter().fold(value, |value, plugin| {
            let input = value.clone();
            guarded(plugin.name(), "before_serialize", || plugin.before_serialize(input))
                .unwrap_or(value)
        })
    }

    pub fn after_deserialize(&self, value: Value) -> Value {
        self.plugins.iter().fold(value, |value, plugin| {
            let input = value.clone();
            guarded(plugin.name(), "after_deserialize", || {
                plugin.after_deserialize(input)
            })
            .unwrap_or(value)
        })
    }
}

impl fmt::Debug for PluginPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginPipeline")
            .field("plugins", &self.names())
            .finish()
    }
}
