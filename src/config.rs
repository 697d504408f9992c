//! Configuration Module
//!
//! Construction options for a `Cache`, loadable from environment variables.
//! Everything a cache depends on (clock, serializer, storage, plugins) is a
//! field here rather than process-wide state, so instances stay independent.

use std::env;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::cache::clock::{Clock, SystemClock};
use crate::cache::eviction::{EvictionStrategy, StrategyKind};
use crate::error::{CacheError, Result};
use crate::plugins::Plugin;
use crate::serializer::{JsonSerializer, Serializer};
use crate::storage::StorageBackend;

/// Default maximum number of entries.
pub const DEFAULT_MAX_SIZE: usize = 1000;

/// Cache construction options.
///
/// Numeric fields can be configured via environment variables with sensible
/// defaults; the rest are set with the `with_*` builders.
#[derive(Clone)]
pub struct CacheConfig {
    /// Eviction policy
    pub strategy: Arc<dyn EvictionStrategy>,
    /// Maximum number of entries the cache can hold
    pub max_size: usize,
    /// Optional ceiling on the summed entry sizes, in bytes
    pub max_memory: Option<usize>,
    /// Default lifetime in milliseconds for writes without an explicit ttl
    pub ttl: Option<u64>,
    /// Default staleness window in milliseconds
    pub stale_ttl: Option<u64>,
    /// Expiration sweep period in milliseconds
    pub check_interval: Option<u64>,
    pub storage: StorageBackend,
    /// Plugins in registration order
    pub plugins: Vec<Arc<dyn Plugin>>,
    pub serializer: Arc<dyn Serializer>,
    pub clock: Arc<dyn Clock>,
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

impl CacheConfig {
    /// Creates a CacheConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_MAX_SIZE` - Maximum entries (default: 1000)
    /// - `CACHE_MAX_MEMORY` - Byte ceiling (default: unbounded)
    /// - `CACHE_TTL_MS` - Default ttl in milliseconds (default: none)
    /// - `CACHE_STALE_TTL_MS` - Default staleness window (default: none)
    /// - `CACHE_CHECK_INTERVAL_MS` - Sweep period (default: no sweeper)
    /// - `CACHE_STRATEGY` - `lru`, `lfu`, `fifo`, `ttl` or `swr` (default: lru)
    ///
    /// Unparsable values fall back to the defaults.
    pub fn from_env() -> Self {
        let strategy = env_parse::<StrategyKind>("CACHE_STRATEGY").unwrap_or_default();
        Self {
            max_size: env_parse("CACHE_MAX_SIZE").unwrap_or(DEFAULT_MAX_SIZE),
            max_memory: env_parse("CACHE_MAX_MEMORY"),
            ttl: env_parse("CACHE_TTL_MS"),
            stale_ttl: env_parse("CACHE_STALE_TTL_MS"),
            check_interval: env_parse("CACHE_CHECK_INTERVAL_MS"),
            ..Self::default().with_strategy(strategy)
        }
    }

    // == Builders ==
    pub fn with_strategy(mut self, kind: StrategyKind) -> Self {
        self.strategy = kind.build();
        self
    }

    /// Installs a user-defined strategy, e.g. a `CustomStrategy`.
    pub fn with_custom_strategy(mut self, strategy: impl EvictionStrategy + 'static) -> Self {
        self.strategy = Arc::new(strategy);
        self
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_max_memory(mut self, bytes: usize) -> Self {
        self.max_memory = Some(bytes);
        self
    }

    pub fn with_ttl(mut self, ttl_ms: u64) -> Self {
        self.ttl = Some(ttl_ms);
        self
    }

    pub fn with_stale_ttl(mut self, stale_ms: u64) -> Self {
        self.stale_ttl = Some(stale_ms);
        self
    }

    pub fn with_check_interval(mut self, interval_ms: u64) -> Self {
        self.check_interval = Some(interval_ms);
        self
    }

    pub fn with_storage(mut self, storage: StorageBackend) -> Self {
        self.storage = storage;
        self
    }

    /// Appends a plugin; hooks run in the order plugins were added.
    pub fn with_plugin(self, plugin: impl Plugin + 'static) -> Self {
        self.with_shared_plugin(Arc::new(plugin))
    }

    pub fn with_shared_plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn with_serializer(mut self, serializer: impl Serializer + 'static) -> Self {
        self.serializer = Arc::new(serializer);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    // == Validation ==
    /// Rejects options no cache could honor.
    pub fn validate(&self) -> Result<()> {
        if self.strategy.name().trim().is_empty() {
            return Err(CacheError::Configuration(
                "Strategy name cannot be empty".to_string(),
            ));
        }
        if self.max_size == 0 {
            return Err(CacheError::Configuration(
                "max_size must be greater than zero".to_string(),
            ));
        }
        if self.max_memory == Some(0) {
            return Err(CacheError::Configuration(
                "max_memory must be greater than zero".to_string(),
            ));
        }
        if self.ttl == Some(0) {
            return Err(CacheError::Configuration(
                "ttl must be greater than zero".to_string(),
            ));
        }
        if self.check_interval == Some(0) {
            return Err(CacheError::Configuration(
                "check_interval must be greater than zero".to_string(),
            ));
        }
        let mut names: Vec<&str> = self.plugins.iter().map(|p| p.name()).collect();
        names.sort_unstable();
        if let Some(pair) = names.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(CacheError::Configuration(format!(
                "Plugin '{}' registered twice",
                pair[0]
            )));
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::default().build(),
            max_size: DEFAULT_MAX_SIZE,
            max_memory: None,
            ttl: None,
            stale_ttl: None,
            check_interval: None,
            storage: StorageBackend::default(),
            plugins: Vec::new(),
            serializer: Arc::new(JsonSerializer),
            clock: Arc::new(SystemClock),
        }
    }
}

impl fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let plugins: Vec<&str> = self.plugins.iter().map(|p| p.name()).collect();
        f.debug_struct("CacheConfig")
            .field("strategy", &self.strategy.name())
            .field("max_size", &self.max_size)
            .field("max_memory", &self.max_memory)
            .field("ttl", &self.ttl)
            .field("stale_ttl", &self.stale_ttl)
            .field("check_interval", &self.check_interval)
            .field("storage", &self.storage)
            .field("plugins", &plugins)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::LoggingPlugin;

    const ENV_VARS: [&str; 6] = [
        "CACHE_MAX_SIZE",
        "CACHE_MAX_MEMORY",
        "CACHE_TTL_MS",
        "CACHE_STALE_TTL_MS",
        "CACHE_CHECK_INTERVAL_MS",
        "CACHE_STRATEGY",
    ];

    #[test]
    fn test_config_default() {
        let config = CacheConfig::default();
        assert_eq!(config.strategy.name(), "lru");
        assert_eq!(config.max_size, 1000);
        assert_eq!(config.max_memory, None);
        assert_eq!(config.ttl, None);
        assert_eq!(config.check_interval, None);
        assert!(!config.storage.is_persistent());
        assert!(config.validate().is_ok());
    }

    // Single test touching the environment, so parallel tests never race on it.
    #[test]
    fn test_config_from_env() {
        for name in ENV_VARS {
            env::remove_var(name);
        }
        let config = CacheConfig::from_env();
        assert_eq!(config.max_size, 1000);
        assert_eq!(config.ttl, None);
        assert_eq!(config.strategy.name(), "lru");

        env::set_var("CACHE_MAX_SIZE", "50");
        env::set_var("CACHE_TTL_MS", "2500");
        env::set_var("CACHE_STRATEGY", "LFU");
        env::set_var("CACHE_CHECK_INTERVAL_MS", "not-a-number");
        let config = CacheConfig::from_env();
        assert_eq!(config.max_size, 50);
        assert_eq!(config.ttl, Some(2500));
        assert_eq!(config.strategy.name(), "lfu");
        assert_eq!(config.check_interval, None);

        for name in ENV_VARS {
            env::remove_var(name);
        }
    }

    #[test]
    fn test_validate_rejects_bad_options() {
        let cases = [
            CacheConfig::default().with_max_size(0),
            CacheConfig::default().with_max_memory(0),
            CacheConfig::default().with_ttl(0),
            CacheConfig::default().with_check_interval(0),
            CacheConfig::default()
                .with_plugin(LoggingPlugin::default())
                .with_plugin(LoggingPlugin::default()),
        ];
        for config in cases {
            assert!(
                matches!(config.validate(), Err(CacheError::Configuration(_))),
                "{:?}",
                config
            );
        }
    }

    #[test]
    fn test_builders() {
        let config = CacheConfig::default()
            .with_strategy(StrategyKind::Fifo)
            .with_max_size(10)
            .with_ttl(100)
            .with_stale_ttl(50)
            .with_plugin(LoggingPlugin::default());
        assert_eq!(config.strategy.name(), "fifo");
        assert_eq!(config.stale_ttl, Some(50));
        assert_eq!(config.plugins.len(), 1);
        assert!(format!("{:?}", config).contains("logging"));
    }
}
