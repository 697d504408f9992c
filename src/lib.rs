//! Mini Cache - An embeddable in-process key-value cache
//!
//! Provides pluggable eviction (LRU, LFU, FIFO, TTL, SWR, custom), TTL and
//! stale-while-revalidate expiration, tags, namespaces, events, a plugin
//! pipeline and optional persistence.

pub mod cache;
pub mod config;
pub mod error;
pub mod plugins;
pub mod serializer;
pub mod storage;
pub mod tasks;

pub use cache::clock::{Clock, ManualClock, SystemClock};
pub use cache::events::{CacheEvent, DeleteReason, EventKind, SubscriptionId};
pub use cache::eviction::{CustomStrategy, EvictionContext, EvictionStrategy, StrategyKind};
pub use cache::{Cache, CacheDump, CacheEntry, CacheStats, Namespace, SetManyReport, SetOptions};
pub use config::CacheConfig;
pub use error::{CacheError, Result};
pub use plugins::{PendingWrite, Plugin, Veto};
pub use serializer::{JsonSerializer, Serializer};
pub use storage::{AsyncStorageAdapter, StorageAdapter, StorageBackend};
