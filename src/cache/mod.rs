//! Cache Module
//!
//! In-memory caching with pluggable eviction, TTL and staleness, tags,
//! namespaces and an event bus.
//!
//! # Layout
//! - `store` - entry map, tag index and capacity arbitration (lock-protected)
//! - `engine` - the `Cache` facade around the store
//! - `eviction` - victim selection policies
//! - `events` - per-instance publish/subscribe
//! - `namespace` - prefix-scoped views
//! - `dump` - snapshot format for dump/restore and persistence

pub mod clock;
mod dump;
mod engine;
mod entry;
pub mod events;
pub mod eviction;
mod namespace;
pub mod size;
mod stats;
mod store;


// Re-export public types
pub use dump::{CacheDump, PersistedEntry, DUMP_VERSION};
pub use engine::{Cache, SetManyReport, WeakCache};
pub use entry::{CacheEntry, SetOptions};
pub use namespace::{join_path, prefixed_key, Namespace};
pub use stats::CacheStats;
pub use store::EntryStore;
