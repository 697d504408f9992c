//! Eviction Strategy Module
//!
//! Policies that pick victims when a write would overflow the cache.
//!
//! A strategy only *selects* keys; the store performs the removal. Entries
//! are handed over in insertion order, and every built-in sorts stably on its
//! own criterion followed by the insertion sequence, so ties always resolve
//! oldest-inserted first.
//!
//! | Strategy | Victims |
//! |----------|---------|
//! | LRU      | ascending `accessed_at`, then read recency |
//! | LFU      | ascending `access_count` |
//! | FIFO     | ascending `created_at` |
//! | TTL      | expired entries only; never evicts for capacity |
//! | SWR      | expired first, then LRU among live entries |

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::cache::CacheEntry;
use crate::error::{CacheError, Result};

// == Eviction Context ==
/// What the store needs freed, and the limits it is working against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionContext {
    pub now: u64,
    pub max_size: usize,
    pub max_memory: Option<usize>,
    pub current_count: usize,
    pub current_memory: usize,
    /// Size of the entry about to be written
    pub incoming_size: usize,
    /// Entries to remove to make room by count (`current - max + 1`, or 0)
    pub count_to_evict: usize,
    /// Bytes to free to stay under `max_memory`
    pub bytes_to_free: usize,
}

impl EvictionContext {
    pub fn is_satisfied_by(&self, evicted: usize, freed: usize) -> bool {
        evicted >= self.count_to_evict && freed >= self.bytes_to_free
    }
}

// == Strategy Trait ==
pub trait EvictionStrategy: Send + Sync {
    /// Identifier recorded in `evict` events and dumps.
    fn name(&self) -> &str;

    /// Selects the keys to evict. Must not assume the keys are removed until
    /// the store does so; may return fewer keys than requested.
    fn should_evict(&self, entries: &[&CacheEntry], ctx: &EvictionContext) -> Vec<String>;

    /// Called after a successful read.
    fn on_access(&self, _entry: &CacheEntry) {}

    /// Called after a successful write.
    fn on_set(&self, _entry: &CacheEntry) {}
}

/// Takes keys from `ordered` until the context is satisfied.
pub fn take_until_satisfied<'a, I>(ordered: I, ctx: &EvictionContext) -> Vec<String>
where
    I: IntoIterator<Item = &'a CacheEntry>,
{
    take_after(ordered, ctx, 0, 0)
}

fn take_after<'a, I>(ordered: I, ctx: &EvictionContext, evicted: usize, freed: usize) -> Vec<String>
where
    I: IntoIterator<Item = &'a CacheEntry>,
{
    let (mut evicted, mut freed) = (evicted, freed);
    let mut victims = Vec::new();
    for entry in ordered {
        if ctx.is_satisfied_by(evicted, freed) {
            break;
        }
        victims.push(entry.key.clone());
        evicted += 1;
        freed += entry.size;
    }
    victims
}

fn sorted_by<'a, K: Ord>(
    entries: &[&'a CacheEntry],
    key: impl Fn(&CacheEntry) -> K,
) -> Vec<&'a CacheEntry> {
    let mut ordered: Vec<&'a CacheEntry> = entries.to_vec();
    ordered.sort_by_key(|e| (key(*e), e.seq));
    ordered
}

// == LRU ==
#[derive(Debug, Default, Clone, Copy)]
pub struct LruStrategy;

impl EvictionStrategy for LruStrategy {
    fn name(&self) -> &str {
        "lru"
    }

    fn should_evict(&self, entries: &[&CacheEntry], ctx: &EvictionContext) -> Vec<String> {
        take_until_satisfied(sorted_by(entries, |e| (e.accessed_at, e.recency)), ctx)
    }
}

// == LFU ==
#[derive(Debug, Default, Clone, Copy)]
pub struct LfuStrategy;

impl EvictionStrategy for LfuStrategy {
    fn name(&self) -> &str {
        "lfu"
    }

    fn should_evict(&self, entries: &[&CacheEntry], ctx: &EvictionContext) -> Vec<String> {
        take_until_satisfied(sorted_by(entries, |e| e.access_count), ctx)
    }
}

// == FIFO ==
#[derive(Debug, Default, Clone, Copy)]
pub struct FifoStrategy;

impl EvictionStrategy for FifoStrategy {
    fn name(&self) -> &str {
        "fifo"
    }

    fn should_evict(&self, entries: &[&CacheEntry], ctx: &EvictionContext) -> Vec<String> {
        take_until_satisfied(sorted_by(entries, |e| e.created_at), ctx)
    }
}

// == TTL ==
/// Evicts only what has already expired. Leaves the cache over capacity when
/// nothing has expired; the next write re-checks.
#[derive(Debug, Default, Clone, Copy)]
pub struct TtlStrategy;

impl EvictionStrategy for TtlStrategy {
    fn name(&self) -> &str {
        "ttl"
    }

    fn should_evict(&self, entries: &[&CacheEntry], ctx: &EvictionContext) -> Vec<String> {
        entries
            .iter()
            .filter(|e| e.is_expired(ctx.now))
            .map(|e| e.key.clone())
            .collect()
    }
}

// == SWR ==
#[derive(Debug, Default, Clone, Copy)]
pub struct SwrStrategy;

impl EvictionStrategy for SwrStrategy {
    fn name(&self) -> &str {
        "swr"
    }

    fn should_evict(&self, entries: &[&CacheEntry], ctx: &EvictionContext) -> Vec<String> {
        let (expired, live): (Vec<&CacheEntry>, Vec<&CacheEntry>) =
            entries.iter().copied().partition(|e| e.is_expired(ctx.now));

        let freed: usize = expired.iter().map(|e| e.size).sum();
        let mut victims: Vec<String> = expired.iter().map(|e| e.key.clone()).collect();
        victims.extend(take_after(
            sorted_by(&live, |e| (e.accessed_at, e.recency)),
            ctx,
            victims.len(),
            freed,
        ));
        victims
    }
}

// == Custom ==
pub type SelectFn = dyn Fn(&[&CacheEntry], &EvictionContext) -> Vec<String> + Send + Sync;

/// Strategy backed by a caller-supplied selection function.
pub struct CustomStrategy {
    name: String,
    select: Box<SelectFn>,
}

impl CustomStrategy {
    pub fn new<F>(name: impl Into<String>, select: F) -> Result<Self>
    where
        F: Fn(&[&CacheEntry], &EvictionContext) -> Vec<String> + Send + Sync + 'static,
    {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(CacheError::Configuration(
                "Custom strategy name cannot be empty".to_string(),
            ));
        }
        if name.parse::<StrategyKind>().is_ok() {
            return Err(CacheError::Configuration(format!(
                "Custom strategy name '{}' shadows a built-in strategy",
                name
            )));
        }
        Ok(Self {
            name,
            select: Box::new(select),
        })
    }
}

impl EvictionStrategy for CustomStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn should_evict(&self, entries: &[&CacheEntry], ctx: &EvictionContext) -> Vec<String> {
        (self.select)(entries, ctx)
    }
}

impl fmt::Debug for CustomStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomStrategy")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

// == Strategy Kind ==
/// The built-in strategies, selectable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrategyKind {
    #[default]
    Lru,
    Lfu,
    Fifo,
    Ttl,
    Swr,
}

impl StrategyKind {
    pub fn build(self) -> Arc<dyn EvictionStrategy> {
        match self {
            StrategyKind::Lru => Arc::new(LruStrategy),
            StrategyKind::Lfu => Arc::new(LfuStrategy),
            StrategyKind::Fifo => Arc::new(FifoStrategy),
            StrategyKind::Ttl => Arc::new(TtlStrategy),
            StrategyKind::Swr => Arc::new(SwrStrategy),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Lru => "lru",
            StrategyKind::Lfu => "lfu",
            StrategyKind::Fifo => "fifo",
            StrategyKind::Ttl => "ttl",
            StrategyKind::Swr => "swr",
        }
    }
}

impl FromStr for StrategyKind {
    type Err = CacheError;

    /// Case-insensitive.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "lru" => Ok(StrategyKind::Lru),
            "lfu" => Ok(StrategyKind::Lfu),
            "fifo" => Ok(StrategyKind::Fifo),
            "ttl" => Ok(StrategyKind::Ttl),
            "swr" => Ok(StrategyKind::Swr),
            other => Err(CacheError::Configuration(format!(
                "Unknown eviction strategy '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
