//! Clock Module
//!
//! Time source abstraction and expiration math. Every cache instance owns its
//! clock, so tests can drive expiration deterministically.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

// == Clock Trait ==
/// Source of "now" in Unix milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

// == System Clock ==
/// Wall clock backed by `chrono::Utc`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        Utc::now().timestamp_millis().max(0) as u64
    }
}

// == Manual Clock ==
/// Clock that only moves when told to.
///
/// Starts at the current wall-clock time so timestamps look realistic in dumps.
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Creates a manual clock frozen at the current wall-clock time.
    pub fn new() -> Self {
        Self::starting_at(SystemClock.now_ms())
    }

    /// Creates a manual clock frozen at `now_ms`.
    pub fn starting_at(now_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(now_ms),
        }
    }

    /// Moves the clock forward by `ms`.
    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    /// Jumps the clock to `now_ms`.
    pub fn set(&self, now_ms: u64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualClock")
            .field("now_ms", &self.now_ms())
            .finish()
    }
}

// == Expiration Math ==
/// Absolute deadline for a lifetime granted at `now`.
pub fn expires_at(now: u64, ttl_ms: Option<u64>) -> Option<u64> {
    ttl_ms.map(|ttl| now.saturating_add(ttl))
}

/// Absolute staleness deadline; never later than the expiration deadline.
///
/// Without an explicit stale window the entry turns stale when it expires.
pub fn stale_at(now: u64, ttl_ms: Option<u64>, stale_ttl_ms: Option<u64>) -> Option<u64> {
    ttl_ms.map(|ttl| now.saturating_add(stale_ttl_ms.unwrap_or(ttl).min(ttl)))
}

/// An entry is expired once `now` reaches its deadline.
pub fn is_past(deadline: Option<u64>, now: u64) -> bool {
    matches!(deadline, Some(at) if now >= at)
}

/// Remaining milliseconds until `deadline`, saturating at zero.
pub fn remaining(deadline: Option<u64>, now: u64) -> Option<u64> {
    deadline.map(|at| at.saturating_sub(now))
}
