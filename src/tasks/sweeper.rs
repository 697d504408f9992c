//! Expiration Sweeper
//!
//! Background task that periodically prunes expired cache entries.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::cache::WeakCache;
use crate::error::{CacheError, Result};

/// Idle/running state machine around a single timer task.
///
/// The task holds only a weak handle to the cache: dropping the last `Cache`
/// ends the sweep loop, and dropping the sweeper aborts the task.
#[derive(Debug)]
pub struct ExpirationSweeper {
    interval: Duration,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ExpirationSweeper {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            handle: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Spawns the sweep task on the current tokio runtime.
    ///
    /// # Returns
    /// `Ok(false)` if a sweep task is already running, so repeated calls
    /// never stack timers.
    ///
    /// # Errors
    /// `CacheError::Configuration` when called outside a tokio runtime.
    pub fn start(&self, cache: WeakCache) -> Result<bool> {
        let mut slot = self.handle.lock();
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Ok(false);
        }
        let runtime = Handle::try_current().map_err(|_| {
            CacheError::Configuration("Expiration sweeper requires a tokio runtime".to_string())
        })?;
        *slot = Some(runtime.spawn(sweep(cache, self.interval)));
        Ok(true)
    }

    /// Cancels the sweep task. Returns false if it was not running.
    pub fn stop(&self) -> bool {
        match self.handle.lock().take() {
            Some(handle) => {
                let was_running = !handle.is_finished();
                handle.abort();
                if was_running {
                    debug!("Expiration sweeper stopped");
                }
                was_running
            }
            None => false,
        }
    }
}

impl Drop for ExpirationSweeper {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.get_mut().take() {
            handle.abort();
        }
    }
}

async fn sweep(cache: WeakCache, period: Duration) {
    info!(
        "Starting expiration sweeper with interval of {} ms",
        period.as_millis()
    );

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // the first tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let Some(cache) = cache.upgrade() else {
            debug!("Cache dropped, expiration sweeper exiting");
            break;
        };
        let removed = cache.prune();

        if removed > 0 {
            info!("Expiration sweep: removed {} expired entries", removed);
        } else {
            debug!("Expiration sweep: no expired entries found");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::ManualClock;
    use crate::cache::{Cache, SetOptions};
    use crate::config::CacheConfig;
    use serde_json::json;
    use std::sync::Arc;

    fn swept_cache(interval_ms: u64) -> (Cache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_at(10_000));
        let cache = Cache::new(
            CacheConfig::default()
                .with_check_interval(interval_ms)
                .with_clock(clock.clone()),
        )
        .unwrap();
        (cache, clock)
    }

    #[tokio::test]
    async fn test_sweeper_removes_expired_entries() {
        let (cache, clock) = swept_cache(10);
        assert!(cache.is_sweeping());

        cache.set("expire_soon", json!("value"), SetOptions::new().ttl(5)).unwrap();
        cache.set("long_lived", json!("value"), SetOptions::new()).unwrap();
        clock.advance(5);

        // only the sweeper may remove it; nothing reads the key meanwhile
        for _ in 0..100 {
            if cache.len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().expirations, 1);
        assert!(cache.has("long_lived"));

        cache.stop_sweeper();
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let (cache, _) = swept_cache(1_000);
        assert!(!cache.start_sweeper().unwrap());
        assert!(cache.stop_sweeper());
        assert!(!cache.stop_sweeper());
        assert!(!cache.is_sweeping());

        assert!(cache.start_sweeper().unwrap());
        assert!(cache.is_sweeping());
        cache.destroy();
        assert!(!cache.is_sweeping());
    }

    #[tokio::test]
    async fn test_sweeper_exits_when_cache_dropped() {
        let (cache, _) = swept_cache(5);
        let weak = cache.downgrade();
        drop(cache);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let sweeper = ExpirationSweeper::new(Duration::from_millis(10));
        let cache = Cache::new(CacheConfig::default()).unwrap();
        assert!(matches!(
            sweeper.start(cache.downgrade()),
            Err(CacheError::Configuration(_))
        ));
        assert!(!sweeper.is_running());
    }

    #[test]
    fn test_cache_without_runtime_stays_idle() {
        let cache = Cache::new(CacheConfig::default().with_check_interval(10)).unwrap();
        assert!(!cache.is_sweeping());
        assert!(matches!(
            Cache::new(CacheConfig::default())
                .unwrap()
                .start_sweeper(),
            Err(CacheError::Configuration(_))
        ));
    }
}
