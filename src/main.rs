//! Mini Cache demo
//!
//! Builds a cache from environment variables, runs a small workload against
//! it and keeps the expiration sweeper running until Ctrl+C or SIGTERM.
//!
//! Set `CACHE_STORAGE_DIR` to persist entries on disk between runs.

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use mini_cache::plugins::{CompressionPlugin, LoggingPlugin};
use mini_cache::storage::FileStorage;
use mini_cache::{Cache, CacheConfig, EventKind, SetOptions, StorageBackend};
use serde_json::json;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Entry point for the demo.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Create the cache (starts the sweeper when an interval is configured)
/// 4. Run the workload and log statistics
/// 5. Wait for a shutdown signal, then destroy the cache
#[tokio::main]
async fn main() -> Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mini_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Mini Cache demo");

    let mut config = CacheConfig::from_env()
        .with_plugin(CompressionPlugin::default())
        .with_plugin(LoggingPlugin::default().redacted());
    if let Ok(dir) = env::var("CACHE_STORAGE_DIR") {
        let storage = FileStorage::new(&dir).context("Failed to open storage directory")?;
        config = config.with_storage(StorageBackend::sync(storage));
    }
    info!("Configuration loaded: {:?}", config);

    let cache = Cache::new(config).context("Invalid cache configuration")?;
    let loaded = cache.load()?;
    if loaded > 0 {
        info!("Loaded {} entries from storage", loaded);
    }
    cache.on(EventKind::Evict, |event| {
        info!("Evicted: {:?}", event.key());
    });

    run_workload(&cache).await?;

    let stats = serde_json::to_string_pretty(&cache.stats())?;
    info!("Cache statistics:\n{}", stats);

    if cache.is_sweeping() {
        info!("Expiration sweeper running, press Ctrl+C to exit");
        shutdown_signal().await;
    }

    cache.destroy();
    info!("Demo shutdown complete");
    Ok(())
}

/// Exercises namespaces, tags, compute-on-miss and expiration.
async fn run_workload(cache: &Cache) -> Result<()> {
    let users = cache.namespace("users");
    for (id, name) in [("1", "ada"), ("2", "grace"), ("3", "linus")] {
        users.set(
            id,
            json!({ "name": name }),
            SetOptions::new().tag("users").ttl(60_000),
        )?;
    }

    let report = cache.get_or_set(
        "report:daily",
        || "x".repeat(2_048),
        SetOptions::new().tag("reports"),
    )?;
    info!(
        "Report cached ({} chars), {} bytes in memory",
        report.as_str().map_or(0, str::len),
        cache.memory_usage()
    );

    for i in 0..8 {
        cache.set(&format!("scratch:{}", i), i, SetOptions::new().ttl(50))?;
    }
    info!("Users namespace holds: {:?}", users.keys());

    let removed = cache.delete_by_tag("reports")?;
    info!("Invalidated {} report entries", removed);

    tokio::time::sleep(Duration::from_millis(60)).await;
    let pruned = cache.prune();
    info!("Pruned {} expired scratch entries", pruned);
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
