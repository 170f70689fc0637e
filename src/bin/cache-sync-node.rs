//! # Cache Sync Node
//!
//! Standalone process that holds a cache service, runs its background loops
//! (distributed sync, warmup, reconcile, health probe) and logs periodic
//! statistics until it is asked to stop.
//!
//! ## Usage
//!
//! ```bash
//! # Run with config/cache-sync.toml (if present) and defaults
//! cargo run --bin cache-sync-node
//!
//! # Point at another store
//! CACHE_SYNC__REDIS__URL=redis://cache.internal:6379 cargo run --bin cache-sync-node
//! ```

use std::time::Duration;
use tracing::{error, info};

use cache_sync_core::config::ConfigLoader;
use cache_sync_core::logging;
use cache_sync_core::metrics::{init_metrics, shutdown_metrics};
use cache_sync_core::service::CacheService;
use cache_sync_core::shutdown::{listen_for_signals, ShutdownToken};

const STATS_LOG_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_structured_logging();
    init_metrics();

    info!("🚀 Starting cache sync node...");
    info!("   Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        "   Build Mode: {}",
        if cfg!(debug_assertions) {
            "Debug"
        } else {
            "Release"
        }
    );
    info!("   Environment: {}", logging::get_environment());

    let config = ConfigLoader::load().map_err(|e| {
        error!(error = %e, "Failed to load configuration");
        format!("Failed to load configuration: {e}")
    })?;

    let service = CacheService::from_config(config).await;
    service.start().await;

    info!("🎉 Cache sync node started successfully!");
    info!("   Instance: {}", service.instance_id());
    info!("   Press Ctrl+C to shutdown gracefully");

    let shutdown = ShutdownToken::new();
    let _signals = listen_for_signals(shutdown.clone());

    let mut stats_timer = tokio::time::interval(STATS_LOG_INTERVAL);
    stats_timer.tick().await;
    loop {
        tokio::select! {
            () = shutdown.wait() => break,
            _ = stats_timer.tick() => {
                let stats = service.stats();
                info!(
                    hits = stats.hits,
                    misses = stats.misses,
                    hit_rate = stats.hit_rate,
                    errors = stats.errors,
                    circuit_state = ?stats.circuit_state,
                    "📊 Cache statistics"
                );
            }
        }
    }

    info!("🛑 Initiating graceful shutdown...");
    service.shutdown().await;
    shutdown_metrics();

    info!("👋 Cache sync node shutdown complete");
    Ok(())
}
