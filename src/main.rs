//! # BOL Tracking - Main Entry Point
//!
//! Owns the process lifecycle:
//!
//! 1. logging and configuration
//! 2. key-value store connection (with backoff; the service starts even if
//!    the store stays down, lookups then bypass the cache)
//! 3. tracking sources and the lookup strategy
//! 4. the HTTP server, until SIGINT or SIGTERM
//! 5. orderly disconnect from the store
//!
//! Configuration is read from `BOL_CONFIG_PATH` (default
//! `config/tracking.yaml`) with environment overrides on top.

use anyhow::Context;
use bol_tracking::caching::{
    CacheAsideResolver, CacheClient, CacheStore, InMemoryCache, RedisCache,
};
use bol_tracking::core::config::{AppConfig, CacheBackend};
use bol_tracking::gateway::{shutdown_signal, AppState, TrackingServer};
use bol_tracking::lookup::{PrimarySource, SheetClient, TrackingLookup, VendorClient};
use bol_tracking::observability::init_logging;
use std::sync::Arc;
use tracing::{info, warn};

const DEFAULT_CONFIG_PATH: &str = "config/tracking.yaml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path =
        std::env::var("BOL_CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = AppConfig::load_or_default(&config_path)
        .await
        .with_context(|| format!("loading configuration from {}", config_path))?;

    init_logging(&config.logging).context("initializing logging")?;
    info!("🚀 Starting BOL tracking service v{}", env!("CARGO_PKG_VERSION"));

    let store = connect_store(&config).await?;
    let cache = Arc::new(CacheClient::new(store));

    let lookup = build_lookup(&config, cache.clone())?;
    let state = AppState {
        lookup: Arc::new(lookup),
        cache: cache.clone(),
    };

    let server = TrackingServer::new(state, &config.server)?;
    let served = server.serve(shutdown_signal()).await;

    info!("🛑 Server stopped, disconnecting from the cache");
    cache.shutdown().await;

    served?;
    info!("✅ BOL tracking service shutdown complete");
    Ok(())
}

async fn connect_store(config: &AppConfig) -> anyhow::Result<Arc<dyn CacheStore>> {
    match config.cache.backend {
        CacheBackend::Memory => {
            info!("Using in-memory cache store");
            Ok(Arc::new(InMemoryCache::new()))
        }
        CacheBackend::Redis => {
            let redis = RedisCache::connect(config.cache.redis.clone())
                .await
                .context("configuring Redis")?;
            if !redis.is_connected().await {
                warn!("⚠️  Redis unavailable, serving without cache");
            }
            Ok(Arc::new(redis))
        }
    }
}

fn build_lookup(config: &AppConfig, cache: Arc<CacheClient>) -> anyhow::Result<TrackingLookup> {
    let offset = config.lookup.utc_offset();

    let primary: Option<Arc<dyn PrimarySource>> = if config.vendor.enabled {
        let vendor = VendorClient::new(config.vendor.clone(), cache.clone(), offset)
            .context("configuring vendor client")?;
        Some(Arc::new(vendor))
    } else {
        info!("Vendor tracking API disabled, using the spreadsheet only");
        None
    };

    let sheet = SheetClient::new(config.sheet.clone(), config.timeline.clone(), offset)
        .context("configuring sheet client")?;

    Ok(TrackingLookup::new(
        primary,
        Arc::new(sheet),
        CacheAsideResolver::new(cache),
        &config.lookup,
    ))
}
