//! Stampede Cache probe
//!
//! Fires concurrent lookups for each key given on the command line against the
//! configured store, then prints the lookup statistics as JSON.
//!
//! ```text
//! STORE_BACKEND=memory CONCURRENCY=20 stampede_cache k1 k2
//! ```

use std::env;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context};
use tokio::signal;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stampede_cache::{
    spawn_cleanup_task, CacheOptions, Config, MemoryStore, StampedeCache, StoreBackend,
};

/// Main entry point for the probe.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Build the cache over the configured store
/// 4. Start the TTL cleanup task for the memory backend
/// 5. Run concurrent lookups until done or interrupted by SIGINT/SIGTERM
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stampede_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let keys: Vec<String> = env::args().skip(1).collect();
    if keys.is_empty() {
        bail!("usage: stampede_cache KEY...");
    }

    let config = Config::from_env();
    info!(
        "Configuration loaded: timeouts=[{}s, {}s), backend={:?}, lock_ttl={}ms, lock_retry={}ms, concurrency={}",
        config.min_timeout,
        config.max_timeout,
        config.store_backend,
        config.lock_ttl_ms,
        config.lock_retry_ms,
        config.concurrency
    );

    let options = CacheOptions::from(&config);
    let (cache, cleanup_handle) = match config.store_backend {
        StoreBackend::Memory => {
            let store = Arc::new(MemoryStore::new());
            let handle = spawn_cleanup_task(store.clone(), config.cleanup_interval);
            (StampedeCache::in_memory(store, options)?, Some(handle))
        }
        StoreBackend::Redis => {
            let cache = StampedeCache::connect(&config.redis_url, options)
                .await
                .with_context(|| format!("failed to connect to {}", config.redis_url))?;
            (cache, None)
        }
    };
    let cache = Arc::new(cache);
    info!("Cache initialized");

    tokio::select! {
        result = run_probe(cache.clone(), keys, &config) => result?,
        _ = shutdown_signal() => {}
    }

    if let Some(handle) = cleanup_handle {
        handle.abort();
    }

    println!("{}", serde_json::to_string_pretty(&cache.stats())?);
    Ok(())
}

/// Runs `config.concurrency` lookups per key, all at once.
async fn run_probe(
    cache: Arc<StampedeCache>,
    keys: Vec<String>,
    config: &Config,
) -> anyhow::Result<()> {
    let delay = Duration::from_millis(config.producer_delay_ms);
    let mut lookups = JoinSet::new();

    for key in keys {
        for caller in 0..config.concurrency {
            let cache = cache.clone();
            let key = key.clone();
            lookups.spawn(async move {
                let result = cache
                    .get_or_set_when_not_exists(&key, || produce(&key, delay))
                    .await;
                (key, caller, result)
            });
        }
    }

    while let Some(joined) = lookups.join_next().await {
        let (key, caller, result) = joined?;
        match result {
            Ok(value) => info!(
                "Caller {} got {} for {}",
                caller,
                String::from_utf8_lossy(&value),
                key
            ),
            Err(err) => error!(
                "Caller {} failed for {}: {:#}",
                caller,
                key,
                anyhow::Error::from(err)
            ),
        }
    }
    Ok(())
}

/// Stand-in for expensive work: waits, then stamps the key with the time.
async fn produce(key: &str, delay: Duration) -> anyhow::Result<Vec<u8>> {
    tokio::time::sleep(delay).await;
    let stamp = SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis();
    Ok(format!("{}@{}", key, stamp).into_bytes())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!("Failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping probe...");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping probe...");
        }
    }
}
