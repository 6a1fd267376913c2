//! Configuration Module
//!
//! Handles loading and managing cache configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Which shared store backs the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// A Redis server reachable at `redis_url`
    Redis,
    /// An in-process store, useful for local runs
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "redis" => Ok(StoreBackend::Redis),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(format!("unknown store backend: {}", other)),
        }
    }
}

/// Cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
/// Ranges are validated when the cache is built, not here.
#[derive(Debug, Clone)]
pub struct Config {
    /// Lower bound (inclusive) of the entry expiration, in seconds
    pub min_timeout: u64,
    /// Upper bound (exclusive) of the entry expiration, in seconds
    pub max_timeout: u64,
    /// Shared store backend
    pub store_backend: StoreBackend,
    /// Redis connection URL
    pub redis_url: String,
    /// Distributed lock time-to-live in milliseconds
    pub lock_ttl_ms: u64,
    /// Pause between lock acquisition attempts in milliseconds
    pub lock_retry_ms: u64,
    /// Concurrent callers per key in the probe binary
    pub concurrency: usize,
    /// Simulated production cost in the probe binary, in milliseconds
    pub producer_delay_ms: u64,
    /// Memory backend purge interval in seconds
    pub cleanup_interval: u64,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `MIN_TIMEOUT` - Minimum expiration in seconds (default: 5)
    /// - `MAX_TIMEOUT` - Maximum expiration in seconds, exclusive (default: 10)
    /// - `STORE_BACKEND` - `redis` or `memory` (default: redis)
    /// - `REDIS_URL` - Redis connection URL (default: redis://localhost:6379)
    /// - `LOCK_TTL_MS` - Distributed lock TTL (default: 10000)
    /// - `LOCK_RETRY_MS` - Lock retry interval (default: 100)
    /// - `CONCURRENCY` - Probe callers per key (default: 5)
    /// - `PRODUCER_DELAY_MS` - Probe producer delay (default: 50)
    /// - `CLEANUP_INTERVAL` - Memory purge frequency in seconds (default: 1)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            min_timeout: env_or("MIN_TIMEOUT", defaults.min_timeout),
            max_timeout: env_or("MAX_TIMEOUT", defaults.max_timeout),
            store_backend: env_or("STORE_BACKEND", defaults.store_backend),
            redis_url: env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            lock_ttl_ms: env_or("LOCK_TTL_MS", defaults.lock_ttl_ms),
            lock_retry_ms: env_or("LOCK_RETRY_MS", defaults.lock_retry_ms),
            concurrency: env_or("CONCURRENCY", defaults.concurrency),
            producer_delay_ms: env_or("PRODUCER_DELAY_MS", defaults.producer_delay_ms),
            cleanup_interval: env_or("CLEANUP_INTERVAL", defaults.cleanup_interval),
        }
    }

    /// Distributed lock TTL as a Duration.
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_millis(self.lock_ttl_ms)
    }

    /// Lock retry interval as a Duration.
    pub fn lock_retry_interval(&self) -> Duration {
        Duration::from_millis(self.lock_retry_ms)
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            min_timeout: 5,
            max_timeout: 10,
            store_backend: StoreBackend::Redis,
            redis_url: "redis://localhost:6379".to_string(),
            lock_ttl_ms: 10_000,
            lock_retry_ms: 100,
            concurrency: 5,
            producer_delay_ms: 50,
            cleanup_interval: 1,
        }
    }
}
