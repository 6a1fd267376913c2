//! Lookup Orchestrator
//!
//! `get_or_set_when_not_exists`: read-through with single-flight production.
//!
//! For one key, callers in this process are serialized by the [`KeyRegistry`];
//! callers in different processes are serialized by a [`DistributedLock`] on
//! `lock:<key>`. A miss re-reads the store under the distributed lock before
//! calling the producer, so a value stored by another process while this one
//! waited is returned instead of being produced again.
//!
//! When the lock cannot be obtained the lookup carries on without it. Two
//! processes may then both produce the same key; both writes succeed and the
//! last one wins.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::cache::stats::StatsRecorder;
use crate::cache::{
    lock_key, CacheStats, DistributedLock, Expiration, KeyRegistry, LockManager, RetryPolicy,
    DEFAULT_LOCK_RETRY_INTERVAL, DEFAULT_LOCK_TTL,
};
use crate::config::Config;
use crate::error::{BoxError, CacheError, Result};
use crate::store::{LockBackend, MemoryStore, RedisStore, SharedStore};

// == Cache Options ==
/// Construction parameters, validated by [`StampedeCache::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheOptions {
    /// Lower bound (inclusive) of entry expiration, in seconds.
    ///
    /// With `0`, a write that draws a zero TTL is stored without expiration.
    pub min_timeout_secs: u64,
    /// Upper bound (exclusive) of entry expiration, in seconds
    pub max_timeout_secs: u64,
    /// Distributed lock time-to-live
    pub lock_ttl: Duration,
    /// Pause between lock acquisition attempts
    pub lock_retry_interval: Duration,
}

impl CacheOptions {
    pub fn new(min_timeout_secs: u64, max_timeout_secs: u64) -> Self {
        Self {
            min_timeout_secs,
            max_timeout_secs,
            lock_ttl: DEFAULT_LOCK_TTL,
            lock_retry_interval: DEFAULT_LOCK_RETRY_INTERVAL,
        }
    }
}

impl From<&Config> for CacheOptions {
    fn from(config: &Config) -> Self {
        Self {
            min_timeout_secs: config.min_timeout,
            max_timeout_secs: config.max_timeout,
            lock_ttl: config.lock_ttl(),
            lock_retry_interval: config.lock_retry_interval(),
        }
    }
}

// == Stampede Cache ==
/// Cache-aside lookups over a shared store, safe against stampedes.
pub struct StampedeCache {
    store: Arc<dyn SharedStore>,
    locks: LockManager,
    registry: KeyRegistry,
    expiration: Expiration,
    stats: StatsRecorder,
}

impl std::fmt::Debug for StampedeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StampedeCache")
            .field("locks", &self.locks)
            .field("registry", &self.registry)
            .field("expiration", &self.expiration)
            .finish()
    }
}

impl StampedeCache {
    // == Constructor ==
    /// Builds a cache over injected store and lock backends.
    ///
    /// Fails with [`CacheError::InvalidConfig`] unless
    /// `min_timeout_secs < max_timeout_secs` and the lock policy is usable.
    pub fn new(
        store: Arc<dyn SharedStore>,
        locks: Arc<dyn LockBackend>,
        options: CacheOptions,
    ) -> Result<Self> {
        let expiration = Expiration::new(options.min_timeout_secs, options.max_timeout_secs)?;
        let policy = RetryPolicy::new(options.lock_ttl, options.lock_retry_interval)?;

        Ok(Self {
            store,
            locks: LockManager::new(locks, policy),
            registry: KeyRegistry::new(),
            expiration,
            stats: StatsRecorder::default(),
        })
    }

    /// Builds a cache backed by the Redis server at `url`.
    pub async fn connect(url: &str, options: CacheOptions) -> Result<Self> {
        let store = Arc::new(RedisStore::connect(url).await.map_err(CacheError::Connect)?);
        Self::new(store.clone(), store, options)
    }

    /// Builds a cache whose store and locks live in `store`.
    pub fn in_memory(store: Arc<MemoryStore>, options: CacheOptions) -> Result<Self> {
        Self::new(store.clone(), store, options)
    }

    /// Snapshot of lookup counters.
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    /// Keys with lookups currently in flight in this process.
    pub fn keys_in_flight(&self) -> usize {
        self.registry.len()
    }

    // == Get Or Set ==
    /// Returns the stored value for `key`, producing and storing it on a miss.
    ///
    /// Only producer failures ([`CacheError::Producer`]) and failed write-backs
    /// ([`CacheError::StoreWrite`]) are returned. Store read errors count as
    /// misses and lock failures let the lookup proceed unlocked; both are logged.
    pub async fn get_or_set_when_not_exists<F, Fut, E>(
        &self,
        key: &str,
        producer: F,
    ) -> Result<Vec<u8>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Vec<u8>, E>>,
        E: Into<BoxError>,
    {
        self.lookup(key, None, producer).await
    }

    /// Like [`get_or_set_when_not_exists`](Self::get_or_set_when_not_exists),
    /// bounded by `deadline`.
    ///
    /// Every step shares the one deadline. On expiry the key is released
    /// locally, a held distributed lock is released before this returns, nothing
    /// is written, and [`CacheError::DeadlineExceeded`] is returned.
    pub async fn get_or_set_within<F, Fut, E>(
        &self,
        key: &str,
        deadline: Duration,
        producer: F,
    ) -> Result<Vec<u8>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Vec<u8>, E>>,
        E: Into<BoxError>,
    {
        self.lookup(key, Some(deadline), producer).await
    }

    async fn lookup<F, Fut, E>(
        &self,
        key: &str,
        budget: Option<Duration>,
        producer: F,
    ) -> Result<Vec<u8>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Vec<u8>, E>>,
        E: Into<BoxError>,
    {
        let deadline = budget.map(|budget| Instant::now() + budget);

        let Some(_guard) = until(deadline, self.registry.lock(key)).await else {
            return Err(deadline_exceeded(key, budget));
        };

        match until(deadline, self.read(key)).await {
            Some(Some(value)) => {
                debug!("Cache hit for {}", key);
                self.stats.record_hit();
                return Ok(value);
            }
            Some(None) => {}
            None => return Err(deadline_exceeded(key, budget)),
        }
        self.stats.record_miss();

        let lock = self.obtain_lock(key, deadline).await;
        if is_past(deadline) {
            if let Some(lock) = lock {
                lock.release().await;
            }
            return Err(deadline_exceeded(key, budget));
        }

        let result = until(deadline, self.fill(key, lock.is_some(), producer)).await;
        if let Some(lock) = lock {
            lock.release().await;
        }
        result.unwrap_or_else(|| Err(deadline_exceeded(key, budget)))
    }

    /// Miss path: double-check under the lock, produce, write back.
    async fn fill<F, Fut, E>(&self, key: &str, locked: bool, producer: F) -> Result<Vec<u8>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Vec<u8>, E>>,
        E: Into<BoxError>,
    {
        if locked {
            if let Some(value) = self.read(key).await {
                debug!("Cache filled by another holder for {}", key);
                self.stats.record_double_check_hit();
                return Ok(value);
            }
        }

        let value = match producer().await {
            Ok(value) => value,
            Err(err) => {
                self.stats.record_producer_failure();
                return Err(CacheError::Producer {
                    key: key.to_string(),
                    source: err.into(),
                });
            }
        };
        self.stats.record_production();

        let ttl = self.expiration.draw();
        if let Err(source) = self.store.set(key, &value, ttl).await {
            error!("Failed to store {}: {}", key, source);
            self.stats.record_write_failure();
            return Err(CacheError::StoreWrite {
                key: key.to_string(),
                source,
            });
        }

        debug!("Stored {} ({} bytes) with ttl {:?}", key, value.len(), ttl);
        Ok(value)
    }

    /// Store read where any failure counts as a miss.
    async fn read(&self, key: &str) -> Option<Vec<u8>> {
        match self.store.get(key).await {
            Ok(value) => value,
            Err(err) => {
                warn!("Error reading {} from store: {}", key, err);
                self.stats.record_read_error();
                None
            }
        }
    }

    /// Distributed lock for `key`, or None to proceed without one.
    async fn obtain_lock(&self, key: &str, deadline: Option<Instant>) -> Option<DistributedLock> {
        let lock_key = lock_key(key);
        match self.locks.obtain_until(&lock_key, deadline).await {
            Ok(Some(lock)) => {
                self.stats.record_lock_obtained();
                Some(lock)
            }
            // The caller reports the deadline
            Ok(None) if is_past(deadline) => None,
            Ok(None) => {
                warn!(
                    "Lock {} still held after {:?}, proceeding without it",
                    lock_key,
                    self.locks.policy().ttl()
                );
                self.stats.record_lock_unavailable();
                None
            }
            Err(err) => {
                warn!("Error obtaining lock {}: {}", lock_key, err);
                self.stats.record_lock_unavailable();
                None
            }
        }
    }
}

/// Awaits `fut`, or gives up with `None` at `deadline`.
async fn until<T>(deadline: Option<Instant>, fut: impl Future<Output = T>) -> Option<T> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, fut).await.ok(),
        None => Some(fut.await),
    }
}

fn is_past(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|deadline| Instant::now() >= deadline)
}

fn deadline_exceeded(key: &str, budget: Option<Duration>) -> CacheError {
    let deadline = budget.unwrap_or_default();
    warn!("Lookup for {} exceeded its deadline of {:?}", key, deadline);
    CacheError::DeadlineExceeded {
        key: key.to_string(),
        deadline,
    }
}
