//! Distributed Lock Module
//!
//! TTL-bounded mutual exclusion across every process sharing the store.

use std::fmt;
use std::mem;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::{DEFAULT_LOCK_RETRY_INTERVAL, DEFAULT_LOCK_TTL};
use crate::error::{CacheError, Result, StoreError};
use crate::store::LockBackend;

// == Retry Policy ==
/// Lock lifetime and the linear backoff used while it is contended.
///
/// The retry count is derived so that a caller never waits longer than one
/// full lock lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    ttl: Duration,
    interval: Duration,
}

impl RetryPolicy {
    pub fn new(ttl: Duration, interval: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(CacheError::InvalidConfig(
                "lock retry interval must be positive".to_string(),
            ));
        }
        if ttl < interval {
            return Err(CacheError::InvalidConfig(format!(
                "lock ttl ({:?}) must not be shorter than the retry interval ({:?})",
                ttl, interval
            )));
        }
        Ok(Self { ttl, interval })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Retries allowed after the first attempt: `ttl / interval`.
    pub fn max_retries(&self) -> u32 {
        u32::try_from(self.ttl.as_nanos() / self.interval.as_nanos()).unwrap_or(u32::MAX)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_LOCK_TTL,
            interval: DEFAULT_LOCK_RETRY_INTERVAL,
        }
    }
}

// == Lock Manager ==
/// Acquires distributed locks through a [`LockBackend`].
#[derive(Clone)]
pub struct LockManager {
    backend: Arc<dyn LockBackend>,
    policy: RetryPolicy,
}

impl fmt::Debug for LockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockManager")
            .field("backend", &"<LockBackend>")
            .field("policy", &self.policy)
            .finish()
    }
}

impl LockManager {
    pub fn new(backend: Arc<dyn LockBackend>, policy: RetryPolicy) -> Self {
        Self { backend, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    // == Obtain ==
    /// Tries to acquire `lock_key`, retrying every `interval` while it is held.
    ///
    /// Returns `Ok(None)` once the retry budget is spent; contention is an
    /// expected outcome, not an error. Backend failures abort immediately.
    pub async fn obtain(
        &self,
        lock_key: &str,
    ) -> std::result::Result<Option<DistributedLock>, StoreError> {
        self.obtain_until(lock_key, None).await
    }

    /// Like [`obtain`](Self::obtain), but gives up with `Ok(None)` at `deadline`.
    ///
    /// An attempt cut short by the deadline is followed by an unlock with the
    /// same token, so a grant that raced the deadline is not left behind.
    pub async fn obtain_until(
        &self,
        lock_key: &str,
        deadline: Option<Instant>,
    ) -> std::result::Result<Option<DistributedLock>, StoreError> {
        let token = Uuid::new_v4().to_string();
        let max_retries = self.policy.max_retries();
        let mut retries = 0;

        loop {
            let attempt = self.backend.try_lock(lock_key, &token, self.policy.ttl);
            let acquired = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, attempt).await {
                    Ok(acquired) => acquired?,
                    Err(_) => {
                        debug!("Deadline hit while locking {}", lock_key);
                        if let Err(err) = self.backend.unlock(lock_key, &token).await {
                            warn!("Failed to clear lock attempt on {}: {}", lock_key, err);
                        }
                        return Ok(None);
                    }
                },
                None => attempt.await?,
            };

            if acquired {
                debug!("Obtained lock {} after {} retries", lock_key, retries);
                return Ok(Some(DistributedLock {
                    backend: Arc::clone(&self.backend),
                    key: lock_key.to_string(),
                    token,
                    released: false,
                }));
            }

            if retries >= max_retries {
                debug!("Gave up on lock {} after {} retries", lock_key, retries);
                return Ok(None);
            }
            retries += 1;

            let wake = Instant::now() + self.policy.interval;
            match deadline {
                Some(deadline) if deadline <= wake => {
                    tokio::time::sleep_until(deadline).await;
                    debug!("Deadline hit waiting for lock {}", lock_key);
                    return Ok(None);
                }
                _ => tokio::time::sleep_until(wake).await,
            }
        }
    }
}

// == Distributed Lock ==
/// A held lock, identified by its key and a holder token unique to this acquisition.
///
/// Release it with [`DistributedLock::release`]. A lock dropped without being
/// released (for example when the caller drops the owning future) is released
/// in a background task on the current Tokio runtime.
pub struct DistributedLock {
    backend: Arc<dyn LockBackend>,
    key: String,
    token: String,
    released: bool,
}

impl fmt::Debug for DistributedLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributedLock")
            .field("key", &self.key)
            .field("token", &self.token)
            .field("released", &self.released)
            .finish()
    }
}

impl DistributedLock {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Releases the lock.
    ///
    /// Returns `false` when the lock had already expired, was taken over, or the
    /// backend failed; those cases are logged and otherwise ignored.
    pub async fn release(mut self) -> bool {
        self.released = true;
        release_lock(self.backend.as_ref(), &self.key, &self.token).await
    }
}

impl Drop for DistributedLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let backend = Arc::clone(&self.backend);
        let key = mem::take(&mut self.key);
        let token = mem::take(&mut self.token);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    release_lock(backend.as_ref(), &key, &token).await;
                });
            }
            Err(_) => warn!("Lock {} dropped outside a runtime, left to expire", key),
        }
    }
}

async fn release_lock(backend: &dyn LockBackend, key: &str, token: &str) -> bool {
    match backend.unlock(key, token).await {
        Ok(true) => {
            debug!("Released lock {}", key);
            true
        }
        Ok(false) => {
            warn!("Lock {} expired before release", key);
            false
        }
        Err(err) => {
            warn!("Failed to release lock {}: {}", key, err);
            false
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    struct BrokenBackend;

    #[async_trait]
    impl LockBackend for BrokenBackend {
        async fn try_lock(
            &self,
            _: &str,
            _: &str,
            _: Duration,
        ) -> std::result::Result<bool, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn unlock(&self, _: &str, _: &str) -> std::result::Result<bool, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
    }

    fn policy(ttl_ms: u64, interval_ms: u64) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(ttl_ms),
            Duration::from_millis(interval_ms),
        )
        .unwrap()
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.ttl(), Duration::from_secs(10));
        assert_eq!(policy.interval(), Duration::from_millis(100));
        assert_eq!(policy.max_retries(), 100);
    }

    #[test]
    fn test_policy_rejects_zero_interval() {
        let result = RetryPolicy::new(Duration::from_secs(1), Duration::ZERO);
        assert!(matches!(result, Err(CacheError::InvalidConfig(_))));
    }

    #[test]
    fn test_policy_rejects_ttl_below_interval() {
        let result = RetryPolicy::new(Duration::from_millis(50), Duration::from_millis(100));
        assert!(matches!(result, Err(CacheError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_obtain_free_lock() {
        let store = Arc::new(MemoryStore::new());
        let manager = LockManager::new(store.clone(), RetryPolicy::default());

        let lock = manager.obtain("lock:k1").await.unwrap().unwrap();

        assert_eq!(lock.key(), "lock:k1");
        assert_eq!(store.entry_ttl("lock:k1").await, Some(Duration::from_secs(10)));
        assert!(lock.release().await);
        assert!(store.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_obtain_gives_up_after_one_lifetime() {
        let store = Arc::new(MemoryStore::new());
        let holder = LockManager::new(store.clone(), policy(60_000, 100));
        let contender = LockManager::new(store.clone(), policy(1_000, 100));

        let _held = holder.obtain("lock:k1").await.unwrap().unwrap();

        let start = Instant::now();
        let result = contender.obtain("lock:k1").await.unwrap();

        assert!(result.is_none());
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(1_000));
        assert!(waited < Duration::from_millis(1_100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_obtain_waits_for_release() {
        let store = Arc::new(MemoryStore::new());
        let manager = LockManager::new(store.clone(), policy(1_000, 100));

        let held = manager.obtain("lock:k1").await.unwrap().unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            held.release().await;
        });

        let lock = manager.obtain("lock:k1").await.unwrap();
        assert!(lock.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_obtain_until_stops_at_deadline() {
        let store = Arc::new(MemoryStore::new());
        let manager = LockManager::new(store.clone(), policy(10_000, 100));

        let _held = manager.obtain("lock:k1").await.unwrap().unwrap();

        let start = Instant::now();
        let deadline = start + Duration::from_millis(250);
        let result = manager.obtain_until("lock:k1", Some(deadline)).await.unwrap();

        assert!(result.is_none());
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(250));
        assert!(waited < Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_obtain_until_without_contention() {
        let store = Arc::new(MemoryStore::new());
        let manager = LockManager::new(store.clone(), RetryPolicy::default());

        let deadline = Instant::now() + Duration::from_millis(50);
        let lock = manager.obtain_until("lock:k1", Some(deadline)).await.unwrap();

        assert!(lock.unwrap().release().await);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_tokens_are_unique() {
        let store = Arc::new(MemoryStore::new());
        let manager = LockManager::new(store, RetryPolicy::default());

        let a = manager.obtain("lock:a").await.unwrap().unwrap();
        let b = manager.obtain("lock:b").await.unwrap().unwrap();
        assert_ne!(a.token(), b.token());
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_after_takeover_is_noop() {
        let store = Arc::new(MemoryStore::new());
        let short = LockManager::new(store.clone(), policy(100, 100));
        let long = LockManager::new(store.clone(), policy(10_000, 100));

        let stale = short.obtain("lock:k1").await.unwrap().unwrap();
        tokio::time::advance(Duration::from_millis(150)).await;
        let current = long.obtain("lock:k1").await.unwrap().unwrap();

        assert!(!stale.release().await);
        // The new holder still owns the key
        assert!(!store.try_lock("lock:k1", "other", Duration::from_secs(1)).await.unwrap());
        assert!(current.release().await);
    }

    #[tokio::test]
    async fn test_dropped_lock_is_released() {
        let store = Arc::new(MemoryStore::new());
        let manager = LockManager::new(store.clone(), RetryPolicy::default());

        let lock = manager.obtain("lock:k1").await.unwrap().unwrap();
        drop(lock);

        for _ in 0..10 {
            if store.is_empty().await {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_backend_error_is_returned() {
        let manager = LockManager::new(Arc::new(BrokenBackend), RetryPolicy::default());

        let result = manager.obtain("lock:k1").await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_release_reports_backend_failure() {
        let lock = DistributedLock {
            backend: Arc::new(BrokenBackend),
            key: "lock:k1".to_string(),
            token: "t".to_string(),
            released: false,
        };
        assert!(!lock.release().await);
    }
}
