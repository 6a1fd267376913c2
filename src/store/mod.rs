//! Store Module
//!
//! Client-side view of the shared key-value store and the lock primitives built on it.
//!
//! Both traits are object safe so the cache can take them as injected
//! `Arc<dyn ...>` dependencies; `MemoryStore` and `RedisStore` implement both.

mod memory;
mod redis_store;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

/// Get/set access to a key-value store with per-entry expiration.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Reads `key`; `Ok(None)` means the key is absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Writes `value` under `key`, expiring after `ttl`.
    ///
    /// A zero `ttl` stores the entry without expiration.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError>;
}

/// Store primitives needed by the distributed lock.
#[async_trait]
pub trait LockBackend: Send + Sync {
    /// Atomically claims `lock_key` for `token` unless it is already held.
    ///
    /// Returns `Ok(false)` when another holder owns the key.
    async fn try_lock(&self, lock_key: &str, token: &str, ttl: Duration)
        -> Result<bool, StoreError>;

    /// Deletes `lock_key` only if it is still held by `token`.
    ///
    /// Returns `Ok(false)` when the lock already expired or changed hands.
    async fn unlock(&self, lock_key: &str, token: &str) -> Result<bool, StoreError>;
}
