//! Memory Store Module
//!
//! In-process implementation of the shared store and lock backend.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::error::StoreError;
use crate::store::{LockBackend, SharedStore};

// == Stored Entry ==
/// A single value with its expiration metadata.
#[derive(Debug, Clone)]
struct StoredEntry {
    value: Vec<u8>,
    /// TTL the entry was written with, None = no expiration
    ttl: Option<Duration>,
    expires_at: Option<Instant>,
}

impl StoredEntry {
    fn new(value: Vec<u8>, ttl: Duration) -> Self {
        let ttl = (!ttl.is_zero()).then_some(ttl);
        Self {
            value,
            ttl,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    /// An entry is expired once the current time reaches its deadline.
    fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires) => Instant::now() >= expires,
            None => false,
        }
    }
}

// == Memory Store ==
/// Shared store living in the current process.
///
/// Cache entries and lock keys share one map, the same way they share a keyspace
/// in Redis. Expired entries read as absent and are dropped by `purge_expired`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, StoredEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // == Entry TTL ==
    /// Returns the TTL `key` was last written with.
    ///
    /// `Some(Duration::ZERO)` marks an entry without expiration, `None` an absent
    /// or expired key.
    pub async fn entry_ttl(&self, key: &str) -> Option<Duration> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.ttl.unwrap_or(Duration::ZERO))
    }

    // == Remaining TTL ==
    /// Time left before `key` expires, like Redis `PTTL`.
    pub async fn remaining_ttl(&self, key: &str) -> Option<Duration> {
        let entries = self.entries.read().await;
        let entry = entries.get(key).filter(|entry| !entry.is_expired())?;
        entry
            .expires_at
            .map(|expires| expires.saturating_duration_since(Instant::now()))
    }

    // == Purge Expired ==
    /// Removes all expired entries, returning how many were dropped.
    pub async fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired());
        before - entries.len()
    }

    /// Number of stored entries, expired ones included until purged.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), StoredEntry::new(value.to_vec(), ttl));
        Ok(())
    }
}

#[async_trait]
impl LockBackend for MemoryStore {
    async fn try_lock(
        &self,
        lock_key: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut entries = self.entries.write().await;
        if entries.get(lock_key).is_some_and(|entry| !entry.is_expired()) {
            return Ok(false);
        }

        entries.insert(
            lock_key.to_string(),
            StoredEntry::new(token.as_bytes().to_vec(), ttl),
        );
        Ok(true)
    }

    async fn unlock(&self, lock_key: &str, token: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.write().await;
        let held = entries
            .get(lock_key)
            .is_some_and(|entry| !entry.is_expired() && entry.value == token.as_bytes());

        if held {
            entries.remove(lock_key);
        }
        Ok(held)
    }
}
