//! Cache Module
//!
//! Stampede-safe cache-aside lookups: per-key local gating, a store-backed
//! distributed lock, and a double-checked read around the producer call.

mod expiration;
mod lock;
mod orchestrator;
mod registry;
mod stats;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use expiration::Expiration;
pub use lock::{DistributedLock, LockManager, RetryPolicy};
pub use orchestrator::{CacheOptions, StampedeCache};
pub use registry::{KeyGuard, KeyRegistry};
pub use stats::CacheStats;

// == Public Constants ==
/// Prefix turning a cache key into its distributed lock key
pub const LOCK_KEY_PREFIX: &str = "lock:";

/// Default distributed lock time-to-live
pub const DEFAULT_LOCK_TTL: std::time::Duration = std::time::Duration::from_millis(10_000);

/// Default pause between lock acquisition attempts
pub const DEFAULT_LOCK_RETRY_INTERVAL: std::time::Duration = std::time::Duration::from_millis(100);

/// Returns the distributed lock key guarding `key`.
pub fn lock_key(key: &str) -> String {
    format!("{}{}", LOCK_KEY_PREFIX, key)
}
