//! Stampede Cache - cache-aside lookups that survive a thundering herd
//!
//! Values are read from a shared store when present; otherwise one caller per
//! key computes them, guarded by an in-process per-key mutex and a distributed
//! lock held in the same store, and writes them back with a jittered TTL.

pub mod cache;
pub mod config;
pub mod error;
pub mod store;
pub mod tasks;

pub use cache::{CacheOptions, CacheStats, StampedeCache};
pub use config::{Config, StoreBackend};
pub use error::{BoxError, CacheError, Result, StoreError};
pub use store::{LockBackend, MemoryStore, RedisStore, SharedStore};
pub use tasks::spawn_cleanup_task;
