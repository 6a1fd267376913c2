//! Error types for the stampede-safe cache
//!
//! Provides unified error handling using thiserror.

use std::time::Duration;

use thiserror::Error;

/// Boxed error returned by a producer callback.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

// == Store Error Enum ==
/// Failure talking to the shared store or the lock backend.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Error reported by the Redis client
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Backend refused or could not serve the request
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

// == Cache Error Enum ==
/// Errors surfaced to callers of the cache.
///
/// Store reads and lock failures never show up here: they are logged and the
/// lookup degrades to a miss or proceeds without the distributed lock.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The producer callback failed; nothing was written
    #[error("producer failed for key {key}")]
    Producer {
        key: String,
        #[source]
        source: BoxError,
    },

    /// The value was produced but writing it back failed
    #[error("failed to write key {key} to store")]
    StoreWrite {
        key: String,
        #[source]
        source: StoreError,
    },

    /// Construction parameters are out of range
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The backend could not be reached while building the cache
    #[error("failed to connect to store")]
    Connect(#[source] StoreError),

    /// The caller's deadline elapsed before the lookup completed
    #[error("deadline of {deadline:?} exceeded for key {key}")]
    DeadlineExceeded { key: String, deadline: Duration },
}

// == Result Type Alias ==
/// Convenience Result type for the cache.
pub type Result<T> = std::result::Result<T, CacheError>;
