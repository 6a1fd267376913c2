//! Expiration Module
//!
//! Randomized per-write TTLs, so entries written together do not expire together.

use std::time::Duration;

use rand::Rng;

use crate::error::{CacheError, Result};

// == Expiration ==
/// Uniform TTL range `[min, max)` in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expiration {
    min_secs: u64,
    max_secs: u64,
}

impl Expiration {
    /// Creates a range, rejecting empty or inverted bounds.
    pub fn new(min_secs: u64, max_secs: u64) -> Result<Self> {
        if min_secs >= max_secs {
            return Err(CacheError::InvalidConfig(format!(
                "min timeout ({}s) must be lower than max timeout ({}s)",
                min_secs, max_secs
            )));
        }
        Ok(Self { min_secs, max_secs })
    }

    /// Draws a TTL independently for one write.
    ///
    /// A zero draw (only possible with `min = 0`) means no expiration to the store.
    pub fn draw(&self) -> Duration {
        Duration::from_secs(rand::rng().random_range(self.min_secs..self.max_secs))
    }

    pub fn min(&self) -> Duration {
        Duration::from_secs(self.min_secs)
    }

    pub fn max(&self) -> Duration {
        Duration::from_secs(self.max_secs)
    }
}
