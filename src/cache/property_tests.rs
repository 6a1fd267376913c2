//! Property-Based Tests for Cache Module
//!
//! Uses proptest to check the expiration range and registry bookkeeping.

use proptest::prelude::*;
use std::collections::HashSet;
use std::time::Duration;

use crate::cache::{Expiration, KeyRegistry, RetryPolicy};

// == Strategies ==
/// Generates cache keys from a small alphabet so sequences repeat keys
fn key_strategy() -> impl Strategy<Value = String> {
    "[a-d]{1,2}".prop_map(|s| s)
}

/// Generates valid `(min, max)` expiration bounds
fn range_strategy() -> impl Strategy<Value = (u64, u64)> {
    (0u64..10_000, 1u64..10_000).prop_map(|(min, width)| (min, min + width))
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // Every drawn TTL lies in [min, max)
    #[test]
    fn prop_expiration_within_bounds((min, max) in range_strategy()) {
        let expiration = Expiration::new(min, max).unwrap();

        for _ in 0..50 {
            let ttl = expiration.draw();
            prop_assert!(ttl >= Duration::from_secs(min), "ttl {:?} below {}s", ttl, min);
            prop_assert!(ttl < Duration::from_secs(max), "ttl {:?} not below {}s", ttl, max);
        }
    }

    // Construction fails whenever the range is empty or inverted
    #[test]
    fn prop_expiration_rejects_empty_ranges(min in 0u64..10_000, below in 0u64..10_000) {
        let max = min.saturating_sub(below);
        prop_assert!(Expiration::new(min, max).is_err());
    }

    // Total wait budget never exceeds one lock lifetime
    #[test]
    fn prop_retry_budget_within_ttl(ttl_ms in 1u64..60_000, interval_ms in 1u64..1_000) {
        prop_assume!(interval_ms <= ttl_ms);
        let policy = RetryPolicy::new(
            Duration::from_millis(ttl_ms),
            Duration::from_millis(interval_ms),
        )
        .unwrap();

        let budget = policy.interval() * policy.max_retries();
        prop_assert!(budget <= policy.ttl());
        prop_assert!(budget + policy.interval() > policy.ttl());
    }

    // Holding guards keeps exactly the distinct keys registered; dropping them empties it
    #[test]
    fn prop_registry_tracks_held_keys(keys in prop::collection::vec(key_strategy(), 1..20)) {
        let registry = KeyRegistry::new();
        let distinct: HashSet<String> = keys.iter().cloned().collect();

        runtime().block_on(async {
            let mut guards = Vec::new();
            for key in &distinct {
                guards.push(registry.lock(key).await);
            }
            assert_eq!(registry.len(), distinct.len());

            drop(guards);
            assert!(registry.is_empty());

            // Sequential lock/unlock of repeated keys never accumulates entries
            for key in &keys {
                let _guard = registry.lock(key).await;
                assert_eq!(registry.len(), 1);
            }
            assert!(registry.is_empty());
        });
    }
}
