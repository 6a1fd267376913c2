//! Key Registry Module
//!
//! Hands out one async mutex per cache key so that only one caller in this
//! process runs the miss path for a key at a time.
//!
//! Entries are reference-counted: a key's mutex is dropped from the registry as
//! soon as nobody holds it or waits on it, so the map only ever contains keys
//! with callers in flight.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Mutex as KeyMutex, OwnedMutexGuard};

type Slots = Arc<Mutex<HashMap<String, Slot>>>;

#[derive(Debug)]
struct Slot {
    mutex: Arc<KeyMutex<()>>,
    /// Callers currently holding or waiting on `mutex`
    refs: usize,
}

// == Key Registry ==
/// Registry of per-key mutexes.
///
/// Cloning yields another handle to the same registry.
#[derive(Debug, Default, Clone)]
pub struct KeyRegistry {
    slots: Slots,
}

impl KeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // == Lock ==
    /// Waits until the caller is the only holder of `key` in this process.
    ///
    /// Callers for different keys never wait on each other. Dropping the
    /// returned guard, or the future before it resolves, gives up the key.
    pub async fn lock(&self, key: &str) -> KeyGuard {
        let lease = self.lease(key);
        let guard = Arc::clone(&lease.mutex).lock_owned().await;
        KeyGuard {
            _guard: guard,
            _lease: lease,
        }
    }

    /// Registers interest in `key`, creating its mutex on first use.
    fn lease(&self, key: &str) -> Lease {
        let mut slots = lock_slots(&self.slots);
        let slot = slots.entry(key.to_string()).or_insert_with(|| Slot {
            mutex: Arc::new(KeyMutex::new(())),
            refs: 0,
        });
        slot.refs += 1;

        Lease {
            slots: Arc::clone(&self.slots),
            key: key.to_string(),
            mutex: Arc::clone(&slot.mutex),
        }
    }

    /// Number of keys with callers holding or waiting on them.
    pub fn len(&self) -> usize {
        lock_slots(&self.slots).len()
    }

    pub fn is_empty(&self) -> bool {
        lock_slots(&self.slots).is_empty()
    }
}

// No critical section leaves the map half-updated, so poisoning is ignored.
fn lock_slots(slots: &Mutex<HashMap<String, Slot>>) -> MutexGuard<'_, HashMap<String, Slot>> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One caller's reference to a registry slot.
#[derive(Debug)]
struct Lease {
    slots: Slots,
    key: String,
    mutex: Arc<KeyMutex<()>>,
}

impl Drop for Lease {
    fn drop(&mut self) {
        let mut slots = lock_slots(&self.slots);
        if let Some(slot) = slots.get_mut(&self.key) {
            slot.refs -= 1;
            if slot.refs == 0 {
                slots.remove(&self.key);
            }
        }
    }
}

// == Key Guard ==
/// Exclusive hold on one key, released on drop.
#[derive(Debug)]
pub struct KeyGuard {
    // Field order matters: the mutex is unlocked before the lease is returned.
    _guard: OwnedMutexGuard<()>,
    _lease: Lease,
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_registry_new() {
        let registry = KeyRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn test_guard_drop_evicts_key() {
        let registry = KeyRegistry::new();

        let guard = registry.lock("k1").await;
        assert_eq!(registry.len(), 1);

        drop(guard);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let registry = KeyRegistry::new();

        let _a = registry.lock("a").await;
        let b = tokio::time::timeout(Duration::from_millis(100), registry.lock("b")).await;

        assert!(b.is_ok(), "lock on another key should not wait");
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_same_key_waits_for_holder() {
        let registry = KeyRegistry::new();

        let guard = registry.lock("k1").await;
        let blocked = tokio::time::timeout(Duration::from_millis(50), registry.lock("k1")).await;
        assert!(blocked.is_err(), "second caller should wait for the first");

        drop(guard);
        let unblocked = tokio::time::timeout(Duration::from_millis(50), registry.lock("k1")).await;
        assert!(unblocked.is_ok());
    }

    #[tokio::test]
    async fn test_waiter_keeps_entry_alive() {
        let registry = KeyRegistry::new();
        let guard = registry.lock("k1").await;

        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move {
                let _guard = registry.lock("k1").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Holder leaves while the waiter is queued: the key must survive
        drop(guard);
        assert_eq!(registry.len(), 1);

        waiter.await.unwrap();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_waiter_releases_interest() {
        let registry = KeyRegistry::new();
        let guard = registry.lock("k1").await;

        let cancelled = tokio::time::timeout(Duration::from_millis(20), registry.lock("k1")).await;
        assert!(cancelled.is_err());

        drop(guard);
        assert!(registry.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_mutual_exclusion_under_contention() {
        let registry = KeyRegistry::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            let inside = Arc::clone(&inside);
            let max_inside = Arc::clone(&max_inside);
            handles.push(tokio::spawn(async move {
                let _guard = registry.lock("shared").await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }
}
