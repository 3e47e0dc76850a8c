//! A map of locks keyed by arbitrary values.
//!
//! Used as a single-flight guard around upstream fetches: N simultaneous
//! requests for the same neighbor coalesce into one adapter call plus N
//! cache reads. Acquisition per key is FIFO-fair, independent keys never
//! block each other, and entries without holders or waiters are reclaimed.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

struct Entry {
    /// Holders plus waiters currently interested in this key.
    interested: usize,
    lock: Arc<AsyncMutex<()>>,
}

struct Registry<K> {
    entries: Mutex<HashMap<K, Entry>>,
}

/// Keyed lock map. Cloning is cheap and shares the underlying registry.
pub struct KeyedLock<K: Eq + Hash + Clone> {
    registry: Arc<Registry<K>>,
}

impl<K: Eq + Hash + Clone> Default for KeyedLock<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone> Clone for KeyedLock<K> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLock<K> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                entries: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Acquire the lock for `key`, waiting behind earlier acquirers of the
    /// same key. The lock is released when the returned guard drops.
    pub async fn acquire(&self, key: K) -> KeyedGuard<K> {
        let lock = {
            let mut entries = self.registry.entries.lock();
            let entry = entries.entry(key.clone()).or_insert_with(|| Entry {
                interested: 0,
                lock: Arc::new(AsyncMutex::new(())),
            });
            entry.interested += 1;
            Arc::clone(&entry.lock)
        };

        let permit = lock.lock_owned().await;
        KeyedGuard {
            registry: Arc::clone(&self.registry),
            key: Some(key),
            _permit: permit,
        }
    }

    /// Number of keys currently tracked (held or waited on).
    #[must_use]
    pub fn len(&self) -> usize {
        self.registry.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Guard returned by [`KeyedLock::acquire`].
pub struct KeyedGuard<K: Eq + Hash + Clone> {
    registry: Arc<Registry<K>>,
    key: Option<K>,
    _permit: OwnedMutexGuard<()>,
}

impl<K: Eq + Hash + Clone> Drop for KeyedGuard<K> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            let mut entries = self.registry.entries.lock();
            if let Some(entry) = entries.get_mut(&key) {
                entry.interested -= 1;
                if entry.interested == 0 {
                    entries.remove(&key);
                }
            }
        }
    }
}
