//! Response caches used inside the source adapters.
//!
//! Both caches can be disabled through the per-source configuration: a
//! disabled cache misses on every read and ignores writes, which changes
//! performance but never correctness.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

use crate::api::{NeighborsResponse, RoutesResponse};

struct CachedRoutes {
    response: Arc<RoutesResponse>,
    inserted_at: Instant,
}

/// Bounded per-neighbor cache of route responses with LRU eviction.
///
/// Entries expire after the configured TTL; an expired entry is
/// indistinguishable from an absent one.
pub struct RoutesCache {
    disabled: bool,
    ttl: Duration,
    entries: Mutex<LruCache<String, CachedRoutes>>,
}

impl RoutesCache {
    #[must_use]
    pub fn new(disabled: bool, max_entries: usize, ttl: Duration) -> Self {
        let capacity =
            NonZeroUsize::new(max_entries).unwrap_or_else(|| NonZeroUsize::new(128).unwrap());
        Self {
            disabled,
            ttl,
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    #[must_use]
    pub fn get(&self, neighbor_id: &str) -> Option<Arc<RoutesResponse>> {
        if self.disabled {
            return None;
        }
        let mut entries = self.entries.lock();
        let expired = match entries.get(neighbor_id) {
            None => return None,
            Some(cached) => {
                if cached.inserted_at.elapsed() < self.ttl {
                    return Some(Arc::clone(&cached.response));
                }
                true
            }
        };
        if expired {
            entries.pop(neighbor_id);
        }
        None
    }

    pub fn set(&self, neighbor_id: &str, response: Arc<RoutesResponse>) {
        if self.disabled {
            return;
        }
        self.entries.lock().put(
            neighbor_id.to_string(),
            CachedRoutes {
                response,
                inserted_at: Instant::now(),
            },
        );
    }
}

struct CachedNeighbors {
    response: Arc<NeighborsResponse>,
    inserted_at: Instant,
}

/// Single-slot cache of the full neighbors list of one source.
pub struct NeighborsCache {
    disabled: bool,
    ttl: Duration,
    slot: Mutex<Option<CachedNeighbors>>,
}

impl NeighborsCache {
    #[must_use]
    pub fn new(disabled: bool, ttl: Duration) -> Self {
        Self {
            disabled,
            ttl,
            slot: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn get(&self) -> Option<Arc<NeighborsResponse>> {
        if self.disabled {
            return None;
        }
        let mut slot = self.slot.lock();
        let expired = match slot.as_ref() {
            None => return None,
            Some(cached) => {
                if cached.inserted_at.elapsed() < self.ttl {
                    return Some(Arc::clone(&cached.response));
                }
                true
            }
        };
        if expired {
            *slot = None;
        }
        None
    }

    pub fn set(&self, response: Arc<NeighborsResponse>) {
        if self.disabled {
            return;
        }
        *self.slot.lock() = Some(CachedNeighbors {
            response,
            inserted_at: Instant::now(),
        });
    }
}
