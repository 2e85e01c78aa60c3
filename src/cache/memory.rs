//! In-memory LRU tier.
//!
//! Bounded by entry count. The `lru` crate gives O(1) lookup, touch and
//! eviction (hash index over a doubly linked list); a single mutex serializes
//! every operation, including the recency touch performed by [`MemoryStore::get`].

use std::num::NonZeroUsize;

use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

use super::key::CacheKey;
use crate::error::{KrofiError, Result};

/// Capacity-bounded LRU map from [`CacheKey`] to payload.
pub struct MemoryStore {
    inner: Mutex<LruCache<CacheKey, Bytes>>,
    max_entries: NonZeroUsize,
}

impl MemoryStore {
    /// Create a store holding at most `max_entries` payloads.
    ///
    /// A capacity of zero is a configuration error.
    pub fn new(max_entries: usize) -> Result<Self> {
        let max_entries = NonZeroUsize::new(max_entries).ok_or_else(|| {
            KrofiError::Config("memory cache capacity must be at least 1".into())
        })?;
        Ok(Self {
            inner: Mutex::new(LruCache::new(max_entries)),
            max_entries,
        })
    }

    /// Look up `key`, marking it most-recently-used on a hit.
    pub fn get(&self, key: &CacheKey) -> Option<Bytes> {
        self.inner.lock().get(key).cloned()
    }

    /// Insert or replace `key`.
    ///
    /// Replacing an existing key touches it without consuming extra
    /// capacity. Inserting a new key into a full store evicts exactly the
    /// least-recently-used entry first.
    pub fn set(&self, key: CacheKey, payload: Bytes) {
        let evicted = self.inner.lock().push(key.clone(), payload);
        if let Some((old_key, _)) = evicted {
            // `push` also hands back the previous value when replacing.
            if old_key != key {
                debug!(key = %old_key.short(), "Evicting LRU memory entry");
            }
        }
    }

    /// Drop `key` from memory. Returns `true` when it was present.
    pub fn remove(&self, key: &CacheKey) -> bool {
        self.inner.lock().pop(key).is_some()
    }

    /// Presence check that does not affect recency.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.inner.lock().contains(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_entries.get()
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Keys ordered from least- to most-recently-used.
    pub fn keys_lru_order(&self) -> Vec<CacheKey> {
        let guard = self.inner.lock();
        // `iter` walks most-recent first.
        let mut keys: Vec<CacheKey> = guard.iter().map(|(k, _)| k.clone()).collect();
        keys.reverse();
        keys
    }
}

// ============================================================================
// Tests
// ============================================================================
