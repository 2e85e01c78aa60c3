//! Two-tier cache front: memory first, then disk.
//!
//! Reads promote disk hits into memory. Writes go to disk first, then
//! memory; a failed disk write is logged and reported but the memory tier
//! is still populated. Neither tier's failure ever fails a request.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, warn};

use super::disk::DiskStore;
use super::key::CacheKey;
use super::memory::MemoryStore;
use super::singleflight::SingleFlight;
use crate::error::{KrofiError, Result};

/// Where a payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    Memory,
    Disk,
    /// Not cached; freshly computed.
    Miss,
}

impl CacheTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheTier::Memory => "memory",
            CacheTier::Disk => "disk",
            CacheTier::Miss => "miss",
        }
    }

    pub fn is_hit(&self) -> bool {
        !matches!(self, CacheTier::Miss)
    }
}

/// Result of a cache read. Absence is structural; an empty payload is a hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Memory(Bytes),
    Disk(Bytes),
    Miss,
}

impl Lookup {
    pub fn tier(&self) -> CacheTier {
        match self {
            Lookup::Memory(_) => CacheTier::Memory,
            Lookup::Disk(_) => CacheTier::Disk,
            Lookup::Miss => CacheTier::Miss,
        }
    }

    pub fn into_payload(self) -> Option<Bytes> {
        match self {
            Lookup::Memory(p) | Lookup::Disk(p) => Some(p),
            Lookup::Miss => None,
        }
    }
}

/// A payload resolved through [`CacheCoordinator::get_or_compute`].
#[derive(Debug, Clone)]
pub struct Resolved {
    pub payload: Bytes,
    pub tier: CacheTier,
    /// `true` when this caller waited on another caller's computation.
    pub coalesced: bool,
}

type FlightResult = std::result::Result<(Bytes, CacheTier), Arc<KrofiError>>;

#[derive(Debug, Default)]
struct Counters {
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    disk_read_errors: AtomicU64,
    disk_write_errors: AtomicU64,
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub memory_entries: usize,
    pub memory_capacity: usize,
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub misses: u64,
    /// Requests served from another request's in-flight computation.
    pub coalesced: u64,
    pub disk_read_errors: u64,
    pub disk_write_errors: u64,
    pub in_flight: usize,
}

/// The cache API request handlers use.
pub struct CacheCoordinator {
    memory: MemoryStore,
    disk: DiskStore,
    flights: SingleFlight<FlightResult>,
    counters: Counters,
}

impl CacheCoordinator {
    pub fn new(memory: MemoryStore, disk: DiskStore) -> Self {
        Self {
            memory,
            disk,
            flights: SingleFlight::new(),
            counters: Counters::default(),
        }
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    pub fn disk(&self) -> &DiskStore {
        &self.disk
    }

    /// Read `key` from memory, then disk (promoting a disk hit to memory).
    ///
    /// A disk read error is logged and treated as a miss.
    pub async fn lookup(&self, key: &CacheKey) -> Lookup {
        if let Some(payload) = self.memory.get(key) {
            self.counters.memory_hits.fetch_add(1, Ordering::Relaxed);
            return Lookup::Memory(payload);
        }
        match self.disk.read(key).await {
            Ok(Some(payload)) => {
                self.memory.set(key.clone(), payload.clone());
                self.counters.disk_hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key.short(), "Promoted disk hit to memory");
                Lookup::Disk(payload)
            }
            Ok(None) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                Lookup::Miss
            }
            Err(e) => {
                self.counters.disk_read_errors.fetch_add(1, Ordering::Relaxed);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key.short(), error = %e, "Disk cache read failed, treating as miss");
                Lookup::Miss
            }
        }
    }

    /// Write `payload` to disk, then memory.
    ///
    /// The returned error is advisory: memory is populated even when the
    /// disk write fails.
    pub async fn store(&self, key: &CacheKey, payload: Bytes) -> Result<()> {
        let disk_result = self.disk.write(key, payload.clone()).await;
        self.memory.set(key.clone(), payload);
        if let Err(ref e) = disk_result {
            self.counters.disk_write_errors.fetch_add(1, Ordering::Relaxed);
            warn!(key = %key.short(), error = %e, "Disk cache write failed, memory tier only");
        }
        disk_result
    }

    /// Return the cached payload for `key`, or run `compute` and store its
    /// output.
    ///
    /// Concurrent misses for the same key share one `compute`. Cache write
    /// failures are swallowed (logged); a `compute` failure is returned and
    /// nothing is stored.
    pub async fn get_or_compute<F, Fut>(&self, key: &CacheKey, compute: F) -> Result<Resolved>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes>>,
    {
        let found = self.lookup(key).await;
        let tier = found.tier();
        if let Some(payload) = found.into_payload() {
            return Ok(Resolved {
                payload,
                tier,
                coalesced: false,
            });
        }

        let flight = self
            .flights
            .run(key, || async move {
                // A flight for this key may have completed between our
                // lookup and taking the lead.
                if let Some(payload) = self.memory.get(key) {
                    return Ok((payload, CacheTier::Memory));
                }
                let payload = compute().await.map_err(Arc::new)?;
                let _ = self.store(key, payload.clone()).await;
                Ok((payload, CacheTier::Miss))
            })
            .await;

        if !flight.leader {
            self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
        }
        match flight.value {
            Ok((payload, tier)) => Ok(Resolved {
                payload,
                tier,
                coalesced: !flight.leader,
            }),
            Err(e) => Err(e.replicate()),
        }
    }

    /// Drop `keys` from the memory tier. Returns how many were present.
    pub fn evict_memory(&self, keys: &[CacheKey]) -> usize {
        keys.iter().filter(|k| self.memory.remove(k)).count()
    }

    pub fn stats(&self) -> CacheStats {
        let c = &self.counters;
        CacheStats {
            memory_entries: self.memory.len(),
            memory_capacity: self.memory.capacity(),
            memory_hits: c.memory_hits.load(Ordering::Relaxed),
            disk_hits: c.disk_hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            coalesced: c.coalesced.load(Ordering::Relaxed),
            disk_read_errors: c.disk_read_errors.load(Ordering::Relaxed),
            disk_write_errors: c.disk_write_errors.load(Ordering::Relaxed),
            in_flight: self.flights.in_flight(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
