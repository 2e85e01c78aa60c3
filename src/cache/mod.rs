//! Two-tier cache for converted images: in-memory LRU over one-file-per-key
//! disk storage, a periodic disk purger, and in-flight miss coalescing.
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use krofi::cache::{CacheCoordinator, CacheKey, DiskStore, Lookup, MemoryStore};
//! # tokio_test::block_on(async {
//! let dir = tempfile::tempdir().unwrap();
//! let cache = CacheCoordinator::new(MemoryStore::new(2).unwrap(), DiskStore::new(dir.path()));
//! let key = CacheKey::from_hex(&"a".repeat(64)).unwrap();
//!
//! cache.store(&key, Bytes::from_static(b"webp")).await.unwrap();
//! assert_eq!(cache.lookup(&key).await, Lookup::Memory(Bytes::from_static(b"webp")));
//! # });
//! ```

pub mod coordinator;
pub mod disk;
pub mod key;
pub mod memory;
pub mod purger;
pub mod singleflight;

pub use coordinator::{CacheCoordinator, CacheStats, CacheTier, Lookup, Resolved};
pub use disk::DiskStore;
pub use key::{derive, CacheKey, ImageIdentity};
pub use memory::MemoryStore;
pub use purger::{PurgeStats, Purger};
