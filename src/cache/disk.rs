//! Durable tier: one file per key.
//!
//! # Layout
//!
//! ```text
//! {cache_dir}/
//! ├── 1c69beb3…3988.webp          committed entry, raw payload
//! └── .krofi-tmp-XXXXXX           in-flight write, renamed into place
//! ```
//!
//! Writes go to a temp file in the same directory and are renamed over the
//! target, so a reader sees either the previous file or the new one, never
//! a partial write. Concurrent writers for one key race; the last rename
//! wins.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::debug;

use super::key::CacheKey;
use crate::error::{KrofiError, Result};

/// Extension of committed cache files.
pub const ENTRY_EXTENSION: &str = "webp";

/// Prefix of temp files created during a write.
pub const TEMP_PREFIX: &str = ".krofi-tmp-";

/// Filesystem-backed cache tier.
#[derive(Debug, Clone)]
pub struct DiskStore {
    dir: PathBuf,
}

impl DiskStore {
    /// Create a store rooted at `dir`. The directory is created lazily.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Create a store and make sure its directory exists.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let store = Self::new(dir);
        tokio::fs::create_dir_all(&store.dir).await.map_err(|e| {
            KrofiError::Cache(format!(
                "Failed to create cache directory {}: {}",
                store.dir.display(),
                e
            ))
        })?;
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the committed file for `key`.
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.{}", key, ENTRY_EXTENSION))
    }

    /// Read the payload for `key`.
    ///
    /// `Ok(None)` means no file exists; any other failure is an `Err`.
    pub async fn read(&self, key: &CacheKey) -> Result<Option<Bytes>> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(KrofiError::Io(e)),
        }
    }

    /// Create or atomically replace the file for `key`.
    pub async fn write(&self, key: &CacheKey, payload: Bytes) -> Result<()> {
        let dir = self.dir.clone();
        let target = self.path_for(key);
        tokio::task::spawn_blocking(move || write_atomic(&dir, &target, &payload))
            .await
            .map_err(|e| KrofiError::Cache(format!("disk write task failed: {e}")))??;
        debug!(key = %key.short(), "Wrote disk cache entry");
        Ok(())
    }

    /// Delete the file for `key`. Returns `false` when it did not exist.
    pub async fn remove(&self, key: &CacheKey) -> Result<bool> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(KrofiError::Io(e)),
        }
    }
}

/// Classification of a directory entry, used by the purger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    /// A committed `<key>.webp` file.
    Entry(CacheKey),
    /// A leftover temp file from an interrupted write.
    Temp,
    /// Anything else; never touched.
    Foreign,
}

/// Classify a file name found in the cache directory.
pub fn classify(file_name: &str) -> EntryKind {
    if file_name.starts_with(TEMP_PREFIX) {
        return EntryKind::Temp;
    }
    file_name
        .strip_suffix(ENTRY_EXTENSION)
        .and_then(|stem| stem.strip_suffix('.'))
        .and_then(CacheKey::from_hex)
        .map(EntryKind::Entry)
        .unwrap_or(EntryKind::Foreign)
}

fn write_atomic(dir: &Path, target: &Path, payload: &[u8]) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(dir)?;
    tmp.write_all(payload)?;
    tmp.as_file().sync_all()?;
    // On failure the temp file is removed when the error value drops.
    tmp.persist(target).map_err(|e| KrofiError::Io(e.error))?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn key(c: char) -> CacheKey {
        CacheKey::from_hex(&c.to_string().repeat(64)).unwrap()
    }

    #[tokio::test]
    async fn test_read_missing_is_none() {
        let tmp = TempDir::new().unwrap();
        let store = DiskStore::new(tmp.path());
        assert!(store.read(&key('a')).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let tmp = TempDir::new().unwrap();
        let store = DiskStore::new(tmp.path());
        store
            .write(&key('a'), Bytes::from_static(b"webp-bytes"))
            .await
            .unwrap();
        let got = store.read(&key('a')).await.unwrap().unwrap();
        assert_eq!(&got[..], b"webp-bytes");
        assert!(store.path_for(&key('a')).exists());
    }

    #[tokio::test]
    async fn test_file_layout_is_key_plus_extension() {
        let tmp = TempDir::new().unwrap();
        let store = DiskStore::new(tmp.path());
        let path = store.path_for(&key('b'));
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            format!("{}.webp", "b".repeat(64))
        );
    }

    #[tokio::test]
    async fn test_overwrite_replaces_content_and_leaves_no_temp() {
        let tmp = TempDir::new().unwrap();
        let store = DiskStore::new(tmp.path());
        store.write(&key('a'), Bytes::from_static(b"one")).await.unwrap();
        store.write(&key('a'), Bytes::from_static(b"two")).await.unwrap();
        assert_eq!(&store.read(&key('a')).await.unwrap().unwrap()[..], b"two");

        let names: Vec<String> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(!names[0].starts_with(TEMP_PREFIX));
    }

    #[tokio::test]
    async fn test_write_creates_directory() {
        let tmp = TempDir::new().unwrap();
        let store = DiskStore::new(tmp.path().join("nested").join("cache"));
        store.write(&key('c'), Bytes::from_static(b"x")).await.unwrap();
        assert!(store.read(&key('c')).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_empty_payload_round_trips_as_found() {
        let tmp = TempDir::new().unwrap();
        let store = DiskStore::new(tmp.path());
        store.write(&key('a'), Bytes::new()).await.unwrap();
        assert_eq!(store.read(&key('a')).await.unwrap(), Some(Bytes::new()));
    }

    #[tokio::test]
    async fn test_read_error_is_not_a_miss() {
        let tmp = TempDir::new().unwrap();
        let store = DiskStore::new(tmp.path());
        // A directory where the file should be makes `read` fail with
        // something other than NotFound.
        std::fs::create_dir_all(store.path_for(&key('d'))).unwrap();
        assert!(store.read(&key('d')).await.is_err());
    }

    #[tokio::test]
    async fn test_write_failure_is_reported() {
        let tmp = TempDir::new().unwrap();
        // Cache dir path is occupied by a regular file.
        let blocker = tmp.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();
        let store = DiskStore::new(&blocker);
        assert!(store.write(&key('a'), Bytes::from_static(b"x")).await.is_err());
    }

    #[tokio::test]
    async fn test_remove() {
        let tmp = TempDir::new().unwrap();
        let store = DiskStore::open(tmp.path().join("c")).await.unwrap();
        store.write(&key('a'), Bytes::from_static(b"x")).await.unwrap();
        assert!(store.remove(&key('a')).await.unwrap());
        assert!(!store.remove(&key('a')).await.unwrap());
    }

    #[test]
    fn test_classify() {
        let k = "e".repeat(64);
        assert_eq!(
            classify(&format!("{k}.webp")),
            EntryKind::Entry(key('e'))
        );
        assert_eq!(classify(".krofi-tmp-abc123"), EntryKind::Temp);
        assert_eq!(classify("notes.txt"), EntryKind::Foreign);
        assert_eq!(classify(&format!("{k}.png")), EntryKind::Foreign);
        assert_eq!(classify("short.webp"), EntryKind::Foreign);
        assert_eq!(classify(&format!("{k}webp")), EntryKind::Foreign);
    }
}
