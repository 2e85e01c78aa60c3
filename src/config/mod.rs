//! Krofi configuration.
//!
//! Resolution order (later wins):
//! 1. Compiled-in defaults
//! 2. JSON file (`--config PATH` or `~/.krofi/config.json`)
//! 3. `KROFI_*` environment variables (a `.env` file is honoured)
//! 4. CLI flags, applied by the binary after [`Config::load`]

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{KrofiError, Result};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable, one line per event.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (default: 0.0.0.0).
    pub bind: String,
    /// Listen port (default: 8080).
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Two-tier cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory holding one `<key>.webp` file per cached image.
    pub cache_dir: PathBuf,
    /// Capacity of the in-memory LRU tier, in entries. Must be >= 1.
    pub max_memory_entries: usize,
    /// Seconds between purge sweeps of `cache_dir`.
    pub purge_interval_secs: u64,
    /// Files whose mtime is older than this many seconds are purged.
    pub entry_ttl_secs: u64,
    /// Also drop purged keys from the memory tier.
    pub evict_memory_on_purge: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: std::env::temp_dir().join("krofi-cache"),
            max_memory_entries: 1000,
            purge_interval_secs: 30 * 60,
            entry_ttl_secs: 30 * 60,
            evict_memory_on_purge: false,
        }
    }
}

impl CacheConfig {
    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }

    pub fn entry_ttl(&self) -> Duration {
        Duration::from_secs(self.entry_ttl_secs)
    }
}

/// Source image fetch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Whole-request timeout for a source fetch.
    pub timeout_secs: u64,
    /// Largest accepted source body, in bytes.
    pub max_bytes: usize,
    /// `User-Agent` sent upstream.
    pub user_agent: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            max_bytes: 20 * 1024 * 1024,
            user_agent: format!("krofi/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Limits on transform parameters accepted from requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    /// Upper bound for `width` and `height`.
    pub max_dimension: u32,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            max_dimension: crate::codec::DEFAULT_MAX_DIMENSION,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub upstream: UpstreamConfig,
    pub transform: TransformConfig,
    pub log_format: LogFormat,
}

impl Config {
    /// `~/.krofi`, falling back to `./.krofi` when no home directory exists.
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".krofi")
    }

    /// Default config file location.
    pub fn path() -> PathBuf {
        Self::dir().join("config.json")
    }

    /// Load from the default path (if present) and apply env overrides.
    pub fn load() -> Result<Self> {
        Self::load_with(None)
    }

    /// Load from `path`, or the default path when `None`.
    ///
    /// An explicit path must exist; the default path is optional.
    pub fn load_with(path: Option<&Path>) -> Result<Self> {
        let _ = dotenvy::dotenv();
        let mut config = match path {
            Some(p) => Self::load_from_path(p)?,
            None => {
                let default_path = Self::path();
                if default_path.exists() {
                    Self::load_from_path(&default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON config file without env overrides or validation.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            KrofiError::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        let config: Config = serde_json::from_str(&data).map_err(|e| {
            KrofiError::Config(format!("Failed to parse config {}: {}", path.display(), e))
        })?;
        debug!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    /// Apply `KROFI_*` environment variables on top of the current values.
    ///
    /// Unparseable numeric values are ignored.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("KROFI_BIND") {
            self.server.bind = v;
        }
        if let Some(v) = lookup("KROFI_PORT").and_then(|v| v.parse().ok()) {
            self.server.port = v;
        }
        if let Some(v) = lookup("KROFI_CACHE_DIR") {
            self.cache.cache_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("KROFI_MAX_MEMORY_ENTRIES").and_then(|v| v.parse().ok()) {
            self.cache.max_memory_entries = v;
        }
        if let Some(v) = lookup("KROFI_PURGE_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
            self.cache.purge_interval_secs = v;
        }
        if let Some(v) = lookup("KROFI_ENTRY_TTL_SECS").and_then(|v| v.parse().ok()) {
            self.cache.entry_ttl_secs = v;
        }
        if let Some(v) = lookup("KROFI_LOG_FORMAT") {
            match v.to_ascii_lowercase().as_str() {
                "json" => self.log_format = LogFormat::Json,
                "pretty" => self.log_format = LogFormat::Pretty,
                _ => {}
            }
        }
    }

    /// Reject values the cache cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.cache.max_memory_entries == 0 {
            return Err(KrofiError::Config(
                "cache.max_memory_entries must be at least 1".into(),
            ));
        }
        if self.cache.purge_interval_secs == 0 {
            return Err(KrofiError::Config(
                "cache.purge_interval_secs must be greater than 0".into(),
            ));
        }
        if self.cache.entry_ttl_secs == 0 {
            return Err(KrofiError::Config(
                "cache.entry_ttl_secs must be greater than 0".into(),
            ));
        }
        if self.upstream.timeout_secs == 0 {
            return Err(KrofiError::Config(
                "upstream.timeout_secs must be greater than 0".into(),
            ));
        }
        if self.transform.max_dimension == 0 {
            return Err(KrofiError::Config(
                "transform.max_dimension must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// `bind:port` string for the HTTP listener.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.bind, self.server.port)
    }
}

// ============================================================================
// Tests
// ============================================================================
