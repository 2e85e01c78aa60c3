//! Error types for Krofi.
//!
//! Cache misses are never errors; they are modelled as `Option`/`Lookup::Miss`.
//! Everything here is either a request failure or an advisory cache failure.

use thiserror::Error;

/// Errors produced by the proxy and its cache.
#[derive(Debug, Error)]
pub enum KrofiError {
    /// Invalid or inconsistent configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The inbound request could not be turned into an image identity.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Fetching the source image failed (network, status, size, timeout).
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// The source bytes could not be decoded, transformed or encoded.
    #[error("Codec error: {0}")]
    Codec(String),

    /// A cache tier failed in a way that is not a plain miss.
    #[error("Cache error: {0}")]
    Cache(String),

    /// Raw I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, KrofiError>;

impl KrofiError {
    /// Returns `true` for failures caused by the caller rather than the
    /// upstream or the proxy itself.
    pub fn is_client_error(&self) -> bool {
        matches!(self, KrofiError::InvalidRequest(_))
    }

    /// An equivalent error, for handing one failure to several waiters.
    ///
    /// `Io` keeps its kind and message but loses the OS error source.
    pub fn replicate(&self) -> KrofiError {
        match self {
            KrofiError::Config(m) => KrofiError::Config(m.clone()),
            KrofiError::InvalidRequest(m) => KrofiError::InvalidRequest(m.clone()),
            KrofiError::Upstream(m) => KrofiError::Upstream(m.clone()),
            KrofiError::Codec(m) => KrofiError::Codec(m.clone()),
            KrofiError::Cache(m) => KrofiError::Cache(m.clone()),
            KrofiError::Io(e) => KrofiError::Io(std::io::Error::new(e.kind(), e.to_string())),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
