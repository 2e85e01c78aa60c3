//! Cache key derivation.
//!
//! A [`CacheKey`] is the lowercase hex SHA-256 of an [`ImageIdentity`]: the
//! normalized source URL plus every transform parameter that changes the
//! output bytes. Fields are length-prefixed before hashing so that no two
//! different identities can produce the same hash input.

use std::fmt;

use sha2::{Digest, Sha256};
use url::Url;

use crate::codec::TransformParams;
use crate::error::{KrofiError, Result};

/// Length of a key in hex characters.
pub const KEY_LEN: usize = 64;

/// Fixed-width opaque cache key, safe to use as a file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Parse a key previously produced by [`derive`] (e.g. from a file name).
    ///
    /// Returns `None` unless `s` is exactly 64 lowercase hex characters.
    pub fn from_hex(s: &str) -> Option<Self> {
        let valid = s.len() == KEY_LEN
            && s.bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 characters, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..8]
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Everything about a request that determines the served bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageIdentity {
    source: Url,
    transform: TransformParams,
}

impl ImageIdentity {
    /// Parse and normalize a source URL.
    ///
    /// Normalization is what `url` performs on parse (lowercase scheme and
    /// host, default port removed, percent-encoding canonicalized) plus
    /// dropping the fragment, which never reaches the upstream server.
    /// Query parameter order is preserved and therefore significant.
    pub fn parse(raw: &str, transform: TransformParams) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(KrofiError::InvalidRequest(
                "source URL must not be empty".into(),
            ));
        }
        let mut source = Url::parse(raw)
            .map_err(|e| KrofiError::InvalidRequest(format!("invalid source URL: {e}")))?;
        if !matches!(source.scheme(), "http" | "https") {
            return Err(KrofiError::InvalidRequest(format!(
                "unsupported URL scheme '{}'",
                source.scheme()
            )));
        }
        if source.host_str().is_none() {
            return Err(KrofiError::InvalidRequest("source URL has no host".into()));
        }
        source.set_fragment(None);
        Ok(Self { source, transform })
    }

    pub fn source(&self) -> &Url {
        &self.source
    }

    pub fn transform(&self) -> &TransformParams {
        &self.transform
    }
}

/// Derive the cache key for `identity`. Pure and deterministic.
pub fn derive(identity: &ImageIdentity) -> CacheKey {
    let mut hasher = Sha256::new();
    update_field(&mut hasher, b"src", identity.source.as_str().as_bytes());

    let t = &identity.transform;
    if let Some(w) = t.width {
        update_field(&mut hasher, b"w", &w.to_le_bytes());
    }
    if let Some(h) = t.height {
        update_field(&mut hasher, b"h", &h.to_le_bytes());
    }
    if let Some(sigma) = t.blur {
        update_field(&mut hasher, b"blur", &sigma.to_bits().to_le_bytes());
    }
    if t.grayscale {
        update_field(&mut hasher, b"gray", &[1]);
    }
    CacheKey(hex::encode(hasher.finalize()))
}

fn update_field(hasher: &mut Sha256, tag: &[u8], value: &[u8]) {
    hasher.update((tag.len() as u64).to_le_bytes());
    hasher.update(tag);
    hasher.update((value.len() as u64).to_le_bytes());
    hasher.update(value);
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(url: &str) -> ImageIdentity {
        ImageIdentity::parse(url, TransformParams::default()).unwrap()
    }

    fn with_width(url: &str, width: u32) -> ImageIdentity {
        ImageIdentity::parse(
            url,
            TransformParams {
                width: Some(width),
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_derive_deterministic() {
        let a = derive(&identity("https://x/img.jpg"));
        let b = derive(&identity("https://x/img.jpg"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_derive_stable_across_processes() {
        // Pinned value: a change here invalidates every on-disk cache.
        let key = derive(&identity("https://x/img.jpg"));
        assert_eq!(
            key.as_str(),
            "1c69beb3bc95c253a6ab89abe2350b5c72ffc323eebdafdaa7d13caf740b3988"
        );
        assert!(CacheKey::from_hex(key.as_str()).is_some());
    }

    #[test]
    fn test_transform_params_change_key() {
        let plain = derive(&identity("https://x/img.jpg"));
        let sized = derive(&with_width("https://x/img.jpg", 100));
        assert_ne!(plain, sized);
    }

    #[test]
    fn test_width_and_height_do_not_collide() {
        let w = derive(&with_width("https://x/img.jpg", 100));
        let h = derive(
            &ImageIdentity::parse(
                "https://x/img.jpg",
                TransformParams {
                    height: Some(100),
                    ..Default::default()
                },
            )
            .unwrap(),
        );
        assert_ne!(w, h);
    }

    #[test]
    fn test_every_param_is_keyed() {
        let base = derive(&identity("https://x/img.jpg"));
        let blurred = derive(
            &ImageIdentity::parse(
                "https://x/img.jpg",
                TransformParams {
                    blur: Some(2.0),
                    ..Default::default()
                },
            )
            .unwrap(),
        );
        let gray = derive(
            &ImageIdentity::parse(
                "https://x/img.jpg",
                TransformParams {
                    grayscale: true,
                    ..Default::default()
                },
            )
            .unwrap(),
        );
        assert_ne!(base, blurred);
        assert_ne!(base, gray);
        assert_ne!(blurred, gray);
    }

    #[test]
    fn test_normalization_equivalent_urls() {
        let a = derive(&identity("HTTPS://Example.COM:443/a.png#frag"));
        let b = derive(&identity("https://example.com/a.png"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_query_order_is_significant() {
        let a = derive(&identity("https://example.com/a.png?x=1&y=2"));
        let b = derive(&identity("https://example.com/a.png?y=2&x=1"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_key_is_filename_safe() {
        let key = derive(&identity("https://example.com/../../etc/passwd"));
        assert!(!key.as_str().contains('/'));
        assert!(!key.as_str().contains('\\'));
        assert!(!key.as_str().contains(".."));
    }

    #[test]
    fn test_parse_rejects_empty_and_bad_scheme() {
        assert!(ImageIdentity::parse("", TransformParams::default()).is_err());
        assert!(ImageIdentity::parse("   ", TransformParams::default()).is_err());
        assert!(ImageIdentity::parse("not a url", TransformParams::default()).is_err());
        let err = ImageIdentity::parse("file:///etc/passwd", TransformParams::default())
            .unwrap_err();
        assert!(err.is_client_error());
        assert!(ImageIdentity::parse("ftp://x/img.jpg", TransformParams::default()).is_err());
    }

    #[test]
    fn test_from_hex_validation() {
        assert!(CacheKey::from_hex(&"a".repeat(64)).is_some());
        assert!(CacheKey::from_hex(&"a".repeat(63)).is_none());
        assert!(CacheKey::from_hex(&"A".repeat(64)).is_none());
        assert!(CacheKey::from_hex(&"g".repeat(64)).is_none());
    }

    #[test]
    fn test_short() {
        let key = derive(&identity("https://x/img.jpg"));
        assert_eq!(key.short().len(), 8);
        assert!(key.as_str().starts_with(key.short()));
    }
}
