//! Request pipeline: identity -> key -> cache, or fetch + convert on a miss.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, info};

use crate::cache::{derive, CacheCoordinator, CacheKey, CacheTier, ImageIdentity};
use crate::codec::{ImageCodec, TransformParams};
use crate::config::Config;
use crate::error::{KrofiError, Result};
use crate::fetch::ImageFetcher;

/// A converted image ready to be written to the client.
#[derive(Debug, Clone)]
pub struct ServedImage {
    pub key: CacheKey,
    pub payload: Bytes,
    pub content_type: &'static str,
    pub tier: CacheTier,
    /// Served from another request's in-flight conversion.
    pub coalesced: bool,
    pub elapsed: Duration,
}

impl ServedImage {
    /// Value of the `Cache-Status` response header.
    pub fn cache_status(&self) -> &'static str {
        if self.tier.is_hit() {
            "HIT"
        } else {
            "MISS"
        }
    }
}

pub struct RequestPipeline {
    cache: Arc<CacheCoordinator>,
    fetcher: Arc<dyn ImageFetcher>,
    codec: Arc<dyn ImageCodec>,
    fetch_timeout: Duration,
    max_dimension: u32,
}

impl RequestPipeline {
    pub fn new(
        cache: Arc<CacheCoordinator>,
        fetcher: Arc<dyn ImageFetcher>,
        codec: Arc<dyn ImageCodec>,
    ) -> Self {
        let defaults = Config::default();
        Self {
            cache,
            fetcher,
            codec,
            fetch_timeout: defaults.upstream.timeout(),
            max_dimension: defaults.transform.max_dimension,
        }
    }

    /// Take fetch timeout and dimension limits from `config`.
    pub fn with_config(mut self, config: &Config) -> Self {
        self.fetch_timeout = config.upstream.timeout();
        self.max_dimension = config.transform.max_dimension;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn cache(&self) -> &Arc<CacheCoordinator> {
        &self.cache
    }

    /// Validate request input and build the image identity.
    pub fn identify(&self, raw_url: &str, params: TransformParams) -> Result<ImageIdentity> {
        params.validate(self.max_dimension)?;
        ImageIdentity::parse(raw_url, params)
    }

    /// Serve `identity` from cache, converting it first on a miss.
    pub async fn handle(&self, identity: &ImageIdentity) -> Result<ServedImage> {
        let started = Instant::now();
        let key = derive(identity);

        let resolved = self
            .cache
            .get_or_compute(&key, || self.convert(identity, &key))
            .await?;

        let served = ServedImage {
            key,
            payload: resolved.payload,
            content_type: self.codec.media_type(),
            tier: resolved.tier,
            coalesced: resolved.coalesced,
            elapsed: started.elapsed(),
        };
        debug!(
            key = %served.key.short(),
            tier = served.tier.as_str(),
            coalesced = served.coalesced,
            bytes = served.payload.len(),
            elapsed_ms = served.elapsed.as_millis() as u64,
            "Served image"
        );
        Ok(served)
    }

    async fn convert(&self, identity: &ImageIdentity, key: &CacheKey) -> Result<Bytes> {
        let url = identity.source();
        let source = tokio::time::timeout(self.fetch_timeout, self.fetcher.fetch(url))
            .await
            .map_err(|_| {
                KrofiError::Upstream(format!(
                    "{} timed out after {}s",
                    url,
                    self.fetch_timeout.as_secs_f32()
                ))
            })??;

        let codec = Arc::clone(&self.codec);
        let params = identity.transform().clone();
        let source_len = source.len();
        let encoded = tokio::task::spawn_blocking(move || codec.transcode(&source, &params))
            .await
            .map_err(|e| KrofiError::Codec(format!("Conversion task failed: {}", e)))??;

        info!(
            key = %key.short(),
            url = %url,
            source_bytes = source_len,
            output_bytes = encoded.len(),
            "Converted image"
        );
        Ok(Bytes::from(encoded))
    }
}

// ============================================================================
// Tests
// ============================================================================
