//! Source image fetching.
//!
//! `ImageFetcher` abstracts the network call so the pipeline can be tested
//! without a server. `HttpFetcher` is the reqwest-backed implementation.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::header::CONTENT_LENGTH;
use tracing::debug;
use url::Url;

use crate::config::UpstreamConfig;
use crate::error::{KrofiError, Result};

/// Downloads the raw bytes of a source image.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<Bytes>;
}

/// Fetcher using a shared `reqwest::Client`.
pub struct HttpFetcher {
    client: reqwest::Client,
    max_bytes: usize,
}

impl HttpFetcher {
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| KrofiError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            max_bytes: config.max_bytes,
        })
    }
}

#[async_trait]
impl ImageFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<Bytes> {
        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| describe_request_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(KrofiError::Upstream(format!(
                "{} returned HTTP {}",
                url, status
            )));
        }

        let declared = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if let Some(len) = declared {
            if len > self.max_bytes {
                return Err(too_large(url, self.max_bytes));
            }
        }

        let mut body = BytesMut::with_capacity(declared.unwrap_or(0));
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| describe_request_error(url, e))?
        {
            if body.len() + chunk.len() > self.max_bytes {
                return Err(too_large(url, self.max_bytes));
            }
            body.extend_from_slice(&chunk);
        }
        debug!(url = %url, bytes = body.len(), "Fetched source image");
        Ok(body.freeze())
    }
}

fn too_large(url: &Url, max: usize) -> KrofiError {
    KrofiError::Upstream(format!("{} exceeds the {} byte source limit", url, max))
}

fn describe_request_error(url: &Url, e: reqwest::Error) -> KrofiError {
    if e.is_timeout() {
        KrofiError::Upstream(format!("{} timed out", url))
    } else {
        KrofiError::Upstream(format!("request to {} failed: {}", url, e))
    }
}

// ============================================================================
// Tests
// ============================================================================
