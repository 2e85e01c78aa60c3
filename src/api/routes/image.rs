//! Image proxy endpoint.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::HeaderName;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::api::server::AppState;
use crate::codec::TransformParams;
use crate::error::KrofiError;

pub static CACHE_STATUS: HeaderName = HeaderName::from_static("cache-status");
pub static RESPONSE_TIME: HeaderName = HeaderName::from_static("response-time");

/// Query string of `GET /proxy/image`.
#[derive(Debug, Default, Deserialize)]
pub struct ImageQuery {
    /// Source image URL.
    pub url: Option<String>,
    /// Older name for `url`; `url` wins when both are present.
    pub path: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub blur: Option<f32>,
    #[serde(default)]
    pub grayscale: bool,
}

impl ImageQuery {
    fn source(&self) -> Option<&str> {
        let present = |s: &&str| !s.trim().is_empty();
        self.url
            .as_deref()
            .filter(present)
            .or_else(|| self.path.as_deref().filter(present))
    }

    fn transform(&self) -> TransformParams {
        TransformParams {
            width: self.width,
            height: self.height,
            blur: self.blur,
            grayscale: self.grayscale,
        }
    }
}

/// GET /proxy/image: fetch, convert and serve a remote image.
///
/// `Response-Time` covers the whole handler: parsing, validation, cache and
/// conversion.
pub async fn get_image(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ImageQuery>, QueryRejection>,
) -> Result<Response, KrofiError> {
    let started = Instant::now();
    let Query(query) = query.map_err(|e| KrofiError::InvalidRequest(e.body_text()))?;
    let source = query
        .source()
        .ok_or_else(|| KrofiError::InvalidRequest("missing 'url' query parameter".into()))?;

    let identity = state.pipeline.identify(source, query.transform())?;
    let served = state.pipeline.handle(&identity).await?;

    let headers = [
        (CONTENT_TYPE, served.content_type.to_string()),
        (CACHE_STATUS.clone(), served.cache_status().to_string()),
        (
            RESPONSE_TIME.clone(),
            started.elapsed().as_millis().to_string(),
        ),
    ];
    Ok((headers, served.payload).into_response())
}

// ============================================================================
// Tests
// ============================================================================
