//! Response decoration applied to every route.

use std::time::Instant;

use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};

/// Value of the `X-Server` header.
pub const SERVER_NAME: &str = "Krofi";

pub static X_SERVER: HeaderName = HeaderName::from_static("x-server");
pub static X_RESPONSE_TIME: HeaderName = HeaderName::from_static("x-response-time");

/// Adds `X-Server` and `X-Response-Time: <ms> ms` to every response.
pub async fn server_headers(request: Request<Body>, next: Next) -> Response {
    let started = Instant::now();
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(X_SERVER.clone(), HeaderValue::from_static(SERVER_NAME));
    let elapsed = format!("{} ms", started.elapsed().as_millis());
    if let Ok(value) = HeaderValue::from_str(&elapsed) {
        headers.insert(X_RESPONSE_TIME.clone(), value);
    }
    response
}

// ============================================================================
// Tests
// ============================================================================
