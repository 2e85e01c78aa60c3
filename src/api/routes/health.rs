//! Health endpoint.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::api::server::AppState;

/// GET /health: liveness plus cache counters.
pub async fn get_health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let started = Instant::now();
    let cache = state.cache().stats();
    Json(json!({
        "status": "OK",
        "response_ms": started.elapsed().as_millis() as u64,
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
        "cache": cache,
    }))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tests::{pipeline_with, MockFetcher};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_get_health_returns_ok() {
        let tmp = TempDir::new().unwrap();
        let pipeline = pipeline_with(tmp.path(), Arc::new(MockFetcher::ok("src")));
        let state = Arc::new(AppState::new(Arc::new(pipeline)));

        let Json(body) = get_health(State(state)).await;
        assert_eq!(body["status"], "OK");
        assert!(body["response_ms"].is_u64());
        assert!(body["version"].is_string());
        assert_eq!(body["cache"]["memory_entries"], 0);
        assert_eq!(body["cache"]["memory_capacity"], 16);
    }
}
