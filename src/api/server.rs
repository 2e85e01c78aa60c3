//! Axum server for the image proxy.

use std::sync::Arc;
use std::time::Instant;

use axum::middleware as axum_mw;
use axum::routing::get;
use axum::Router;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::cache::CacheCoordinator;
use crate::error::Result;
use crate::pipeline::RequestPipeline;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<RequestPipeline>,
    /// Process start, reported by the health probe.
    pub started_at: Instant,
}

impl AppState {
    pub fn new(pipeline: Arc<RequestPipeline>) -> Self {
        Self {
            pipeline,
            started_at: Instant::now(),
        }
    }

    pub fn cache(&self) -> &Arc<CacheCoordinator> {
        self.pipeline.cache()
    }
}

/// Build the router with all routes and layers.
pub fn build_router(state: AppState) -> Router {
    let shared_state = Arc::new(state);

    Router::new()
        .route("/proxy/image", get(super::routes::image::get_image))
        .route("/health", get(super::routes::health::get_health))
        .layer(axum_mw::from_fn(super::middleware::server_headers))
        .layer(TraceLayer::new_for_http())
        .with_state(shared_state)
}

/// Serve on `addr` until `shutdown_rx` flips to `true`, then drain
/// in-flight requests and return.
pub async fn start_server(
    addr: &str,
    state: AppState,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "Krofi listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            while !*shutdown_rx.borrow() {
                if shutdown_rx.changed().await.is_err() {
                    break;
                }
            }
            info!("Shutdown requested, draining connections");
        })
        .await?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
