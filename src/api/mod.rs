//! HTTP surface: the image proxy route and the health probe.

pub mod error;
pub mod middleware;
pub mod routes;
pub mod server;

pub use server::{build_router, start_server, AppState};
