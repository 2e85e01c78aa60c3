//! Krofi: an HTTP proxy that fetches remote images, converts them to WebP
//! and serves them from a two-tier (memory + disk) cache.

pub mod api;
pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod fetch;
pub mod pipeline;

pub use error::{KrofiError, Result};
