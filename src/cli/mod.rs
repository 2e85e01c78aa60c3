//! Command-line interface.

mod key;
mod purge;
mod serve;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use krofi::config::{Config, LogFormat};

#[derive(Parser, Debug)]
#[command(name = "krofi", version, about = "Image proxy that serves remote images as WebP")]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP proxy
    Serve {
        /// Config file (default: ~/.krofi/config.json)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Bind address
        #[arg(long)]
        bind: Option<String>,
        /// Listen port
        #[arg(long)]
        port: Option<u16>,
        /// Directory for cached WebP files
        #[arg(long)]
        cache_dir: Option<PathBuf>,
        /// Emit logs as JSON
        #[arg(long)]
        json_logs: bool,
    },
    /// Run one purge sweep of the cache directory and exit
    Purge {
        /// Config file (default: ~/.krofi/config.json)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Directory to sweep instead of the configured one
        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },
    /// Print the cache key for a source URL
    Key {
        /// Source image URL
        url: String,
        #[arg(long)]
        width: Option<u32>,
        #[arg(long)]
        height: Option<u32>,
        #[arg(long)]
        blur: Option<f32>,
        #[arg(long)]
        grayscale: bool,
    },
}

/// Parse arguments and dispatch.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve {
            config,
            bind,
            port,
            cache_dir,
            json_logs,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(dir) = cache_dir {
                config.cache.cache_dir = dir;
            }
            if json_logs {
                config.log_format = LogFormat::Json;
            }
            init_logging(config.log_format);
            serve::cmd_serve(config).await
        }
        Command::Purge { config, cache_dir } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(dir) = cache_dir {
                config.cache.cache_dir = dir;
            }
            init_logging(config.log_format);
            purge::cmd_purge(&config).await
        }
        Command::Key {
            url,
            width,
            height,
            blur,
            grayscale,
        } => key::cmd_key(&url, width, height, blur, grayscale),
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let display = path
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| Config::path().display().to_string());
    Config::load_with(path).with_context(|| format!("Failed to load config from {display}"))
}

/// `RUST_LOG` filter (default `info`) with pretty or JSON output.
fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

// ============================================================================
// Tests
// ============================================================================
