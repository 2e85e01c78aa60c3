//! `krofi serve`: run the proxy until Ctrl+C or SIGTERM.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};

use krofi::api::{start_server, AppState};
use krofi::cache::{CacheCoordinator, DiskStore, MemoryStore, Purger};
use krofi::codec::WebpCodec;
use krofi::config::Config;
use krofi::fetch::HttpFetcher;
use krofi::pipeline::RequestPipeline;

pub(crate) async fn cmd_serve(config: Config) -> Result<()> {
    let disk = DiskStore::open(&config.cache.cache_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to open cache directory {}",
                config.cache.cache_dir.display()
            )
        })?;
    let memory = MemoryStore::new(config.cache.max_memory_entries)?;
    let cache = Arc::new(CacheCoordinator::new(memory, disk));

    let fetcher = HttpFetcher::new(&config.upstream)?;
    let pipeline = RequestPipeline::new(
        Arc::clone(&cache),
        Arc::new(fetcher),
        Arc::new(WebpCodec::new().with_max_dimension(config.transform.max_dimension)),
    )
    .with_config(&config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut purger = Purger::new(
        &config.cache.cache_dir,
        config.cache.entry_ttl(),
        config.cache.purge_interval(),
    );
    if config.cache.evict_memory_on_purge {
        purger = purger.with_memory_eviction(Arc::clone(&cache));
    }
    let purger_handle = purger.spawn(shutdown_rx.clone());

    info!(
        cache_dir = %config.cache.cache_dir.display(),
        max_memory_entries = config.cache.max_memory_entries,
        entry_ttl_secs = config.cache.entry_ttl_secs,
        "Cache ready"
    );

    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let addr = config.listen_addr();
    start_server(&addr, AppState::new(Arc::new(pipeline)), shutdown_rx)
        .await
        .with_context(|| format!("HTTP server on {addr} failed"))?;

    if let Err(e) = purger_handle.await {
        warn!(error = %e, "Purger task ended abnormally");
    }
    info!("Krofi shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT"),
        () = terminate => info!("Received SIGTERM"),
    }
}
