//! `krofi purge`: one immediate sweep.

use anyhow::Result;

use krofi::cache::Purger;
use krofi::config::Config;

pub(crate) async fn cmd_purge(config: &Config) -> Result<()> {
    let purger = Purger::new(
        &config.cache.cache_dir,
        config.cache.entry_ttl(),
        config.cache.purge_interval(),
    );
    let stats = purger.sweep().await;
    println!(
        "{}: scanned {}, removed {}, failed {}",
        config.cache.cache_dir.display(),
        stats.scanned,
        stats.removed,
        stats.failed
    );
    Ok(())
}
