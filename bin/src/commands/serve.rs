//! Long-running scheduler command.

use anyhow::{Context, Result};
use barcache_lib::daemon::CacheConfig;
use tracing::info;

/// Runs every scheduler loop until Ctrl-C.
pub(crate) async fn serve(config: &CacheConfig) -> Result<()> {
    let (service, scheduler) = super::wire(config)?;

    info!(
        database = %config.database_path().display(),
        granularities = ?config.schedule.granularities,
        "starting barcache scheduler"
    );

    let handle = tokio::spawn(scheduler.clone().run());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!(pending = service.queue().len(), "shutting down");

    scheduler.shutdown();
    handle.await.context("Scheduler task panicked")?;
    Ok(())
}
