//! Ingestion audit command.

use anyhow::{Context, Result};
use barcache_lib::daemon::CacheConfig;

use crate::display::print_runs;

/// Shows the most recent ingestion runs.
pub(crate) fn runs(config: &CacheConfig, limit: usize) -> Result<()> {
    let store = config.open_store().context("Failed to open cache")?;
    let runs = store.list_runs(limit).context("Failed to read runs")?;
    print_runs(&runs);
    Ok(())
}
