//! Retention sweep command.

use anyhow::Result;
use barcache_lib::daemon::CacheConfig;

use crate::display::print_runs;

/// Trims every series to its configured retention ceiling.
pub(crate) async fn evict(config: &CacheConfig) -> Result<()> {
    let (_, scheduler) = super::wire(config)?;
    let runs = scheduler.evict().await;
    print_runs(&runs);
    Ok(())
}
