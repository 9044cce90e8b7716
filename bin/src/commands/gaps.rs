//! Gap reconciliation command.

use anyhow::Result;
use barcache_lib::daemon::{CacheConfig, GapReport};
use tokio_util::sync::CancellationToken;

use crate::display::print_gaps;

/// Runs a systematic sweep or a single spot check, or lists short series.
pub(crate) async fn gaps(config: &CacheConfig, spot: bool, dry_run: bool) -> Result<()> {
    let (_, scheduler) = super::wire(config)?;
    let reconciler = scheduler.gaps();

    if dry_run {
        let mut report = GapReport::default();
        for &granularity in reconciler.granularities() {
            let short = reconciler.find_gaps(granularity).await?;
            report.granularities_checked += 1;
            report.gaps_found += short.len();
            for record in &short {
                println!("{:<5} {}", granularity.as_str(), record.code);
            }
        }
        print_gaps(&report);
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let report = if spot {
        reconciler.spot_check(&cancel).await
    } else {
        reconciler.systematic(&cancel).await
    };
    print_gaps(&report);
    Ok(())
}
