//! One-off ingestion command.

use anyhow::{Context, Result};
use barcache_lib::daemon::CacheConfig;
use barcache_lib::prelude::*;
use barcache_lib::store::SymbolRecord;
use tokio_util::sync::CancellationToken;

use crate::display::print_runs;

/// Ingests one stored granularity now, for every active symbol or the given ones.
pub(crate) async fn ingest(config: &CacheConfig, granularity: &str, symbols: &[String]) -> Result<()> {
    let granularity = super::parse_stored(granularity)?;
    let (service, scheduler) = super::wire(config)?;

    let run = if symbols.is_empty() {
        scheduler.fire(granularity, JobKind::OnDemand).await
    } else {
        let records = symbols
            .iter()
            .map(|raw| {
                let code = super::parse_symbol(raw)?;
                service
                    .store()
                    .ensure_symbol(&code)
                    .with_context(|| format!("Failed to register {code}"))
            })
            .collect::<Result<Vec<SymbolRecord>>>()?;
        let window = TimeWindow::ending_at(chrono::Utc::now(), granularity.history_window());
        scheduler
            .ingestor()
            .run_job(
                JobKind::OnDemand,
                granularity,
                &records,
                window,
                &CancellationToken::new(),
            )
            .await
            .run
    };

    print_runs(std::slice::from_ref(&run));
    if run.status == RunStatus::Failed {
        anyhow::bail!("ingestion failed");
    }
    Ok(())
}
