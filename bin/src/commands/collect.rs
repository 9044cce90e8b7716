//! Queue-and-drain collection command.

use anyhow::Result;
use barcache_lib::daemon::{CacheConfig, CollectionRequest};
use tokio_util::sync::CancellationToken;

use crate::display::print_drain;

/// Queues each symbol (whole, or one series) and drains the queue.
pub(crate) async fn collect(
    config: &CacheConfig,
    symbols: &[String],
    granularity: Option<&str>,
) -> Result<()> {
    let granularity = granularity.map(super::parse_stored).transpose()?;
    let (service, scheduler) = super::wire(config)?;

    for raw in symbols {
        let code = super::parse_symbol(raw)?;
        let request = match granularity {
            Some(g) => CollectionRequest::series(code, g),
            None => CollectionRequest::symbol(code),
        };
        service.queue().enqueue(request);
    }

    let report = service
        .queue()
        .drain(scheduler.ingestor(), &CancellationToken::new())
        .await;
    match report {
        Some(report) => print_drain(&report),
        None => println!("Nothing to collect."),
    }
    Ok(())
}
