//! Cached bar read command.

use anyhow::{Context, Result, bail};
use barcache_lib::daemon::{CacheConfig, Freshness, ReadOutcome};
use barcache_lib::prelude::*;
use chrono::{DateTime, NaiveDate, Utc};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use crate::display::{Format, write_bars};

/// Reads bars for one series, collecting first if asked and needed.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn bars(
    config: &CacheConfig,
    symbol: &str,
    granularity: &str,
    start: Option<&str>,
    end: Option<&str>,
    extended: bool,
    collect: bool,
    format: Format,
    output: Option<PathBuf>,
) -> Result<()> {
    let symbol = super::parse_symbol(symbol)?;
    let granularity: Granularity = granularity
        .parse()
        .with_context(|| format!("Invalid granularity '{granularity}'"))?;
    let window = window(granularity, start, end)?;
    let (service, scheduler) = super::wire(config)?;

    let mut outcome = service
        .get_bars_at(&symbol, granularity, extended, window, Utc::now())
        .await?;

    if collect && let ReadOutcome::StaleOrMissing { freshness, .. } = &outcome {
        eprintln!("{symbol} {granularity} is {}; collecting now", describe(freshness));
        let report = service
            .queue()
            .drain(scheduler.ingestor(), &CancellationToken::new())
            .await;
        if let Some(report) = report {
            let inserted: u64 = report.runs.iter().map(|r| r.bars_inserted).sum();
            eprintln!("Collected {inserted} new bars");
        }
        outcome = service
            .get_bars_at(&symbol, granularity, extended, window, Utc::now())
            .await?;
    }

    match outcome {
        ReadOutcome::Ready(bars) => write_bars(&bars, output.as_deref(), format),
        ReadOutcome::StaleOrMissing { freshness, .. } if collect => {
            bail!("{symbol} {granularity} is still {} after collection", describe(&freshness))
        }
        ReadOutcome::StaleOrMissing { freshness, .. } => {
            bail!(
                "{symbol} {granularity} is {}; run with --collect to fetch it now",
                describe(&freshness)
            )
        }
    }
}

fn describe(freshness: &Freshness) -> String {
    match freshness {
        Freshness::Missing => "not cached".to_string(),
        Freshness::Stale { age, threshold } => format!(
            "stale ({}m old, limit {}m)",
            age.num_minutes(),
            threshold.num_minutes()
        ),
        Freshness::Fresh | Freshness::RecentlyRefreshed => "fresh".to_string(),
    }
}

fn parse_date(raw: &str) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{raw}', expected YYYY-MM-DD"))?;
    Ok(date.and_time(chrono::NaiveTime::MIN).and_utc())
}

fn window(
    granularity: Granularity,
    start: Option<&str>,
    end: Option<&str>,
) -> Result<Option<TimeWindow>> {
    if start.is_none() && end.is_none() {
        return Ok(None);
    }
    let end = end.map(parse_date).transpose()?.unwrap_or_else(Utc::now);
    let start = match start {
        Some(raw) => parse_date(raw)?,
        None => end - granularity.source().history_window(),
    };
    Ok(Some(TimeWindow::new(start, end)?))
}
