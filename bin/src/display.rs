//! Display utilities and output formatting for the barcache CLI.

use anyhow::{Context, Result};
use barcache_lib::daemon::{DrainReport, GapReport};
use barcache_lib::format::OutputFormat;
use barcache_lib::prelude::*;
use barcache_lib::store::SymbolRecord;
use clap::ValueEnum;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Output format for exported bars.
#[derive(Clone, Copy, ValueEnum)]
pub(crate) enum Format {
    Csv,
    Json,
    Ndjson,
    Parquet,
}

impl From<Format> for OutputFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Csv => Self::Csv,
            Format::Json => Self::Json,
            Format::Ndjson => Self::Ndjson,
            Format::Parquet => Self::Parquet,
        }
    }
}

/// Writes bars to `output`, or stdout when no path is given.
pub(crate) fn write_bars(bars: &[Bar], output: Option<&Path>, format: Format) -> Result<()> {
    let format = OutputFormat::from(format);
    match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            let mut writer = BufWriter::new(file);
            format.write_bars(bars, &mut writer)?;
            writer.flush()?;
            eprintln!("Wrote {} bars to {}", bars.len(), path.display());
        }
        None => {
            if format.is_binary() {
                anyhow::bail!("{format} output needs --output <file>");
            }
            let stdout = std::io::stdout();
            let mut writer = BufWriter::new(stdout);
            format.write_bars(bars, &mut writer)?;
            writer.flush()?;
        }
    }
    Ok(())
}

fn format_time(at: chrono::DateTime<chrono::Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Prints a table of ingestion runs, newest first.
pub(crate) fn print_runs(runs: &[IngestionRun]) {
    if runs.is_empty() {
        println!("No runs recorded.");
        return;
    }

    println!(
        "{:<20} {:<15} {:<5} {:<10} {:>8} {:>10} {:>10}  NOTE",
        "STARTED", "KIND", "GRAN", "STATUS", "SYMBOLS", "INSERTED", "UPDATED"
    );
    println!("{}", "-".repeat(96));

    for run in runs {
        let granularity = run
            .granularity
            .map_or_else(|| "-".to_string(), |g| g.to_string());
        println!(
            "{:<20} {:<15} {:<5} {:<10} {:>3}/{:<4} {:>10} {:>10}  {}",
            format_time(run.started_at),
            run.kind.as_str(),
            granularity,
            run.status.as_str(),
            run.symbols_succeeded,
            run.symbols_attempted,
            run.bars_inserted,
            run.bars_updated,
            run.error.as_deref().unwrap_or(""),
        );
    }
}

/// Prints a table of cached symbols.
pub(crate) fn print_symbols(symbols: &[SymbolRecord]) {
    if symbols.is_empty() {
        println!("No symbols cached.");
        return;
    }

    println!(
        "{:<12} {:<8} {:<20} {:>9}",
        "SYMBOL", "ACTIVE", "FIRST REQUESTED", "REJECTED"
    );
    println!("{}", "-".repeat(52));

    for record in symbols {
        println!(
            "{:<12} {:<8} {:<20} {:>9}",
            record.code.as_str(),
            if record.active { "yes" } else { "no" },
            format_time(record.first_requested_at),
            record.validation_failures,
        );
    }
}

pub(crate) fn print_drain(report: &DrainReport) {
    println!(
        "Drained {} request(s), {} run(s), {} requeued",
        report.requests.len(),
        report.runs.len(),
        report.requeued
    );
    print_runs(&report.runs);
}

pub(crate) fn print_gaps(report: &GapReport) {
    println!(
        "Checked {} granularit{}, found {} short series",
        report.granularities_checked,
        if report.granularities_checked == 1 { "y" } else { "ies" },
        report.gaps_found
    );
    if report.yielded {
        println!("Stopped early: a queue drain was in progress.");
    }
    if report.rate_limited {
        println!("Stopped early: rate limited.");
    }
    print_runs(&report.runs);
}
