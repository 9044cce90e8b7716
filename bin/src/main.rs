//! barcache CLI - local OHLCV bar cache with scheduled ingestion.

use anyhow::{Context, Result};
use barcache_lib::daemon::CacheConfig;
use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod display;

use display::Format;

#[derive(Parser)]
#[command(name = "barcache")]
#[command(about = "Local OHLCV bar cache with scheduled ingestion and vendor fallback", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file (defaults to ./barcache.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler, queue processor and gap reconciler until Ctrl-C
    Serve,

    /// Run one ingestion of a stored granularity now
    Ingest {
        /// Stored granularity (1m, 5m, 15m, 30m, 1h, 1d, 1w, 1mo)
        granularity: String,

        /// Only these symbols (defaults to every active symbol)
        #[arg(short, long)]
        symbol: Vec<String>,
    },

    /// Read cached bars
    Bars {
        /// Symbol code (e.g., AAPL, BRK.B)
        symbol: String,

        /// Granularity, stored or derived (e.g., 5m, 45m, 1d, 3mo)
        #[arg(short, long, default_value = "1d")]
        granularity: String,

        /// Start date (YYYY-MM-DD)
        #[arg(short, long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD, exclusive)
        #[arg(short, long)]
        end: Option<String>,

        /// Include pre-market and after-hours intraday bars
        #[arg(long)]
        extended: bool,

        /// Collect immediately when the series is stale or missing
        #[arg(long)]
        collect: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value = "csv")]
        format: Format,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Queue symbols for collection and drain the queue now
    Collect {
        /// Symbol codes
        #[arg(required = true)]
        symbols: Vec<String>,

        /// One stored granularity (defaults to every configured one)
        #[arg(short, long)]
        granularity: Option<String>,
    },

    /// Reconcile gaps between stored and expected bar counts
    Gaps {
        /// Spot-check one random symbol instead of a full sweep
        #[arg(long)]
        spot: bool,

        /// Only report gaps, do not backfill
        #[arg(long)]
        dry_run: bool,
    },

    /// Trim every series to its retention ceiling
    Evict,

    /// Show recent ingestion runs
    Runs {
        /// Number of runs to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// List cached symbols
    Symbols {
        /// Include deactivated symbols
        #[arg(long)]
        all: bool,
    },

    /// Ask the vendors whether a symbol exists
    Validate {
        /// Symbol code
        symbol: String,
    },
}

fn init_tracing(verbose: u8, config_level: &str) -> Result<()> {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config_level)),
        1 => EnvFilter::new("barcache=info,barcache_daemon=info,barcache_fetch=info"),
        2 => EnvFilter::new(
            "barcache=debug,barcache_daemon=debug,barcache_fetch=debug,barcache_store=debug,barcache_aggregate=debug",
        ),
        _ => EnvFilter::new(
            "barcache=trace,barcache_daemon=trace,barcache_fetch=trace,barcache_store=trace,barcache_aggregate=trace",
        ),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .context("Failed to initialize logging")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };

    let config = CacheConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(cli.verbose, &config.log_level)?;

    match command {
        Commands::Serve => commands::serve::serve(&config).await,
        Commands::Ingest {
            granularity,
            symbol,
        } => commands::ingest::ingest(&config, &granularity, &symbol).await,
        Commands::Bars {
            symbol,
            granularity,
            start,
            end,
            extended,
            collect,
            format,
            output,
        } => {
            commands::bars::bars(
                &config,
                &symbol,
                &granularity,
                start.as_deref(),
                end.as_deref(),
                extended,
                collect,
                format,
                output,
            )
            .await
        }
        Commands::Collect {
            symbols,
            granularity,
        } => commands::collect::collect(&config, &symbols, granularity.as_deref()).await,
        Commands::Gaps { spot, dry_run } => commands::gaps::gaps(&config, spot, dry_run).await,
        Commands::Evict => commands::evict::evict(&config).await,
        Commands::Runs { limit } => commands::runs::runs(&config, limit),
        Commands::Symbols { all } => commands::symbols::symbols(&config, all),
        Commands::Validate { symbol } => commands::validate::validate(&config, &symbol).await,
    }
}
