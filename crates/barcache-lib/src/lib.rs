//! OHLCV bar cache with scheduled ingestion and multi-vendor fallback.
//!
//! This is a facade crate that re-exports the barcache workspace crates.
//!
//! # Quick Start
//!
//! ```ignore
//! use barcache_lib::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CacheConfig::load(None)?;
//!     let (service, scheduler) = CacheService::from_config(&config)?;
//!     tokio::spawn(scheduler.clone().run());
//!
//!     let aapl = SymbolCode::parse("aapl")?;
//!     match service.get_bars(&aapl, "1d".parse()?, false).await? {
//!         ReadOutcome::Ready(bars) => println!("{} bars", bars.len()),
//!         ReadOutcome::StaleOrMissing { .. } => println!("queued, try again shortly"),
//!     }
//!     scheduler.shutdown();
//!     Ok(())
//! }
//! ```

#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/barcache/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub use barcache_types::*;

/// Vendor clients and the fallback chain.
pub mod fetch {
    pub use barcache_fetch::*;
}

/// Source-to-derived bar aggregation.
pub mod aggregate {
    pub use barcache_aggregate::*;
}

/// SQLite cache store.
pub mod store {
    pub use barcache_store::*;
}

/// Scheduler, queue, gap reconciliation and the read path.
#[cfg(feature = "daemon")]
pub mod daemon {
    pub use barcache_daemon::*;
}

/// Bar export formats.
#[cfg(feature = "format")]
pub mod format {
    pub use barcache_format::*;
}

/// Prelude module for convenient imports.
///
/// ```
/// use barcache_lib::prelude::*;
/// ```
pub mod prelude {
    pub use barcache_types::{
        Bar, Granularity, IngestionRun, JobKind, RunStatus, StoredGranularity, SymbolCode,
        TimeWindow,
    };

    pub use barcache_aggregate::aggregate;
    pub use barcache_fetch::{BarRequest, FallbackClient, FetchError, Vendor};
    pub use barcache_store::{CacheStore, StoreError};

    #[cfg(feature = "daemon")]
    pub use barcache_daemon::{
        CacheConfig, CacheService, CollectionRequest, Freshness, ReadOutcome, Scheduler,
        StalenessPolicy, TradingSession,
    };

    #[cfg(feature = "format")]
    pub use barcache_format::{Formatter, OutputFormat};
}
