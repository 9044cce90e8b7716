//! Core types for the barcache OHLCV bar cache.
//!
//! This crate provides the fundamental data structures used throughout barcache:
//!
//! - [`SymbolCode`] - Normalized instrument code
//! - [`StoredGranularity`] - A bar width that is persisted in the cache
//! - [`Granularity`] - Any requestable bar width, stored or derived
//! - [`Bar`] - A single OHLCV bar
//! - [`TimeWindow`] - Time window for vendor requests
//! - [`IngestionRun`] - Audit record of one ingestion run

#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/barcache/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod bar;
mod error;
mod granularity;
mod run;
mod symbol;
mod window;

pub use bar::Bar;
pub use error::{BarError, GranularityParseError, SymbolError, VariantParseError, WindowError};
pub use granularity::{DERIVED_GRANULARITIES, Granularity, StoredGranularity};
pub use run::{IngestionRun, JobKind, RunId, RunStatus};
pub use symbol::SymbolCode;
pub use window::TimeWindow;
