//! SQLite-backed bar cache store for barcache.
//!
//! - [`CacheStore`] - Connection handle with schema bootstrap and busy retry
//! - [`SymbolRecord`] - Stored symbol with lifecycle state
//! - [`UpsertStats`] - Inserted/updated counts of a bar upsert
//! - [`StoreOptions`] - Lock-contention retry policy

#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/barcache/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod bars;
mod error;
mod runs;
mod store;
mod symbols;

pub use bars::UpsertStats;
pub use error::{Result, StoreError};
pub use store::{CacheStore, StoreOptions};
pub use symbols::SymbolRecord;
