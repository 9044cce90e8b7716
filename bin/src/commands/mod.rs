//! CLI command implementations.

pub(crate) mod bars;
pub(crate) mod collect;
pub(crate) mod evict;
pub(crate) mod gaps;
pub(crate) mod ingest;
pub(crate) mod runs;
pub(crate) mod serve;
pub(crate) mod symbols;
pub(crate) mod validate;

use anyhow::{Context, Result};
use barcache_lib::daemon::{CacheConfig, CacheService, Scheduler};
use barcache_lib::prelude::*;
use std::sync::Arc;

/// Opens the store and wires the service and scheduler from `config`.
pub(crate) fn wire(config: &CacheConfig) -> Result<(CacheService, Arc<Scheduler>)> {
    CacheService::from_config(config).with_context(|| {
        format!(
            "Failed to open cache at {}",
            config.database_path().display()
        )
    })
}

pub(crate) fn parse_symbol(raw: &str) -> Result<SymbolCode> {
    raw.parse()
        .with_context(|| format!("Invalid symbol '{raw}'"))
}

pub(crate) fn parse_stored(raw: &str) -> Result<StoredGranularity> {
    raw.parse()
        .with_context(|| format!("'{raw}' is not a stored granularity"))
}
