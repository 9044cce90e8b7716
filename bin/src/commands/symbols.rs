//! Symbol listing command.

use anyhow::{Context, Result};
use barcache_lib::daemon::CacheConfig;

use crate::display::print_symbols;

/// Lists active symbols, or every symbol with `all`.
pub(crate) fn symbols(config: &CacheConfig, all: bool) -> Result<()> {
    let store = config.open_store().context("Failed to open cache")?;
    let symbols = store.symbols(!all).context("Failed to read symbols")?;
    print_symbols(&symbols);
    Ok(())
}
