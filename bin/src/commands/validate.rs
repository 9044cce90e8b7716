//! Symbol validation command.

use anyhow::{Context, Result};
use barcache_lib::daemon::CacheConfig;

/// Asks the vendor chain whether a symbol is known.
pub(crate) async fn validate(config: &CacheConfig, symbol: &str) -> Result<()> {
    let symbol = super::parse_symbol(symbol)?;
    let client = config
        .build_client()
        .context("Failed to build vendor clients")?;

    if client.validate_symbol(&symbol).await? {
        println!("{symbol}: known");
    } else {
        println!("{symbol}: unknown to every vendor");
    }
    Ok(())
}
