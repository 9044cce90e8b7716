//! The common interface of upstream market data vendors.

use async_trait::async_trait;
use barcache_types::{Bar, StoredGranularity, SymbolCode, TimeWindow};
use std::collections::BTreeMap;

use crate::VendorError;

/// Bars returned by a vendor, keyed by requested symbol.
///
/// A single-symbol request still yields a one-entry map.
pub type VendorBars = BTreeMap<SymbolCode, Vec<Bar>>;

/// A request for one batch of symbols at one granularity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarRequest {
    /// Symbols in the batch.
    pub symbols: Vec<SymbolCode>,
    /// Granularity to fetch.
    pub granularity: StoredGranularity,
    /// Window of bar open times.
    pub window: TimeWindow,
}

impl BarRequest {
    /// Creates a new request.
    #[must_use]
    pub const fn new(
        symbols: Vec<SymbolCode>,
        granularity: StoredGranularity,
        window: TimeWindow,
    ) -> Self {
        Self {
            symbols,
            granularity,
            window,
        }
    }

    /// Creates a request for a single symbol.
    #[must_use]
    pub fn single(symbol: SymbolCode, granularity: StoredGranularity, window: TimeWindow) -> Self {
        Self::new(vec![symbol], granularity, window)
    }
}

/// An upstream market data API.
#[async_trait]
pub trait Vendor: Send + Sync + std::fmt::Debug {
    /// Short vendor name used in logs, failure reports and the bar vendor tag.
    fn name(&self) -> &str;

    /// Maximum number of symbols accepted in one [`BarRequest`].
    fn max_batch_size(&self) -> usize;

    /// Returns false when the vendor cannot be called at all (e.g. no credentials).
    fn is_available(&self) -> bool {
        true
    }

    /// Fetches bars for every symbol in the request.
    ///
    /// Symbols without data may be absent from the map or map to an empty vector.
    async fn fetch_bars(&self, request: &BarRequest) -> Result<VendorBars, VendorError>;

    /// Returns whether the vendor knows the symbol.
    async fn validate_symbol(&self, symbol: &SymbolCode) -> Result<bool, VendorError>;
}
