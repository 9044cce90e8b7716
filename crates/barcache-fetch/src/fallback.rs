//! Ordered multi-vendor fallback.

use barcache_types::SymbolCode;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{BarRequest, FetchError, Vendor, VendorBars, VendorError, VendorFailure};

/// Bars returned by the first vendor that had data.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    /// Non-empty bar series keyed by symbol.
    pub bars: VendorBars,
    /// Name of the vendor that produced them.
    pub vendor: String,
}

impl FetchOutcome {
    /// Returns the total number of bars across all symbols.
    #[must_use]
    pub fn bar_count(&self) -> usize {
        self.bars.values().map(Vec::len).sum()
    }
}

/// Tries vendors in priority order until one returns data.
#[derive(Debug, Clone, Default)]
pub struct FallbackClient {
    vendors: Vec<Arc<dyn Vendor>>,
}

impl FallbackClient {
    /// Creates a client over vendors listed highest priority first.
    #[must_use]
    pub const fn new(vendors: Vec<Arc<dyn Vendor>>) -> Self {
        Self { vendors }
    }

    /// Returns the configured vendors in priority order.
    #[must_use]
    pub fn vendors(&self) -> &[Arc<dyn Vendor>] {
        &self.vendors
    }

    /// Returns the largest batch every available vendor accepts.
    ///
    /// Returns `None` when no vendor is available.
    #[must_use]
    pub fn max_batch_size(&self) -> Option<usize> {
        self.vendors
            .iter()
            .filter(|v| v.is_available())
            .map(|v| v.max_batch_size().max(1))
            .min()
    }

    /// Fetches bars from the first vendor that returns a non-empty result.
    ///
    /// An empty result is a soft miss: the next vendor is tried. Vendors after
    /// the one that succeeded are never called.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::AllVendorsFailed`] with one reason per vendor if
    /// none produced data.
    pub async fn fetch_bars(&self, request: &BarRequest) -> Result<FetchOutcome, FetchError> {
        if self.vendors.is_empty() {
            return Err(FetchError::NoVendors);
        }

        let mut failures = Vec::new();

        for vendor in &self.vendors {
            if !vendor.is_available() {
                debug!(vendor = vendor.name(), "vendor not configured, skipping");
                failures.push(VendorFailure {
                    vendor: vendor.name().to_string(),
                    reason: VendorError::Unavailable,
                });
                continue;
            }

            match vendor.fetch_bars(request).await {
                Ok(mut bars) => {
                    bars.retain(|_, series| !series.is_empty());
                    if bars.is_empty() {
                        info!(
                            vendor = vendor.name(),
                            granularity = %request.granularity,
                            symbols = request.symbols.len(),
                            "vendor returned no data, trying next vendor"
                        );
                        failures.push(VendorFailure {
                            vendor: vendor.name().to_string(),
                            reason: VendorError::Empty,
                        });
                        continue;
                    }
                    if !failures.is_empty() {
                        info!(
                            vendor = vendor.name(),
                            skipped = failures.len(),
                            "served by fallback vendor"
                        );
                    }
                    return Ok(FetchOutcome {
                        bars,
                        vendor: vendor.name().to_string(),
                    });
                }
                Err(e) => {
                    warn!(
                        vendor = vendor.name(),
                        granularity = %request.granularity,
                        error = %e,
                        "vendor fetch failed, trying next vendor"
                    );
                    failures.push(VendorFailure {
                        vendor: vendor.name().to_string(),
                        reason: e,
                    });
                }
            }
        }

        Err(FetchError::AllVendorsFailed { failures })
    }

    /// Asks vendors in order whether they know the symbol.
    ///
    /// Returns `Ok(true)` at the first confirmation and `Ok(false)` only when
    /// every available vendor explicitly rejected the symbol.
    ///
    /// # Errors
    ///
    /// Returns an error if no vendor is available, or if no vendor confirmed
    /// the symbol and at least one could not answer.
    pub async fn validate_symbol(&self, symbol: &SymbolCode) -> Result<bool, FetchError> {
        let mut failures = Vec::new();
        let mut rejections = 0usize;

        for vendor in self.vendors.iter().filter(|v| v.is_available()) {
            match vendor.validate_symbol(symbol).await {
                Ok(true) => return Ok(true),
                Ok(false) => {
                    debug!(vendor = vendor.name(), symbol = %symbol, "vendor rejected symbol");
                    rejections += 1;
                }
                Err(e) => {
                    warn!(vendor = vendor.name(), symbol = %symbol, error = %e, "symbol validation failed");
                    failures.push(VendorFailure {
                        vendor: vendor.name().to_string(),
                        reason: e,
                    });
                }
            }
        }

        if failures.is_empty() {
            if rejections == 0 {
                return Err(FetchError::NoVendors);
            }
            return Ok(false);
        }
        Err(FetchError::AllVendorsFailed { failures })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use barcache_types::{Bar, StoredGranularity, TimeWindow};
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, Copy)]
    enum Behavior {
        Data,
        Empty,
        RateLimited,
        Unavailable,
    }

    #[derive(Debug)]
    struct FakeVendor {
        name: &'static str,
        behavior: Behavior,
        knows_symbol: Option<bool>,
        calls: AtomicUsize,
    }

    impl FakeVendor {
        fn new(name: &'static str, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                name,
                behavior,
                knows_symbol: Some(false),
                calls: AtomicUsize::new(0),
            })
        }

        fn validating(name: &'static str, knows_symbol: Option<bool>) -> Arc<Self> {
            Arc::new(Self {
                name,
                behavior: Behavior::Data,
                knows_symbol,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Vendor for FakeVendor {
        fn name(&self) -> &str {
            self.name
        }

        fn max_batch_size(&self) -> usize {
            match self.behavior {
                Behavior::Empty => 25,
                _ => 100,
            }
        }

        fn is_available(&self) -> bool {
            !matches!(self.behavior, Behavior::Unavailable)
        }

        async fn fetch_bars(&self, request: &BarRequest) -> Result<VendorBars, VendorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::Data => Ok(request
                    .symbols
                    .iter()
                    .map(|s| {
                        let bar = Bar::new(request.window.start, 1.0, 2.0, 0.5, 1.5, 100.0);
                        (s.clone(), vec![bar])
                    })
                    .collect()),
                Behavior::Empty => Ok(request
                    .symbols
                    .iter()
                    .map(|s| (s.clone(), Vec::new()))
                    .collect()),
                Behavior::RateLimited => Err(VendorError::RateLimited),
                Behavior::Unavailable => Err(VendorError::Unavailable),
            }
        }

        async fn validate_symbol(&self, _symbol: &SymbolCode) -> Result<bool, VendorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.knows_symbol.ok_or(VendorError::Status {
                status: 500,
                message: "boom".to_string(),
            })
        }
    }

    fn client(vendors: &[&Arc<FakeVendor>]) -> FallbackClient {
        FallbackClient::new(
            vendors
                .iter()
                .map(|v| Arc::clone(v) as Arc<dyn Vendor>)
                .collect(),
        )
    }

    fn request() -> BarRequest {
        let window = TimeWindow::new(
            Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap(),
        )
        .unwrap();
        BarRequest::single(
            SymbolCode::parse("AAPL").unwrap(),
            StoredGranularity::Day1,
            window,
        )
    }

    #[tokio::test]
    async fn test_fallback_ordering_skips_empty_and_stops_at_success() {
        let a = FakeVendor::new("a", Behavior::Empty);
        let b = FakeVendor::new("b", Behavior::Data);
        let c = FakeVendor::new("c", Behavior::Data);
        let client = client(&[&a, &b, &c]);

        let outcome = client.fetch_bars(&request()).await.unwrap();

        assert_eq!(outcome.vendor, "b");
        assert_eq!(outcome.bar_count(), 1);
        assert_eq!(a.calls(), 1);
        assert_eq!(b.calls(), 1);
        assert_eq!(c.calls(), 0);
    }

    #[tokio::test]
    async fn test_all_vendors_failed_reports_each_reason() {
        let a = FakeVendor::new("a", Behavior::Unavailable);
        let b = FakeVendor::new("b", Behavior::Empty);
        let c = FakeVendor::new("c", Behavior::RateLimited);
        let client = client(&[&a, &b, &c]);

        let err = client.fetch_bars(&request()).await.unwrap_err();

        let failures = err.failures();
        assert_eq!(failures.len(), 3);
        assert!(matches!(failures[0].reason, VendorError::Unavailable));
        assert!(matches!(failures[1].reason, VendorError::Empty));
        assert!(matches!(failures[2].reason, VendorError::RateLimited));
        assert!(err.is_rate_limited());
        // Unavailable vendors are never called.
        assert_eq!(a.calls(), 0);
    }

    #[tokio::test]
    async fn test_no_vendors() {
        let client = FallbackClient::default();
        assert!(matches!(
            client.fetch_bars(&request()).await,
            Err(FetchError::NoVendors)
        ));
        assert_eq!(client.max_batch_size(), None);
    }

    #[test]
    fn test_max_batch_size_is_smallest_available_cap() {
        let client = client(&[
            &FakeVendor::new("a", Behavior::Data),
            &FakeVendor::new("b", Behavior::Empty),
            &FakeVendor::new("c", Behavior::Unavailable),
        ]);
        assert_eq!(client.max_batch_size(), Some(25));
    }

    #[tokio::test]
    async fn test_validate_true_on_first_confirmation() {
        let a = FakeVendor::validating("a", Some(false));
        let b = FakeVendor::validating("b", Some(true));
        let c = FakeVendor::validating("c", Some(true));
        let client = client(&[&a, &b, &c]);

        let symbol = SymbolCode::parse("AAPL").unwrap();
        assert!(client.validate_symbol(&symbol).await.unwrap());
        assert_eq!(c.calls(), 0);
    }

    #[tokio::test]
    async fn test_validate_false_only_when_all_reject() {
        let symbol = SymbolCode::parse("ZZZZ").unwrap();

        let rejecting = client(&[
            &FakeVendor::validating("a", Some(false)),
            &FakeVendor::validating("b", Some(false)),
        ]);
        assert!(!rejecting.validate_symbol(&symbol).await.unwrap());

        // One vendor could not answer: the symbol is not declared invalid.
        let undecided = client(&[
            &FakeVendor::validating("a", Some(false)),
            &FakeVendor::validating("b", None),
        ]);
        assert!(undecided.validate_symbol(&symbol).await.is_err());
    }
}
