//! OHLCV bar data structure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::BarError;

/// A single OHLCV bar (candlestick).
///
/// The timestamp is the bar's open time. Together with the symbol and the
/// granularity it forms the natural key of a cached bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Bar open time (start of the period).
    pub timestamp: DateTime<Utc>,
    /// Opening price.
    pub open: f64,
    /// Highest price during the period.
    pub high: f64,
    /// Lowest price during the period.
    pub low: f64,
    /// Closing price.
    pub close: f64,
    /// Traded volume.
    pub volume: f64,
    /// Volume-weighted average price, when the vendor reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vwap: Option<f64>,
    /// Number of trades, when the vendor reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trade_count: Option<u64>,
}

impl Bar {
    /// Creates a new bar without VWAP or trade count.
    #[must_use]
    pub const fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
            vwap: None,
            trade_count: None,
        }
    }

    /// Sets the volume-weighted average price.
    #[must_use]
    pub const fn with_vwap(mut self, vwap: f64) -> Self {
        self.vwap = Some(vwap);
        self
    }

    /// Sets the trade count.
    #[must_use]
    pub const fn with_trade_count(mut self, trade_count: u64) -> Self {
        self.trade_count = Some(trade_count);
        self
    }

    /// Checks the OHLC invariants.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant: a non-finite field, a high below
    /// the body, a low above the body, or a negative volume.
    pub fn validate(&self) -> Result<(), BarError> {
        for (name, value) in [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
            ("volume", self.volume),
        ] {
            if !value.is_finite() {
                return Err(BarError::NonFinite(name));
            }
        }
        if self.high < self.open.max(self.close) {
            return Err(BarError::HighBelowBody);
        }
        if self.low > self.open.min(self.close) {
            return Err(BarError::LowAboveBody);
        }
        if self.volume < 0.0 {
            return Err(BarError::NegativeVolume);
        }
        Ok(())
    }

    /// Returns true if the bar satisfies the OHLC invariants.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Returns the price range (high - low).
    #[must_use]
    pub fn range(&self) -> f64 {
        self.high - self.low
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 14, 30, 0).unwrap()
    }

    #[test]
    fn test_valid_bar() {
        let bar = Bar::new(ts(), 10.0, 12.0, 9.5, 11.0, 1_000.0)
            .with_vwap(10.8)
            .with_trade_count(42);
        assert!(bar.is_valid());
        assert!((bar.range() - 2.5).abs() < 1e-10);
        assert_eq!(bar.trade_count, Some(42));
    }

    #[test]
    fn test_invariant_violations() {
        assert_eq!(
            Bar::new(ts(), 10.0, 10.5, 9.5, 11.0, 1.0).validate(),
            Err(BarError::HighBelowBody)
        );
        assert_eq!(
            Bar::new(ts(), 10.0, 12.0, 10.5, 11.0, 1.0).validate(),
            Err(BarError::LowAboveBody)
        );
        assert_eq!(
            Bar::new(ts(), 10.0, 12.0, 9.0, 11.0, -1.0).validate(),
            Err(BarError::NegativeVolume)
        );
        assert_eq!(
            Bar::new(ts(), f64::NAN, 12.0, 9.0, 11.0, 1.0).validate(),
            Err(BarError::NonFinite("open"))
        );
    }

    #[test]
    fn test_optional_fields_skipped_in_json() {
        let bar = Bar::new(ts(), 1.0, 2.0, 0.5, 1.5, 10.0);
        let json = serde_json::to_string(&bar).unwrap();
        assert!(!json.contains("vwap"));
        let back: Bar = serde_json::from_str(&json).unwrap();
        assert_eq!(back, bar);
    }
}
