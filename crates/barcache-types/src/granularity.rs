//! Bar width definitions: stored granularities and the derived widths computed from them.

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::GranularityParseError;

/// A bar width that is ingested from vendors and persisted in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StoredGranularity {
    /// 1-minute bars.
    #[serde(rename = "1m")]
    Minute1,
    /// 5-minute bars.
    #[serde(rename = "5m")]
    Minute5,
    /// 15-minute bars.
    #[serde(rename = "15m")]
    Minute15,
    /// 30-minute bars.
    #[serde(rename = "30m")]
    Minute30,
    /// 1-hour bars.
    #[serde(rename = "1h")]
    Hour1,
    /// Daily bars.
    #[serde(rename = "1d")]
    Day1,
    /// Weekly bars.
    #[serde(rename = "1w")]
    Week1,
    /// Monthly bars.
    #[serde(rename = "1mo")]
    Month1,
}

impl StoredGranularity {
    /// Returns the nominal bar width in seconds.
    ///
    /// Months are counted as 30 days. Calendar-aware code (the fire schedule)
    /// does not rely on this value.
    #[must_use]
    pub const fn seconds(&self) -> u64 {
        match self {
            Self::Minute1 => 60,
            Self::Minute5 => 300,
            Self::Minute15 => 900,
            Self::Minute30 => 1_800,
            Self::Hour1 => 3_600,
            Self::Day1 => 86_400,
            Self::Week1 => 604_800,
            Self::Month1 => 2_592_000,
        }
    }

    /// Returns the nominal bar width.
    #[must_use]
    pub fn width(&self) -> TimeDelta {
        TimeDelta::seconds(self.seconds() as i64)
    }

    /// Returns true for widths shorter than a day.
    #[must_use]
    pub const fn is_intraday(&self) -> bool {
        matches!(
            self,
            Self::Minute1 | Self::Minute5 | Self::Minute15 | Self::Minute30 | Self::Hour1
        )
    }

    /// Returns the granularity as a string identifier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Minute1 => "1m",
            Self::Minute5 => "5m",
            Self::Minute15 => "15m",
            Self::Minute30 => "30m",
            Self::Hour1 => "1h",
            Self::Day1 => "1d",
            Self::Week1 => "1w",
            Self::Month1 => "1mo",
        }
    }

    /// Returns all stored granularities, finest first.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Minute1,
            Self::Minute5,
            Self::Minute15,
            Self::Minute30,
            Self::Hour1,
            Self::Day1,
            Self::Week1,
            Self::Month1,
        ]
    }

    /// Returns all stored granularities in gap reconciliation order, coarsest first.
    #[must_use]
    pub const fn gap_priority() -> &'static [Self] {
        &[
            Self::Month1,
            Self::Week1,
            Self::Day1,
            Self::Hour1,
            Self::Minute30,
            Self::Minute15,
            Self::Minute5,
            Self::Minute1,
        ]
    }

    /// How far back a scheduled run requests bars.
    ///
    /// Covers several bar periods so a run that follows a missed firing
    /// still fills the hole.
    #[must_use]
    pub fn refresh_lookback(&self) -> TimeDelta {
        match self {
            Self::Minute1 => TimeDelta::minutes(30),
            Self::Minute5 => TimeDelta::hours(1),
            Self::Minute15 => TimeDelta::hours(2),
            Self::Minute30 => TimeDelta::hours(4),
            Self::Hour1 => TimeDelta::hours(8),
            Self::Day1 => TimeDelta::days(7),
            Self::Week1 => TimeDelta::days(28),
            Self::Month1 => TimeDelta::days(93),
        }
    }

    /// How far back on-demand collection and gap backfill request bars.
    #[must_use]
    pub fn history_window(&self) -> TimeDelta {
        match self {
            Self::Minute1 => TimeDelta::days(7),
            Self::Minute5 => TimeDelta::days(30),
            Self::Minute15 => TimeDelta::days(60),
            Self::Minute30 => TimeDelta::days(90),
            Self::Hour1 => TimeDelta::days(180),
            Self::Day1 => TimeDelta::days(365),
            Self::Week1 => TimeDelta::days(5 * 365),
            Self::Month1 => TimeDelta::days(10 * 365),
        }
    }

    /// Number of bars a complete series is expected to hold.
    ///
    /// Derived from [`history_window`](Self::history_window) counted in regular
    /// session bars (390 minutes per trading day, about 250 trading days a year).
    #[must_use]
    pub const fn expected_bars(&self) -> u64 {
        match self {
            Self::Minute1 => 1_950,
            Self::Minute5 => 1_560,
            Self::Minute15 => 1_040,
            Self::Minute30 => 780,
            Self::Hour1 => 840,
            Self::Day1 => 250,
            Self::Week1 => 250,
            Self::Month1 => 120,
        }
    }

    /// Default ceiling of stored bars per (symbol, granularity) before eviction.
    #[must_use]
    pub const fn default_retention(&self) -> u64 {
        match self {
            Self::Minute1 | Self::Minute5 => 20_000,
            Self::Minute15 | Self::Minute30 | Self::Hour1 => 10_000,
            Self::Day1 => 5_000,
            Self::Week1 => 2_000,
            Self::Month1 => 600,
        }
    }

    /// Delay of the safety-net retry firing after the primary firing.
    ///
    /// Only intraday widths of five minutes or coarser get one: a third of the
    /// bar width.
    #[must_use]
    pub fn retry_offset(&self) -> Option<TimeDelta> {
        match self {
            Self::Minute5 | Self::Minute15 | Self::Minute30 | Self::Hour1 => {
                Some(TimeDelta::seconds(self.seconds() as i64 / 3))
            }
            Self::Minute1 | Self::Day1 | Self::Week1 | Self::Month1 => None,
        }
    }
}

impl std::fmt::Display for StoredGranularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for StoredGranularity {
    type Err = GranularityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "1m" | "m1" | "1min" | "minute" => Ok(Self::Minute1),
            "5m" | "m5" | "5min" => Ok(Self::Minute5),
            "15m" | "m15" | "15min" => Ok(Self::Minute15),
            "30m" | "m30" | "30min" => Ok(Self::Minute30),
            "1h" | "h1" | "60m" | "hour" | "1hour" => Ok(Self::Hour1),
            "1d" | "d1" | "day" | "daily" => Ok(Self::Day1),
            "1w" | "w1" | "week" | "weekly" => Ok(Self::Week1),
            "1mo" | "mo1" | "1month" | "month" | "monthly" => Ok(Self::Month1),
            _ => Err(GranularityParseError(s.to_string())),
        }
    }
}

/// Any bar width a caller may request.
///
/// A granularity is either stored (multiplier 1) or derived: built on read by
/// combining `multiplier` consecutive bars of its `source` granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub struct Granularity {
    label: &'static str,
    source: StoredGranularity,
    multiplier: u32,
}

/// Derived granularities, each mapped to the coarsest stored width dividing it.
pub const DERIVED_GRANULARITIES: &[Granularity] = &[
    Granularity::derived("2m", StoredGranularity::Minute1, 2),
    Granularity::derived("3m", StoredGranularity::Minute1, 3),
    Granularity::derived("4m", StoredGranularity::Minute1, 4),
    Granularity::derived("10m", StoredGranularity::Minute5, 2),
    Granularity::derived("20m", StoredGranularity::Minute5, 4),
    Granularity::derived("45m", StoredGranularity::Minute15, 3),
    Granularity::derived("2h", StoredGranularity::Hour1, 2),
    Granularity::derived("3h", StoredGranularity::Hour1, 3),
    Granularity::derived("4h", StoredGranularity::Hour1, 4),
    Granularity::derived("6h", StoredGranularity::Hour1, 6),
    Granularity::derived("12h", StoredGranularity::Hour1, 12),
    Granularity::derived("2d", StoredGranularity::Day1, 2),
    Granularity::derived("3d", StoredGranularity::Day1, 3),
    Granularity::derived("2w", StoredGranularity::Week1, 2),
    Granularity::derived("3mo", StoredGranularity::Month1, 3),
    Granularity::derived("6mo", StoredGranularity::Month1, 6),
    Granularity::derived("12mo", StoredGranularity::Month1, 12),
];

impl Granularity {
    const fn derived(label: &'static str, source: StoredGranularity, multiplier: u32) -> Self {
        Self {
            label,
            source,
            multiplier,
        }
    }

    /// Creates the granularity that reads a stored width directly.
    #[must_use]
    pub const fn stored(source: StoredGranularity) -> Self {
        Self {
            label: source.as_str(),
            source,
            multiplier: 1,
        }
    }

    /// Returns the stored granularity bars are read from.
    #[must_use]
    pub const fn source(&self) -> StoredGranularity {
        self.source
    }

    /// Returns how many source bars make up one bar of this width.
    #[must_use]
    pub const fn multiplier(&self) -> u32 {
        self.multiplier
    }

    /// Returns true if bars of this width are computed on read.
    #[must_use]
    pub const fn is_derived(&self) -> bool {
        self.multiplier > 1
    }

    /// Returns the stored granularity when this width is not derived.
    #[must_use]
    pub const fn as_stored(&self) -> Option<StoredGranularity> {
        if self.is_derived() {
            None
        } else {
            Some(self.source)
        }
    }

    /// Returns the nominal width in seconds.
    #[must_use]
    pub const fn seconds(&self) -> u64 {
        self.source.seconds() * self.multiplier as u64
    }

    /// Returns the granularity as a string identifier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        self.label
    }

    /// Returns every requestable granularity: stored widths first, then derived.
    #[must_use]
    pub fn all() -> Vec<Self> {
        StoredGranularity::all()
            .iter()
            .copied()
            .map(Self::stored)
            .chain(DERIVED_GRANULARITIES.iter().copied())
            .collect()
    }
}

impl From<StoredGranularity> for Granularity {
    fn from(source: StoredGranularity) -> Self {
        Self::stored(source)
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label)
    }
}

impl FromStr for Granularity {
    type Err = GranularityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(stored) = s.parse::<StoredGranularity>() {
            return Ok(Self::stored(stored));
        }
        let normalized = s.trim().to_lowercase();
        DERIVED_GRANULARITIES
            .iter()
            .find(|g| g.label == normalized)
            .copied()
            .ok_or_else(|| GranularityParseError(s.to_string()))
    }
}

impl TryFrom<String> for Granularity {
    type Error = GranularityParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// Hand-written equivalent of `#[serde(try_from = "String")]`; the derive would
// require `'de: 'static` because of the `&'static str` label field.
impl<'de> Deserialize<'de> for Granularity {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Self::try_from(value).map_err(serde::de::Error::custom)
    }
}

impl From<Granularity> for String {
    fn from(g: Granularity) -> Self {
        g.label.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stored_seconds() {
        assert_eq!(StoredGranularity::Minute1.seconds(), 60);
        assert_eq!(StoredGranularity::Hour1.seconds(), 3600);
        assert_eq!(StoredGranularity::Day1.seconds(), 86400);
        assert!(StoredGranularity::Hour1.is_intraday());
        assert!(!StoredGranularity::Day1.is_intraday());
    }

    #[test]
    fn test_stored_parse_aliases() {
        assert_eq!(
            "M5".parse::<StoredGranularity>().unwrap(),
            StoredGranularity::Minute5
        );
        assert_eq!(
            "daily".parse::<StoredGranularity>().unwrap(),
            StoredGranularity::Day1
        );
        assert_eq!(
            "1mo".parse::<StoredGranularity>().unwrap(),
            StoredGranularity::Month1
        );
        assert!("7m".parse::<StoredGranularity>().is_err());
    }

    #[test]
    fn test_derived_resolution() {
        let g: Granularity = "45m".parse().unwrap();
        assert_eq!(g.source(), StoredGranularity::Minute15);
        assert_eq!(g.multiplier(), 3);
        assert!(g.is_derived());
        assert_eq!(g.as_stored(), None);

        let g: Granularity = "1h".parse().unwrap();
        assert_eq!(g.as_stored(), Some(StoredGranularity::Hour1));
        assert_eq!(g.multiplier(), 1);

        assert!("7m".parse::<Granularity>().is_err());
    }

    #[test]
    fn test_derived_uses_coarsest_dividing_source() {
        for g in DERIVED_GRANULARITIES {
            let coarsest = StoredGranularity::all()
                .iter()
                .filter(|s| g.seconds() % s.seconds() == 0)
                .max_by_key(|s| s.seconds())
                .copied()
                .unwrap();
            assert_eq!(g.source(), coarsest, "derived {g}");
        }
    }

    #[test]
    fn test_retry_offset() {
        assert_eq!(StoredGranularity::Minute1.retry_offset(), None);
        assert_eq!(
            StoredGranularity::Minute15.retry_offset(),
            Some(TimeDelta::minutes(5))
        );
        assert_eq!(StoredGranularity::Day1.retry_offset(), None);
    }

    #[test]
    fn test_gap_priority_is_coarse_to_fine() {
        let order = StoredGranularity::gap_priority();
        assert_eq!(order.len(), StoredGranularity::all().len());
        assert!(order.windows(2).all(|w| w[0].seconds() > w[1].seconds()));
    }

    #[test]
    fn test_serde_string_form() {
        let g: Granularity = "3m".parse().unwrap();
        let json = serde_json::to_string(&g).unwrap();
        assert_eq!(json, "\"3m\"");
        let back: Granularity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, g);

        let stored: StoredGranularity = serde_json::from_str("\"1w\"").unwrap();
        assert_eq!(stored, StoredGranularity::Week1);
    }
}
