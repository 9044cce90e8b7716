//! Freshness decision for cached series.

use barcache_types::StoredGranularity;
use chrono::{DateTime, TimeDelta, Utc};

/// Outcome of a staleness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Newest bar is within the threshold.
    Fresh,
    /// Series was written moments ago; served regardless of bar age.
    RecentlyRefreshed,
    /// Newest bar is older than the threshold.
    Stale {
        /// Age of the newest bar.
        age: TimeDelta,
        /// Threshold it exceeded.
        threshold: TimeDelta,
    },
    /// Nothing is cached.
    Missing,
}

impl Freshness {
    /// Returns true if the cached series may be served.
    #[must_use]
    pub const fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh | Self::RecentlyRefreshed)
    }
}

/// Age thresholds per granularity and session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StalenessPolicy {
    /// Added to the bar width for intraday series while the session is open.
    pub intraday_open: TimeDelta,
    /// Relaxed threshold for every series while the session is closed.
    pub closed: TimeDelta,
    /// Daily series.
    pub daily: TimeDelta,
    /// Weekly series.
    pub weekly: TimeDelta,
    /// Monthly series.
    pub monthly: TimeDelta,
    /// Window after a successful write during which a series counts as fresh.
    pub recent_refresh: TimeDelta,
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        Self {
            intraday_open: TimeDelta::minutes(10),
            closed: TimeDelta::minutes(4_320),
            daily: TimeDelta::minutes(7_200),
            weekly: TimeDelta::minutes(20_160),
            monthly: TimeDelta::minutes(64_800),
            recent_refresh: TimeDelta::minutes(5),
        }
    }
}

impl StalenessPolicy {
    /// Returns the maximum tolerated age of the newest bar.
    ///
    /// Intraday bars are stamped with their open time, so the open-session
    /// threshold includes one bar width.
    #[must_use]
    pub fn threshold(&self, granularity: StoredGranularity, session_open: bool) -> TimeDelta {
        let base = match granularity {
            StoredGranularity::Day1 => self.daily,
            StoredGranularity::Week1 => self.weekly,
            StoredGranularity::Month1 => self.monthly,
            intraday => intraday.width() + self.intraday_open,
        };
        if session_open {
            base
        } else if granularity.is_intraday() {
            self.closed
        } else {
            base.max(self.closed)
        }
    }

    /// Decides whether a cached series can be served.
    #[must_use]
    pub fn evaluate(
        &self,
        granularity: StoredGranularity,
        latest: Option<DateTime<Utc>>,
        last_refreshed: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        session_open: bool,
    ) -> Freshness {
        let Some(latest) = latest else {
            return Freshness::Missing;
        };

        let age = now - latest;
        let threshold = self.threshold(granularity, session_open);
        if age <= threshold {
            return Freshness::Fresh;
        }
        if last_refreshed.is_some_and(|at| now - at <= self.recent_refresh) {
            return Freshness::RecentlyRefreshed;
        }
        Freshness::Stale { age, threshold }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 18, 0, 0).unwrap()
    }

    fn with_closed(closed: TimeDelta) -> StalenessPolicy {
        StalenessPolicy {
            intraday_open: TimeDelta::minutes(9),
            closed,
            ..StalenessPolicy::default()
        }
    }

    #[test]
    fn test_intraday_open_vs_closed_threshold() {
        // 1m width + 9m grace = 10 minute threshold while open.
        let policy = with_closed(TimeDelta::hours(24));
        let g = StoredGranularity::Minute1;
        let latest = Some(now() - TimeDelta::minutes(20));
        assert_eq!(policy.threshold(g, true), TimeDelta::minutes(10));

        assert!(matches!(
            policy.evaluate(g, latest, None, now(), true),
            Freshness::Stale { .. }
        ));
        assert_eq!(policy.evaluate(g, latest, None, now(), false), Freshness::Fresh);
    }

    #[test]
    fn test_missing() {
        let policy = StalenessPolicy::default();
        let out = policy.evaluate(StoredGranularity::Day1, None, None, now(), true);
        assert_eq!(out, Freshness::Missing);
        assert!(!out.is_fresh());
    }

    #[test]
    fn test_daily_tolerates_long_weekend() {
        let policy = StalenessPolicy::default();
        // Friday's bar read on Tuesday morning after a Monday holiday.
        let latest = Some(now() - TimeDelta::days(4));
        assert!(
            policy
                .evaluate(StoredGranularity::Day1, latest, None, now(), true)
                .is_fresh()
        );
        let latest = Some(now() - TimeDelta::days(6));
        assert!(
            !policy
                .evaluate(StoredGranularity::Day1, latest, None, now(), true)
                .is_fresh()
        );
    }

    #[test]
    fn test_closed_session_never_tightens_threshold() {
        let policy = StalenessPolicy::default();
        assert_eq!(
            policy.threshold(StoredGranularity::Week1, false),
            policy.weekly
        );
        assert_eq!(
            policy.threshold(StoredGranularity::Minute5, false),
            policy.closed
        );
    }

    #[test]
    fn test_recent_refresh_overrides_age() {
        let policy = StalenessPolicy::default();
        let g = StoredGranularity::Minute5;
        let latest = Some(now() - TimeDelta::hours(1));

        let out = policy.evaluate(g, latest, Some(now() - TimeDelta::minutes(2)), now(), true);
        assert_eq!(out, Freshness::RecentlyRefreshed);

        let out = policy.evaluate(g, latest, Some(now() - TimeDelta::minutes(30)), now(), true);
        assert!(!out.is_fresh());
    }
}
