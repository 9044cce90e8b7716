//! Fire times for scheduled ingestion.

use barcache_types::StoredGranularity;
use chrono::{DateTime, Datelike, Months, NaiveDate, NaiveTime, TimeDelta, Utc, Weekday};

use crate::TradingSession;

/// Local time of the weekly and monthly firings.
const COARSE_FIRE_HOUR: u32 = 10;

/// How many local days to scan for the next trading day.
const MAX_SCAN_DAYS: u64 = 14;

/// Computes when each stored granularity's ingestion fires.
///
/// - Intraday: every UTC-aligned bar boundary plus a settle delay.
/// - Daily: each trading day at session close plus an offset.
/// - Weekly: Saturday 10:00 exchange time.
/// - Monthly: the 1st at 10:00 exchange time.
#[derive(Debug, Clone)]
pub struct Schedule {
    session: TradingSession,
    settle: TimeDelta,
    daily_offset: TimeDelta,
}

impl Schedule {
    /// Creates a schedule.
    #[must_use]
    pub const fn new(session: TradingSession, settle: TimeDelta, daily_offset: TimeDelta) -> Self {
        Self {
            session,
            settle,
            daily_offset,
        }
    }

    /// Returns the session the schedule follows.
    #[must_use]
    pub const fn session(&self) -> &TradingSession {
        &self.session
    }

    /// Returns the first primary firing strictly after `after`.
    #[must_use]
    pub fn next_fire(&self, granularity: StoredGranularity, after: DateTime<Utc>) -> DateTime<Utc> {
        match granularity {
            StoredGranularity::Day1 => self.next_daily(after),
            StoredGranularity::Week1 => self.next_weekly(after),
            StoredGranularity::Month1 => self.next_monthly(after),
            intraday => next_boundary(after, intraday.width(), self.settle),
        }
    }

    /// Returns the first retry firing strictly after `after`.
    ///
    /// Only intraday granularities of five minutes or more retry.
    #[must_use]
    pub fn next_retry(
        &self,
        granularity: StoredGranularity,
        after: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let offset = granularity.retry_offset()?;
        Some(next_boundary(after, granularity.width(), self.settle + offset))
    }

    fn next_daily(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        let start = self.session.local_date(after);
        start
            .iter_days()
            .take(MAX_SCAN_DAYS as usize)
            .filter(|date| self.session.is_trading_day(*date))
            .filter_map(|date| self.session.close_at(date))
            .map(|close| close + self.daily_offset)
            .find(|fire| *fire > after)
            .unwrap_or_else(|| after + TimeDelta::days(1))
    }

    fn next_weekly(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        let start = self.session.local_date(after);
        start
            .iter_days()
            .take(MAX_SCAN_DAYS as usize)
            .filter(|date| date.weekday() == Weekday::Sat)
            .filter_map(|date| self.session.at_local(date, coarse_fire_time()))
            .find(|fire| *fire > after)
            .unwrap_or_else(|| after + TimeDelta::weeks(1))
    }

    fn next_monthly(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        let local = self.session.local_date(after);
        let first = NaiveDate::from_ymd_opt(local.year(), local.month(), 1).unwrap_or(local);
        [first, first + Months::new(1)]
            .into_iter()
            .filter_map(|date| self.session.at_local(date, coarse_fire_time()))
            .find(|fire| *fire > after)
            .unwrap_or_else(|| after + TimeDelta::days(30))
    }
}

fn coarse_fire_time() -> NaiveTime {
    NaiveTime::from_hms_opt(COARSE_FIRE_HOUR, 0, 0).unwrap_or(NaiveTime::MIN)
}

/// Next `k * width + delay` (UTC epoch aligned) strictly after `after`.
fn next_boundary(after: DateTime<Utc>, width: TimeDelta, delay: TimeDelta) -> DateTime<Utc> {
    let width = width.num_seconds().max(1);
    let shifted = after.timestamp() - delay.num_seconds();
    let boundary = (shifted.div_euclid(width) + 1) * width;
    DateTime::from_timestamp(boundary + delay.num_seconds(), 0)
        .unwrap_or_else(|| after + TimeDelta::seconds(width))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
    }

    fn schedule() -> Schedule {
        Schedule::new(
            TradingSession::default(),
            TimeDelta::seconds(10),
            TimeDelta::minutes(30),
        )
    }

    #[test]
    fn test_intraday_fires_after_bar_boundary() {
        let s = schedule();
        let after = utc(2024, 1, 2, 15, 3, 0);
        assert_eq!(
            s.next_fire(StoredGranularity::Minute5, after),
            utc(2024, 1, 2, 15, 5, 10)
        );
        // Exactly at a firing: the next one is a full period later.
        assert_eq!(
            s.next_fire(StoredGranularity::Minute5, utc(2024, 1, 2, 15, 5, 10)),
            utc(2024, 1, 2, 15, 10, 10)
        );
        // Still inside the settle delay of the previous boundary.
        assert_eq!(
            s.next_fire(StoredGranularity::Minute1, utc(2024, 1, 2, 15, 5, 4)),
            utc(2024, 1, 2, 15, 5, 10)
        );
    }

    #[test]
    fn test_retry_fires_a_third_of_a_bar_later() {
        let s = schedule();
        let after = utc(2024, 1, 2, 15, 0, 0);
        assert_eq!(
            s.next_retry(StoredGranularity::Minute15, after),
            Some(utc(2024, 1, 2, 15, 5, 10))
        );
        assert_eq!(s.next_retry(StoredGranularity::Minute1, after), None);
        assert_eq!(s.next_retry(StoredGranularity::Day1, after), None);
    }

    #[test]
    fn test_daily_fires_after_close_on_trading_days() {
        let s = schedule();
        // Tuesday 2024-01-02, close is 21:00 UTC.
        assert_eq!(
            s.next_fire(StoredGranularity::Day1, utc(2024, 1, 2, 15, 0, 0)),
            utc(2024, 1, 2, 21, 30, 0)
        );
        // Friday evening skips the weekend.
        assert_eq!(
            s.next_fire(StoredGranularity::Day1, utc(2024, 1, 5, 22, 0, 0)),
            utc(2024, 1, 8, 21, 30, 0)
        );
    }

    #[test]
    fn test_weekly_and_monthly() {
        let s = schedule();
        // Saturday 2024-01-06 10:00 New York is 15:00 UTC.
        assert_eq!(
            s.next_fire(StoredGranularity::Week1, utc(2024, 1, 3, 0, 0, 0)),
            utc(2024, 1, 6, 15, 0, 0)
        );
        assert_eq!(
            s.next_fire(StoredGranularity::Month1, utc(2024, 1, 3, 0, 0, 0)),
            utc(2024, 2, 1, 15, 0, 0)
        );
        assert_eq!(
            s.next_fire(StoredGranularity::Month1, utc(2024, 1, 1, 6, 0, 0)),
            utc(2024, 1, 1, 15, 0, 0)
        );
    }
}
