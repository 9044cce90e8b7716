//! Exchange trading session in local time.

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use std::collections::BTreeSet;

/// Regular and extended trading hours of one exchange.
///
/// Weekends and configured holidays are closed all day. Early closes are not
/// modelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradingSession {
    timezone: Tz,
    open: NaiveTime,
    close: NaiveTime,
    extended_open: NaiveTime,
    extended_close: NaiveTime,
    holidays: BTreeSet<NaiveDate>,
}

impl Default for TradingSession {
    /// US equities: 09:30 to 16:00 New York time, extended 04:00 to 20:00.
    fn default() -> Self {
        Self::new(chrono_tz::America::New_York, hm(9, 30), hm(16, 0))
            .with_extended_hours(hm(4, 0), hm(20, 0))
    }
}

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

impl TradingSession {
    /// Creates a session with regular hours only.
    #[must_use]
    pub const fn new(timezone: Tz, open: NaiveTime, close: NaiveTime) -> Self {
        Self {
            timezone,
            open,
            close,
            extended_open: open,
            extended_close: close,
            holidays: BTreeSet::new(),
        }
    }

    /// Sets the pre-market open and after-hours close.
    #[must_use]
    pub fn with_extended_hours(mut self, open: NaiveTime, close: NaiveTime) -> Self {
        self.extended_open = open;
        self.extended_close = close;
        self
    }

    /// Adds full-day closures.
    #[must_use]
    pub fn with_holidays(mut self, holidays: impl IntoIterator<Item = NaiveDate>) -> Self {
        self.holidays.extend(holidays);
        self
    }

    /// Returns the exchange time zone.
    #[must_use]
    pub const fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Returns the regular session close time.
    #[must_use]
    pub const fn close_time(&self) -> NaiveTime {
        self.close
    }

    /// Returns the exchange-local date of an instant.
    #[must_use]
    pub fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.timezone).date_naive()
    }

    /// Returns true on weekdays that are not holidays.
    #[must_use]
    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.holidays.contains(&date)
    }

    /// Returns true during regular trading hours.
    #[must_use]
    pub fn is_open(&self, at: DateTime<Utc>) -> bool {
        self.within(at, self.open, self.close)
    }

    /// Returns true during regular or extended trading hours.
    #[must_use]
    pub fn is_extended_open(&self, at: DateTime<Utc>) -> bool {
        self.within(at, self.extended_open, self.extended_close)
    }

    /// Returns true if a bar opening at `at` belongs to the regular session.
    ///
    /// Same rule as [`is_open`](Self::is_open), applied to a bar's open time.
    #[must_use]
    pub fn in_regular_hours(&self, at: DateTime<Utc>) -> bool {
        self.is_open(at)
    }

    /// Converts an exchange-local date and time to UTC.
    ///
    /// Returns `None` for local times skipped by a DST transition.
    #[must_use]
    pub fn at_local(&self, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
        self.timezone
            .from_local_datetime(&date.and_time(time))
            .earliest()
            .map(|t| t.with_timezone(&Utc))
    }

    /// Returns the regular close of `date` in UTC.
    #[must_use]
    pub fn close_at(&self, date: NaiveDate) -> Option<DateTime<Utc>> {
        self.at_local(date, self.close)
    }

    fn within(&self, at: DateTime<Utc>, from: NaiveTime, to: NaiveTime) -> bool {
        let local = at.with_timezone(&self.timezone);
        if !self.is_trading_day(local.date_naive()) {
            return false;
        }
        let time = local.time();
        time >= from && time < to
    }
}
