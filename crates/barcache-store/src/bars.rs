//! Bar table: idempotent upsert, reads and eviction.

use barcache_types::{Bar, StoredGranularity, TimeWindow};
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::store::{from_unix, from_unix_millis};
use crate::{CacheStore, Result};

/// Row counts produced by [`CacheStore::upsert_bars`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertStats {
    /// Bars whose key was not stored before.
    pub inserted: u64,
    /// Bars that overwrote an existing row.
    pub updated: u64,
}

impl UpsertStats {
    /// Returns the number of bars written.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.inserted + self.updated
    }
}

impl std::ops::AddAssign for UpsertStats {
    fn add_assign(&mut self, rhs: Self) {
        self.inserted += rhs.inserted;
        self.updated += rhs.updated;
    }
}

type BarRow = (i64, f64, f64, f64, f64, f64, Option<f64>, Option<u64>);

impl CacheStore {
    /// Writes bars keyed by `(symbol, granularity, timestamp)`.
    ///
    /// Existing rows are overwritten with the new values, so ingesting the
    /// same bar twice leaves one row holding the second write.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub fn upsert_bars(
        &self,
        symbol_id: i64,
        granularity: StoredGranularity,
        bars: &[Bar],
        vendor: &str,
    ) -> Result<UpsertStats> {
        if bars.is_empty() {
            return Ok(UpsertStats::default());
        }
        let now = Utc::now().timestamp_millis();

        let stats = self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let mut stats = UpsertStats::default();
            {
                let mut exists = tx.prepare_cached(
                    "SELECT 1 FROM bars WHERE symbol_id = ?1 AND granularity = ?2 AND ts = ?3",
                )?;
                let mut upsert = tx.prepare_cached(
                    "INSERT INTO bars (symbol_id, granularity, ts, open, high, low, close,
                                       volume, vwap, trade_count, vendor, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                     ON CONFLICT(symbol_id, granularity, ts) DO UPDATE SET
                         open = excluded.open,
                         high = excluded.high,
                         low = excluded.low,
                         close = excluded.close,
                         volume = excluded.volume,
                         vwap = excluded.vwap,
                         trade_count = excluded.trade_count,
                         vendor = excluded.vendor,
                         updated_at = excluded.updated_at",
                )?;

                for bar in bars {
                    let ts = bar.timestamp.timestamp();
                    let known = exists.exists(params![symbol_id, granularity.as_str(), ts])?;
                    upsert.execute(params![
                        symbol_id,
                        granularity.as_str(),
                        ts,
                        bar.open,
                        bar.high,
                        bar.low,
                        bar.close,
                        bar.volume,
                        bar.vwap,
                        bar.trade_count,
                        vendor,
                        now,
                    ])?;
                    if known {
                        stats.updated += 1;
                    } else {
                        stats.inserted += 1;
                    }
                }
            }
            tx.commit()?;
            Ok(stats)
        })?;

        debug!(
            symbol_id,
            granularity = %granularity,
            vendor,
            inserted = stats.inserted,
            updated = stats.updated,
            "upserted bars"
        );
        Ok(stats)
    }

    /// Reads a series oldest first, optionally limited to a window.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a row cannot be decoded.
    pub fn read_bars(
        &self,
        symbol_id: i64,
        granularity: StoredGranularity,
        window: Option<&TimeWindow>,
    ) -> Result<Vec<Bar>> {
        let (start, end) = window.map_or((i64::MIN, i64::MAX), |w| {
            (w.start.timestamp(), w.end.timestamp())
        });

        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT ts, open, high, low, close, volume, vwap, trade_count FROM bars
                 WHERE symbol_id = ?1 AND granularity = ?2 AND ts >= ?3 AND ts < ?4
                 ORDER BY ts ASC",
            )?;
            let rows = stmt
                .query_map(params![symbol_id, granularity.as_str(), start, end], |row| {
                    Ok::<BarRow, _>((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })?;

        rows.into_iter()
            .map(|(ts, open, high, low, close, volume, vwap, trade_count)| {
                Ok(Bar {
                    timestamp: from_unix(ts)?,
                    open,
                    high,
                    low,
                    close,
                    volume,
                    vwap,
                    trade_count,
                })
            })
            .collect()
    }

    /// Returns the open timestamp of the newest cached bar.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn latest_timestamp(
        &self,
        symbol_id: i64,
        granularity: StoredGranularity,
    ) -> Result<Option<DateTime<Utc>>> {
        let ts: Option<i64> = self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT MAX(ts) FROM bars WHERE symbol_id = ?1 AND granularity = ?2",
                params![symbol_id, granularity.as_str()],
                |row| row.get(0),
            )?)
        })?;
        ts.map(from_unix).transpose()
    }

    /// Returns when the series was last written.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn last_refreshed(
        &self,
        symbol_id: i64,
        granularity: StoredGranularity,
    ) -> Result<Option<DateTime<Utc>>> {
        let millis: Option<i64> = self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT MAX(updated_at) FROM bars WHERE symbol_id = ?1 AND granularity = ?2",
                    params![symbol_id, granularity.as_str()],
                    |row| row.get(0),
                )
                .optional()?
                .flatten())
        })?;
        millis.map(from_unix_millis).transpose()
    }

    /// Returns the number of cached bars in one series.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn bar_count(&self, symbol_id: i64, granularity: StoredGranularity) -> Result<u64> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM bars WHERE symbol_id = ?1 AND granularity = ?2",
                params![symbol_id, granularity.as_str()],
                |row| row.get(0),
            )?)
        })
    }

    /// Returns bar counts per symbol id for one granularity.
    ///
    /// Symbols with no bars are absent from the map.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn bar_counts(&self, granularity: StoredGranularity) -> Result<HashMap<i64, u64>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT symbol_id, COUNT(*) FROM bars WHERE granularity = ?1 GROUP BY symbol_id",
            )?;
            let counts = stmt
                .query_map([granularity.as_str()], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<HashMap<i64, u64>>>()?;
            Ok(counts)
        })
    }

    /// Deletes the oldest bars of every series beyond `ceiling` rows.
    ///
    /// Returns the number of rows removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn evict(&self, granularity: StoredGranularity, ceiling: u64) -> Result<u64> {
        let ceiling = i64::try_from(ceiling).unwrap_or(i64::MAX);
        let removed = self.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM bars WHERE rowid IN (
                     SELECT rowid FROM (
                         SELECT rowid, ROW_NUMBER() OVER (
                             PARTITION BY symbol_id ORDER BY ts DESC
                         ) AS rn
                         FROM bars WHERE granularity = ?1
                     ) WHERE rn > ?2
                 )",
                params![granularity.as_str(), ceiling],
            )?)
        })?;

        if removed > 0 {
            info!(granularity = %granularity, ceiling, removed, "evicted oldest bars");
        }
        Ok(removed as u64)
    }
}
