//! Ingestion run audit log.

use barcache_types::{IngestionRun, JobKind, RunStatus, StoredGranularity};
use rusqlite::params;
use uuid::Uuid;

use crate::store::from_unix_millis;
use crate::{CacheStore, Result, StoreError};

struct RunRow {
    id: String,
    kind: String,
    granularity: Option<String>,
    status: String,
    symbols_attempted: u64,
    symbols_succeeded: u64,
    bars_inserted: u64,
    bars_updated: u64,
    started_at: i64,
    finished_at: Option<i64>,
    error: Option<String>,
}

impl RunRow {
    fn decode(self) -> Result<IngestionRun> {
        let corrupt = |what: &str, e: &dyn std::fmt::Display| {
            StoreError::Corrupt(format!("run {}: bad {what}: {e}", self.id))
        };
        Ok(IngestionRun {
            id: Uuid::parse_str(&self.id).map_err(|e| corrupt("id", &e))?,
            kind: self
                .kind
                .parse::<JobKind>()
                .map_err(|e| corrupt("kind", &e))?,
            granularity: self
                .granularity
                .as_deref()
                .map(str::parse::<StoredGranularity>)
                .transpose()
                .map_err(|e| corrupt("granularity", &e))?,
            status: self
                .status
                .parse::<RunStatus>()
                .map_err(|e| corrupt("status", &e))?,
            symbols_attempted: self.symbols_attempted,
            symbols_succeeded: self.symbols_succeeded,
            bars_inserted: self.bars_inserted,
            bars_updated: self.bars_updated,
            started_at: from_unix_millis(self.started_at)?,
            finished_at: self.finished_at.map(from_unix_millis).transpose()?,
            error: self.error.clone(),
        })
    }
}

impl CacheStore {
    /// Inserts or updates an ingestion run record by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub fn record_run(&self, run: &IngestionRun) -> Result<()> {
        let id = run.id.to_string();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO ingestion_runs (id, kind, granularity, status, symbols_attempted,
                     symbols_succeeded, bars_inserted, bars_updated, started_at, finished_at, error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(id) DO UPDATE SET
                     status = excluded.status,
                     symbols_attempted = excluded.symbols_attempted,
                     symbols_succeeded = excluded.symbols_succeeded,
                     bars_inserted = excluded.bars_inserted,
                     bars_updated = excluded.bars_updated,
                     finished_at = excluded.finished_at,
                     error = excluded.error",
                params![
                    id,
                    run.kind.as_str(),
                    run.granularity.map(|g| g.as_str()),
                    run.status.as_str(),
                    run.symbols_attempted,
                    run.symbols_succeeded,
                    run.bars_inserted,
                    run.bars_updated,
                    run.started_at.timestamp_millis(),
                    run.finished_at.map(|t| t.timestamp_millis()),
                    run.error,
                ],
            )?;
            Ok(())
        })
    }

    /// Lists the most recent runs, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a row cannot be decoded.
    pub fn list_runs(&self, limit: usize) -> Result<Vec<IngestionRun>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, kind, granularity, status, symbols_attempted, symbols_succeeded,
                        bars_inserted, bars_updated, started_at, finished_at, error
                 FROM ingestion_runs ORDER BY started_at DESC, rowid DESC LIMIT ?1",
            )?;
            let rows = stmt
                .query_map([limit], |row| {
                    Ok(RunRow {
                        id: row.get(0)?,
                        kind: row.get(1)?,
                        granularity: row.get(2)?,
                        status: row.get(3)?,
                        symbols_attempted: row.get(4)?,
                        symbols_succeeded: row.get(5)?,
                        bars_inserted: row.get(6)?,
                        bars_updated: row.get(7)?,
                        started_at: row.get(8)?,
                        finished_at: row.get(9)?,
                        error: row.get(10)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })?;
        rows.into_iter().map(RunRow::decode).collect()
    }
}
