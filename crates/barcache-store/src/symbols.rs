//! Symbol registry and lifecycle.

use barcache_types::SymbolCode;
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};
use tracing::{info, warn};

use crate::store::from_unix;
use crate::{CacheStore, Result, StoreError};

/// A symbol known to the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolRecord {
    /// Surrogate key used by the bar table.
    pub id: i64,
    /// Canonical symbol code.
    pub code: SymbolCode,
    /// Inactive symbols are never ingested and have no cached bars.
    pub active: bool,
    /// When the symbol was first requested.
    pub first_requested_at: DateTime<Utc>,
    /// Consecutive validation rejections.
    pub validation_failures: u32,
}

const SELECT_SYMBOL: &str =
    "SELECT id, code, active, first_requested_at, validation_failures FROM symbols";

fn symbol_from_row(row: &Row<'_>) -> rusqlite::Result<(i64, String, bool, i64, u32)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn into_record((id, code, active, first, failures): (i64, String, bool, i64, u32)) -> Result<SymbolRecord> {
    let code = SymbolCode::parse(&code)
        .map_err(|e| StoreError::Corrupt(format!("symbol {id}: {e}")))?;
    Ok(SymbolRecord {
        id,
        code,
        active,
        first_requested_at: from_unix(first)?,
        validation_failures: failures,
    })
}

impl CacheStore {
    /// Registers a symbol, or reactivates it if it was deactivated.
    ///
    /// Reactivation resets the validation failure counter.
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub fn ensure_symbol(&self, code: &SymbolCode) -> Result<SymbolRecord> {
        let now = Utc::now().timestamp();
        let row = self.with_conn(|conn| {
            Ok(conn.query_row(
                "INSERT INTO symbols (code, active, first_requested_at) VALUES (?1, 1, ?2)
                 ON CONFLICT(code) DO UPDATE SET
                     validation_failures = CASE WHEN active = 0 THEN 0 ELSE validation_failures END,
                     active = 1,
                     deactivated_at = NULL
                 RETURNING id, code, active, first_requested_at, validation_failures",
                params![code.as_str(), now],
                symbol_from_row,
            )?)
        })?;
        into_record(row)
    }

    /// Looks up a symbol by code.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn symbol(&self, code: &SymbolCode) -> Result<Option<SymbolRecord>> {
        let row = self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!("{SELECT_SYMBOL} WHERE code = ?1"),
                    [code.as_str()],
                    symbol_from_row,
                )
                .optional()?)
        })?;
        row.map(into_record).transpose()
    }

    /// Lists symbols ordered by code.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn symbols(&self, active_only: bool) -> Result<Vec<SymbolRecord>> {
        let sql = if active_only {
            format!("{SELECT_SYMBOL} WHERE active = 1 ORDER BY code")
        } else {
            format!("{SELECT_SYMBOL} ORDER BY code")
        };
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(&sql)?;
            let rows = stmt
                .query_map([], symbol_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })?;
        rows.into_iter().map(into_record).collect()
    }

    /// Lists active symbols ordered by code.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn active_symbols(&self) -> Result<Vec<SymbolRecord>> {
        self.symbols(true)
    }

    /// Records a validation rejection, deactivating the symbol once
    /// `max_failures` is reached.
    ///
    /// Returns `true` if the symbol was deactivated by this call.
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub fn record_validation_failure(&self, symbol_id: i64, max_failures: u32) -> Result<bool> {
        let failures: Option<u32> = self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "UPDATE symbols SET validation_failures = validation_failures + 1
                     WHERE id = ?1 AND active = 1
                     RETURNING validation_failures",
                    [symbol_id],
                    |row| row.get(0),
                )
                .optional()?)
        })?;

        match failures {
            Some(count) if count >= max_failures.max(1) => {
                warn!(symbol_id, failures = count, "symbol repeatedly failed validation");
                self.deactivate_symbol(symbol_id)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Resets the validation failure counter after a successful validation.
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub fn clear_validation_failures(&self, symbol_id: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE symbols SET validation_failures = 0 WHERE id = ?1",
                [symbol_id],
            )?;
            Ok(())
        })
    }

    /// Marks a symbol inactive and deletes its cached bars.
    ///
    /// Returns the number of bars removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub fn deactivate_symbol(&self, symbol_id: i64) -> Result<usize> {
        let now = Utc::now().timestamp();
        let removed = self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "UPDATE symbols SET active = 0, deactivated_at = ?2 WHERE id = ?1",
                params![symbol_id, now],
            )?;
            let removed = tx.execute("DELETE FROM bars WHERE symbol_id = ?1", [symbol_id])?;
            tx.commit()?;
            Ok(removed)
        })?;
        info!(symbol_id, bars_removed = removed, "deactivated symbol");
        Ok(removed)
    }
}
