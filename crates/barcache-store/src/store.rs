//! Connection management, schema bootstrap and lock-contention retry.

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

use crate::{Result, StoreError};

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS symbols (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    code                TEXT    NOT NULL UNIQUE,
    active              INTEGER NOT NULL DEFAULT 1,
    first_requested_at  INTEGER NOT NULL,
    validation_failures INTEGER NOT NULL DEFAULT 0,
    deactivated_at      INTEGER
);

CREATE TABLE IF NOT EXISTS bars (
    symbol_id   INTEGER NOT NULL REFERENCES symbols(id),
    granularity TEXT    NOT NULL,
    ts          INTEGER NOT NULL,
    open        REAL    NOT NULL,
    high        REAL    NOT NULL,
    low         REAL    NOT NULL,
    close       REAL    NOT NULL,
    volume      REAL    NOT NULL,
    vwap        REAL,
    trade_count INTEGER,
    vendor      TEXT    NOT NULL,
    updated_at  INTEGER NOT NULL,
    UNIQUE (symbol_id, granularity, ts)
);

CREATE INDEX IF NOT EXISTS idx_bars_series_ts
    ON bars (symbol_id, granularity, ts DESC);

CREATE TABLE IF NOT EXISTS ingestion_runs (
    id                TEXT    PRIMARY KEY,
    kind              TEXT    NOT NULL,
    granularity       TEXT,
    status            TEXT    NOT NULL,
    symbols_attempted INTEGER NOT NULL,
    symbols_succeeded INTEGER NOT NULL,
    bars_inserted     INTEGER NOT NULL,
    bars_updated      INTEGER NOT NULL,
    started_at        INTEGER NOT NULL,
    finished_at       INTEGER,
    error             TEXT
);

CREATE INDEX IF NOT EXISTS idx_runs_started
    ON ingestion_runs (started_at DESC);
";

/// Lock-contention retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// Retries after the first attempt.
    pub busy_retries: u32,
    /// Delay before the first retry; doubled on each further retry.
    pub busy_backoff: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            busy_retries: 4,
            busy_backoff: Duration::from_millis(50),
        }
    }
}

/// Handle to the bar cache database.
///
/// Clones share one connection.
#[derive(Debug, Clone)]
pub struct CacheStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
    options: StoreOptions,
}

impl CacheStore {
    /// Database file name inside the data directory.
    pub const FILE_NAME: &'static str = "barcache.db";

    /// Opens (creating if needed) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory cannot be created or the
    /// database cannot be opened or migrated.
    pub fn open(path: &Path, options: StoreOptions) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty())
            && !parent.exists()
        {
            fs::create_dir_all(parent).map_err(|e| StoreError::CreateDir {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let conn = Connection::open(path)?;
        // Contention is retried by `with_conn`, not inside SQLite.
        conn.busy_timeout(Duration::ZERO)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        debug!(path = %path.display(), "opened cache store");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
            options,
        })
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
            options: StoreOptions::default(),
        })
    }

    /// Returns the default database path.
    ///
    /// Uses the `directories` crate to find the platform data directory:
    /// - Linux: `~/.local/share/barcache/barcache.db`
    /// - macOS: `~/Library/Application Support/barcache/barcache.db`
    /// - Windows: `C:\Users\<User>\AppData\Roaming\barcache\barcache.db`
    ///
    /// Falls back to `~/.barcache/barcache.db`.
    #[must_use]
    pub fn default_path() -> PathBuf {
        ProjectDirs::from("", "", "barcache")
            .map_or_else(dirs_fallback, |proj_dirs| proj_dirs.data_dir().to_path_buf())
            .join(Self::FILE_NAME)
    }

    /// Returns the database path, or `None` for in-memory stores.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns the retry policy.
    #[must_use]
    pub const fn options(&self) -> StoreOptions {
        self.options
    }

    /// Runs `op` against the connection, retrying lock contention with
    /// exponential backoff.
    pub(crate) fn with_conn<T, F>(&self, mut op: F) -> Result<T>
    where
        F: FnMut(&mut Connection) -> Result<T>,
    {
        let mut attempt: u32 = 0;
        loop {
            let result = {
                let mut conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
                op(&mut conn)
            };

            match result {
                Err(e) if e.is_contention() => {
                    attempt += 1;
                    if attempt > self.options.busy_retries {
                        warn!(attempts = attempt, "database still busy, giving up");
                        return Err(StoreError::Busy { attempts: attempt });
                    }
                    let delay = self
                        .options
                        .busy_backoff
                        .saturating_mul(1u32 << (attempt - 1).min(10));
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "database busy, retrying"
                    );
                    std::thread::sleep(delay);
                }
                other => return other,
            }
        }
    }
}

/// Fallback for determining the data directory.
fn dirs_fallback() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".barcache")
}

/// Converts stored unix seconds into a timestamp.
pub(crate) fn from_unix(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp {secs} out of range")))
}

/// Converts stored unix milliseconds into a timestamp.
pub(crate) fn from_unix_millis(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp {millis}ms out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_parent_and_schema() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("cache.db");

        let store = CacheStore::open(&path, StoreOptions::default()).unwrap();

        assert!(path.exists());
        assert_eq!(store.path(), Some(path.as_path()));
        let tables: i64 = store
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' \
                     AND name IN ('symbols', 'bars', 'ingestion_runs')",
                    [],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(tables, 3);
    }

    #[test]
    fn test_reopen_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("cache.db");
        drop(CacheStore::open(&path, StoreOptions::default()).unwrap());
        assert!(CacheStore::open(&path, StoreOptions::default()).is_ok());
    }

    #[test]
    fn test_default_path() {
        let path = CacheStore::default_path();
        assert!(path.ends_with(CacheStore::FILE_NAME));
    }

    #[test]
    fn test_busy_database_gives_up_after_bounded_retries() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("cache.db");
        let options = StoreOptions {
            busy_retries: 2,
            busy_backoff: Duration::from_millis(1),
        };
        let store = CacheStore::open(&path, options).unwrap();

        let blocker = Connection::open(&path).unwrap();
        blocker.execute_batch("BEGIN EXCLUSIVE").unwrap();

        let result = store.with_conn(|conn| {
            conn.execute(
                "INSERT INTO symbols (code, first_requested_at) VALUES ('AAPL', 0)",
                [],
            )?;
            Ok(())
        });
        assert!(matches!(result, Err(StoreError::Busy { attempts: 3 })));

        blocker.execute_batch("ROLLBACK").unwrap();
        assert!(
            store
                .with_conn(|conn| {
                    conn.execute(
                        "INSERT INTO symbols (code, first_requested_at) VALUES ('AAPL', 0)",
                        [],
                    )?;
                    Ok(())
                })
                .is_ok()
        );
    }
}
