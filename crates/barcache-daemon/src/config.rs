//! Layered configuration for the cache and everything it wires together.

use barcache_fetch::{
    AlpacaClient, AlpacaConfig, FallbackClient, HttpConfig, SchwabClient, SchwabConfig, Vendor,
};
use barcache_store::{CacheStore, StoreOptions};
use barcache_types::StoredGranularity;
use chrono::{NaiveDate, NaiveTime, TimeDelta};
use chrono_tz::Tz;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::{
    BatchOptions, ConfigError, IngestOptions, Schedule, SchedulerIntervals, StalenessPolicy,
    TradingSession,
};

/// File looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "barcache.toml";

/// Prefix of environment overrides, e.g. `BARCACHE__INGEST__BATCH_SIZE`.
pub const ENV_PREFIX: &str = "BARCACHE";

/// Root configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Cache database file; the platform data directory when unset.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    /// Default log filter.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Exchange hours.
    #[serde(default)]
    pub session: SessionConfig,
    /// Staleness thresholds.
    #[serde(default)]
    pub staleness: StalenessConfig,
    /// Batch and validation settings.
    #[serde(default)]
    pub ingest: IngestConfig,
    /// Timer settings.
    #[serde(default)]
    pub schedule: ScheduleConfig,
    /// Gap reconciliation.
    #[serde(default)]
    pub gaps: GapConfig,
    /// Bars kept per series, by granularity; unlisted ones use the default.
    #[serde(default)]
    pub retention: BTreeMap<StoredGranularity, u64>,
    /// Store contention handling.
    #[serde(default)]
    pub store: StoreConfig,
    /// Upstream vendors.
    #[serde(default)]
    pub vendors: VendorsConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            log_level: default_log_level(),
            session: SessionConfig::default(),
            staleness: StalenessConfig::default(),
            ingest: IngestConfig::default(),
            schedule: ScheduleConfig::default(),
            gaps: GapConfig::default(),
            retention: BTreeMap::new(),
            store: StoreConfig::default(),
            vendors: VendorsConfig::default(),
        }
    }
}

/// Exchange session in local time.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// IANA time zone.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Regular open, `HH:MM`.
    #[serde(default = "default_open")]
    pub open: String,
    /// Regular close, `HH:MM`.
    #[serde(default = "default_close")]
    pub close: String,
    /// Pre-market open, `HH:MM`.
    #[serde(default = "default_extended_open")]
    pub extended_open: String,
    /// After-hours close, `HH:MM`.
    #[serde(default = "default_extended_close")]
    pub extended_close: String,
    /// Dates the exchange is closed all day.
    #[serde(default)]
    pub holidays: Vec<NaiveDate>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            open: default_open(),
            close: default_close(),
            extended_open: default_extended_open(),
            extended_close: default_extended_close(),
            holidays: Vec::new(),
        }
    }
}

/// Staleness thresholds in minutes.
#[derive(Debug, Clone, Deserialize)]
pub struct StalenessConfig {
    /// Added to the bar width for intraday series while open.
    #[serde(default = "default_intraday_open_minutes")]
    pub intraday_open_minutes: i64,
    /// Every series while the session is closed.
    #[serde(default = "default_intraday_closed_minutes")]
    pub intraday_closed_minutes: i64,
    /// Daily series.
    #[serde(default = "default_daily_minutes")]
    pub daily_minutes: i64,
    /// Weekly series.
    #[serde(default = "default_weekly_minutes")]
    pub weekly_minutes: i64,
    /// Monthly series.
    #[serde(default = "default_monthly_minutes")]
    pub monthly_minutes: i64,
    /// Grace period after a write.
    #[serde(default = "default_recent_refresh_seconds")]
    pub recent_refresh_seconds: i64,
}

impl Default for StalenessConfig {
    fn default() -> Self {
        Self {
            intraday_open_minutes: default_intraday_open_minutes(),
            intraday_closed_minutes: default_intraday_closed_minutes(),
            daily_minutes: default_daily_minutes(),
            weekly_minutes: default_weekly_minutes(),
            monthly_minutes: default_monthly_minutes(),
            recent_refresh_seconds: default_recent_refresh_seconds(),
        }
    }
}

/// Batch and validation settings.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Symbols per vendor request.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Pause between batches.
    #[serde(default = "default_inter_batch_delay_ms")]
    pub inter_batch_delay_ms: u64,
    /// Stop a run at its first failed batch.
    #[serde(default)]
    pub stop_on_error: bool,
    /// Ask vendors about symbols that came back empty.
    #[serde(default = "default_true")]
    pub validate_missing: bool,
    /// Rejections before a symbol is deactivated.
    #[serde(default = "default_max_validation_failures")]
    pub max_validation_failures: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            inter_batch_delay_ms: default_inter_batch_delay_ms(),
            stop_on_error: false,
            validate_missing: true,
            max_validation_failures: default_max_validation_failures(),
        }
    }
}

/// Timer settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    /// Granularities ingested on a schedule and collected on demand.
    #[serde(default = "default_granularities")]
    pub granularities: Vec<StoredGranularity>,
    /// Delay after an intraday bar boundary before firing.
    #[serde(default = "default_settle_delay_secs")]
    pub settle_delay_secs: i64,
    /// Fallback poll of the collection queue.
    #[serde(default = "default_queue_poll_secs")]
    pub queue_poll_secs: u64,
    /// Period of systematic gap reconciliation.
    #[serde(default = "default_systematic_gap_minutes")]
    pub systematic_gap_minutes: u64,
    /// Period of the random spot check.
    #[serde(default = "default_spot_check_minutes")]
    pub spot_check_minutes: u64,
    /// Period of eviction.
    #[serde(default = "default_eviction_minutes")]
    pub eviction_minutes: u64,
    /// Delay after the session close before the daily run.
    #[serde(default = "default_daily_run_offset_minutes")]
    pub daily_run_offset_minutes: i64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            granularities: default_granularities(),
            settle_delay_secs: default_settle_delay_secs(),
            queue_poll_secs: default_queue_poll_secs(),
            systematic_gap_minutes: default_systematic_gap_minutes(),
            spot_check_minutes: default_spot_check_minutes(),
            eviction_minutes: default_eviction_minutes(),
            daily_run_offset_minutes: default_daily_run_offset_minutes(),
        }
    }
}

/// Gap reconciliation.
#[derive(Debug, Clone, Deserialize)]
pub struct GapConfig {
    /// Fraction of the expected bar count a series must hold.
    #[serde(default = "default_min_coverage")]
    pub min_coverage: f64,
}

impl Default for GapConfig {
    fn default() -> Self {
        Self {
            min_coverage: default_min_coverage(),
        }
    }
}

/// Store contention handling.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Retries after a busy database.
    #[serde(default = "default_busy_retries")]
    pub busy_retries: u32,
    /// First retry delay, doubled per attempt.
    #[serde(default = "default_busy_backoff_ms")]
    pub busy_backoff_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            busy_retries: default_busy_retries(),
            busy_backoff_ms: default_busy_backoff_ms(),
        }
    }
}

/// Upstream vendors in fallback order.
#[derive(Debug, Clone, Deserialize)]
pub struct VendorsConfig {
    /// Vendor names, tried first to last.
    #[serde(default = "default_vendor_order")]
    pub order: Vec<String>,
    /// Primary vendor.
    #[serde(default)]
    pub alpaca: AlpacaConfig,
    /// Secondary vendor.
    #[serde(default)]
    pub schwab: SchwabConfig,
    /// Shared HTTP settings.
    #[serde(default)]
    pub http: HttpConfig,
}

impl Default for VendorsConfig {
    fn default() -> Self {
        Self {
            order: default_vendor_order(),
            alpaca: AlpacaConfig::default(),
            schwab: SchwabConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Loads configuration from a TOML file and `BARCACHE__*` variables.
    ///
    /// An explicit `path` must exist; otherwise `barcache.toml` in the
    /// working directory is read if present. Environment variables win.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be read or deserialized.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::from(Path::new(DEFAULT_CONFIG_FILE)).required(false),
        };

        let config = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .ignore_empty(true)
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("schedule.granularities")
                    .with_list_parse_key("vendors.order"),
            )
            .build()?;
        let loaded: Self = config.try_deserialize()?;
        debug!(path = ?path, vendors = ?loaded.vendors.order, "configuration loaded");
        Ok(loaded)
    }

    /// Returns the configured database file or the platform default.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(CacheStore::default_path)
    }

    /// Opens the cache database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open_store(&self) -> Result<CacheStore, ConfigError> {
        Ok(CacheStore::open(&self.database_path(), self.store_options())?)
    }

    /// Builds the trading session.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown time zone or a malformed time.
    pub fn session(&self) -> Result<TradingSession, ConfigError> {
        let s = &self.session;
        let timezone: Tz = s
            .timezone
            .parse()
            .map_err(|_| ConfigError::Timezone(s.timezone.clone()))?;
        let open = parse_time("session.open", &s.open)?;
        let close = parse_time("session.close", &s.close)?;
        Ok(TradingSession::new(timezone, open, close)
            .with_extended_hours(
                parse_time("session.extended_open", &s.extended_open)?,
                parse_time("session.extended_close", &s.extended_close)?,
            )
            .with_holidays(s.holidays.iter().copied()))
    }

    /// Builds the staleness policy.
    #[must_use]
    pub fn staleness_policy(&self) -> StalenessPolicy {
        let s = &self.staleness;
        StalenessPolicy {
            intraday_open: TimeDelta::minutes(s.intraday_open_minutes),
            closed: TimeDelta::minutes(s.intraday_closed_minutes),
            daily: TimeDelta::minutes(s.daily_minutes),
            weekly: TimeDelta::minutes(s.weekly_minutes),
            monthly: TimeDelta::minutes(s.monthly_minutes),
            recent_refresh: TimeDelta::seconds(s.recent_refresh_seconds),
        }
    }

    /// Builds store options.
    #[must_use]
    pub const fn store_options(&self) -> StoreOptions {
        StoreOptions {
            busy_retries: self.store.busy_retries,
            busy_backoff: Duration::from_millis(self.store.busy_backoff_ms),
        }
    }

    /// Builds ingestion options.
    #[must_use]
    pub const fn ingest_options(&self) -> IngestOptions {
        IngestOptions {
            batch: BatchOptions {
                batch_size: self.ingest.batch_size,
                inter_batch_delay: Duration::from_millis(self.ingest.inter_batch_delay_ms),
                stop_on_error: self.ingest.stop_on_error,
            },
            validate_missing: self.ingest.validate_missing,
            max_validation_failures: self.ingest.max_validation_failures,
        }
    }

    /// Builds the fire-time schedule.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is misconfigured.
    pub fn schedule(&self) -> Result<Schedule, ConfigError> {
        Ok(Schedule::new(
            self.session()?,
            TimeDelta::seconds(self.schedule.settle_delay_secs),
            TimeDelta::minutes(self.schedule.daily_run_offset_minutes),
        ))
    }

    /// Builds the scheduler loop periods.
    #[must_use]
    pub const fn intervals(&self) -> SchedulerIntervals {
        let s = &self.schedule;
        SchedulerIntervals {
            queue_poll: Duration::from_secs(s.queue_poll_secs),
            systematic_gap: Duration::from_secs(s.systematic_gap_minutes * 60),
            spot_check: Duration::from_secs(s.spot_check_minutes * 60),
            eviction: Duration::from_secs(s.eviction_minutes * 60),
        }
    }

    /// Returns retention ceilings for every stored granularity.
    #[must_use]
    pub fn retention(&self) -> BTreeMap<StoredGranularity, u64> {
        StoredGranularity::all()
            .iter()
            .map(|g| (*g, self.retention.get(g).copied().unwrap_or_else(|| g.default_retention())))
            .collect()
    }

    /// Builds the vendor fallback chain in configured order.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown vendor name or an HTTP client that
    /// cannot be built.
    pub fn build_client(&self) -> Result<FallbackClient, ConfigError> {
        let v = &self.vendors;
        let vendors = v
            .order
            .iter()
            .map(|name| -> Result<Arc<dyn Vendor>, ConfigError> {
                match name.trim().to_lowercase().as_str() {
                    "alpaca" => Ok(Arc::new(AlpacaClient::new(v.alpaca.clone(), v.http.clone())?)),
                    "schwab" => Ok(Arc::new(SchwabClient::new(v.schwab.clone(), v.http.clone())?)),
                    _ => Err(ConfigError::UnknownVendor(name.clone())),
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(FallbackClient::new(vendors))
    }
}

fn parse_time(field: &'static str, value: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").map_err(|_| ConfigError::Time {
        field,
        value: value.to_string(),
    })
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_timezone() -> String {
    "America/New_York".to_string()
}

fn default_open() -> String {
    "09:30".to_string()
}

fn default_close() -> String {
    "16:00".to_string()
}

fn default_extended_open() -> String {
    "04:00".to_string()
}

fn default_extended_close() -> String {
    "20:00".to_string()
}

const fn default_intraday_open_minutes() -> i64 {
    10
}

const fn default_intraday_closed_minutes() -> i64 {
    4_320
}

const fn default_daily_minutes() -> i64 {
    7_200
}

const fn default_weekly_minutes() -> i64 {
    20_160
}

const fn default_monthly_minutes() -> i64 {
    64_800
}

const fn default_recent_refresh_seconds() -> i64 {
    300
}

const fn default_batch_size() -> usize {
    50
}

const fn default_inter_batch_delay_ms() -> u64 {
    1_000
}

const fn default_true() -> bool {
    true
}

const fn default_max_validation_failures() -> u32 {
    3
}

fn default_granularities() -> Vec<StoredGranularity> {
    StoredGranularity::all().to_vec()
}

const fn default_settle_delay_secs() -> i64 {
    10
}

const fn default_queue_poll_secs() -> u64 {
    5
}

const fn default_systematic_gap_minutes() -> u64 {
    360
}

const fn default_spot_check_minutes() -> u64 {
    20
}

const fn default_eviction_minutes() -> u64 {
    1_440
}

const fn default_daily_run_offset_minutes() -> i64 {
    30
}

const fn default_min_coverage() -> f64 {
    0.9
}

const fn default_busy_retries() -> u32 {
    4
}

const fn default_busy_backoff_ms() -> u64 {
    50
}

fn default_vendor_order() -> Vec<String> {
    vec!["alpaca".to_string(), "schwab".to_string()]
}
