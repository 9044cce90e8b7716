//! Error types for ingestion, the read path and configuration.

use barcache_fetch::FetchError;
use barcache_store::StoreError;
use thiserror::Error;

/// Errors raised while ingesting bars.
#[derive(Error, Debug)]
pub enum IngestError {
    /// Every vendor failed for a batch.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The store rejected a read or write.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A blocking store task panicked or was cancelled.
    #[error("store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl IngestError {
    /// Returns true if the failure should abort the rest of the run.
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::Fetch(e) if e.is_rate_limited())
    }
}

/// Errors raised by the read path.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// The store rejected a read.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A blocking store task panicked or was cancelled.
    #[error("store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Errors raised while loading configuration or wiring components from it.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A source could not be read or deserialized.
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// Unknown IANA time zone.
    #[error("invalid time zone '{0}'")]
    Timezone(String),

    /// A time of day that is not `HH:MM`.
    #[error("invalid time for {field}: '{value}' (expected HH:MM)")]
    Time {
        /// Configuration key.
        field: &'static str,
        /// Offending value.
        value: String,
    },

    /// A vendor name in `vendors.order` that is not supported.
    #[error("unknown vendor '{0}'")]
    UnknownVendor(String),

    /// A vendor HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),

    /// The cache database could not be opened.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result type for ingestion.
pub type Result<T> = std::result::Result<T, IngestError>;
