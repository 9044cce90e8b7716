//! Error types for vendor access.

use barcache_types::StoredGranularity;
use thiserror::Error;

/// Errors raised by a single vendor.
#[derive(Error, Debug)]
pub enum VendorError {
    /// The vendor answered but had no bars for the request.
    #[error("no data returned")]
    Empty,

    /// The vendor is not configured (missing credentials).
    #[error("vendor not configured")]
    Unavailable,

    /// The vendor kept reporting a rate limit after the cooldown retry.
    #[error("rate limited by vendor")]
    RateLimited,

    /// The vendor rejected the credentials.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Token acquisition or refresh failed.
    #[error(transparent)]
    Token(#[from] TokenError),

    /// The vendor cannot serve this granularity.
    #[error("granularity {0} not supported")]
    Unsupported(StoredGranularity),

    /// The batch exceeds the vendor's per-request symbol cap.
    #[error("batch of {requested} symbols exceeds cap of {max}")]
    BatchTooLarge {
        /// Number of symbols requested.
        requested: usize,
        /// Vendor cap.
        max: usize,
    },

    /// The response contained a key that was not a requested symbol.
    #[error("response contains unrequested symbol '{0}'")]
    UnexpectedSymbol(String),

    /// The vendor returned a non-success status.
    #[error("HTTP {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body or reason phrase.
        message: String,
    },

    /// HTTP transport failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

impl VendorError {
    /// Returns true for rate-limit-shaped failures.
    #[must_use]
    pub const fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited)
    }
}

/// Errors raised by a bearer token source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// No access token has been provisioned.
    #[error("no access token configured")]
    Missing,

    /// The refresh token itself has expired and the vendor must be re-authorized.
    #[error("refresh token expired; re-authorization required")]
    RefreshExpired,

    /// The refresh call failed for another reason.
    #[error("token refresh failed: {0}")]
    Refresh(String),
}

/// One vendor's reason for not producing bars.
#[derive(Debug)]
pub struct VendorFailure {
    /// Vendor name.
    pub vendor: String,
    /// Why the vendor failed.
    pub reason: VendorError,
}

impl std::fmt::Display for VendorFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.vendor, self.reason)
    }
}

/// Errors raised by the fallback client.
#[derive(Error, Debug)]
pub enum FetchError {
    /// No vendors are configured.
    #[error("no vendors configured")]
    NoVendors,

    /// Every vendor failed or returned nothing.
    #[error("no data available from any vendor ({})", join_failures(.failures))]
    AllVendorsFailed {
        /// Per-vendor failure reasons, in priority order.
        failures: Vec<VendorFailure>,
    },
}

impl FetchError {
    /// Returns true if any vendor failed because of a rate limit.
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        match self {
            Self::NoVendors => false,
            Self::AllVendorsFailed { failures } => {
                failures.iter().any(|f| f.reason.is_rate_limited())
            }
        }
    }

    /// Returns the per-vendor failures.
    #[must_use]
    pub fn failures(&self) -> &[VendorFailure] {
        match self {
            Self::NoVendors => &[],
            Self::AllVendorsFailed { failures } => failures,
        }
    }
}

fn join_failures(failures: &[VendorFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
