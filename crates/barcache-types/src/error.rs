//! Error types for barcache core types.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Error for symbol codes that cannot be normalized.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SymbolError {
    /// The code was empty after trimming.
    #[error("symbol code is empty")]
    Empty,

    /// The code is longer than the allowed maximum.
    #[error("symbol code '{code}' exceeds {max} characters")]
    TooLong {
        /// The offending code.
        code: String,
        /// The maximum length.
        max: usize,
    },

    /// The code contains a character that is not alphanumeric or a separator.
    #[error("symbol code '{code}' contains invalid character '{ch}'")]
    InvalidCharacter {
        /// The offending code.
        code: String,
        /// The first invalid character.
        ch: char,
    },

    /// The code starts or ends with a class separator.
    #[error("symbol code '{0}' has a dangling separator")]
    DanglingSeparator(String),
}

/// Error returned when parsing an invalid granularity string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GranularityParseError(pub(crate) String);

impl std::fmt::Display for GranularityParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid granularity '{}', expected a stored width (1m, 5m, 15m, 30m, 1h, 1d, 1w, 1mo) \
             or a derived width such as 3m, 4h or 2w",
            self.0
        )
    }
}

impl std::error::Error for GranularityParseError {}

/// Error returned when parsing an unknown enum variant from its string form.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {kind} '{value}'")]
pub struct VariantParseError {
    /// The kind of value being parsed (e.g. "run status").
    pub kind: &'static str,
    /// The rejected input.
    pub value: String,
}

/// Error for invalid time windows.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WindowError {
    /// Start is not strictly before end.
    #[error("invalid time window: {start} >= {end}")]
    InvalidRange {
        /// The window start.
        start: DateTime<Utc>,
        /// The window end.
        end: DateTime<Utc>,
    },
}

/// A violation of the OHLC bar invariants.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarError {
    /// A price or volume field is NaN or infinite.
    #[error("bar field '{0}' is not a finite number")]
    NonFinite(&'static str),

    /// High is below the open or the close.
    #[error("bar high is below max(open, close)")]
    HighBelowBody,

    /// Low is above the open or the close.
    #[error("bar low is above min(open, close)")]
    LowAboveBody,

    /// Volume is negative.
    #[error("bar volume is negative")]
    NegativeVolume,
}
