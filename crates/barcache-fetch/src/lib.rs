//! Market data vendor clients for barcache.
//!
//! This crate provides the upstream fetch pipeline:
//!
//! - [`Vendor`] - Common interface of every upstream market data API
//! - [`AlpacaClient`] - Primary vendor with symbol batching and pagination
//! - [`SchwabClient`] - Secondary, bearer-token vendor
//! - [`RateLimiter`] - Rolling-window request limiter with hard reset
//! - [`HttpClient`] - HTTP client with connection pooling and retries
//! - [`FallbackClient`] - Ordered multi-vendor fallback

#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/barcache/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod alpaca;
mod client;
mod error;
mod fallback;
mod rate_limit;
mod schwab;
mod vendor;

pub use alpaca::{AlpacaClient, AlpacaConfig};
pub use client::{HttpClient, HttpConfig};
pub use error::{FetchError, TokenError, VendorError, VendorFailure};
pub use fallback::{FallbackClient, FetchOutcome};
pub use rate_limit::RateLimiter;
pub use schwab::{SchwabClient, SchwabConfig, StaticToken, TokenProvider};
pub use vendor::{BarRequest, Vendor, VendorBars};
