//! Derived-granularity bar aggregation for barcache.
//!
//! This crate combines stored bars into coarser derived bars:
//!
//! - [`aggregate`] - Aggregates a time-ordered slice in fixed-size chunks
//! - [`BarAggregator`] - Streaming aggregator behind [`aggregate`]
//! - [`CoercionFallback`] - Record of a non-finite value that was replaced

#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/barcache/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod aggregator;

pub use aggregator::{AggregateOutput, BarAggregator, CoercionFallback, aggregate};
