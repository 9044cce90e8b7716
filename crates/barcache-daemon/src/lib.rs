//! Ingestion machinery for the barcache bar cache.
//!
//! This crate keeps the cache filled and answers reads from it:
//!
//! - [`TradingSession`] / [`StalenessPolicy`] - When cached bars are fresh
//! - [`Schedule`] - Bar-aligned fire times per stored granularity
//! - [`BatchSplitter`] - Ordered, delayed batch execution
//! - [`Ingestor`] - Fetch, validate and upsert one run of symbols
//! - [`CollectionQueue`] - On-demand requests with a single-flight drain
//! - [`GapReconciler`] - Systematic and spot-check backfill
//! - [`Scheduler`] - Timer loops and per-granularity exclusion
//! - [`CacheService`] - Read and enqueue accessors
//! - [`CacheConfig`] - Layered configuration

#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/barcache/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod batch;
mod config;
mod error;
mod gaps;
mod ingest;
mod queue;
mod schedule;
mod scheduler;
mod service;
mod session;
mod staleness;
mod tracker;

#[cfg(test)]
mod test_support;

pub use batch::{BatchFailure, BatchOptions, BatchReport, BatchSplitter};
pub use config::{
    CacheConfig, DEFAULT_CONFIG_FILE, ENV_PREFIX, GapConfig, IngestConfig, ScheduleConfig,
    SessionConfig, StalenessConfig, StoreConfig, VendorsConfig,
};
pub use error::{ConfigError, IngestError, Result, ServiceError};
pub use gaps::{GapReconciler, GapReport, needs_backfill};
pub use ingest::{IngestOptions, Ingestor, JobOutcome};
pub use queue::{CollectionQueue, CollectionRequest, DrainReport};
pub use schedule::Schedule;
pub use scheduler::{Scheduler, SchedulerIntervals};
pub use service::{CacheService, ReadOutcome};
pub use session::TradingSession;
pub use staleness::{Freshness, StalenessPolicy};
pub use tracker::RunTracker;
