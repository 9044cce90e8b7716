//! The ingestion routine shared by scheduled runs, queue drains and backfills.

use barcache_fetch::{BarRequest, FallbackClient, FetchError, VendorError};
use barcache_store::{CacheStore, StoreError, SymbolRecord, UpsertStats};
use barcache_types::{Bar, IngestionRun, JobKind, StoredGranularity, TimeWindow};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{BatchOptions, BatchReport, BatchSplitter, IngestError, Result, RunTracker};

/// Concurrent symbol validations after a batch.
const VALIDATION_CONCURRENCY: usize = 4;

/// Runs a blocking store operation off the async runtime.
pub(crate) async fn blocking<T, E, F>(store: &CacheStore, op: F) -> std::result::Result<T, E>
where
    F: FnOnce(&CacheStore) -> std::result::Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
    E: From<StoreError> + From<tokio::task::JoinError>,
{
    let store = store.clone();
    Ok(tokio::task::spawn_blocking(move || op(&store)).await??)
}

/// Ingestion settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOptions {
    /// Batch size, delay and failure policy.
    pub batch: BatchOptions,
    /// Ask vendors about symbols that came back without data.
    pub validate_missing: bool,
    /// Rejections after which a symbol is deactivated.
    pub max_validation_failures: u32,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            batch: BatchOptions::default(),
            validate_missing: true,
            max_validation_failures: 3,
        }
    }
}

/// Result of [`Ingestor::run_job`].
#[derive(Debug, Clone)]
pub struct JobOutcome {
    /// Final audit record.
    pub run: IngestionRun,
    /// True if a rate limit aborted the remaining batches.
    pub rate_limited: bool,
}

/// Fetches bars through the vendor fallback chain and writes them to the
/// store, one batch of symbols at a time.
#[derive(Debug, Clone)]
pub struct Ingestor {
    client: FallbackClient,
    store: CacheStore,
    options: IngestOptions,
}

impl Ingestor {
    /// Creates an ingestor.
    #[must_use]
    pub const fn new(client: FallbackClient, store: CacheStore, options: IngestOptions) -> Self {
        Self {
            client,
            store,
            options,
        }
    }

    /// Returns the vendor client.
    #[must_use]
    pub const fn client(&self) -> &FallbackClient {
        &self.client
    }

    /// Returns the store.
    #[must_use]
    pub const fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Returns the options.
    #[must_use]
    pub const fn options(&self) -> &IngestOptions {
        &self.options
    }

    /// Ingests `window` for every symbol and records the run in the audit log.
    ///
    /// Batch failures do not stop the run; a rate limit aborts the remaining
    /// batches. Never returns an error: failures end up in the run record.
    pub async fn run_job(
        &self,
        kind: JobKind,
        granularity: StoredGranularity,
        symbols: &[SymbolRecord],
        window: TimeWindow,
        cancel: &CancellationToken,
    ) -> JobOutcome {
        let tracker = RunTracker::start(self.store.clone(), kind, Some(granularity)).await;
        info!(
            kind = kind.as_str(),
            granularity = %granularity,
            symbols = symbols.len(),
            window = %window,
            "ingestion run started"
        );

        let options = self
            .options
            .batch
            .capped(self.client.max_batch_size().unwrap_or(usize::MAX));
        let run_token = cancel.child_token();
        let (tracker_ref, token_ref) = (&tracker, &run_token);

        let report = BatchSplitter::new(options)
            .process(symbols, &run_token, |index, batch| async move {
                let result = self.ingest_batch(granularity, &batch, window, tracker_ref).await;
                if let Err(e) = &result
                    && e.is_rate_limited()
                {
                    warn!(
                        granularity = %granularity,
                        batch = index,
                        "rate limited, aborting remaining batches"
                    );
                    token_ref.cancel();
                }
                result
            })
            .await;

        let outcome = self.finish(&tracker, &report).await;
        info!(
            kind = kind.as_str(),
            granularity = %granularity,
            status = outcome.run.status.as_str(),
            batches = report.total_batches,
            failed = report.failed_batches,
            inserted = outcome.run.bars_inserted,
            updated = outcome.run.bars_updated,
            "ingestion run finished"
        );
        outcome
    }

    async fn finish(&self, tracker: &RunTracker, report: &BatchReport<IngestError>) -> JobOutcome {
        let rate_limited = report.errors.iter().any(|f| f.error.is_rate_limited());

        let run = if rate_limited {
            tracker
                .fail(format!(
                    "rate limited; {} of {} batches not run",
                    report.skipped_batches(),
                    report.total_batches
                ))
                .await
        } else if report.failed_batches > 0 && report.successful_batches == 0 {
            let reason = report
                .errors
                .first()
                .map_or_else(String::new, |f| f.error.to_string());
            tracker.fail(reason).await
        } else if report.failed_batches > 0 {
            let first = report
                .errors
                .first()
                .map_or_else(String::new, |f| f.error.to_string());
            tracker
                .complete(Some(format!(
                    "{} of {} batches failed: {first}",
                    report.failed_batches, report.total_batches
                )))
                .await
        } else if report.stopped_early {
            tracker
                .fail(format!(
                    "cancelled; {} of {} batches not run",
                    report.skipped_batches(),
                    report.total_batches
                ))
                .await
        } else {
            tracker.complete(None).await
        };

        JobOutcome { run, rate_limited }
    }

    async fn ingest_batch(
        &self,
        granularity: StoredGranularity,
        batch: &[SymbolRecord],
        window: TimeWindow,
        tracker: &RunTracker,
    ) -> Result<()> {
        let request = BarRequest::new(
            batch.iter().map(|s| s.code.clone()).collect(),
            granularity,
            window,
        );

        let outcome = match self.client.fetch_bars(&request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracker
                    .record_batch(batch.len() as u64, 0, UpsertStats::default())
                    .await;
                if self.options.validate_missing && is_no_data(&e) {
                    self.check_missing(batch.to_vec()).await;
                }
                return Err(e.into());
            }
        };

        let mut writes = Vec::with_capacity(batch.len());
        let mut missing = Vec::new();
        for record in batch {
            match outcome.bars.get(&record.code) {
                Some(series) => writes.push((record.id, valid_bars(record, series))),
                None => missing.push(record.clone()),
            }
        }

        let succeeded = writes.len() as u64;
        let vendor = outcome.vendor.clone();
        let stats = blocking::<_, IngestError, _>(&self.store, move |store| {
            let mut total = UpsertStats::default();
            for (symbol_id, bars) in &writes {
                total += store.upsert_bars(*symbol_id, granularity, bars, &vendor)?;
            }
            Ok(total)
        })
        .await;

        let stats = match stats {
            Ok(stats) => stats,
            Err(e) => {
                tracker
                    .record_batch(batch.len() as u64, 0, UpsertStats::default())
                    .await;
                return Err(e);
            }
        };
        tracker
            .record_batch(batch.len() as u64, succeeded, stats)
            .await;
        debug!(
            granularity = %granularity,
            vendor = %outcome.vendor,
            symbols = batch.len(),
            missing = missing.len(),
            inserted = stats.inserted,
            updated = stats.updated,
            "batch ingested"
        );

        if self.options.validate_missing && !missing.is_empty() {
            self.check_missing(missing).await;
        }
        Ok(())
    }

    /// Validates symbols no vendor had data for, deactivating repeat offenders.
    async fn check_missing(&self, missing: Vec<SymbolRecord>) {
        let max_failures = self.options.max_validation_failures;

        futures::stream::iter(missing)
            .map(|record| async move {
                let verdict = self.client.validate_symbol(&record.code).await;
                (record, verdict)
            })
            .buffer_unordered(VALIDATION_CONCURRENCY)
            .for_each(|(record, verdict)| async move {
                let id = record.id;
                let result = match verdict {
                    Ok(true) if record.validation_failures > 0 => {
                        blocking::<_, IngestError, _>(&self.store, move |store| {
                            store.clear_validation_failures(id)
                        })
                        .await
                    }
                    Ok(true) => Ok(()),
                    Ok(false) => {
                        let deactivated = blocking::<_, IngestError, _>(&self.store, move |store| {
                            store.record_validation_failure(id, max_failures)
                        })
                        .await;
                        match deactivated {
                            Ok(true) => {
                                warn!(symbol = %record.code, "symbol rejected by every vendor, deactivated");
                                Ok(())
                            }
                            Ok(false) => {
                                info!(symbol = %record.code, "symbol rejected by every vendor");
                                Ok(())
                            }
                            Err(e) => Err(e),
                        }
                    }
                    Err(e) => {
                        debug!(symbol = %record.code, error = %e, "symbol validation inconclusive");
                        Ok(())
                    }
                };
                if let Err(e) = result {
                    warn!(symbol = %record.code, error = %e, "failed to record validation result");
                }
            })
            .await;
    }
}

/// True when every vendor answered but none had bars.
fn is_no_data(error: &FetchError) -> bool {
    let failures = error.failures();
    failures.iter().any(|f| matches!(f.reason, VendorError::Empty))
        && failures
            .iter()
            .all(|f| matches!(f.reason, VendorError::Empty | VendorError::Unavailable))
}

/// Drops bars that violate the OHLC invariant or have negative volume.
fn valid_bars(record: &SymbolRecord, series: &[Bar]) -> Vec<Bar> {
    series
        .iter()
        .filter(|bar| match bar.validate() {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    symbol = %record.code,
                    timestamp = %bar.timestamp,
                    error = %e,
                    "dropping invalid vendor bar"
                );
                false
            }
        })
        .copied()
        .collect()
}
