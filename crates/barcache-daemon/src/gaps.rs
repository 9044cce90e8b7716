//! Detection and backfill of series shorter than expected.

use barcache_store::SymbolRecord;
use barcache_types::{IngestionRun, JobKind, StoredGranularity, TimeWindow};
use chrono::Utc;
use rand::seq::SliceRandom;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ingest::blocking;
use crate::{CollectionQueue, IngestError, Ingestor};

/// Returns true when `stored` bars fall short of `expected * min_coverage`.
#[must_use]
pub fn needs_backfill(stored: u64, expected: u64, min_coverage: f64) -> bool {
    (stored as f64) < (expected as f64) * min_coverage
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Default)]
pub struct GapReport {
    /// Granularities whose counts were checked.
    pub granularities_checked: usize,
    /// Series found below coverage.
    pub gaps_found: usize,
    /// Backfill runs performed.
    pub runs: Vec<IngestionRun>,
    /// The pass stepped aside for an in-flight queue drain.
    pub yielded: bool,
    /// A rate limit ended the pass early.
    pub rate_limited: bool,
}

/// Compares stored bar counts with per-granularity expectations and backfills
/// short series.
#[derive(Debug)]
pub struct GapReconciler {
    ingestor: Arc<Ingestor>,
    queue: Arc<CollectionQueue>,
    granularities: Vec<StoredGranularity>,
    min_coverage: f64,
    cursor: AtomicUsize,
}

impl GapReconciler {
    /// Default fraction of the expected count a series must reach.
    pub const DEFAULT_MIN_COVERAGE: f64 = 0.9;

    /// Creates a reconciler over `granularities`, checked coarse to fine.
    #[must_use]
    pub fn new(
        ingestor: Arc<Ingestor>,
        queue: Arc<CollectionQueue>,
        granularities: &[StoredGranularity],
        min_coverage: f64,
    ) -> Self {
        let granularities = StoredGranularity::gap_priority()
            .iter()
            .copied()
            .filter(|g| granularities.contains(g))
            .collect();
        Self {
            ingestor,
            queue,
            granularities,
            min_coverage,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Returns the granularities in check order.
    #[must_use]
    pub fn granularities(&self) -> &[StoredGranularity] {
        &self.granularities
    }

    /// Returns active symbols whose `granularity` series is short.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn find_gaps(
        &self,
        granularity: StoredGranularity,
    ) -> Result<Vec<SymbolRecord>, IngestError> {
        let expected = granularity.expected_bars();
        let min_coverage = self.min_coverage;
        blocking(self.ingestor.store(), move |store| {
            let counts = store.bar_counts(granularity)?;
            Ok(store
                .active_symbols()?
                .into_iter()
                .filter(|s| {
                    let stored = counts.get(&s.id).copied().unwrap_or(0);
                    needs_backfill(stored, expected, min_coverage)
                })
                .collect())
        })
        .await
    }

    /// Checks every active symbol at every granularity and backfills gaps.
    ///
    /// Stops at the first rate limit; yields while a queue drain is running.
    pub async fn systematic(&self, cancel: &CancellationToken) -> GapReport {
        let mut report = GapReport::default();

        for &granularity in &self.granularities {
            if cancel.is_cancelled() {
                break;
            }
            if self.queue.is_draining() {
                info!(granularity = %granularity, "queue drain in flight, gap reconciliation yields");
                report.yielded = true;
                break;
            }

            report.granularities_checked += 1;
            let gaps = match self.find_gaps(granularity).await {
                Ok(gaps) => gaps,
                Err(e) => {
                    warn!(granularity = %granularity, error = %e, "gap check failed");
                    continue;
                }
            };
            if gaps.is_empty() {
                debug!(granularity = %granularity, "no gaps");
                continue;
            }

            info!(granularity = %granularity, gaps = gaps.len(), "backfilling gaps");
            report.gaps_found += gaps.len();
            let window = TimeWindow::ending_at(Utc::now(), granularity.history_window());
            let outcome = self
                .ingestor
                .run_job(JobKind::GapSystematic, granularity, &gaps, window, cancel)
                .await;
            report.runs.push(outcome.run);
            if outcome.rate_limited {
                report.rate_limited = true;
                break;
            }
        }

        report
    }

    /// Picks one random active symbol and backfills its short series.
    ///
    /// A rate limit stops the pass; the next pass resumes at the following
    /// granularity.
    pub async fn spot_check(&self, cancel: &CancellationToken) -> GapReport {
        let mut report = GapReport::default();
        if self.queue.is_draining() {
            info!("queue drain in flight, spot check yields");
            report.yielded = true;
            return report;
        }

        let symbols = match blocking::<_, IngestError, _>(self.ingestor.store(), |store| {
            store.active_symbols()
        })
        .await
        {
            Ok(symbols) => symbols,
            Err(e) => {
                warn!(error = %e, "spot check could not list symbols");
                return report;
            }
        };
        let Some(symbol) = symbols.choose(&mut rand::thread_rng()).cloned() else {
            return report;
        };

        let count = self.granularities.len();
        let start = self.cursor.load(Ordering::Relaxed) % count.max(1);
        debug!(symbol = %symbol.code, start, "spot check");

        for offset in 0..count {
            let index = (start + offset) % count;
            let granularity = self.granularities[index];
            if cancel.is_cancelled() {
                break;
            }

            report.granularities_checked += 1;
            let id = symbol.id;
            let stored = match blocking::<_, IngestError, _>(self.ingestor.store(), move |store| {
                store.bar_count(id, granularity)
            })
            .await
            {
                Ok(stored) => stored,
                Err(e) => {
                    warn!(symbol = %symbol.code, granularity = %granularity, error = %e, "spot check count failed");
                    continue;
                }
            };
            if !needs_backfill(stored, granularity.expected_bars(), self.min_coverage) {
                continue;
            }

            info!(
                symbol = %symbol.code,
                granularity = %granularity,
                stored,
                expected = granularity.expected_bars(),
                "spot check found gap"
            );
            report.gaps_found += 1;
            let window = TimeWindow::ending_at(Utc::now(), granularity.history_window());
            let outcome = self
                .ingestor
                .run_job(
                    JobKind::GapSpotCheck,
                    granularity,
                    std::slice::from_ref(&symbol),
                    window,
                    cancel,
                )
                .await;
            report.runs.push(outcome.run);
            if outcome.rate_limited {
                self.cursor.store(index + 1, Ordering::Relaxed);
                report.rate_limited = true;
                return report;
            }
        }

        self.cursor.store(0, Ordering::Relaxed);
        report
    }
}
