//! Timer loops and per-granularity run exclusion.

use barcache_types::{IngestionRun, JobKind, StoredGranularity, TimeWindow};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ingest::blocking;
use crate::{CollectionQueue, GapReconciler, IngestError, Ingestor, RunTracker, Schedule};

/// Periods of the non-bar-aligned loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerIntervals {
    /// Fallback poll of the collection queue.
    pub queue_poll: Duration,
    /// Systematic gap reconciliation.
    pub systematic_gap: Duration,
    /// Random single-symbol spot check.
    pub spot_check: Duration,
    /// Oldest-first eviction.
    pub eviction: Duration,
}

impl Default for SchedulerIntervals {
    fn default() -> Self {
        Self {
            queue_poll: Duration::from_secs(5),
            systematic_gap: Duration::from_secs(6 * 60 * 60),
            spot_check: Duration::from_secs(20 * 60),
            eviction: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Drives scheduled ingestion, queue draining, gap reconciliation and
/// eviction until shut down.
///
/// Each stored granularity has its own lock: a firing that finds its
/// granularity already running is recorded as skipped rather than queued.
#[derive(Debug)]
pub struct Scheduler {
    ingestor: Arc<Ingestor>,
    queue: Arc<CollectionQueue>,
    gaps: Arc<GapReconciler>,
    schedule: Schedule,
    granularities: Vec<StoredGranularity>,
    locks: HashMap<StoredGranularity, Mutex<()>>,
    retention: BTreeMap<StoredGranularity, u64>,
    intervals: SchedulerIntervals,
    cancel: CancellationToken,
}

impl Scheduler {
    /// Creates a scheduler over every stored granularity with default
    /// retention and intervals.
    #[must_use]
    pub fn new(
        ingestor: Arc<Ingestor>,
        queue: Arc<CollectionQueue>,
        gaps: Arc<GapReconciler>,
        schedule: Schedule,
    ) -> Self {
        let all = StoredGranularity::all();
        Self {
            ingestor,
            queue,
            gaps,
            schedule,
            granularities: all.to_vec(),
            locks: all.iter().map(|g| (*g, Mutex::new(()))).collect(),
            retention: all.iter().map(|g| (*g, g.default_retention())).collect(),
            intervals: SchedulerIntervals::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Restricts scheduled ingestion to `granularities`.
    #[must_use]
    pub fn with_granularities(mut self, granularities: Vec<StoredGranularity>) -> Self {
        self.granularities = granularities;
        self
    }

    /// Overrides per-granularity retention ceilings.
    #[must_use]
    pub fn with_retention(mut self, retention: BTreeMap<StoredGranularity, u64>) -> Self {
        self.retention.extend(retention);
        self
    }

    /// Overrides loop intervals.
    #[must_use]
    pub const fn with_intervals(mut self, intervals: SchedulerIntervals) -> Self {
        self.intervals = intervals;
        self
    }

    /// Returns the collection queue.
    #[must_use]
    pub const fn queue(&self) -> &Arc<CollectionQueue> {
        &self.queue
    }

    /// Returns the gap reconciler.
    #[must_use]
    pub const fn gaps(&self) -> &Arc<GapReconciler> {
        &self.gaps
    }

    /// Returns the ingestor.
    #[must_use]
    pub const fn ingestor(&self) -> &Arc<Ingestor> {
        &self.ingestor
    }

    /// Returns the shutdown token shared by every run.
    #[must_use]
    pub const fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Runs one firing of `granularity` now.
    pub async fn fire(&self, granularity: StoredGranularity, kind: JobKind) -> IngestionRun {
        self.fire_at(granularity, kind, Utc::now()).await
    }

    /// Runs one firing of `granularity` as of `now`.
    ///
    /// Intraday firings outside the extended session are skipped, as are
    /// firings whose granularity is already running.
    pub async fn fire_at(
        &self,
        granularity: StoredGranularity,
        kind: JobKind,
        now: DateTime<Utc>,
    ) -> IngestionRun {
        let store = self.ingestor.store().clone();

        if granularity.is_intraday() && !self.bar_in_session(granularity, now) {
            debug!(granularity = %granularity, kind = kind.as_str(), "session closed, firing skipped");
            return RunTracker::skipped(store, kind, Some(granularity), "session closed").await;
        }

        let Some(lock) = self.locks.get(&granularity) else {
            return RunTracker::skipped(store, kind, Some(granularity), "granularity not scheduled")
                .await;
        };
        let Ok(_guard) = lock.try_lock() else {
            info!(granularity = %granularity, kind = kind.as_str(), "run already active, firing skipped");
            return RunTracker::skipped(store, kind, Some(granularity), "run already active").await;
        };

        let symbols =
            match blocking::<_, IngestError, _>(&store, |store| store.active_symbols()).await {
                Ok(symbols) => symbols,
                Err(e) => {
                    warn!(granularity = %granularity, error = %e, "failed to list symbols");
                    let tracker = RunTracker::start(store, kind, Some(granularity)).await;
                    return tracker.fail(e.to_string()).await;
                }
            };

        let window = TimeWindow::ending_at(now, granularity.refresh_lookback());
        self.ingestor
            .run_job(kind, granularity, &symbols, window, &self.cancel)
            .await
            .run
    }

    /// True if the bar that just closed, or the one now forming, falls in the
    /// extended session.
    fn bar_in_session(&self, granularity: StoredGranularity, now: DateTime<Utc>) -> bool {
        let session = self.schedule.session();
        session.is_extended_open(now) || session.is_extended_open(now - granularity.width())
    }

    /// Trims every series to its retention ceiling, oldest bars first.
    pub async fn evict(&self) -> Vec<IngestionRun> {
        let mut runs = Vec::with_capacity(self.retention.len());
        for (&granularity, &ceiling) in &self.retention {
            let store = self.ingestor.store().clone();
            let tracker =
                RunTracker::start(store.clone(), JobKind::Eviction, Some(granularity)).await;
            let evicted =
                blocking::<_, IngestError, _>(&store, move |store| store.evict(granularity, ceiling))
                    .await;
            let run = match evicted {
                Ok(0) => tracker.complete(None).await,
                Ok(count) => {
                    info!(granularity = %granularity, ceiling, evicted = count, "evicted oldest bars");
                    tracker.complete(Some(format!("evicted {count} bars"))).await
                }
                Err(e) => {
                    warn!(granularity = %granularity, error = %e, "eviction failed");
                    tracker.fail(e.to_string()).await
                }
            };
            runs.push(run);
        }
        runs
    }

    /// Spawns every loop and waits until [`shutdown`](Self::shutdown).
    pub async fn run(self: Arc<Self>) {
        let mut tasks = JoinSet::new();

        for &granularity in &self.granularities {
            let scheduler = Arc::clone(&self);
            tasks.spawn(async move { scheduler.primary_loop(granularity).await });
            if granularity.retry_offset().is_some() {
                let scheduler = Arc::clone(&self);
                tasks.spawn(async move { scheduler.retry_loop(granularity).await });
            }
        }

        let scheduler = Arc::clone(&self);
        tasks.spawn(async move {
            scheduler
                .queue
                .run(&scheduler.ingestor, &scheduler.cancel, scheduler.intervals.queue_poll)
                .await;
        });

        let scheduler = Arc::clone(&self);
        tasks.spawn(async move {
            while scheduler.tick(scheduler.intervals.systematic_gap).await {
                let report = scheduler.gaps.systematic(&scheduler.cancel).await;
                info!(
                    checked = report.granularities_checked,
                    gaps = report.gaps_found,
                    yielded = report.yielded,
                    rate_limited = report.rate_limited,
                    "systematic gap reconciliation finished"
                );
            }
        });

        let scheduler = Arc::clone(&self);
        tasks.spawn(async move {
            while scheduler.tick(scheduler.intervals.spot_check).await {
                scheduler.gaps.spot_check(&scheduler.cancel).await;
            }
        });

        let scheduler = Arc::clone(&self);
        tasks.spawn(async move {
            while scheduler.tick(scheduler.intervals.eviction).await {
                scheduler.evict().await;
            }
        });

        info!(
            granularities = self.granularities.len(),
            loops = tasks.len(),
            "scheduler started"
        );
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "scheduler loop terminated abnormally");
            }
        }
        info!("scheduler stopped");
    }

    /// Stops every loop; runs in flight finish their current batch.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    async fn primary_loop(&self, granularity: StoredGranularity) {
        while self
            .sleep_until(self.schedule.next_fire(granularity, Utc::now()))
            .await
        {
            self.fire(granularity, JobKind::Scheduled).await;
        }
    }

    async fn retry_loop(&self, granularity: StoredGranularity) {
        while let Some(at) = self.schedule.next_retry(granularity, Utc::now())
            && self.sleep_until(at).await
        {
            self.fire(granularity, JobKind::Retry).await;
        }
    }

    /// Sleeps until `at`; false if shut down first.
    async fn sleep_until(&self, at: DateTime<Utc>) -> bool {
        let wait = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        self.tick(wait).await
    }

    /// Sleeps for `period`; false if shut down first.
    async fn tick(&self, period: Duration) -> bool {
        tokio::select! {
            () = self.cancel.cancelled() => false,
            () = tokio::time::sleep(period) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeVendor, Gate, client, ensure};
    use crate::{IngestOptions, TradingSession};
    use barcache_store::CacheStore;
    use barcache_types::{Bar, RunStatus};
    use chrono::{TimeDelta, TimeZone};

    fn scheduler(vendor: &Arc<FakeVendor>, store: &CacheStore) -> Arc<Scheduler> {
        let mut options = IngestOptions::default();
        options.batch.inter_batch_delay = Duration::ZERO;
        options.validate_missing = false;
        let ingestor = Arc::new(Ingestor::new(client(&[vendor]), store.clone(), options));
        let all = StoredGranularity::all();
        let queue = Arc::new(CollectionQueue::new(all.to_vec()));
        let gaps = Arc::new(GapReconciler::new(
            Arc::clone(&ingestor),
            Arc::clone(&queue),
            all,
            GapReconciler::DEFAULT_MIN_COVERAGE,
        ));
        let schedule = Schedule::new(
            TradingSession::default(),
            TimeDelta::seconds(10),
            TimeDelta::minutes(30),
        );
        Arc::new(Scheduler::new(ingestor, queue, gaps, schedule))
    }

    #[tokio::test]
    async fn test_overlapping_firing_is_skipped() {
        let store = CacheStore::in_memory().unwrap();
        ensure(&store, &["AAPL"]);
        let gate = Gate::new();
        let vendor = FakeVendor::new("a").gated(&gate).arc();
        let scheduler = scheduler(&vendor, &store);

        let first = tokio::spawn({
            let scheduler = Arc::clone(&scheduler);
            async move { scheduler.fire(StoredGranularity::Day1, JobKind::Scheduled).await }
        });
        gate.entered().await;

        let second = scheduler
            .fire(StoredGranularity::Day1, JobKind::Retry)
            .await;
        assert_eq!(second.status, RunStatus::Skipped);
        assert_eq!(second.error.as_deref(), Some("run already active"));

        // A different granularity is not blocked.
        let other = tokio::spawn({
            let scheduler = Arc::clone(&scheduler);
            async move { scheduler.fire(StoredGranularity::Week1, JobKind::Scheduled).await }
        });
        gate.entered().await;
        gate.open();
        gate.open();

        assert_eq!(first.await.unwrap().status, RunStatus::Completed);
        assert_eq!(other.await.unwrap().status, RunStatus::Completed);
        assert_eq!(vendor.calls(), 2);
    }

    #[tokio::test]
    async fn test_intraday_firing_skipped_while_session_closed() {
        let store = CacheStore::in_memory().unwrap();
        ensure(&store, &["AAPL"]);
        let vendor = FakeVendor::new("a").arc();
        let scheduler = scheduler(&vendor, &store);
        let saturday = Utc.with_ymd_and_hms(2024, 1, 6, 15, 0, 10).unwrap();

        let run = scheduler
            .fire_at(StoredGranularity::Minute5, JobKind::Scheduled, saturday)
            .await;

        assert_eq!(run.status, RunStatus::Skipped);
        assert_eq!(vendor.calls(), 0);

        let daily = scheduler
            .fire_at(StoredGranularity::Day1, JobKind::Scheduled, saturday)
            .await;
        assert_eq!(daily.status, RunStatus::Completed);
        assert_eq!(vendor.calls(), 1);
    }

    #[tokio::test]
    async fn test_intraday_firing_runs_during_session() {
        let store = CacheStore::in_memory().unwrap();
        ensure(&store, &["AAPL"]);
        let vendor = FakeVendor::new("a").arc();
        let scheduler = scheduler(&vendor, &store);
        // 10:05:10 New York on a Tuesday.
        let open = Utc.with_ymd_and_hms(2024, 1, 2, 15, 5, 10).unwrap();

        let run = scheduler
            .fire_at(StoredGranularity::Minute5, JobKind::Scheduled, open)
            .await;

        assert_eq!(run.status, RunStatus::Completed);
        let request = &vendor.requests()[0];
        assert_eq!(request.window.end, open);
        assert_eq!(request.window.start, open - TimeDelta::hours(1));
    }

    #[tokio::test]
    async fn test_evict_applies_retention() {
        let store = CacheStore::in_memory().unwrap();
        let symbols = ensure(&store, &["AAPL"]);
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let bars: Vec<Bar> = (0..5)
            .map(|d| Bar::new(start + TimeDelta::days(d), 1.0, 2.0, 0.5, 1.5, 10.0))
            .collect();
        store
            .upsert_bars(symbols[0].id, StoredGranularity::Day1, &bars, "x")
            .unwrap();
        let vendor = FakeVendor::new("a").arc();
        let scheduler = Arc::into_inner(scheduler(&vendor, &store))
            .unwrap()
            .with_retention(BTreeMap::from([(StoredGranularity::Day1, 3)]));

        let runs = scheduler.evict().await;

        assert_eq!(runs.len(), StoredGranularity::all().len());
        assert!(runs.iter().all(|r| r.kind == JobKind::Eviction));
        assert_eq!(
            store.bar_count(symbols[0].id, StoredGranularity::Day1).unwrap(),
            3
        );
        let remaining = store
            .read_bars(symbols[0].id, StoredGranularity::Day1, None)
            .unwrap();
        assert_eq!(remaining[0].timestamp, start + TimeDelta::days(2));
    }

    #[tokio::test]
    async fn test_shutdown_stops_all_loops() {
        let store = CacheStore::in_memory().unwrap();
        let vendor = FakeVendor::new("a").arc();
        let scheduler = scheduler(&vendor, &store);

        let handle = tokio::spawn(Arc::clone(&scheduler).run());
        tokio::task::yield_now().await;
        scheduler.shutdown();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(scheduler.cancel_token().is_cancelled());
    }
}
