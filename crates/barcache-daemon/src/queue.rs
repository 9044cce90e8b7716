//! Deduplicating on-demand collection queue with a single-flight drain.

use barcache_store::SymbolRecord;
use barcache_types::{IngestionRun, JobKind, StoredGranularity, SymbolCode, TimeWindow};
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ingest::blocking;
use crate::{IngestError, Ingestor};

/// A pending on-demand request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionRequest {
    /// Symbol to collect.
    pub symbol: SymbolCode,
    /// One granularity, or `None` for every configured granularity.
    pub granularity: Option<StoredGranularity>,
}

impl CollectionRequest {
    /// Requests every granularity of a symbol.
    #[must_use]
    pub const fn symbol(symbol: SymbolCode) -> Self {
        Self {
            symbol,
            granularity: None,
        }
    }

    /// Requests one series.
    #[must_use]
    pub const fn series(symbol: SymbolCode, granularity: StoredGranularity) -> Self {
        Self {
            symbol,
            granularity: Some(granularity),
        }
    }
}

/// Outcome of one drain.
#[derive(Debug, Default)]
pub struct DrainReport {
    /// The snapshot taken at the start of the drain, sorted.
    pub requests: Vec<CollectionRequest>,
    /// One run per granularity ingested.
    pub runs: Vec<IngestionRun>,
    /// Series put back on the queue because the drain stopped early.
    pub requeued: usize,
    /// A rate limit ended the drain early.
    pub rate_limited: bool,
}

/// Drain lock plus the flag readers poll through [`CollectionQueue::is_draining`].
#[derive(Debug)]
pub(crate) struct DrainGuard<'a> {
    _lock: tokio::sync::MutexGuard<'a, ()>,
    draining: &'a AtomicBool,
}

impl<'a> DrainGuard<'a> {
    fn new(lock: tokio::sync::MutexGuard<'a, ()>, draining: &'a AtomicBool) -> Self {
        draining.store(true, Ordering::Release);
        Self {
            _lock: lock,
            draining,
        }
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.draining.store(false, Ordering::Release);
    }
}

/// Set of pending collection requests.
///
/// Enqueueing never blocks on a drain. A drain works on a snapshot, so
/// requests added while it runs wait for the next drain.
#[derive(Debug)]
pub struct CollectionQueue {
    pending: Mutex<HashSet<CollectionRequest>>,
    drain_lock: tokio::sync::Mutex<()>,
    draining: AtomicBool,
    notify: Notify,
    granularities: Vec<StoredGranularity>,
}

impl CollectionQueue {
    /// Creates an empty queue; whole-symbol requests expand to `granularities`.
    #[must_use]
    pub fn new(granularities: Vec<StoredGranularity>) -> Self {
        Self {
            pending: Mutex::new(HashSet::new()),
            drain_lock: tokio::sync::Mutex::new(()),
            draining: AtomicBool::new(false),
            notify: Notify::new(),
            granularities,
        }
    }

    /// Adds a request, returning false if it was already pending.
    pub fn enqueue(&self, request: CollectionRequest) -> bool {
        let added = self.lock_pending().insert(request.clone());
        if added {
            debug!(
                symbol = %request.symbol,
                granularity = request.granularity.map_or("all", |g| g.as_str()),
                "collection request queued"
            );
            self.notify.notify_one();
        }
        added
    }

    /// Returns the number of pending requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_pending().len()
    }

    /// Returns true if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock_pending().is_empty()
    }

    /// Returns the pending requests, sorted.
    #[must_use]
    pub fn pending(&self) -> Vec<CollectionRequest> {
        let mut pending: Vec<_> = self.lock_pending().iter().cloned().collect();
        pending.sort();
        pending
    }

    /// Returns true while a drain is in flight.
    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Holds the drain lock as if a drain were in flight.
    #[cfg(test)]
    pub(crate) async fn hold_drain(&self) -> DrainGuard<'_> {
        DrainGuard::new(self.drain_lock.lock().await, &self.draining)
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashSet<CollectionRequest>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_snapshot(&self) -> Vec<CollectionRequest> {
        let mut snapshot: Vec<_> = self.lock_pending().drain().collect();
        snapshot.sort();
        snapshot
    }

    /// Puts series back without waking the processor; they wait for the next poll.
    fn requeue(&self, granularity: StoredGranularity, symbols: &BTreeSet<SymbolCode>) -> usize {
        let mut pending = self.lock_pending();
        symbols
            .iter()
            .filter(|s| pending.insert(CollectionRequest::series((*s).clone(), granularity)))
            .count()
    }

    /// Drains a snapshot of the queue.
    ///
    /// Whole-symbol requests expand to one series per configured granularity,
    /// series are grouped by granularity and each group is ingested over its
    /// history window. Returns `None` if another drain is in flight.
    pub async fn drain(&self, ingestor: &Ingestor, cancel: &CancellationToken) -> Option<DrainReport> {
        let Ok(lock) = self.drain_lock.try_lock() else {
            debug!("queue drain already in flight");
            return None;
        };
        let _guard = DrainGuard::new(lock, &self.draining);

        let requests = self.take_snapshot();
        let mut report = DrainReport::default();
        if requests.is_empty() {
            return Some(report);
        }

        let groups = self.group(&requests);
        info!(
            requests = requests.len(),
            granularities = groups.len(),
            "draining collection queue"
        );
        report.requests = requests;

        let codes: BTreeSet<SymbolCode> = groups.values().flatten().cloned().collect();
        let resolved = blocking::<_, IngestError, _>(ingestor.store(), move |store| {
            codes
                .into_iter()
                .map(|code| store.ensure_symbol(&code).map(|record| (code, record)))
                .collect::<barcache_store::Result<BTreeMap<SymbolCode, SymbolRecord>>>()
        })
        .await;
        let records = match resolved {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "failed to resolve queued symbols, requeueing");
                report.requeued = groups.iter().map(|(g, s)| self.requeue(*g, s)).sum();
                return Some(report);
            }
        };

        let mut groups = groups.into_iter();
        while let Some((granularity, codes)) = groups.next() {
            if cancel.is_cancelled() {
                report.requeued += self.requeue(granularity, &codes);
                report.requeued += groups
                    .by_ref()
                    .map(|(g, s)| self.requeue(g, &s))
                    .sum::<usize>();
                break;
            }

            let symbols: Vec<SymbolRecord> =
                codes.iter().filter_map(|c| records.get(c).cloned()).collect();
            let window = TimeWindow::ending_at(Utc::now(), granularity.history_window());
            let outcome = ingestor
                .run_job(JobKind::OnDemand, granularity, &symbols, window, cancel)
                .await;
            report.runs.push(outcome.run);

            if outcome.rate_limited {
                report.rate_limited = true;
                report.requeued += self.requeue(granularity, &codes);
                report.requeued += groups
                    .by_ref()
                    .map(|(g, s)| self.requeue(g, &s))
                    .sum::<usize>();
                warn!(requeued = report.requeued, "queue drain rate limited, requeued remainder");
                break;
            }
        }

        Some(report)
    }

    fn group(
        &self,
        requests: &[CollectionRequest],
    ) -> BTreeMap<StoredGranularity, BTreeSet<SymbolCode>> {
        let mut groups: BTreeMap<StoredGranularity, BTreeSet<SymbolCode>> = BTreeMap::new();
        for request in requests {
            match request.granularity {
                Some(g) => {
                    groups.entry(g).or_default().insert(request.symbol.clone());
                }
                None => {
                    for g in &self.granularities {
                        groups.entry(*g).or_default().insert(request.symbol.clone());
                    }
                }
            }
        }
        groups
    }

    /// Drains whenever requests arrive, polling every `poll`, until cancelled.
    ///
    /// After a rate-limited drain the processor ignores new arrivals and waits
    /// a full `poll` before draining again.
    pub async fn run(&self, ingestor: &Ingestor, cancel: &CancellationToken, poll: Duration) {
        let mut backoff = false;
        loop {
            if backoff {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(poll) => {}
                }
            } else {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = self.notify.notified() => {}
                    () = tokio::time::sleep(poll) => {}
                }
            }
            backoff = false;
            if !self.is_empty()
                && let Some(report) = self.drain(ingestor, cancel).await
                && report.rate_limited
            {
                debug!(?poll, "collection queue backing off after rate limit");
                backoff = true;
            }
        }
        debug!("collection queue processor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IngestOptions;
    use crate::test_support::{FakeVendor, Gate, client, code};
    use barcache_store::CacheStore;
    use std::sync::Arc;

    fn ingestor(vendor: &Arc<FakeVendor>, store: &CacheStore) -> Arc<Ingestor> {
        let mut options = IngestOptions::default();
        options.batch.inter_batch_delay = Duration::ZERO;
        options.validate_missing = false;
        Arc::new(Ingestor::new(client(&[vendor]), store.clone(), options))
    }

    #[test]
    fn test_enqueue_deduplicates() {
        let queue = CollectionQueue::new(vec![StoredGranularity::Day1]);
        assert!(queue.enqueue(CollectionRequest::symbol(code("AAPL"))));
        assert!(!queue.enqueue(CollectionRequest::symbol(code("AAPL"))));
        assert!(queue.enqueue(CollectionRequest::series(code("AAPL"), StoredGranularity::Day1)));
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_item_enqueued_mid_drain_waits_for_next_drain() {
        let store = CacheStore::in_memory().unwrap();
        let gate = Gate::new();
        let vendor = FakeVendor::new("a").gated(&gate).arc();
        let ingestor = ingestor(&vendor, &store);
        let queue = Arc::new(CollectionQueue::new(vec![StoredGranularity::Day1]));
        queue.enqueue(CollectionRequest::symbol(code("AAPL")));

        let in_flight = tokio::spawn({
            let queue = Arc::clone(&queue);
            let ingestor = Arc::clone(&ingestor);
            async move { queue.drain(&ingestor, &CancellationToken::new()).await }
        });
        gate.entered().await;

        assert!(queue.is_draining());
        assert!(queue.is_empty());
        assert!(queue.enqueue(CollectionRequest::symbol(code("MSFT"))));
        assert!(
            queue
                .drain(&ingestor, &CancellationToken::new())
                .await
                .is_none()
        );

        gate.open();
        let report = in_flight.await.unwrap().unwrap();

        assert_eq!(report.requests, vec![CollectionRequest::symbol(code("AAPL"))]);
        assert_eq!(report.runs.len(), 1);
        assert_eq!(queue.pending(), vec![CollectionRequest::symbol(code("MSFT"))]);
        assert_eq!(vendor.requests()[0].symbols, vec![code("AAPL")]);
        assert!(!queue.is_draining());
    }

    #[tokio::test]
    async fn test_drain_expands_and_groups_by_granularity() {
        let store = CacheStore::in_memory().unwrap();
        let vendor = FakeVendor::new("a").arc();
        let ingestor = ingestor(&vendor, &store);
        let queue = CollectionQueue::new(vec![StoredGranularity::Day1, StoredGranularity::Week1]);
        queue.enqueue(CollectionRequest::symbol(code("AAPL")));
        queue.enqueue(CollectionRequest::series(code("MSFT"), StoredGranularity::Day1));

        let report = queue
            .drain(&ingestor, &CancellationToken::new())
            .await
            .unwrap();

        let requests = vendor.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].granularity, StoredGranularity::Day1);
        assert_eq!(requests[0].symbols, vec![code("AAPL"), code("MSFT")]);
        assert_eq!(requests[1].granularity, StoredGranularity::Week1);
        assert_eq!(requests[1].symbols, vec![code("AAPL")]);
        assert_eq!(report.runs.len(), 2);
        assert!(report.runs.iter().all(|r| r.kind == JobKind::OnDemand));
        assert!(store.symbol(&code("MSFT")).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_rate_limited_drain_requeues_remainder() {
        let store = CacheStore::in_memory().unwrap();
        let vendor = FakeVendor::new("a").rate_limited().arc();
        let ingestor = ingestor(&vendor, &store);
        let queue = CollectionQueue::new(vec![StoredGranularity::Day1, StoredGranularity::Week1]);
        queue.enqueue(CollectionRequest::symbol(code("AAPL")));

        let report = queue
            .drain(&ingestor, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.runs.len(), 1);
        assert!(report.rate_limited);
        assert_eq!(report.requeued, 2);
        assert_eq!(
            queue.pending(),
            vec![
                CollectionRequest::series(code("AAPL"), StoredGranularity::Day1),
                CollectionRequest::series(code("AAPL"), StoredGranularity::Week1),
            ]
        );
    }

    #[tokio::test]
    async fn test_processor_waits_a_poll_after_rate_limit() {
        let store = CacheStore::in_memory().unwrap();
        let vendor = FakeVendor::new("a").rate_limited().arc();
        let ingestor = ingestor(&vendor, &store);
        let queue = Arc::new(CollectionQueue::new(vec![StoredGranularity::Day1]));
        queue.enqueue(CollectionRequest::symbol(code("AAPL")));
        let cancel = CancellationToken::new();

        let processor = tokio::spawn({
            let queue = Arc::clone(&queue);
            let ingestor = Arc::clone(&ingestor);
            let cancel = cancel.clone();
            async move {
                queue
                    .run(&ingestor, &cancel, Duration::from_secs(3600))
                    .await;
            }
        });
        tokio::time::sleep(Duration::from_millis(300)).await;
        queue.enqueue(CollectionRequest::symbol(code("MSFT")));
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
        processor.await.unwrap();

        assert_eq!(vendor.requests().len(), 1);
        assert_eq!(store.list_runs(100).unwrap().len(), 1);
        assert_eq!(
            queue.pending(),
            vec![
                CollectionRequest::series(code("AAPL"), StoredGranularity::Day1),
                CollectionRequest::symbol(code("MSFT")),
            ]
        );
        assert!(!queue.is_draining());
    }

    #[tokio::test]
    async fn test_is_draining_tracks_guard() {
        let queue = CollectionQueue::new(vec![StoredGranularity::Day1]);
        assert!(!queue.is_draining());
        {
            let _held = queue.hold_drain().await;
            assert!(queue.is_draining());
            assert!(queue.drain_lock.try_lock().is_err());
        }
        assert!(!queue.is_draining());
    }

    #[tokio::test]
    async fn test_requeued_inactive_symbol_is_reactivated() {
        let store = CacheStore::in_memory().unwrap();
        let record = store.ensure_symbol(&code("AAPL")).unwrap();
        store.deactivate_symbol(record.id).unwrap();
        let vendor = FakeVendor::new("a").arc();
        let ingestor = ingestor(&vendor, &store);
        let queue = CollectionQueue::new(vec![StoredGranularity::Day1]);
        queue.enqueue(CollectionRequest::symbol(code("AAPL")));

        queue.drain(&ingestor, &CancellationToken::new()).await;

        assert!(store.symbol(&code("AAPL")).unwrap().unwrap().active);
    }
}
