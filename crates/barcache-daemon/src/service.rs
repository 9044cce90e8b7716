//! Read and write accessors used by the HTTP layer.

use barcache_aggregate::aggregate;
use barcache_store::CacheStore;
use barcache_types::{Bar, Granularity, StoredGranularity, SymbolCode, TimeWindow};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

use crate::ingest::blocking;
use crate::{
    CacheConfig, CollectionQueue, CollectionRequest, ConfigError, Freshness, GapReconciler,
    Ingestor, Scheduler, ServiceError, StalenessPolicy, TradingSession,
};

/// Result of a read.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    /// Fresh bars, oldest first.
    Ready(Vec<Bar>),
    /// Nothing fresh is cached; the caller should try again shortly.
    StaleOrMissing {
        /// Why the series could not be served.
        freshness: Freshness,
        /// False if an identical request was already queued.
        enqueued: bool,
    },
}

impl ReadOutcome {
    /// Returns the bars if the read was served.
    #[must_use]
    pub fn bars(&self) -> Option<&[Bar]> {
        match self {
            Self::Ready(bars) => Some(bars),
            Self::StaleOrMissing { .. } => None,
        }
    }
}

/// Serves cached bars and turns misses into collection requests.
#[derive(Debug, Clone)]
pub struct CacheService {
    store: CacheStore,
    queue: Arc<CollectionQueue>,
    policy: StalenessPolicy,
    session: TradingSession,
}

impl CacheService {
    /// Creates a service over an existing store and queue.
    #[must_use]
    pub const fn new(
        store: CacheStore,
        queue: Arc<CollectionQueue>,
        policy: StalenessPolicy,
        session: TradingSession,
    ) -> Self {
        Self {
            store,
            queue,
            policy,
            session,
        }
    }

    /// Wires the store, vendors, queue, gap reconciler and scheduler from
    /// configuration. The scheduler is returned idle; spawn
    /// [`Scheduler::run`] to start it.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened or the configuration
    /// is invalid.
    pub fn from_config(config: &CacheConfig) -> Result<(Self, Arc<Scheduler>), ConfigError> {
        let store = config.open_store()?;
        let client = config.build_client()?;
        let granularities = config.schedule.granularities.clone();

        let ingestor = Arc::new(Ingestor::new(client, store.clone(), config.ingest_options()));
        let queue = Arc::new(CollectionQueue::new(granularities.clone()));
        let gaps = Arc::new(GapReconciler::new(
            Arc::clone(&ingestor),
            Arc::clone(&queue),
            &granularities,
            config.gaps.min_coverage,
        ));
        let scheduler = Scheduler::new(ingestor, Arc::clone(&queue), gaps, config.schedule()?)
            .with_granularities(granularities)
            .with_retention(config.retention())
            .with_intervals(config.intervals());

        let service = Self::new(store, queue, config.staleness_policy(), config.session()?);
        Ok((service, Arc::new(scheduler)))
    }

    /// Returns the store.
    #[must_use]
    pub const fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Returns the collection queue.
    #[must_use]
    pub const fn queue(&self) -> &Arc<CollectionQueue> {
        &self.queue
    }

    /// Returns the trading session.
    #[must_use]
    pub const fn session(&self) -> &TradingSession {
        &self.session
    }

    /// Queues a symbol, or one of its series, for collection.
    ///
    /// Returns false if the same request is already pending.
    pub fn enqueue(&self, symbol: SymbolCode, granularity: Option<StoredGranularity>) -> bool {
        self.queue.enqueue(CollectionRequest {
            symbol,
            granularity,
        })
    }

    /// Returns cached bars if they are fresh.
    ///
    /// Unknown or inactive symbols are queued whole; a stale series is
    /// queued alone. Derived granularities are built from their stored
    /// source. Without `include_extended`, intraday bars opening outside
    /// regular hours are dropped before aggregation.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn get_bars(
        &self,
        symbol: &SymbolCode,
        granularity: Granularity,
        include_extended: bool,
    ) -> Result<ReadOutcome, ServiceError> {
        self.get_bars_at(symbol, granularity, include_extended, None, Utc::now())
            .await
    }

    /// Like [`get_bars`](Self::get_bars), restricted to `window` and evaluated
    /// as of `now`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn get_bars_at(
        &self,
        symbol: &SymbolCode,
        granularity: Granularity,
        include_extended: bool,
        window: Option<TimeWindow>,
        now: DateTime<Utc>,
    ) -> Result<ReadOutcome, ServiceError> {
        let source = granularity.source();
        let code = symbol.clone();
        let record = blocking::<_, ServiceError, _>(&self.store, move |store| store.symbol(&code))
            .await?
            .filter(|r| r.active);

        let Some(record) = record else {
            let enqueued = self.enqueue(symbol.clone(), None);
            info!(symbol = %symbol, enqueued, "unknown symbol, queued for collection");
            return Ok(ReadOutcome::StaleOrMissing {
                freshness: Freshness::Missing,
                enqueued,
            });
        };

        let id = record.id;
        let (latest, refreshed) = blocking::<_, ServiceError, _>(&self.store, move |store| {
            Ok((
                store.latest_timestamp(id, source)?,
                store.last_refreshed(id, source)?,
            ))
        })
        .await?;

        let freshness =
            self.policy
                .evaluate(source, latest, refreshed, now, self.session.is_open(now));
        if !freshness.is_fresh() {
            let enqueued = self.enqueue(symbol.clone(), Some(source));
            debug!(
                symbol = %symbol,
                granularity = %source,
                freshness = ?freshness,
                enqueued,
                "series not fresh, queued for refresh"
            );
            return Ok(ReadOutcome::StaleOrMissing {
                freshness,
                enqueued,
            });
        }

        let mut bars = blocking::<_, ServiceError, _>(&self.store, move |store| {
            store.read_bars(id, source, window.as_ref())
        })
        .await?;
        if source.is_intraday() && !include_extended {
            bars.retain(|bar| self.session.in_regular_hours(bar.timestamp));
        }

        if granularity.is_derived() {
            let output = aggregate(&bars, granularity.multiplier());
            if !output.fallbacks.is_empty() {
                debug!(
                    symbol = %symbol,
                    granularity = granularity.as_str(),
                    fallbacks = output.fallbacks.len(),
                    "aggregation used coercion fallbacks"
                );
            }
            bars = output.bars;
        }
        Ok(ReadOutcome::Ready(bars))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::code;
    use chrono::{TimeDelta, TimeZone};

    fn service(store: &CacheStore) -> CacheService {
        CacheService::new(
            store.clone(),
            Arc::new(CollectionQueue::new(vec![StoredGranularity::Minute5])),
            StalenessPolicy::default(),
            TradingSession::default(),
        )
    }

    /// Tuesday 2024-01-02 15:00 UTC, 10:00 in New York.
    fn during_session() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 15, 0, 0).unwrap()
    }

    fn five_minute_bars(from: DateTime<Utc>, count: i64) -> Vec<Bar> {
        (0..count)
            .map(|i| {
                let open = 10.0 + i as f64;
                Bar::new(from + TimeDelta::minutes(5 * i), open, open + 1.0, open - 1.0, open + 0.5, 100.0)
            })
            .collect()
    }

    #[tokio::test]
    async fn test_unknown_symbol_is_queued_whole() {
        let store = CacheStore::in_memory().unwrap();
        let service = service(&store);

        let outcome = service
            .get_bars_at(
                &code("AAPL"),
                Granularity::stored(StoredGranularity::Minute5),
                false,
                None,
                during_session(),
            )
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ReadOutcome::StaleOrMissing {
                freshness: Freshness::Missing,
                enqueued: true
            }
        );
        assert_eq!(
            service.queue().pending(),
            vec![CollectionRequest::symbol(code("AAPL"))]
        );
    }

    #[tokio::test]
    async fn test_stale_series_is_queued_alone() {
        let store = CacheStore::in_memory().unwrap();
        let record = store.ensure_symbol(&code("AAPL")).unwrap();
        let old = during_session() - TimeDelta::hours(2);
        store
            .upsert_bars(record.id, StoredGranularity::Minute5, &five_minute_bars(old, 1), "x")
            .unwrap();
        let service = service(&store);
        // Past the recent-refresh grace period of the write above.
        let now = Utc::now() + TimeDelta::minutes(10);
        let now = now.max(during_session());

        let outcome = service
            .get_bars_at(
                &code("AAPL"),
                Granularity::stored(StoredGranularity::Minute5),
                false,
                None,
                now,
            )
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            ReadOutcome::StaleOrMissing {
                freshness: Freshness::Stale { .. },
                enqueued: true
            }
        ));
        assert_eq!(
            service.queue().pending(),
            vec![CollectionRequest::series(code("AAPL"), StoredGranularity::Minute5)]
        );
    }

    #[tokio::test]
    async fn test_fresh_series_is_served_and_aggregated() {
        let store = CacheStore::in_memory().unwrap();
        let record = store.ensure_symbol(&code("AAPL")).unwrap();
        let now = during_session();
        let bars = five_minute_bars(now - TimeDelta::minutes(30), 6);
        store
            .upsert_bars(record.id, StoredGranularity::Minute5, &bars, "x")
            .unwrap();
        let service = service(&store);

        let stored = service
            .get_bars_at(
                &code("AAPL"),
                Granularity::stored(StoredGranularity::Minute5),
                true,
                None,
                now,
            )
            .await
            .unwrap();
        assert_eq!(stored.bars().unwrap().len(), 6);

        let ten: Granularity = "10m".parse().unwrap();
        let derived = service
            .get_bars_at(&code("AAPL"), ten, true, None, now)
            .await
            .unwrap();
        let derived = derived.bars().unwrap();
        assert_eq!(derived.len(), 3);
        assert_eq!(derived[0].open, bars[0].open);
        assert_eq!(derived[0].close, bars[1].close);
        assert!((derived[0].volume - 200.0).abs() < f64::EPSILON);
        assert!(service.queue().is_empty());
    }

    #[tokio::test]
    async fn test_extended_hours_filtered_unless_requested() {
        let store = CacheStore::in_memory().unwrap();
        let record = store.ensure_symbol(&code("AAPL")).unwrap();
        // 09:20 to 09:40 New York: two pre-market bars, three regular.
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 14, 20, 0).unwrap();
        store
            .upsert_bars(record.id, StoredGranularity::Minute5, &five_minute_bars(start, 5), "x")
            .unwrap();
        let service = service(&store);
        let now = start + TimeDelta::minutes(26);

        let regular = service
            .get_bars_at(&code("AAPL"), Granularity::stored(StoredGranularity::Minute5), false, None, now)
            .await
            .unwrap();
        let extended = service
            .get_bars_at(&code("AAPL"), Granularity::stored(StoredGranularity::Minute5), true, None, now)
            .await
            .unwrap();

        assert_eq!(regular.bars().unwrap().len(), 3);
        assert_eq!(extended.bars().unwrap().len(), 5);
    }

    #[test]
    fn test_enqueue_deduplicates() {
        let store = CacheStore::in_memory().unwrap();
        let service = service(&store);
        assert!(service.enqueue(code("MSFT"), Some(StoredGranularity::Day1)));
        assert!(!service.enqueue(code("MSFT"), Some(StoredGranularity::Day1)));
        assert!(service.enqueue(code("MSFT"), None));
    }
}
