//! Shared, persisted progress of one ingestion run.

use barcache_store::{CacheStore, UpsertStats};
use barcache_types::{IngestionRun, JobKind, StoredGranularity};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

use crate::IngestError;
use crate::ingest::blocking;

/// Thread-safe progress tracker for an ingestion run.
///
/// Every state change is written through to the audit log so a crashed
/// process leaves the run visible as `running`.
#[derive(Debug, Clone)]
pub struct RunTracker {
    store: CacheStore,
    run: Arc<RwLock<IngestionRun>>,
}

impl RunTracker {
    /// Starts tracking a new run and records it as running.
    pub async fn start(
        store: CacheStore,
        kind: JobKind,
        granularity: Option<StoredGranularity>,
    ) -> Self {
        let tracker = Self {
            store,
            run: Arc::new(RwLock::new(IngestionRun::new(kind, granularity))),
        };
        tracker.checkpoint().await;
        tracker
    }

    /// Records a firing that never ran and returns the run.
    pub async fn skipped(
        store: CacheStore,
        kind: JobKind,
        granularity: Option<StoredGranularity>,
        reason: &str,
    ) -> IngestionRun {
        let run = IngestionRun::skipped(kind, granularity, reason);
        let tracker = Self {
            store,
            run: Arc::new(RwLock::new(run.clone())),
        };
        tracker.checkpoint().await;
        run
    }

    /// Returns a copy of the current run state.
    pub async fn snapshot(&self) -> IngestionRun {
        self.run.read().await.clone()
    }

    /// Adds the outcome of one batch.
    pub async fn record_batch(&self, attempted: u64, succeeded: u64, stats: UpsertStats) {
        {
            let mut run = self.run.write().await;
            run.record_symbols(attempted, succeeded);
            run.record_writes(stats.inserted, stats.updated);
        }
        self.checkpoint().await;
    }

    /// Marks the run completed, keeping `note` as a partial-failure summary.
    pub async fn complete(&self, note: Option<String>) -> IngestionRun {
        {
            let mut run = self.run.write().await;
            run.mark_completed();
            run.error = note;
        }
        self.checkpoint().await;
        self.snapshot().await
    }

    /// Marks the run failed.
    pub async fn fail(&self, error: impl Into<String>) -> IngestionRun {
        self.run.write().await.mark_failed(error);
        self.checkpoint().await;
        self.snapshot().await
    }

    /// Persists the current state. Audit writes never fail the run.
    async fn checkpoint(&self) {
        let run = self.snapshot().await;
        let recorded =
            blocking::<_, IngestError, _>(&self.store, move |store| store.record_run(&run)).await;
        if let Err(e) = recorded {
            warn!(error = %e, "failed to record ingestion run");
        }
    }
}
