//! Sequential batch execution with an inter-batch delay.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Batch execution settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    /// Maximum items per batch.
    pub batch_size: usize,
    /// Pause between consecutive batches.
    pub inter_batch_delay: Duration,
    /// Stop at the first failed batch.
    pub stop_on_error: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            batch_size: 50,
            inter_batch_delay: Duration::from_millis(1_000),
            stop_on_error: false,
        }
    }
}

impl BatchOptions {
    /// Returns a copy with the batch size capped at `max`.
    #[must_use]
    pub fn capped(mut self, max: usize) -> Self {
        self.batch_size = self.batch_size.min(max).max(1);
        self
    }
}

/// A batch that failed.
#[derive(Debug)]
pub struct BatchFailure<E> {
    /// Zero-based batch index.
    pub batch: usize,
    /// Number of items in the batch.
    pub size: usize,
    /// The failure.
    pub error: E,
}

/// Outcome of [`BatchSplitter::process`].
#[derive(Debug)]
pub struct BatchReport<E> {
    /// Number of batches the input was split into.
    pub total_batches: usize,
    /// Batches whose action succeeded.
    pub successful_batches: usize,
    /// Batches whose action failed.
    pub failed_batches: usize,
    /// One entry per failed batch, in order.
    pub errors: Vec<BatchFailure<E>>,
    /// True if processing stopped before every batch ran.
    pub stopped_early: bool,
}

impl<E> BatchReport<E> {
    fn new(total_batches: usize) -> Self {
        Self {
            total_batches,
            successful_batches: 0,
            failed_batches: 0,
            errors: Vec::new(),
            stopped_early: false,
        }
    }

    /// Returns the number of batches that never ran.
    #[must_use]
    pub const fn skipped_batches(&self) -> usize {
        self.total_batches - self.successful_batches - self.failed_batches
    }

    /// Returns true if every batch ran and succeeded.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.successful_batches == self.total_batches
    }
}

/// Splits items into ordered batches and runs them one at a time.
#[derive(Debug, Clone, Copy)]
pub struct BatchSplitter {
    options: BatchOptions,
}

impl BatchSplitter {
    /// Creates a splitter.
    #[must_use]
    pub const fn new(options: BatchOptions) -> Self {
        Self { options }
    }

    /// Returns the options.
    #[must_use]
    pub const fn options(&self) -> &BatchOptions {
        &self.options
    }

    /// Splits `items` into chunks of at most `batch_size`, in input order.
    #[must_use]
    pub fn split<T: Clone>(&self, items: &[T]) -> Vec<Vec<T>> {
        items
            .chunks(self.options.batch_size.max(1))
            .map(<[T]>::to_vec)
            .collect()
    }

    /// Runs `action` on each batch in order, awaiting each before the next.
    ///
    /// The delay is inserted between batches, never after the last one.
    /// Failures are recorded and processing continues unless
    /// `stop_on_error` is set. Cancelling `cancel` stops before the next
    /// batch; a batch already running is awaited.
    pub async fn process<T, E, F, Fut>(
        &self,
        items: &[T],
        cancel: &CancellationToken,
        mut action: F,
    ) -> BatchReport<E>
    where
        T: Clone,
        F: FnMut(usize, Vec<T>) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: std::fmt::Display,
    {
        let batches = self.split(items);
        let mut report = BatchReport::new(batches.len());
        let last = batches.len().saturating_sub(1);

        for (index, batch) in batches.into_iter().enumerate() {
            if cancel.is_cancelled() {
                info!(
                    remaining = report.skipped_batches(),
                    "batch processing cancelled"
                );
                report.stopped_early = true;
                break;
            }

            let size = batch.len();
            debug!(batch = index, size, "running batch");
            match action(index, batch).await {
                Ok(()) => report.successful_batches += 1,
                Err(error) => {
                    warn!(batch = index, size, error = %error, "batch failed");
                    report.failed_batches += 1;
                    report.errors.push(BatchFailure {
                        batch: index,
                        size,
                        error,
                    });
                    if self.options.stop_on_error {
                        report.stopped_early = index < last;
                        break;
                    }
                }
            }

            if index < last && !self.options.inter_batch_delay.is_zero() {
                tokio::select! {
                    () = cancel.cancelled() => {}
                    () = tokio::time::sleep(self.options.inter_batch_delay) => {}
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    fn options(stop_on_error: bool) -> BatchOptions {
        BatchOptions {
            batch_size: 50,
            inter_batch_delay: Duration::from_secs(2),
            stop_on_error,
        }
    }

    #[test]
    fn test_split_keeps_order_and_remainder() {
        let items: Vec<u32> = (0..130).collect();
        let batches = BatchSplitter::new(options(false)).split(&items);
        let sizes: Vec<_> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![50, 50, 30]);
        assert_eq!(batches[1][0], 50);
        assert_eq!(batches[2][29], 129);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_with_delay_and_continue_on_failure() {
        let items: Vec<u32> = (0..130).collect();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let started = Instant::now();

        let report = BatchSplitter::new(options(false))
            .process(&items, &CancellationToken::new(), |index, batch| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.lock()
                        .unwrap()
                        .push((index, batch.len(), Instant::now() - started));
                    if index == 1 { Err("boom") } else { Ok(()) }
                }
            })
            .await;

        let seen = seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                (0, 50, Duration::ZERO),
                (1, 50, Duration::from_secs(2)),
                (2, 30, Duration::from_secs(4)),
            ]
        );
        assert_eq!(report.total_batches, 3);
        assert_eq!(report.successful_batches, 2);
        assert_eq!(report.failed_batches, 1);
        assert_eq!(report.errors[0].batch, 1);
        assert!(!report.stopped_early);
        // No delay after the last batch.
        assert_eq!(Instant::now() - started, Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_on_error() {
        let items: Vec<u32> = (0..130).collect();
        let report = BatchSplitter::new(options(true))
            .process(&items, &CancellationToken::new(), |index, _| async move {
                if index == 1 { Err("boom") } else { Ok(()) }
            })
            .await;

        assert_eq!(report.successful_batches, 1);
        assert_eq!(report.failed_batches, 1);
        assert_eq!(report.skipped_batches(), 1);
        assert!(report.stopped_early);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_before_next_batch() {
        let items: Vec<u32> = (0..130).collect();
        let cancel = CancellationToken::new();
        let report = BatchSplitter::new(options(false))
            .process(&items, &cancel, |_, _| {
                cancel.cancel();
                async { Ok::<(), &str>(()) }
            })
            .await;

        assert_eq!(report.successful_batches, 1);
        assert!(report.stopped_early);
        assert!(!report.is_complete());
    }

    #[tokio::test]
    async fn test_empty_input() {
        let report = BatchSplitter::new(options(false))
            .process(&Vec::<u32>::new(), &CancellationToken::new(), |_, _| async {
                Ok::<(), &str>(())
            })
            .await;
        assert_eq!(report.total_batches, 0);
        assert!(report.is_complete());
    }
}
