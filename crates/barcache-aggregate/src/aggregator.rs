//! Streaming bar-to-bar aggregation.

use barcache_types::Bar;
use tracing::warn;

/// A non-finite source value that was replaced during aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoercionFallback {
    /// Index of the derived bar being built.
    pub chunk: usize,
    /// Index of the offending bar within the source slice.
    pub source_index: usize,
    /// Field that was replaced.
    pub field: &'static str,
}

/// Result of [`aggregate`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateOutput {
    /// Derived bars, oldest first.
    pub bars: Vec<Bar>,
    /// Every substituted value, in encounter order.
    pub fallbacks: Vec<CoercionFallback>,
}

/// Aggregates time-ordered source bars into chunks of `multiplier` bars.
///
/// A trailing partial chunk is emitted as its own bar. A multiplier of 0 or 1
/// returns the source bars unchanged.
#[must_use]
pub fn aggregate(source: &[Bar], multiplier: u32) -> AggregateOutput {
    if multiplier <= 1 {
        return AggregateOutput {
            bars: source.to_vec(),
            fallbacks: Vec::new(),
        };
    }

    let mut aggregator = BarAggregator::new(multiplier);
    let mut bars = Vec::with_capacity(source.len().div_ceil(multiplier as usize));
    for bar in source {
        if let Some(done) = aggregator.push(bar) {
            bars.push(done);
        }
    }
    let fallbacks = aggregator.fallbacks.clone();
    if let Some(done) = aggregator.finish() {
        bars.push(done);
    }

    AggregateOutput { bars, fallbacks }
}

/// Streaming aggregator.
///
/// Emits a derived bar every `multiplier` source bars.
#[derive(Debug)]
pub struct BarAggregator {
    multiplier: u32,
    current: Option<BarBuilder>,
    seen: usize,
    emitted: usize,
    fallbacks: Vec<CoercionFallback>,
}

impl BarAggregator {
    /// Creates a new aggregator; a multiplier of 0 is treated as 1.
    #[must_use]
    pub fn new(multiplier: u32) -> Self {
        Self {
            multiplier: multiplier.max(1),
            current: None,
            seen: 0,
            emitted: 0,
            fallbacks: Vec::new(),
        }
    }

    /// Returns the number of source bars per derived bar.
    #[must_use]
    pub const fn multiplier(&self) -> u32 {
        self.multiplier
    }

    /// Returns the substitutions made so far.
    #[must_use]
    pub fn fallbacks(&self) -> &[CoercionFallback] {
        &self.fallbacks
    }

    /// Processes a source bar, returning a derived bar when a chunk completes.
    pub fn push(&mut self, bar: &Bar) -> Option<Bar> {
        let index = self.seen;
        self.seen += 1;

        match self.current.as_mut() {
            Some(builder) => builder.update(bar, index, self.emitted, &mut self.fallbacks),
            None => {
                self.current = Some(BarBuilder::new(
                    bar,
                    index,
                    self.emitted,
                    &mut self.fallbacks,
                ));
            }
        }

        let complete = self
            .current
            .as_ref()
            .is_some_and(|builder| builder.count >= self.multiplier);
        if !complete {
            return None;
        }
        self.emitted += 1;
        self.current.take().map(BarBuilder::finish)
    }

    /// Finishes aggregation, returning the trailing partial bar if any.
    #[must_use]
    pub fn finish(self) -> Option<Bar> {
        self.current.map(BarBuilder::finish)
    }
}

/// Builder for one derived bar.
#[derive(Debug)]
struct BarBuilder {
    first: Bar,
    bar: Bar,
    count: u32,
    vwap_notional: Option<f64>,
}

impl BarBuilder {
    /// Starts a derived bar from its first source bar.
    fn new(first: &Bar, index: usize, chunk: usize, fallbacks: &mut Vec<CoercionFallback>) -> Self {
        let mut bar = *first;
        bar.close = coerce(first.close, first.open, index, chunk, "close", fallbacks);
        bar.volume = coerce(first.volume, 0.0, index, chunk, "volume", fallbacks);
        let vwap_notional = first.vwap.map(|vwap| vwap * bar.volume);
        Self {
            first: *first,
            bar,
            count: 1,
            vwap_notional,
        }
    }

    /// Folds the next source bar into the derived bar.
    fn update(
        &mut self,
        next: &Bar,
        index: usize,
        chunk: usize,
        fallbacks: &mut Vec<CoercionFallback>,
    ) {
        let high = coerce(next.high, self.first.high, index, chunk, "high", fallbacks);
        let low = coerce(next.low, self.first.low, index, chunk, "low", fallbacks);
        let close = coerce(next.close, self.first.open, index, chunk, "close", fallbacks);
        let volume = coerce(next.volume, 0.0, index, chunk, "volume", fallbacks);

        self.bar.high = self.bar.high.max(high);
        self.bar.low = self.bar.low.min(low);
        self.bar.close = close;
        self.bar.volume += volume;
        self.vwap_notional = self
            .vwap_notional
            .zip(next.vwap)
            .map(|(notional, vwap)| notional + vwap * volume);
        self.bar.trade_count = self.bar.trade_count.zip(next.trade_count).map(|(a, b)| a + b);
        self.count += 1;
    }

    /// Finishes building and returns the derived bar.
    fn finish(self) -> Bar {
        let mut bar = self.bar;
        bar.vwap = self
            .vwap_notional
            .filter(|_| bar.volume > 0.0)
            .map(|notional| notional / bar.volume);
        bar
    }
}

/// Returns `value` if finite, else records and returns `fallback`.
fn coerce(
    value: f64,
    fallback: f64,
    source_index: usize,
    chunk: usize,
    field: &'static str,
    fallbacks: &mut Vec<CoercionFallback>,
) -> f64 {
    if value.is_finite() {
        return value;
    }
    warn!(
        chunk,
        source_index,
        field,
        fallback,
        "non-finite source value replaced during aggregation"
    );
    fallbacks.push(CoercionFallback {
        chunk,
        source_index,
        field,
    });
    fallback
}
