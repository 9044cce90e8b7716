//! Fixtures for the barcache benchmarks.

use barcache_lib::Bar;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// First bar of every generated series: 2024-01-02 14:30 UTC (09:30 New York).
pub fn series_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 2, 14, 30, 0)
        .single()
        .unwrap_or_default()
}

/// Generates `count` contiguous bars `step` apart as a seeded random walk.
///
/// The same seed always yields the same series, so runs are comparable.
pub fn random_walk(count: usize, step: TimeDelta, seed: u64) -> Vec<Bar> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut close = 100.0_f64;
    let start = series_start();

    (0..count)
        .map(|i| {
            let open = close;
            close = (open * (1.0 + rng.gen_range(-0.002..0.002))).max(0.01);
            let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.001));
            let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.001));
            let volume = rng.gen_range(1_000.0..50_000.0);
            let offset = step * i32::try_from(i).unwrap_or(i32::MAX);
            Bar::new(start + offset, open, high, low, close, volume)
                .with_vwap((open + close) / 2.0)
                .with_trade_count(rng.gen_range(10..500))
        })
        .collect()
}

/// One trading week of regular-hours one-minute bars (5 x 390).
pub fn minute_week(seed: u64) -> Vec<Bar> {
    random_walk(5 * 390, TimeDelta::minutes(1), seed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_walk_is_valid_and_deterministic() {
        let bars = random_walk(500, TimeDelta::minutes(5), 7);
        assert_eq!(bars.len(), 500);
        assert!(bars.iter().all(|b| b.validate().is_ok()));
        assert_eq!(bars, random_walk(500, TimeDelta::minutes(5), 7));
        assert!(bars.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }
}
