//! Hot-path benchmarks: aggregation, freshness checks, store I/O and export.
//!
//! Run with: `cargo bench --package barcache-bench`

use barcache_bench::{minute_week, random_walk, series_start};
use barcache_lib::aggregate::aggregate;
use barcache_lib::daemon::StalenessPolicy;
use barcache_lib::format::OutputFormat;
use barcache_lib::store::CacheStore;
use barcache_lib::{StoredGranularity, SymbolCode};
use chrono::TimeDelta;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;

fn aggregate_benchmark(c: &mut Criterion) {
    let bars = minute_week(1);
    let mut group = c.benchmark_group("aggregate");
    group.throughput(Throughput::Elements(bars.len() as u64));

    for multiplier in [2_u32, 5, 15, 60] {
        group.bench_with_input(
            BenchmarkId::from_parameter(multiplier),
            &multiplier,
            |b, &m| b.iter(|| aggregate(black_box(&bars), m)),
        );
    }
    group.finish();
}

fn staleness_benchmark(c: &mut Criterion) {
    let policy = StalenessPolicy::default();
    let latest = series_start();
    let now = latest + TimeDelta::minutes(7);

    c.bench_function("staleness/evaluate_all", |b| {
        b.iter(|| {
            for &granularity in StoredGranularity::all() {
                black_box(policy.evaluate(granularity, Some(latest), None, now, true));
            }
        });
    });
}

fn store_benchmark(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = CacheStore::open(&dir.path().join("bench.db"), Default::default())
        .expect("open store");
    let symbol = store
        .ensure_symbol(&SymbolCode::parse("AAPL").expect("symbol"))
        .expect("ensure symbol");
    let bars = random_walk(1_000, TimeDelta::minutes(5), 3);

    let mut group = c.benchmark_group("store");
    group.throughput(Throughput::Elements(bars.len() as u64));
    group.bench_function("upsert_1000", |b| {
        b.iter(|| {
            store
                .upsert_bars(symbol.id, StoredGranularity::Minute5, black_box(&bars), "bench")
                .expect("upsert")
        });
    });
    group.bench_function("read_1000", |b| {
        b.iter(|| {
            store
                .read_bars(symbol.id, StoredGranularity::Minute5, None)
                .expect("read")
        });
    });
    group.finish();
}

fn format_benchmark(c: &mut Criterion) {
    let bars = minute_week(9);
    let mut group = c.benchmark_group("format");
    group.throughput(Throughput::Elements(bars.len() as u64));

    for &format in OutputFormat::all() {
        group.bench_with_input(BenchmarkId::from_parameter(format), &format, |b, f| {
            b.iter(|| {
                let mut out = Vec::with_capacity(256 * 1024);
                f.write_bars(black_box(&bars), &mut out).expect("write");
                out
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    aggregate_benchmark,
    staleness_benchmark,
    store_benchmark,
    format_benchmark
);
criterion_main!(benches);
