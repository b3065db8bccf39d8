//! Benchmarks for the Roost write buffer.
//!
//! Run with: cargo bench --package roost
//!
//! ## Benchmark Categories
//!
//! - **Codec**: streaming encode/decode performance
//! - **Write path**: in-order, no-op, and out-of-order writes
//! - **Flush path**: merge and discard_merged

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use roost::{BufferBucket, Datapoint, Options, SeriesEncoder, TimeUnit};

/// Generate typical time series data (regular intervals, slowly varying
/// values).
fn generate_typical_timeseries(count: usize) -> Vec<(i64, f64)> {
    let mut points = Vec::with_capacity(count);
    let start_ts = 1_000_000_000_i64;
    let interval = 1_000_000_000_i64; // 1 second in nanos

    let mut value = 50.0;
    for i in 0..count {
        value += (i as f64 * 0.1).sin() * 0.1;
        points.push((start_ts + (i as i64) * interval, value));
    }

    points
}

fn bench_encoder(c: &mut Criterion) {
    let points = generate_typical_timeseries(10_000);

    let mut group = c.benchmark_group("codec");
    group.throughput(Throughput::Elements(points.len() as u64));

    group.bench_function("encode_10k", |b| {
        b.iter(|| {
            let mut encoder = SeriesEncoder::new();
            encoder.reset(0, 16 * 1024);
            for &(ts, value) in black_box(&points) {
                encoder
                    .encode(Datapoint::new(ts, value), TimeUnit::None, None)
                    .unwrap();
            }
            encoder
        })
    });

    let mut encoder = SeriesEncoder::new();
    encoder.reset(0, 16 * 1024);
    for &(ts, value) in &points {
        encoder
            .encode(Datapoint::new(ts, value), TimeUnit::None, None)
            .unwrap();
    }
    group.bench_function("decode_10k", |b| {
        b.iter(|| {
            let mut reader = encoder.stream().unwrap();
            let mut count = 0;
            while let Some((dp, _, _)) = reader.read_next().unwrap() {
                black_box(dp);
                count += 1;
            }
            count
        })
    });

    group.finish();
}

fn bench_write_path(c: &mut Criterion) {
    let points = generate_typical_timeseries(10_000);
    let opts = Options::new().with_block_alloc_size(16 * 1024);

    let mut group = c.benchmark_group("write");
    group.throughput(Throughput::Elements(points.len() as u64));

    group.bench_function("in_order_10k", |b| {
        b.iter(|| {
            let mut bucket = BufferBucket::new();
            bucket.reset_to(0, opts.clone());
            for &(ts, value) in black_box(&points) {
                bucket.write(ts, ts, value, TimeUnit::None, None).unwrap();
            }
            bucket
        })
    });

    group.bench_function("noop_rewrites_10k", |b| {
        b.iter(|| {
            let mut bucket = BufferBucket::new();
            bucket.reset_to(0, opts.clone());
            bucket.write(0, 0, 1.0, TimeUnit::None, None).unwrap();
            for _ in 0..10_000 {
                bucket.write(0, 0, 1.0, TimeUnit::None, None).unwrap();
            }
            bucket
        })
    });

    group.finish();
}

fn bench_flush_path(c: &mut Criterion) {
    let points = generate_typical_timeseries(10_000);
    let opts = Options::new().with_block_alloc_size(16 * 1024);

    let mut group = c.benchmark_group("flush");
    group.throughput(Throughput::Elements(points.len() as u64));

    group.bench_function("merge_two_encoders_10k", |b| {
        b.iter(|| {
            let mut bucket = BufferBucket::new();
            bucket.reset_to(0, opts.clone());
            // Every other point lands late, stacking a second encoder.
            for chunk in points.chunks(2) {
                if let [a, b_point] = chunk {
                    bucket
                        .write(b_point.0, b_point.0, b_point.1, TimeUnit::None, None)
                        .unwrap();
                    bucket.write(a.0, a.0, a.1, TimeUnit::None, None).unwrap();
                }
            }
            bucket.merge().unwrap();
            bucket
        })
    });

    group.bench_function("discard_merged_10k", |b| {
        b.iter(|| {
            let mut bucket = BufferBucket::new();
            bucket.reset_to(0, opts.clone());
            for &(ts, value) in &points {
                bucket.write(ts, ts, value, TimeUnit::None, None).unwrap();
            }
            bucket.discard_merged().unwrap()
        })
    });

    group.finish();
}

criterion_group!(benches, bench_encoder, bench_write_path, bench_flush_path);
criterion_main!(benches);
