//! End-to-end tests for the write-read-flush path of a buffer bucket.
//!
//! All scenarios use a 2-hour block window starting at
//! 2020-01-01T00:00:00Z and drive the bucket exclusively through its
//! public surface: write, bootstrap, streams, merge, and discard_merged.

use roost::{
    BufferBucket, DataBlock, Datapoint, MultiReaderIterator, Options, ReaderContext,
    RetentionOptions, TimeUnit,
};
use std::time::Duration;

const BLOCK_SIZE: Duration = Duration::from_secs(2 * 3600);

/// 2020-01-01T00:00:00Z in nanoseconds.
const WINDOW_START: i64 = 1_577_836_800_000_000_000;

fn at_minute(minute: i64) -> i64 {
    WINDOW_START + minute * 60 * 1_000_000_000
}

fn test_options() -> Options {
    Options::new().with_retention(RetentionOptions::default().with_block_size(BLOCK_SIZE))
}

fn new_bucket(opts: &Options) -> BufferBucket {
    let mut bucket = BufferBucket::new();
    bucket.reset_to(WINDOW_START, opts.clone());
    bucket
}

fn write(bucket: &mut BufferBucket, ts: i64, value: f64) {
    bucket.write(ts, ts, value, TimeUnit::None, None).unwrap();
}

/// Drains the bucket's readable view through the merge iterator, the way
/// the query path consumes it.
fn read_merged(bucket: &BufferBucket) -> Vec<(i64, f64)> {
    let mut ctx = ReaderContext::new();
    let streams = bucket.streams(&mut ctx);
    let mut iter = MultiReaderIterator::new();
    iter.reset(streams, bucket.start(), BLOCK_SIZE);

    let mut out = Vec::new();
    while let Some((dp, _, _)) = iter.next_point() {
        out.push((dp.timestamp, dp.value));
    }
    assert!(iter.err().is_none());
    iter.close();
    ctx.close();
    out
}

fn read_block(block: &DataBlock) -> Vec<(i64, f64)> {
    let mut ctx = ReaderContext::new();
    let mut reader = block.stream(&mut ctx).unwrap().unwrap();
    let mut out = Vec::new();
    while let Some((dp, _, _)) = reader.reader.read_next().unwrap() {
        out.push((dp.timestamp, dp.value));
    }
    out
}

fn bootstrapped_block(opts: &Options, points: &[(i64, f64)]) -> DataBlock {
    let mut encoder = opts.encoder_pool().get();
    encoder.reset(WINDOW_START, opts.block_alloc_size());
    for &(ts, value) in points {
        encoder
            .encode(Datapoint::new(ts, value), TimeUnit::None, None)
            .unwrap();
    }
    let mut block = opts.block_pool().get();
    block.reset(WINDOW_START, BLOCK_SIZE, encoder.discard());
    opts.encoder_pool().put(encoder);
    block
}

// ============================================================================
// End-to-end scenarios
// ============================================================================

#[test]
fn test_simple_in_order_writes() {
    let opts = test_options();
    let mut bucket = new_bucket(&opts);

    write(&mut bucket, at_minute(0), 1.0);
    write(&mut bucket, at_minute(1), 2.0);
    write(&mut bucket, at_minute(2), 3.0);

    assert_eq!(bucket.num_encoders(), 1);
    assert_eq!(
        read_merged(&bucket),
        vec![
            (at_minute(0), 1.0),
            (at_minute(1), 2.0),
            (at_minute(2), 3.0)
        ]
    );

    let outcome = bucket.discard_merged().unwrap();
    assert_eq!(outcome.merges, 0);
    assert!(outcome.block.len() > 0);
}

#[test]
fn test_late_arrival_stacks_then_merges() {
    let opts = test_options();
    let mut bucket = new_bucket(&opts);

    write(&mut bucket, at_minute(5), 5.0);
    write(&mut bucket, at_minute(3), 3.0);
    assert_eq!(bucket.num_encoders(), 2);

    bucket.merge().unwrap();
    assert_eq!(bucket.num_encoders(), 1);
    assert_eq!(
        read_merged(&bucket),
        vec![(at_minute(3), 3.0), (at_minute(5), 5.0)]
    );
}

#[test]
fn test_overwrite_last_write_wins() {
    let opts = test_options();
    let mut bucket = new_bucket(&opts);

    write(&mut bucket, at_minute(10), 10.0);
    write(&mut bucket, at_minute(10), 11.0);
    assert_eq!(bucket.num_encoders(), 2);

    assert_eq!(read_merged(&bucket), vec![(at_minute(10), 11.0)]);
}

#[test]
fn test_noop_rewrite() {
    let opts = test_options();
    let mut bucket = new_bucket(&opts);

    write(&mut bucket, at_minute(20), 7.0);
    write(&mut bucket, at_minute(20), 7.0);

    assert_eq!(bucket.num_encoders(), 1);
    assert_eq!(bucket.num_writes(), 1);
    assert_eq!(read_merged(&bucket), vec![(at_minute(20), 7.0)]);
}

#[test]
fn test_bootstrap_plus_live_writes() {
    let opts = test_options();
    let mut bucket = new_bucket(&opts);

    bucket.bootstrap(bootstrapped_block(&opts, &[(at_minute(0), 1.0)]));
    write(&mut bucket, at_minute(30), 30.0);

    let mut ctx = ReaderContext::new();
    let mut streams = bucket.streams(&mut ctx);
    assert_eq!(streams.len(), 2);
    // Bootstrapped blocks rank first.
    let (first, _, _) = streams[0].reader.read_next().unwrap().unwrap();
    assert_eq!(first.timestamp, at_minute(0));
    ctx.close();

    let outcome = bucket.discard_merged().unwrap();
    assert_eq!(outcome.merges, 2);
    assert_eq!(
        read_block(&outcome.block),
        vec![(at_minute(0), 1.0), (at_minute(30), 30.0)]
    );
}

#[test]
fn test_encoder_overrides_bootstrapped_on_conflict() {
    let opts = test_options();
    let mut bucket = new_bucket(&opts);

    bucket.bootstrap(bootstrapped_block(&opts, &[(at_minute(40), 40.0)]));
    write(&mut bucket, at_minute(40), 41.0);

    assert_eq!(read_merged(&bucket), vec![(at_minute(40), 41.0)]);

    let outcome = bucket.discard_merged().unwrap();
    assert_eq!(read_block(&outcome.block), vec![(at_minute(40), 41.0)]);
}

// ============================================================================
// Universal properties
// ============================================================================

#[test]
fn test_replay_determinism() {
    // Unique timestamps written in scrambled order come back sorted.
    let points = [
        (at_minute(7), 7.0),
        (at_minute(2), 2.0),
        (at_minute(9), 9.0),
        (at_minute(1), 1.0),
        (at_minute(5), 5.0),
        (at_minute(4), 4.0),
    ];
    let opts = test_options();
    let mut bucket = new_bucket(&opts);
    for &(ts, value) in &points {
        write(&mut bucket, ts, value);
    }

    let mut expected: Vec<(i64, f64)> = points.to_vec();
    expected.sort_by_key(|&(ts, _)| ts);

    let outcome = bucket.discard_merged().unwrap();
    assert_eq!(read_block(&outcome.block), expected);
}

#[test]
fn test_overwrite_chain_keeps_latest() {
    let opts = test_options();
    let mut bucket = new_bucket(&opts);

    write(&mut bucket, at_minute(10), 1.0);
    write(&mut bucket, at_minute(10), 2.0);
    write(&mut bucket, at_minute(10), 3.0);

    let outcome = bucket.discard_merged().unwrap();
    assert_eq!(read_block(&outcome.block), vec![(at_minute(10), 3.0)]);
}

#[test]
fn test_merge_idempotence() {
    let opts = test_options();
    let mut bucket = new_bucket(&opts);
    write(&mut bucket, at_minute(5), 5.0);
    write(&mut bucket, at_minute(3), 3.0);

    let first = bucket.merge().unwrap();
    assert_eq!(first.merges, 2);
    assert!(!bucket.needs_merge());

    let before = read_merged(&bucket);
    let second = bucket.merge().unwrap();
    assert_eq!(second.merges, 0);
    assert_eq!(bucket.num_encoders(), 1);
    assert_eq!(read_merged(&bucket), before);
}

#[test]
fn test_single_encoder_fast_path_preserves_data() {
    let opts = test_options();
    let mut bucket = new_bucket(&opts);
    write(&mut bucket, at_minute(0), 1.0);
    write(&mut bucket, at_minute(1), 2.0);

    let via_streams = read_merged(&bucket);
    let outcome = bucket.discard_merged().unwrap();
    assert_eq!(outcome.merges, 0);
    assert_eq!(read_block(&outcome.block), via_streams);
}

#[test]
fn test_single_bootstrapped_fast_path_transfers_block() {
    let opts = test_options();
    let mut bucket = new_bucket(&opts);

    let block = bootstrapped_block(&opts, &[(at_minute(0), 1.0), (at_minute(1), 2.0)]);
    let expected = read_block(&block);
    bucket.bootstrap(block);

    let outcome = bucket.discard_merged().unwrap();
    assert_eq!(outcome.merges, 0);
    // The very block handed to bootstrap comes back, unclosed.
    assert!(outcome.block.is_retrieved());
    assert_eq!(read_block(&outcome.block), expected);
    assert!(bucket.is_empty());
    assert_eq!(bucket.num_bootstrapped(), 0);
}

#[test]
fn test_discard_leaves_bucket_empty() {
    let opts = test_options();
    let mut bucket = new_bucket(&opts);

    bucket.bootstrap(bootstrapped_block(&opts, &[(at_minute(0), 1.0)]));
    write(&mut bucket, at_minute(30), 30.0);
    write(&mut bucket, at_minute(10), 10.0);

    let outcome = bucket.discard_merged().unwrap();
    assert_eq!(outcome.merges, 3);
    assert!(bucket.is_empty());
    assert_eq!(bucket.num_encoders(), 0);
    assert_eq!(bucket.num_bootstrapped(), 0);
    assert!(!bucket.can_read());
}

#[test]
fn test_counters_monotonic_under_serialized_writes() {
    let opts = test_options();
    let mut bucket = new_bucket(&opts);

    let mut last_write = bucket.last_write();
    for i in 0..20 {
        write(&mut bucket, at_minute(i), i as f64);
        assert!(bucket.last_write() >= last_write);
        last_write = bucket.last_write();
        assert_eq!(bucket.num_writes(), (i + 1) as u64);
    }

    bucket.reset_num_writes();
    assert_eq!(bucket.num_writes(), 0);
    assert_eq!(bucket.last_write(), last_write);
}

#[test]
fn test_drained_cycle() {
    let opts = test_options();
    let mut bucket = new_bucket(&opts);

    write(&mut bucket, at_minute(0), 1.0);
    let _ = bucket.discard_merged().unwrap();
    bucket.set_drained(true);
    bucket.reset_num_writes();
    assert!(!bucket.can_read());

    // Re-dirtying the bucket makes it readable again.
    write(&mut bucket, at_minute(1), 2.0);
    assert!(!bucket.drained());
    assert!(bucket.can_read());
    assert_eq!(read_merged(&bucket), vec![(at_minute(1), 2.0)]);
}

#[test]
fn test_unretrieved_bootstrapped_block_is_skipped() {
    let opts = test_options();
    let mut bucket = new_bucket(&opts);

    let mut unretrieved = opts.block_pool().get();
    unretrieved.reset_unretrieved(WINDOW_START, BLOCK_SIZE, 128);
    bucket.bootstrap(unretrieved);
    write(&mut bucket, at_minute(30), 30.0);

    // The unreadable block drops out of the readable view.
    assert_eq!(read_merged(&bucket), vec![(at_minute(30), 30.0)]);

    let outcome = bucket.discard_merged().unwrap();
    assert_eq!(outcome.merges, 1);
    assert_eq!(read_block(&outcome.block), vec![(at_minute(30), 30.0)]);
    assert_eq!(opts.stats().unretrieved_block_merges(), 1);
}

#[test]
fn test_annotations_and_units_survive_merge() {
    let opts = test_options();
    let mut bucket = new_bucket(&opts);

    bucket
        .write(
            at_minute(5),
            at_minute(5),
            5.0,
            TimeUnit::Seconds,
            Some(b"rollout"),
        )
        .unwrap();
    bucket
        .write(at_minute(3), at_minute(3), 3.0, TimeUnit::Milliseconds, None)
        .unwrap();

    let outcome = bucket.discard_merged().unwrap();

    let mut ctx = ReaderContext::new();
    let mut reader = outcome.block.stream(&mut ctx).unwrap().unwrap();
    let (dp, unit, annotation) = reader.reader.read_next().unwrap().unwrap();
    assert_eq!(dp.timestamp, at_minute(3));
    assert_eq!(unit, TimeUnit::Milliseconds);
    assert!(annotation.is_none());

    let (dp, unit, annotation) = reader.reader.read_next().unwrap().unwrap();
    assert_eq!(dp.timestamp, at_minute(5));
    assert_eq!(unit, TimeUnit::Seconds);
    assert_eq!(annotation.as_deref(), Some(b"rollout".as_slice()));
}

#[test]
fn test_pooled_bucket_reuse_roundtrip() {
    let opts = test_options();
    let pool = roost::BucketPool::new(8);

    let mut bucket = pool.get();
    bucket.reset_to(WINDOW_START, opts.clone());
    write(&mut bucket, at_minute(0), 1.0);
    let _ = bucket.discard_merged().unwrap();
    pool.put(bucket);

    let mut reused = pool.get();
    let next_window = WINDOW_START + BLOCK_SIZE.as_nanos() as i64;
    reused.reset_to(next_window, opts.clone());
    assert!(reused.is_empty());
    assert_eq!(reused.num_writes(), 0);

    write(&mut reused, next_window + 1_000_000_000, 9.0);
    assert_eq!(
        read_merged(&reused),
        vec![(next_window + 1_000_000_000, 9.0)]
    );
}
