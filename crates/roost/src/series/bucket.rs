//! Per-series write buffer bucket.
//!
//! A [`BufferBucket`] is the slot for one (series, block-aligned window)
//! pair. Writes land in the bucket's current encoder; an arrival older than
//! every encoder tail stacks a fresh encoder on top, since encoders are
//! immutable-tail. Read priority is push order, so later-stacked encoders
//! override earlier ones (and all encoders override bootstrapped blocks) on
//! duplicate timestamps. A flush collapses everything into one block via
//! [`merge`](BufferBucket::merge) / [`discard_merged`](BufferBucket::discard_merged).
//!
//! # Lifecycle
//!
//! Fresh -> Active -> Drained, then back to Fresh on
//! [`reset_to`](BufferBucket::reset_to) or release to the pool:
//! - Fresh -> Active on the first successful write or bootstrap.
//! - Active -> Drained when the owning layer calls
//!   [`set_drained`](BufferBucket::set_drained) after a flush handoff.
//! - Drained -> Active on any successful write.
//!
//! # Concurrency
//!
//! One writer and one flusher at a time, serialized one level above this
//! layer; concurrent readers take [`streams`](BufferBucket::streams) under
//! a shared lock and keep their readers alive through the context
//! afterwards. The clock and write-count fields are atomics so staleness
//! checks never need the bucket lock.

use crate::context::ReaderContext;
use crate::error::{BufferError, Result};
use crate::options::Options;
use crate::pool::ObjectPool;
use crate::series::{
    block_start, BlockReader, DataBlock, Datapoint, MultiReaderIterator, SeriesEncoder, TimeUnit,
    Timestamp,
};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// An encoder plus the timestamp of its most recent append.
///
/// `last_write_at` is `None` for a freshly reset encoder, which accepts any
/// first timestamp.
#[derive(Debug, Default)]
struct InOrderEncoder {
    encoder: SeriesEncoder,
    last_write_at: Option<Timestamp>,
}

/// Result of collapsing a bucket's segments in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Number of streams fed into the merge iterator; 0 if no merge was
    /// needed.
    pub merges: usize,
}

/// Result of merging a bucket and handing its contents off as a block.
#[derive(Debug)]
pub struct DiscardOutcome {
    /// The sealed block, owned by the caller.
    pub block: DataBlock,
    /// Number of streams merged to produce it; 0 on the fast paths.
    pub merges: usize,
}

/// Write buffer slot for one (series, window) pair.
#[derive(Debug, Default)]
pub struct BufferBucket {
    opts: Options,
    start: Timestamp,
    encoders: Vec<InOrderEncoder>,
    bootstrapped: Vec<DataBlock>,
    last_read_unix_nanos: AtomicI64,
    last_write_unix_nanos: AtomicI64,
    undrained_writes: AtomicU64,
    drained: bool,
}

impl BufferBucket {
    /// Creates an empty bucket. Call [`reset_to`](Self::reset_to) before use.
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-initializes the bucket for the window starting at `start`:
    /// finalizes held encoders and blocks, installs one fresh encoder, and
    /// zeroes all counters and flags.
    pub fn reset_to(&mut self, start: Timestamp, opts: Options) {
        self.finalize();

        self.opts = opts;
        let mut encoder = self.opts.encoder_pool().get();
        encoder.reset(start, self.opts.block_alloc_size());

        self.start = start;
        self.encoders.push(InOrderEncoder {
            encoder,
            last_write_at: None,
        });
        self.last_read_unix_nanos.store(0, Ordering::Relaxed);
        self.last_write_unix_nanos.store(0, Ordering::Relaxed);
        self.drained = false;
        self.reset_num_writes();
    }

    /// Returns all held encoders and blocks to their pools.
    pub fn finalize(&mut self) {
        self.reset_encoders();
        self.reset_bootstrapped();
    }

    /// Returns the window start of this bucket.
    pub fn start(&self) -> Timestamp {
        self.start
    }

    /// Returns true if every bootstrapped block and every encoder is empty.
    pub fn is_empty(&self) -> bool {
        self.bootstrapped.iter().all(|block| block.is_empty())
            && self.encoders.iter().all(|ioe| ioe.encoder.is_empty())
    }

    /// Returns true if the bucket holds unflushed data a reader should see.
    pub fn can_read(&self) -> bool {
        !self.drained && !self.is_empty()
    }

    /// Returns true if no write has landed within the configured idle
    /// period before `now`.
    pub fn is_stale(&self, now: Timestamp) -> bool {
        let period = self.opts.retention().flush_after_no_write_period();
        now - self.last_write() > period.as_nanos() as i64
    }

    /// Returns true if the bucket has absorbed enough writes to warrant a
    /// flush.
    pub fn is_full(&self) -> bool {
        self.num_writes() >= self.opts.retention().max_writes_before_flush()
    }

    /// Appends a block loaded from disk or a peer at startup. Bootstrapped
    /// blocks rank below all live encoders when duplicate timestamps are
    /// resolved.
    pub fn bootstrap(&mut self, block: DataBlock) {
        self.bootstrapped.push(block);
    }

    /// Writes a datapoint into the bucket.
    ///
    /// `now` is the arrival time of the write, not the time of the metric
    /// itself. Rewriting the current value at an encoder tail is a no-op
    /// success; a conflicting or out-of-order arrival stacks a new encoder.
    ///
    /// # Errors
    ///
    /// Surfaces encoder errors; the bucket remains usable afterwards.
    pub fn write(
        &mut self,
        now: Timestamp,
        timestamp: Timestamp,
        value: f64,
        unit: TimeUnit,
        annotation: Option<&[u8]>,
    ) -> Result<()> {
        let dp = Datapoint::new(timestamp, value);

        // Find the first encoder whose tail this write can extend.
        let mut target = None;
        for (idx, ioe) in self.encoders.iter().enumerate() {
            match ioe.last_write_at {
                Some(last) if last == timestamp => {
                    if let Some(tail) = ioe.encoder.last_encoded() {
                        if tail.value == value {
                            // Rewrite of the current value: no-op, counters
                            // and the drained flag stay untouched.
                            return Ok(());
                        }
                    }
                    // Sealed tail holds a different value for this
                    // timestamp; a later encoder must override it.
                }
                Some(last) if timestamp > last => {
                    target = Some(idx);
                    break;
                }
                None => {
                    target = Some(idx);
                    break;
                }
                _ => {}
            }
        }

        match target {
            Some(idx) => self.write_to_encoder(idx, dp, unit, annotation)?,
            None => {
                // The arrival is older than every encoder tail: stack a new
                // encoder on top. Its later rank makes its values win.
                self.opts.stats().inc_created_encoders();
                let block_size = self.opts.retention().block_size();

                let mut encoder = self.opts.encoder_pool().get();
                encoder.reset(
                    block_start(timestamp, block_size),
                    self.opts.block_alloc_size(),
                );
                if let Err(err) = encoder.encode(dp, unit, annotation) {
                    self.opts.encoder_pool().put(encoder);
                    return Err(err);
                }
                self.encoders.push(InOrderEncoder {
                    encoder,
                    last_write_at: Some(timestamp),
                });
            }
        }

        self.set_last_write(now);
        self.inc_num_writes();
        self.drained = false;
        Ok(())
    }

    fn write_to_encoder(
        &mut self,
        idx: usize,
        dp: Datapoint,
        unit: TimeUnit,
        annotation: Option<&[u8]>,
    ) -> Result<()> {
        self.encoders[idx].encoder.encode(dp, unit, annotation)?;
        self.encoders[idx].last_write_at = Some(dp.timestamp);
        Ok(())
    }

    /// Opens readers over every non-empty segment in rank order:
    /// bootstrapped blocks first, then encoders in push order. Readers stay
    /// valid until `ctx` closes, independent of later bucket mutation.
    ///
    /// Bootstrapped blocks whose stream cannot open are skipped with a
    /// warning.
    pub fn streams(&self, ctx: &mut ReaderContext) -> Vec<BlockReader> {
        let mut streams = Vec::with_capacity(self.bootstrapped.len() + self.encoders.len());

        for block in &self.bootstrapped {
            if block.is_empty() {
                continue;
            }
            match block.stream(ctx) {
                Ok(Some(reader)) => streams.push(reader),
                Ok(None) => {}
                Err(err) => {
                    warn!(
                        "skipping unreadable bootstrapped block at {}: {}",
                        block.start(),
                        err
                    );
                }
            }
        }

        let block_size = self.opts.retention().block_size();
        for ioe in &self.encoders {
            if let Some(reader) = ioe.encoder.stream() {
                let segment = Arc::clone(reader.segment());
                ctx.register_finalizer(move || drop(segment));
                streams.push(BlockReader {
                    reader,
                    start: self.start,
                    block_size,
                });
            }
        }

        streams
    }

    /// Returns the summed byte length of all held segments, used to size
    /// downstream buffers.
    pub fn streams_len(&self) -> usize {
        let blocks: usize = self.bootstrapped.iter().map(|block| block.len()).sum();
        let encoders: usize = self.encoders.iter().map(|ioe| ioe.encoder.len()).sum();
        blocks + encoders
    }

    /// Returns the number of stacked encoders.
    pub fn num_encoders(&self) -> usize {
        self.encoders.len()
    }

    /// Returns the number of bootstrapped blocks.
    pub fn num_bootstrapped(&self) -> usize {
        self.bootstrapped.len()
    }

    /// Records the wall-clock time of the most recent read.
    pub fn set_last_read(&self, value: Timestamp) {
        self.last_read_unix_nanos.store(value, Ordering::Relaxed);
    }

    /// Records the wall-clock time of the most recent write.
    pub fn set_last_write(&self, value: Timestamp) {
        self.last_write_unix_nanos.store(value, Ordering::Relaxed);
    }

    /// Returns the wall-clock time of the most recent read.
    pub fn last_read(&self) -> Timestamp {
        self.last_read_unix_nanos.load(Ordering::Relaxed)
    }

    /// Returns the wall-clock time of the most recent write.
    pub fn last_write(&self) -> Timestamp {
        self.last_write_unix_nanos.load(Ordering::Relaxed)
    }

    fn inc_num_writes(&self) {
        self.undrained_writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Zeroes the count of writes since the last flush.
    pub fn reset_num_writes(&self) {
        self.undrained_writes.store(0, Ordering::Relaxed);
    }

    /// Returns the number of writes since the last flush.
    pub fn num_writes(&self) -> u64 {
        self.undrained_writes.load(Ordering::Relaxed)
    }

    /// Returns true if the bucket was flushed and not re-dirtied since.
    pub fn drained(&self) -> bool {
        self.drained
    }

    /// Marks the bucket drained (or dirty again). The owning layer sets
    /// this after a successful flush handoff; any successful write clears
    /// it.
    pub fn set_drained(&mut self, drained: bool) {
        self.drained = drained;
    }

    fn reset_encoders(&mut self) {
        for ioe in self.encoders.drain(..) {
            self.opts.encoder_pool().put(ioe.encoder);
        }
    }

    fn reset_bootstrapped(&mut self) {
        for block in self.bootstrapped.drain(..) {
            self.opts.block_pool().put(block);
        }
    }

    /// Returns true if a merge would change the bucket's layout.
    pub fn needs_merge(&self) -> bool {
        self.can_read()
            && !(self.has_just_single_encoder() || self.has_just_single_bootstrapped_block())
    }

    /// Returns true if the bucket holds exactly one encoder and no
    /// bootstrapped blocks.
    pub fn has_just_single_encoder(&self) -> bool {
        self.encoders.len() == 1 && self.bootstrapped.is_empty()
    }

    /// Returns true if the bucket holds exactly one bootstrapped block and
    /// no encoded data.
    pub fn has_just_single_bootstrapped_block(&self) -> bool {
        let encoders_empty = self.encoders.is_empty()
            || (self.encoders.len() == 1 && self.encoders[0].encoder.len() == 0);
        encoders_empty && self.bootstrapped.len() == 1
    }

    /// Collapses all encoders and bootstrapped blocks into a single fresh
    /// encoder, resolving duplicate timestamps by rank.
    ///
    /// A no-op when [`needs_merge`](Self::needs_merge) is false. On error
    /// the bucket's encoders and blocks are left unchanged.
    pub fn merge(&mut self) -> Result<MergeOutcome> {
        if !self.needs_merge() {
            return Ok(MergeOutcome { merges: 0 });
        }

        let block_size = self.opts.retention().block_size();
        let mut encoder = self.opts.encoder_pool().get();
        encoder.reset(self.start, self.opts.block_alloc_size());

        // Merging blocks that are not resident makes flush ticks slow.
        let unretrieved = self
            .bootstrapped
            .iter()
            .filter(|block| !block.is_retrieved())
            .count();
        if unretrieved > 0 {
            self.opts.stats().inc_unretrieved_block_merges();
            warn!("merging {} unretrieved bootstrapped blocks", unretrieved);
        }

        let mut iter = self.opts.iterator_pool().get();
        let mut ctx = self.opts.context_pool().get();

        // Rank bootstrapped blocks below data that arrived live in the
        // buffer.
        let mut readers = Vec::with_capacity(self.bootstrapped.len() + self.encoders.len());
        let mut merges = 0;
        for block in &self.bootstrapped {
            match block.stream(&mut ctx) {
                Ok(Some(reader)) => {
                    merges += 1;
                    readers.push(reader);
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(
                        "skipping bootstrapped block at {} during merge: {}",
                        block.start(),
                        err
                    );
                }
            }
        }
        for ioe in &self.encoders {
            if let Some(reader) = ioe.encoder.stream() {
                merges += 1;
                readers.push(BlockReader {
                    reader,
                    start: self.start,
                    block_size,
                });
            }
        }

        iter.reset(readers, self.start, block_size);
        let merged = drain_into(&mut iter, &mut encoder);

        iter.close();
        self.opts.iterator_pool().put(iter);
        ctx.close();
        self.opts.context_pool().put(ctx);

        match merged {
            Ok(last_write_at) => {
                self.reset_encoders();
                self.reset_bootstrapped();
                self.encoders.push(InOrderEncoder {
                    encoder,
                    last_write_at,
                });
                Ok(MergeOutcome { merges })
            }
            Err(err) => {
                self.opts.encoder_pool().put(encoder);
                Err(err)
            }
        }
    }

    /// Merges the bucket and hands its contents off as a single sealed
    /// block, leaving the bucket empty.
    ///
    /// Fast paths avoid re-encoding: a lone encoder's storage is moved
    /// directly into a fresh block, and a lone bootstrapped block is
    /// transferred to the caller as-is. On a merge error the bucket's
    /// encoders and blocks are reset before the error propagates.
    pub fn discard_merged(&mut self) -> Result<DiscardOutcome> {
        let block_size = self.opts.retention().block_size();

        if self.has_just_single_encoder() {
            if let Some(mut ioe) = self.encoders.pop() {
                let segment = ioe.encoder.discard();
                // The segment owns the storage now; only the shell goes
                // back to the pool.
                self.opts.encoder_pool().put(ioe.encoder);

                let mut block = self.opts.block_pool().get();
                block.reset(self.start, block_size, segment);
                self.reset_bootstrapped();
                return Ok(DiscardOutcome { block, merges: 0 });
            }
        }

        if self.has_just_single_bootstrapped_block() {
            // Ownership of the block transfers to the caller, so it must
            // not be closed here.
            self.reset_encoders();
            if let Some(block) = self.bootstrapped.pop() {
                return Ok(DiscardOutcome { block, merges: 0 });
            }
        }

        let outcome = match self.merge() {
            Ok(outcome) => outcome,
            Err(err) => {
                self.reset_encoders();
                self.reset_bootstrapped();
                return Err(err);
            }
        };

        if self.encoders.len() != 1 {
            let encoders = self.encoders.len();
            self.reset_encoders();
            self.reset_bootstrapped();
            return Err(BufferError::MergeInvariant { encoders });
        }
        let Some(mut ioe) = self.encoders.pop() else {
            return Err(BufferError::MergeInvariant { encoders: 0 });
        };

        let segment = ioe.encoder.discard();
        self.opts.encoder_pool().put(ioe.encoder);

        let mut block = self.opts.block_pool().get();
        block.reset(self.start, block_size, segment);
        self.reset_bootstrapped();
        Ok(DiscardOutcome {
            block,
            merges: outcome.merges,
        })
    }
}

fn drain_into(
    iter: &mut MultiReaderIterator,
    encoder: &mut SeriesEncoder,
) -> Result<Option<Timestamp>> {
    let mut last_write_at = None;
    while let Some((dp, unit, annotation)) = iter.next_point() {
        encoder.encode(dp, unit, annotation.as_deref())?;
        last_write_at = Some(dp.timestamp);
    }
    if let Some(err) = iter.take_err() {
        return Err(err);
    }
    Ok(last_write_at)
}

/// Pool of owned [`BufferBucket`] values.
#[derive(Debug)]
pub struct BucketPool {
    pool: ObjectPool<BufferBucket>,
}

impl BucketPool {
    /// Creates a bucket pool with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            pool: ObjectPool::new(capacity, BufferBucket::new),
        }
    }

    /// Takes a bucket; callers must `reset_to` it before use.
    pub fn get(&self) -> BufferBucket {
        self.pool.get()
    }

    /// Finalizes a bucket and returns it to the pool.
    pub fn put(&self, mut bucket: BufferBucket) {
        bucket.finalize();
        self.pool.put(bucket);
    }

    /// Returns the number of pooled buckets.
    pub fn pooled(&self) -> usize {
        self.pool.pooled()
    }
}

impl Default for BucketPool {
    fn default() -> Self {
        Self::new(crate::pool::DEFAULT_POOL_CAPACITY)
    }
}
