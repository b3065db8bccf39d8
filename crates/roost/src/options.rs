//! Configuration and statistics for the write buffer.

use crate::pool::{BlockPool, ContextPool, EncoderPool, MultiReaderIteratorPool};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Default block window length (2 hours).
pub const DEFAULT_BLOCK_SIZE: Duration = Duration::from_secs(2 * 3600);

/// Default encoder allocation size in bytes.
pub const DEFAULT_BLOCK_ALLOC_SIZE: usize = 1024;

/// Default idle period after which a bucket is considered stale (5 minutes).
pub const DEFAULT_FLUSH_AFTER_NO_WRITE_PERIOD: Duration = Duration::from_secs(5 * 60);

/// Default number of writes after which a bucket is considered full.
pub const DEFAULT_MAX_WRITES_BEFORE_FLUSH: u64 = 1 << 16;

/// Retention and flush-threshold configuration.
#[derive(Debug, Clone)]
pub struct RetentionOptions {
    /// Length of each block-aligned window.
    block_size: Duration,
    /// Idle period after which a bucket reports stale.
    flush_after_no_write_period: Duration,
    /// Write count after which a bucket reports full.
    max_writes_before_flush: u64,
}

impl Default for RetentionOptions {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            flush_after_no_write_period: DEFAULT_FLUSH_AFTER_NO_WRITE_PERIOD,
            max_writes_before_flush: DEFAULT_MAX_WRITES_BEFORE_FLUSH,
        }
    }
}

impl RetentionOptions {
    /// Sets the block window length.
    pub fn with_block_size(mut self, block_size: Duration) -> Self {
        self.block_size = block_size;
        self
    }

    /// Sets the idle period after which a bucket reports stale.
    pub fn with_flush_after_no_write_period(mut self, period: Duration) -> Self {
        self.flush_after_no_write_period = period;
        self
    }

    /// Sets the write count after which a bucket reports full.
    pub fn with_max_writes_before_flush(mut self, max_writes: u64) -> Self {
        self.max_writes_before_flush = max_writes;
        self
    }

    /// Returns the block window length.
    pub fn block_size(&self) -> Duration {
        self.block_size
    }

    /// Returns the idle period after which a bucket reports stale.
    pub fn flush_after_no_write_period(&self) -> Duration {
        self.flush_after_no_write_period
    }

    /// Returns the write count after which a bucket reports full.
    pub fn max_writes_before_flush(&self) -> u64 {
        self.max_writes_before_flush
    }
}

/// Counters for buffer activity, updated without locks.
#[derive(Debug, Default)]
pub struct BufferStats {
    /// Encoders created to absorb out-of-order or conflicting writes.
    created_encoders: AtomicU64,
    /// Merges that had to touch unretrieved bootstrapped blocks.
    unretrieved_block_merges: AtomicU64,
}

impl BufferStats {
    /// Creates zeroed stats.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a newly created encoder.
    pub fn inc_created_encoders(&self) {
        self.created_encoders.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of encoders created for out-of-order writes.
    pub fn created_encoders(&self) -> u64 {
        self.created_encoders.load(Ordering::Relaxed)
    }

    /// Records a merge over unretrieved bootstrapped blocks.
    pub fn inc_unretrieved_block_merges(&self) {
        self.unretrieved_block_merges.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of merges over unretrieved bootstrapped blocks.
    pub fn unretrieved_block_merges(&self) -> u64 {
        self.unretrieved_block_merges.load(Ordering::Relaxed)
    }
}

/// Shared configuration handed to every bucket.
///
/// Cloning is cheap: pools and stats are reference counted.
#[derive(Debug, Clone)]
pub struct Options {
    retention: RetentionOptions,
    block_alloc_size: usize,
    encoder_pool: Arc<EncoderPool>,
    block_pool: Arc<BlockPool>,
    context_pool: Arc<ContextPool>,
    iterator_pool: Arc<MultiReaderIteratorPool>,
    stats: Arc<BufferStats>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            retention: RetentionOptions::default(),
            block_alloc_size: DEFAULT_BLOCK_ALLOC_SIZE,
            encoder_pool: Arc::default(),
            block_pool: Arc::default(),
            context_pool: Arc::default(),
            iterator_pool: Arc::default(),
            stats: Arc::default(),
        }
    }
}

impl Options {
    /// Creates options with default pools and thresholds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the retention options.
    pub fn with_retention(mut self, retention: RetentionOptions) -> Self {
        self.retention = retention;
        self
    }

    /// Sets the encoder allocation size in bytes.
    pub fn with_block_alloc_size(mut self, alloc_size: usize) -> Self {
        self.block_alloc_size = alloc_size;
        self
    }

    /// Sets the encoder pool.
    pub fn with_encoder_pool(mut self, pool: Arc<EncoderPool>) -> Self {
        self.encoder_pool = pool;
        self
    }

    /// Sets the block pool.
    pub fn with_block_pool(mut self, pool: Arc<BlockPool>) -> Self {
        self.block_pool = pool;
        self
    }

    /// Sets the context pool.
    pub fn with_context_pool(mut self, pool: Arc<ContextPool>) -> Self {
        self.context_pool = pool;
        self
    }

    /// Sets the merge iterator pool.
    pub fn with_iterator_pool(mut self, pool: Arc<MultiReaderIteratorPool>) -> Self {
        self.iterator_pool = pool;
        self
    }

    /// Sets the stats sink.
    pub fn with_stats(mut self, stats: Arc<BufferStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Returns the retention options.
    pub fn retention(&self) -> &RetentionOptions {
        &self.retention
    }

    /// Returns the encoder allocation size in bytes.
    pub fn block_alloc_size(&self) -> usize {
        self.block_alloc_size
    }

    /// Returns the encoder pool.
    pub fn encoder_pool(&self) -> &EncoderPool {
        &self.encoder_pool
    }

    /// Returns the block pool.
    pub fn block_pool(&self) -> &BlockPool {
        &self.block_pool
    }

    /// Returns the context pool.
    pub fn context_pool(&self) -> &ContextPool {
        &self.context_pool
    }

    /// Returns the merge iterator pool.
    pub fn iterator_pool(&self) -> &MultiReaderIteratorPool {
        &self.iterator_pool
    }

    /// Returns the stats sink.
    pub fn stats(&self) -> &BufferStats {
        &self.stats
    }
}
