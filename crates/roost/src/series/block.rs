//! Immutable data blocks for block-aligned time windows.
//!
//! A [`DataBlock`] holds the sealed segment for one (series, window) pair:
//! either freshly produced from a merged encoder or bootstrapped from the
//! persistence layer at startup. Blocks never mutate after `reset`; readers
//! share the segment through reference counting so a block can be closed
//! while streams opened from it are still draining.

use crate::context::ReaderContext;
use crate::error::{BufferError, Result};
use crate::series::{Segment, SegmentReader, Timestamp};
use std::sync::Arc;
use std::time::Duration;

/// A segment reader tagged with the window it covers.
#[derive(Debug)]
pub struct BlockReader {
    /// Decoding cursor over the underlying segment.
    pub reader: SegmentReader,
    /// Window start of the segment.
    pub start: Timestamp,
    /// Window length of the segment.
    pub block_size: Duration,
}

/// An immutable encoded block covering one time window.
#[derive(Debug, Default)]
pub struct DataBlock {
    start: Timestamp,
    block_size: Duration,
    length: usize,
    segment: Option<Arc<Segment>>,
    retrieved: bool,
}

impl DataBlock {
    /// Creates an empty block. Call [`reset`](Self::reset) before use.
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a segment for the given window, consuming the segment's
    /// storage. The block is retrieved afterwards.
    pub fn reset(&mut self, start: Timestamp, block_size: Duration, segment: Segment) {
        self.start = start;
        self.block_size = block_size;
        self.length = segment.len();
        self.segment = Some(Arc::new(segment));
        self.retrieved = true;
    }

    /// Resets the block to describe a segment of `length` bytes whose
    /// payload has not been paged into memory.
    ///
    /// Streaming an unretrieved block fails until the payload is installed
    /// with [`reset`](Self::reset).
    pub fn reset_unretrieved(&mut self, start: Timestamp, block_size: Duration, length: usize) {
        self.start = start;
        self.block_size = block_size;
        self.length = length;
        self.segment = None;
        self.retrieved = false;
    }

    /// Returns the window start of the block.
    pub fn start(&self) -> Timestamp {
        self.start
    }

    /// Returns the window length of the block.
    pub fn block_size(&self) -> Duration {
        self.block_size
    }

    /// Returns the encoded length in bytes.
    pub fn len(&self) -> usize {
        self.length
    }

    /// Returns true if the block holds no data.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Returns the number of datapoints, or 0 if the payload is not
    /// resident.
    pub fn num_points(&self) -> u32 {
        self.segment.as_ref().map_or(0, |s| s.num_points())
    }

    /// Returns true if the block's payload is resident in memory.
    pub fn is_retrieved(&self) -> bool {
        self.retrieved
    }

    /// Opens a stream over the block's segment against `ctx`, registering a
    /// finalizer that keeps the segment alive until the context closes.
    ///
    /// Returns `None` for an empty block.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::StreamOpen`] if the payload is not resident.
    pub fn stream(&self, ctx: &mut ReaderContext) -> Result<Option<BlockReader>> {
        if self.is_empty() {
            return Ok(None);
        }
        let segment = match &self.segment {
            Some(segment) => Arc::clone(segment),
            None => {
                return Err(BufferError::StreamOpen(format!(
                    "block at {} has no resident segment",
                    self.start
                )))
            }
        };

        let reader = SegmentReader::new(Arc::clone(&segment));
        // The context's clone keeps the segment alive after the block is
        // reset or returned to its pool.
        ctx.register_finalizer(move || drop(segment));

        Ok(Some(BlockReader {
            reader,
            start: self.start,
            block_size: self.block_size,
        }))
    }

    /// Releases the block's segment and zeroes its metadata.
    pub fn close(&mut self) {
        self.start = 0;
        self.block_size = Duration::ZERO;
        self.length = 0;
        self.segment = None;
        self.retrieved = false;
    }
}
