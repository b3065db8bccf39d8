//! Roost - per-series in-memory write buffer for time series storage.
//!
//! This crate provides the volatile write path of a time series storage
//! engine: for each (series, block-aligned window) pair a [`BufferBucket`]
//! absorbs timestamped values, deduplicates no-op rewrites, resolves
//! out-of-order and conflicting arrivals with last-write-wins semantics,
//! and on flush collapses its segments into a single compressed block for
//! the persistence layer.
//!
//! # Components
//!
//! - [`BufferBucket`]: one (series, window) write buffer slot
//! - [`SeriesEncoder`] / [`SegmentReader`]: streaming Gorilla codec
//! - [`DataBlock`]: immutable sealed segment for a window
//! - [`MultiReaderIterator`]: k-way merge over ranked segment readers
//! - [`ReaderContext`]: scoped finalizers bounding reader lifetimes
//! - [`pool`]: object pools keeping steady-state allocation near zero
//!
//! # Example
//!
//! ```rust,ignore
//! use roost::{BufferBucket, Options, TimeUnit};
//!
//! let opts = Options::new();
//! let mut bucket = BufferBucket::new();
//! bucket.reset_to(window_start, opts);
//!
//! // Absorb writes, including late arrivals.
//! bucket.write(now, timestamp, 0.75, TimeUnit::None, None)?;
//!
//! // Hand the merged window to the persistence layer.
//! if bucket.is_full() || bucket.is_stale(now) {
//!     let outcome = bucket.discard_merged()?;
//!     flush(outcome.block);
//! }
//! ```

#![deny(missing_docs)]

pub mod context;
pub mod error;
pub mod options;
pub mod pool;
pub mod series;

pub use context::ReaderContext;
pub use error::{BufferError, Result};
pub use options::{BufferStats, Options, RetentionOptions};
pub use series::{
    block_start, Annotation, BlockReader, BucketPool, BufferBucket, DataBlock, Datapoint,
    DiscardOutcome, MergeOutcome, MultiReaderIterator, Segment, SegmentReader, SeriesEncoder,
    TimeUnit, Timestamp,
};
