//! Per-series write buffer primitives.
//!
//! This module holds the core types shared across the buffer: datapoints,
//! time units, window arithmetic, plus the submodules implementing the
//! codec, blocks, the merge iterator, and the bucket itself.

pub mod block;
pub mod bucket;
pub mod gorilla;
pub mod iterator;

pub use block::{BlockReader, DataBlock};
pub use bucket::{BucketPool, BufferBucket, DiscardOutcome, MergeOutcome};
pub use gorilla::{Segment, SegmentReader, SeriesEncoder};
pub use iterator::MultiReaderIterator;

use std::time::Duration;

/// Timestamp in nanoseconds since the Unix epoch.
pub type Timestamp = i64;

/// Opaque per-datapoint annotation bytes.
pub type Annotation = Vec<u8>;

/// A single timestamped sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Datapoint {
    /// Timestamp of the sample in nanoseconds.
    pub timestamp: Timestamp,
    /// Sample value.
    pub value: f64,
}

impl Datapoint {
    /// Creates a new datapoint.
    pub fn new(timestamp: Timestamp, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Resolution tag carried alongside each datapoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeUnit {
    /// No resolution recorded.
    #[default]
    None,
    /// Second resolution.
    Seconds,
    /// Millisecond resolution.
    Milliseconds,
    /// Microsecond resolution.
    Microseconds,
    /// Nanosecond resolution.
    Nanoseconds,
}

impl TimeUnit {
    /// Returns the one-byte wire code for this unit.
    pub fn as_code(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Seconds => 1,
            Self::Milliseconds => 2,
            Self::Microseconds => 3,
            Self::Nanoseconds => 4,
        }
    }

    /// Decodes a unit from its wire code. Unknown codes map to `None`.
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => Self::Seconds,
            2 => Self::Milliseconds,
            3 => Self::Microseconds,
            4 => Self::Nanoseconds,
            _ => Self::None,
        }
    }
}

/// Floor-aligns a timestamp to the start of its block window.
///
/// Correct for timestamps before the epoch: alignment always rounds toward
/// negative infinity.
pub fn block_start(timestamp: Timestamp, block_size: Duration) -> Timestamp {
    let size = block_size.as_nanos() as i64;
    let (quotient, _) = div_floor(timestamp, size);
    quotient * size
}

fn div_floor(value: i64, divisor: i64) -> (i64, i64) {
    let mut quotient = value / divisor;
    let mut remainder = value % divisor;
    if remainder < 0 {
        quotient -= 1;
        remainder += divisor;
    }
    (quotient, remainder)
}
