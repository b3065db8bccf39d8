//! Error and Result types for Roost buffer operations.

use crate::series::Timestamp;
use thiserror::Error;

/// A convenience `Result` type for Roost operations.
pub type Result<T> = std::result::Result<T, BufferError>;

/// The error type for write buffer operations.
#[derive(Debug, Error)]
pub enum BufferError {
    /// The encoder refused a datapoint older than its sealed tail.
    #[error("out of order write: timestamp {timestamp} precedes encoder tail {last}")]
    OutOfOrderWrite {
        /// Timestamp of the last datapoint the encoder accepted.
        last: Timestamp,
        /// Timestamp of the rejected datapoint.
        timestamp: Timestamp,
    },

    /// A segment bitstream ended before the advertised datapoint count.
    #[error("segment truncated at bit {pos}, {decoded} of {expected} points decoded")]
    TruncatedSegment {
        /// Bit position at which decoding ran out of input.
        pos: usize,
        /// Number of datapoints decoded before the stream ended.
        decoded: u32,
        /// Number of datapoints the segment claims to hold.
        expected: u32,
    },

    /// Annotation payload does not fit the 32-bit length field.
    #[error("annotation of {len} bytes exceeds maximum encodable length")]
    AnnotationTooLarge {
        /// Length of the rejected annotation.
        len: usize,
    },

    /// A merge left the bucket with other than exactly one encoder.
    #[error("bucket has {encoders} encoders after merge, expected exactly one")]
    MergeInvariant {
        /// Number of encoders observed after the merge.
        encoders: usize,
    },

    /// A block stream could not be opened.
    #[error("failed to open block stream: {0}")]
    StreamOpen(String),
}
