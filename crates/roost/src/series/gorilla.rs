//! Gorilla compression for buffered series data.
//!
//! This module implements the streaming, append-only compressor that backs
//! the write buffer. Unlike a batch codec, the encoder accepts one datapoint
//! at a time and can snapshot its output mid-stream, which is what lets
//! concurrent readers observe a consistent view while writes continue.
//!
//! # Wire format
//!
//! Each datapoint is appended as four fields, bit-packed in order:
//!
//! ## Timestamp (delta-of-delta)
//!
//! - First value: 64 bits raw
//! - Subsequent values use variable-length encoding based on delta-of-delta:
//!   - `0`: `'0'` (1 bit)
//!   - `[-63, 64]`: `'10'` + 7 bits
//!   - `[-255, 256]`: `'110'` + 9 bits
//!   - `[-2047, 2048]`: `'1110'` + 12 bits
//!   - else: `'1111'` + 32 bits
//!
//! ## Value (XOR-based)
//!
//! - First value: 64 bits raw (IEEE 754)
//! - Subsequent values:
//!   - XOR = 0: `'0'` (1 bit)
//!   - Same window: `'10'` + meaningful bits
//!   - New window: `'11'` + 5 bits leading + 6 bits length + meaningful bits
//!
//! ## Unit and annotation
//!
//! - Unit: `'0'` if unchanged, else `'1'` + 8-bit unit code
//! - Annotation: `'0'` if unchanged, else `'1'` + 32-bit byte length + bytes
//!
//! Unit and annotation are sticky: a decoded datapoint carries the most
//! recently written values.

use crate::error::{BufferError, Result};
use crate::series::{Annotation, Datapoint, TimeUnit, Timestamp};
use bitvec::prelude::*;
use std::sync::Arc;

/// Immutable encoded payload of an encoder or block.
#[derive(Debug, Clone, Default)]
pub struct Segment {
    bits: BitVec<u8, Msb0>,
    count: u32,
}

impl Segment {
    pub(crate) fn new(bits: BitVec<u8, Msb0>, count: u32) -> Self {
        Self { bits, count }
    }

    /// Returns the payload length in bytes.
    pub fn len(&self) -> usize {
        self.bits.len().div_ceil(8)
    }

    /// Returns true if the segment holds no datapoints.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Returns the number of datapoints encoded in the segment.
    pub fn num_points(&self) -> u32 {
        self.count
    }
}

/// Streaming append-only encoder producing a [`Segment`].
///
/// The encoder is immutable-tail: once a datapoint is appended, no earlier
/// timestamp can be rewritten. Callers that need to override history stack a
/// new encoder instead (see [`BufferBucket`](crate::series::BufferBucket)).
#[derive(Debug, Default)]
pub struct SeriesEncoder {
    start: Timestamp,
    bits: BitVec<u8, Msb0>,
    count: u32,
    prev_ts: i64,
    prev_delta: i64,
    prev_value: u64,
    prev_leading: u32,
    prev_trailing: u32,
    prev_unit: TimeUnit,
    prev_annotation: Vec<u8>,
    last: Option<Datapoint>,
}

impl SeriesEncoder {
    /// Creates a new empty encoder. Call [`reset`](Self::reset) before use.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets the encoder to a fresh stream anchored at `start`, reserving
    /// roughly `alloc_size` bytes of output capacity.
    pub fn reset(&mut self, start: Timestamp, alloc_size: usize) {
        self.start = start;
        self.bits = BitVec::with_capacity(alloc_size * 8);
        self.clear_stream_state();
    }

    /// Returns the window start this encoder was reset to.
    pub fn start(&self) -> Timestamp {
        self.start
    }

    /// Appends a datapoint to the stream.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::OutOfOrderWrite`] if `dp` is older than the
    /// last encoded datapoint, and [`BufferError::AnnotationTooLarge`] if the
    /// annotation does not fit the 32-bit length field.
    pub fn encode(
        &mut self,
        dp: Datapoint,
        unit: TimeUnit,
        annotation: Option<&[u8]>,
    ) -> Result<()> {
        if let Some(last) = self.last {
            if dp.timestamp < last.timestamp {
                return Err(BufferError::OutOfOrderWrite {
                    last: last.timestamp,
                    timestamp: dp.timestamp,
                });
            }
        }
        let annotation = annotation.unwrap_or_default();
        if annotation.len() > u32::MAX as usize {
            return Err(BufferError::AnnotationTooLarge {
                len: annotation.len(),
            });
        }

        self.encode_timestamp(dp.timestamp);
        self.encode_value(dp.value);
        self.encode_unit(unit);
        self.encode_annotation(annotation);

        self.count += 1;
        self.last = Some(dp);
        Ok(())
    }

    /// Returns the last datapoint appended to this stream.
    pub fn last_encoded(&self) -> Option<Datapoint> {
        self.last
    }

    /// Returns the number of datapoints encoded.
    pub fn num_encoded(&self) -> usize {
        self.count as usize
    }

    /// Returns the encoded length in bytes.
    pub fn len(&self) -> usize {
        self.bits.len().div_ceil(8)
    }

    /// Returns true if nothing has been encoded.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Opens a reader over a snapshot of the current stream, or `None` if
    /// the encoder is empty.
    ///
    /// Later appends do not affect an open reader.
    pub fn stream(&self) -> Option<SegmentReader> {
        if self.count == 0 {
            return None;
        }
        let segment = Segment::new(self.bits.clone(), self.count);
        Some(SegmentReader::new(Arc::new(segment)))
    }

    /// Detaches and returns the encoded segment, leaving the encoder empty
    /// and reusable after a subsequent [`reset`](Self::reset).
    pub fn discard(&mut self) -> Segment {
        let bits = std::mem::take(&mut self.bits);
        let count = std::mem::replace(&mut self.count, 0);
        self.clear_stream_state();
        Segment::new(bits, count)
    }

    /// Releases the encoder's buffers.
    pub fn close(&mut self) {
        self.bits = BitVec::new();
        self.count = 0;
        self.clear_stream_state();
    }

    fn clear_stream_state(&mut self) {
        self.bits.clear();
        self.count = 0;
        self.prev_ts = 0;
        self.prev_delta = 0;
        self.prev_value = 0;
        self.prev_leading = 0;
        self.prev_trailing = 0;
        self.prev_unit = TimeUnit::None;
        self.prev_annotation.clear();
        self.last = None;
    }

    fn encode_timestamp(&mut self, timestamp: i64) {
        if self.count == 0 {
            push_bits(&mut self.bits, timestamp as u64, 64);
            self.prev_ts = timestamp;
            self.prev_delta = 0;
            return;
        }

        let delta = timestamp - self.prev_ts;
        let delta_of_delta = delta - self.prev_delta;

        if delta_of_delta == 0 {
            self.bits.push(false);
        } else if (-63..=64).contains(&delta_of_delta) {
            push_bits(&mut self.bits, 0b10, 2);
            push_bits(&mut self.bits, (delta_of_delta + 63) as u64, 7);
        } else if (-255..=256).contains(&delta_of_delta) {
            push_bits(&mut self.bits, 0b110, 3);
            push_bits(&mut self.bits, (delta_of_delta + 255) as u64, 9);
        } else if (-2047..=2048).contains(&delta_of_delta) {
            push_bits(&mut self.bits, 0b1110, 4);
            push_bits(&mut self.bits, (delta_of_delta + 2047) as u64, 12);
        } else {
            push_bits(&mut self.bits, 0b1111, 4);
            push_bits(&mut self.bits, delta_of_delta as i32 as u32 as u64, 32);
        }

        self.prev_delta = delta;
        self.prev_ts = timestamp;
    }

    fn encode_value(&mut self, value: f64) {
        let value_bits = value.to_bits();

        if self.count == 0 {
            push_bits(&mut self.bits, value_bits, 64);
            self.prev_value = value_bits;
            return;
        }

        let xor = value_bits ^ self.prev_value;

        if xor == 0 {
            self.bits.push(false);
        } else {
            // Cap leading zeros at 31 so they fit the 5-bit field; the
            // meaningful-bit window must be computed from the capped value
            // or encoder and decoder windows diverge.
            let leading = xor.leading_zeros().min(31);
            let trailing = xor.trailing_zeros();

            if leading >= self.prev_leading && trailing >= self.prev_trailing {
                self.bits.push(true);
                self.bits.push(false);
                let meaningful = 64 - self.prev_leading - self.prev_trailing;
                push_bits(&mut self.bits, xor >> self.prev_trailing, meaningful);
            } else {
                self.bits.push(true);
                self.bits.push(true);
                let meaningful = 64 - leading - trailing;
                push_bits(&mut self.bits, leading as u64, 5);
                push_bits(&mut self.bits, (meaningful - 1) as u64, 6);
                push_bits(&mut self.bits, xor >> trailing, meaningful);
                self.prev_leading = leading;
                self.prev_trailing = trailing;
            }
        }

        self.prev_value = value_bits;
    }

    fn encode_unit(&mut self, unit: TimeUnit) {
        if unit == self.prev_unit {
            self.bits.push(false);
        } else {
            self.bits.push(true);
            push_bits(&mut self.bits, unit.as_code() as u64, 8);
            self.prev_unit = unit;
        }
    }

    fn encode_annotation(&mut self, annotation: &[u8]) {
        if annotation == self.prev_annotation.as_slice() {
            self.bits.push(false);
        } else {
            self.bits.push(true);
            push_bits(&mut self.bits, annotation.len() as u64, 32);
            for &byte in annotation {
                push_bits(&mut self.bits, byte as u64, 8);
            }
            self.prev_annotation.clear();
            self.prev_annotation.extend_from_slice(annotation);
        }
    }
}

fn push_bits(bits: &mut BitVec<u8, Msb0>, value: u64, width: u32) {
    for i in (0..width).rev() {
        bits.push((value >> i) & 1 == 1);
    }
}

/// Decoding cursor over an encoded [`Segment`].
#[derive(Debug)]
pub struct SegmentReader {
    segment: Arc<Segment>,
    pos: usize,
    decoded: u32,
    prev_ts: i64,
    prev_delta: i64,
    prev_value: u64,
    prev_leading: u32,
    prev_trailing: u32,
    prev_unit: TimeUnit,
    prev_annotation: Vec<u8>,
}

impl SegmentReader {
    /// Creates a reader positioned at the start of `segment`.
    pub fn new(segment: Arc<Segment>) -> Self {
        Self {
            segment,
            pos: 0,
            decoded: 0,
            prev_ts: 0,
            prev_delta: 0,
            prev_value: 0,
            prev_leading: 0,
            prev_trailing: 0,
            prev_unit: TimeUnit::None,
            prev_annotation: Vec::new(),
        }
    }

    /// Returns the segment this reader decodes.
    pub fn segment(&self) -> &Arc<Segment> {
        &self.segment
    }

    /// Decodes the next datapoint, or `None` when the stream is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::TruncatedSegment`] if the bitstream ends
    /// before the segment's datapoint count is reached.
    pub fn read_next(&mut self) -> Result<Option<(Datapoint, TimeUnit, Option<Annotation>)>> {
        if self.decoded >= self.segment.count {
            return Ok(None);
        }

        let timestamp = self.read_timestamp()?;
        let value = self.read_value()?;
        let unit = self.read_unit()?;
        let annotation = self.read_annotation()?;

        self.decoded += 1;
        Ok(Some((Datapoint::new(timestamp, value), unit, annotation)))
    }

    fn read_timestamp(&mut self) -> Result<i64> {
        if self.decoded == 0 {
            let ts = self.read_bits(64)? as i64;
            self.prev_ts = ts;
            self.prev_delta = 0;
            return Ok(ts);
        }

        let delta_of_delta = if !self.read_bit()? {
            0
        } else if !self.read_bit()? {
            self.read_bits(7)? as i64 - 63
        } else if !self.read_bit()? {
            self.read_bits(9)? as i64 - 255
        } else if !self.read_bit()? {
            self.read_bits(12)? as i64 - 2047
        } else {
            self.read_bits(32)? as u32 as i32 as i64
        };

        let delta = self.prev_delta + delta_of_delta;
        let ts = self.prev_ts + delta;
        self.prev_delta = delta;
        self.prev_ts = ts;
        Ok(ts)
    }

    fn read_value(&mut self) -> Result<f64> {
        if self.decoded == 0 {
            let bits = self.read_bits(64)?;
            self.prev_value = bits;
            return Ok(f64::from_bits(bits));
        }

        let xor = if !self.read_bit()? {
            0u64
        } else if !self.read_bit()? {
            let meaningful = 64 - self.prev_leading - self.prev_trailing;
            self.read_bits(meaningful)? << self.prev_trailing
        } else {
            let leading = self.read_bits(5)? as u32;
            let meaningful = self.read_bits(6)? as u32 + 1;
            let trailing = 64 - leading - meaningful;
            let xor = self.read_bits(meaningful)? << trailing;
            self.prev_leading = leading;
            self.prev_trailing = trailing;
            xor
        };

        let bits = self.prev_value ^ xor;
        self.prev_value = bits;
        Ok(f64::from_bits(bits))
    }

    fn read_unit(&mut self) -> Result<TimeUnit> {
        if self.read_bit()? {
            self.prev_unit = TimeUnit::from_code(self.read_bits(8)? as u8);
        }
        Ok(self.prev_unit)
    }

    fn read_annotation(&mut self) -> Result<Option<Annotation>> {
        if self.read_bit()? {
            let len = self.read_bits(32)? as usize;
            let mut annotation = Vec::with_capacity(len);
            for _ in 0..len {
                annotation.push(self.read_bits(8)? as u8);
            }
            self.prev_annotation = annotation;
        }
        if self.prev_annotation.is_empty() {
            Ok(None)
        } else {
            Ok(Some(self.prev_annotation.clone()))
        }
    }

    fn read_bit(&mut self) -> Result<bool> {
        match self.segment.bits.get(self.pos) {
            Some(bit) => {
                self.pos += 1;
                Ok(*bit)
            }
            None => Err(self.truncated()),
        }
    }

    fn read_bits(&mut self, width: u32) -> Result<u64> {
        let mut value = 0u64;
        for _ in 0..width {
            value = (value << 1) | u64::from(self.read_bit()?);
        }
        Ok(value)
    }

    fn truncated(&self) -> BufferError {
        BufferError::TruncatedSegment {
            pos: self.pos,
            decoded: self.decoded,
            expected: self.segment.count,
        }
    }
}
