//! Merge iterator over multiple segment readers.
//!
//! Produces `(datapoint, unit, annotation)` triples in non-decreasing
//! timestamp order. When the same timestamp appears in multiple readers,
//! only the value from the **highest-indexed** reader is emitted: reader
//! order is rank order, with bootstrapped blocks ranked below live
//! encoders and later-stacked encoders overriding earlier ones.
//!
//! The iterator neither owns nor finalizes the resources behind its
//! readers; that is the caller's (or the reader context's) responsibility.

use crate::error::BufferError;
use crate::series::{Annotation, BlockReader, Datapoint, SegmentReader, TimeUnit, Timestamp};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;

/// One pre-decoded datapoint from a reader, used for heap ordering.
#[derive(Debug)]
struct HeapEntry {
    timestamp: Timestamp,
    /// Index into the readers vector; higher ranks win ties.
    source: usize,
    point: (Datapoint, TimeUnit, Option<Annotation>),
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.timestamp == other.timestamp && self.source == other.source
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse the timestamp comparison so the
        // smallest timestamp surfaces first. On a tie the higher-ranked
        // source must pop first so its value wins.
        other
            .timestamp
            .cmp(&self.timestamp)
            .then_with(|| self.source.cmp(&other.source))
    }
}

/// K-way merge iterator over ranked segment readers.
#[derive(Debug, Default)]
pub struct MultiReaderIterator {
    cursors: Vec<SegmentReader>,
    heap: BinaryHeap<HeapEntry>,
    err: Option<BufferError>,
    start: Timestamp,
    block_size: Duration,
}

impl MultiReaderIterator {
    /// Creates an empty iterator. Call [`reset`](Self::reset) before use.
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-arms the iterator over `readers` for the window
    /// `(start, block_size)`, discarding any previous state.
    ///
    /// Reader order is rank order: on duplicate timestamps the reader with
    /// the highest index wins. Readers of differing block sizes are legal.
    pub fn reset(&mut self, readers: Vec<BlockReader>, start: Timestamp, block_size: Duration) {
        self.close();
        self.start = start;
        self.block_size = block_size;
        self.cursors = readers.into_iter().map(|br| br.reader).collect();
        for source in 0..self.cursors.len() {
            if !self.advance(source) {
                break;
            }
        }
    }

    /// Returns the window start the iterator was reset to.
    pub fn start(&self) -> Timestamp {
        self.start
    }

    /// Returns the window length the iterator was reset to.
    pub fn block_size(&self) -> Duration {
        self.block_size
    }

    /// Yields the next datapoint in non-decreasing timestamp order, or
    /// `None` when the readers are exhausted or a decode error occurred.
    ///
    /// After a `None`, callers must check [`err`](Self::err) to
    /// distinguish exhaustion from failure.
    pub fn next_point(&mut self) -> Option<(Datapoint, TimeUnit, Option<Annotation>)> {
        if self.err.is_some() {
            return None;
        }
        let top = self.heap.pop()?;
        if !self.advance(top.source) {
            return None;
        }

        // Drop lower-ranked duplicates of this timestamp.
        while let Some(peek) = self.heap.peek() {
            if peek.timestamp != top.timestamp {
                break;
            }
            let Some(dup) = self.heap.pop() else { break };
            if !self.advance(dup.source) {
                return None;
            }
        }

        Some(top.point)
    }

    /// Returns the decode error that stopped the iterator, if any.
    pub fn err(&self) -> Option<&BufferError> {
        self.err.as_ref()
    }

    /// Takes the decode error that stopped the iterator, if any.
    pub fn take_err(&mut self) -> Option<BufferError> {
        self.err.take()
    }

    /// Drops all readers and pending state; the iterator can be reset and
    /// reused afterwards.
    pub fn close(&mut self) {
        self.cursors.clear();
        self.heap.clear();
        self.err = None;
    }

    /// Reads the next entry from `source` onto the heap. Returns false and
    /// parks the error if the read fails.
    fn advance(&mut self, source: usize) -> bool {
        match self.cursors[source].read_next() {
            Ok(Some(point)) => {
                self.heap.push(HeapEntry {
                    timestamp: point.0.timestamp,
                    source,
                    point,
                });
                true
            }
            Ok(None) => true,
            Err(err) => {
                self.err = Some(err);
                false
            }
        }
    }
}
