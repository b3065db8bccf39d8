//! Object pools for buffer resources.
//!
//! Steady-state writes and merges cycle through encoders, blocks, contexts,
//! and iterators at high rates; pooling keeps those allocations out of the
//! hot path. Pooling is performance only: every caller resets a pooled
//! object before use, so a pool miss (fresh construction) behaves exactly
//! like a pool hit.

use crate::context::ReaderContext;
use crate::series::{DataBlock, MultiReaderIterator, SeriesEncoder};
use std::fmt;
use std::sync::{Mutex, PoisonError};

/// Default number of objects a pool retains.
pub const DEFAULT_POOL_CAPACITY: usize = 64;

/// A bounded free list of reusable objects.
pub struct ObjectPool<T> {
    items: Mutex<Vec<T>>,
    construct: Box<dyn Fn() -> T + Send + Sync>,
    capacity: usize,
}

impl<T> ObjectPool<T> {
    /// Creates a pool retaining up to `capacity` objects, constructing new
    /// ones with `construct` when the free list is empty.
    pub fn new(capacity: usize, construct: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self {
            items: Mutex::new(Vec::with_capacity(capacity)),
            construct: Box::new(construct),
            capacity,
        }
    }

    /// Takes an object from the pool, constructing one on a miss.
    pub fn get(&self) -> T {
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        items.pop().unwrap_or_else(|| (self.construct)())
    }

    /// Returns an object to the pool. The object is dropped if the pool is
    /// at capacity.
    pub fn put(&self, item: T) {
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        if items.len() < self.capacity {
            items.push(item);
        }
    }

    /// Returns the number of pooled objects.
    pub fn pooled(&self) -> usize {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl<T> fmt::Debug for ObjectPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectPool")
            .field("pooled", &self.pooled())
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// Pool of [`SeriesEncoder`]s.
#[derive(Debug)]
pub struct EncoderPool {
    pool: ObjectPool<SeriesEncoder>,
}

impl EncoderPool {
    /// Creates an encoder pool with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            pool: ObjectPool::new(capacity, SeriesEncoder::new),
        }
    }

    /// Takes an encoder; callers must `reset` it before encoding.
    pub fn get(&self) -> SeriesEncoder {
        self.pool.get()
    }

    /// Closes an encoder and returns it to the pool.
    pub fn put(&self, mut encoder: SeriesEncoder) {
        encoder.close();
        self.pool.put(encoder);
    }

    /// Returns the number of pooled encoders.
    pub fn pooled(&self) -> usize {
        self.pool.pooled()
    }
}

impl Default for EncoderPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY)
    }
}

/// Pool of [`DataBlock`]s.
#[derive(Debug)]
pub struct BlockPool {
    pool: ObjectPool<DataBlock>,
}

impl BlockPool {
    /// Creates a block pool with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            pool: ObjectPool::new(capacity, DataBlock::new),
        }
    }

    /// Takes a block; callers must `reset` it before use.
    pub fn get(&self) -> DataBlock {
        self.pool.get()
    }

    /// Closes a block and returns it to the pool.
    pub fn put(&self, mut block: DataBlock) {
        block.close();
        self.pool.put(block);
    }

    /// Returns the number of pooled blocks.
    pub fn pooled(&self) -> usize {
        self.pool.pooled()
    }
}

impl Default for BlockPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY)
    }
}

/// Pool of [`ReaderContext`]s.
#[derive(Debug)]
pub struct ContextPool {
    pool: ObjectPool<ReaderContext>,
}

impl ContextPool {
    /// Creates a context pool with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            pool: ObjectPool::new(capacity, ReaderContext::new),
        }
    }

    /// Takes an empty context.
    pub fn get(&self) -> ReaderContext {
        self.pool.get()
    }

    /// Closes a context and returns it to the pool.
    pub fn put(&self, mut ctx: ReaderContext) {
        ctx.close();
        self.pool.put(ctx);
    }

    /// Returns the number of pooled contexts.
    pub fn pooled(&self) -> usize {
        self.pool.pooled()
    }
}

impl Default for ContextPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY)
    }
}

/// Pool of [`MultiReaderIterator`]s.
#[derive(Debug)]
pub struct MultiReaderIteratorPool {
    pool: ObjectPool<MultiReaderIterator>,
}

impl MultiReaderIteratorPool {
    /// Creates an iterator pool with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            pool: ObjectPool::new(capacity, MultiReaderIterator::new),
        }
    }

    /// Takes an iterator; callers must `reset` it before draining.
    pub fn get(&self) -> MultiReaderIterator {
        self.pool.get()
    }

    /// Closes an iterator and returns it to the pool.
    pub fn put(&self, mut iter: MultiReaderIterator) {
        iter.close();
        self.pool.put(iter);
    }

    /// Returns the number of pooled iterators.
    pub fn pooled(&self) -> usize {
        self.pool.pooled()
    }
}

impl Default for MultiReaderIteratorPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::{Datapoint, TimeUnit};

    #[test]
    fn test_get_constructs_on_empty_pool() {
        let pool: ObjectPool<Vec<u8>> = ObjectPool::new(4, Vec::new);
        assert_eq!(pool.pooled(), 0);
        let item = pool.get();
        assert!(item.is_empty());
    }

    #[test]
    fn test_put_then_get_reuses() {
        let pool: ObjectPool<Vec<u8>> = ObjectPool::new(4, Vec::new);
        let mut item = pool.get();
        item.reserve(1024);
        let capacity = item.capacity();
        pool.put(item);
        assert_eq!(pool.pooled(), 1);

        let reused = pool.get();
        assert_eq!(reused.capacity(), capacity);
        assert_eq!(pool.pooled(), 0);
    }

    #[test]
    fn test_capacity_bound() {
        let pool: ObjectPool<Vec<u8>> = ObjectPool::new(2, Vec::new);
        for _ in 0..5 {
            pool.put(Vec::new());
        }
        assert_eq!(pool.pooled(), 2);
    }

    #[test]
    fn test_encoder_pool_closes_on_put() {
        let pool = EncoderPool::new(4);
        let mut encoder = pool.get();
        encoder.reset(0, 64);
        encoder
            .encode(Datapoint::new(100, 1.0), TimeUnit::None, None)
            .unwrap();
        pool.put(encoder);

        let reused = pool.get();
        assert!(reused.is_empty());
        assert_eq!(reused.len(), 0);
    }
}
