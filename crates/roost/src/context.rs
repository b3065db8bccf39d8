//! Scoped finalizer registration for read sessions.
//!
//! A [`ReaderContext`] bounds the lifetime of stream readers handed out by
//! the buffer: every stream opened against a context registers a finalizer,
//! and closing the context releases them all in reverse registration order.
//! The bucket can then swap or reset its encoders without invalidating
//! readers already in flight.

use std::fmt;

type Finalizer = Box<dyn FnOnce() + Send>;

/// A scoped group of finalizers for transient read resources.
#[derive(Default)]
pub struct ReaderContext {
    finalizers: Vec<Finalizer>,
}

impl ReaderContext {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a finalizer to run when the context closes.
    pub fn register_finalizer(&mut self, finalizer: impl FnOnce() + Send + 'static) {
        self.finalizers.push(Box::new(finalizer));
    }

    /// Returns the number of finalizers currently registered.
    pub fn num_finalizers(&self) -> usize {
        self.finalizers.len()
    }

    /// Runs all registered finalizers in reverse registration order.
    ///
    /// Closing an already-closed context is a no-op.
    pub fn close(&mut self) {
        while let Some(finalizer) = self.finalizers.pop() {
            finalizer();
        }
    }
}

impl Drop for ReaderContext {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for ReaderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderContext")
            .field("finalizers", &self.finalizers.len())
            .finish()
    }
}
