//! Lazy copy-on-first-mutation wrapper for shared values.
//!
//! Stages of a pipeline frequently hand the same underlying value to
//! multiple consumers. [`Shared`] keeps the common read-only path
//! zero-copy while guaranteeing that the first mutating access deep-copies
//! the value, so no consumer ever observes another's mutations.

use std::sync::Arc;

/// A possibly-shared value that is deep-copied on first mutation.
///
/// Reads go straight to the shared value. The first call to
/// [`Shared::make_mut`] clones the underlying value into a private copy;
/// later mutations hit that copy directly. Cloning the wrapper itself
/// produces a new wrapper that again shares until mutated.
#[derive(Debug)]
pub struct Shared<T: Clone> {
    inner: Arc<T>,
    copied: bool,
}

impl<T: Clone> Shared<T> {
    /// Wraps an already-shared value.
    #[must_use]
    pub const fn new(inner: Arc<T>) -> Self {
        Self {
            inner,
            copied: false,
        }
    }

    /// Wraps an owned value. The wrapper is still marked un-copied so a
    /// clone of the wrapper shares the same underlying allocation.
    #[must_use]
    pub fn from_owned(value: T) -> Self {
        Self::new(Arc::new(value))
    }

    /// Returns a read-only reference to the (possibly shared) value.
    #[must_use]
    pub fn get(&self) -> &T {
        &self.inner
    }

    /// Returns a mutable reference, copying the value first if it is
    /// still shared.
    pub fn make_mut(&mut self) -> &mut T {
        if !self.copied {
            self.inner = Arc::new(self.inner.as_ref().clone());
            self.copied = true;
        }
        // The copy above made the Arc private to this wrapper, but a
        // wrapper clone taken after the copy can re-share it.
        Arc::make_mut(&mut self.inner)
    }

    /// Returns true if this wrapper holds a private copy.
    #[must_use]
    pub const fn is_copied(&self) -> bool {
        self.copied
    }
}

impl<T: Clone> Clone for Shared<T> {
    fn clone(&self) -> Self {
        // The clone shares the current value and copies on its own first
        // mutation, independent of this wrapper's flag.
        Self {
            inner: Arc::clone(&self.inner),
            copied: false,
        }
    }
}

impl<T: Clone> From<T> for Shared<T> {
    fn from(value: T) -> Self {
        Self::from_owned(value)
    }
}
