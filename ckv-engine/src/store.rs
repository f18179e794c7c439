//! # Key-Value Store Interface
//!
//! ## Design Principles
//!
//! 1. **Strategy Pattern**: Abstract the store behind a trait so different
//!    implementations can be swapped without touching the dispatcher.
//! 2. **Binary-Safe API**: Keys/values are byte buffers to match Redis semantics.
//! 3. **Zero-Cost Dispatch**: When used with generics, calls monomorphize to
//!    avoid dynamic dispatch overhead.
//! 4. **Infallible Surface**: Store operations never fail; absence is a value
//!    (`None`), not an error.

use std::sync::Arc;

/// Strategy pattern: defines the store behavior surface for the dispatcher.
///
/// Implementations must be linearizable per key: a reader observes either the
/// value before a write or the value after it, never a mix of the two.
pub trait KvStore: Send + Sync {
    /// Returns the value for a key, or `None` if the key is absent.
    fn get(&self, key: &[u8]) -> Option<Arc<[u8]>>;

    /// Inserts or replaces a key with the provided value.
    ///
    /// Takes ownership to avoid extra copies on the hot path.
    fn set(&self, key: Vec<u8>, value: Vec<u8>);

    /// Removes a key. Returns true if the key existed and was removed.
    fn delete(&self, key: &[u8]) -> bool;

    /// Number of keys currently stored.
    fn len(&self) -> usize;

    /// Returns true when no key is stored.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<S: KvStore + ?Sized> KvStore for Arc<S> {
    fn get(&self, key: &[u8]) -> Option<Arc<[u8]>> {
        (**self).get(key)
    }

    fn set(&self, key: Vec<u8>, value: Vec<u8>) {
        (**self).set(key, value)
    }

    fn delete(&self, key: &[u8]) -> bool {
        (**self).delete(key)
    }

    fn len(&self) -> usize {
        (**self).len()
    }
}
