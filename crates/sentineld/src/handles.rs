//! Shared slots that carry values from one initializer to the next.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// A slot filled by one initializer and read by those that depend on it.
///
/// Clones share the slot. The graph only guarantees that a producer runs
/// before its dependents; the slot carries the value between them.
pub struct Handle<T> {
    slot: Arc<RwLock<Option<T>>>,
}

impl<T> Handle<T> {
    /// Creates an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slot: Arc::new(RwLock::new(None)),
        }
    }

    /// Stores `value`, replacing anything published earlier.
    pub fn publish(&self, value: T) {
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = Some(value);
    }

    /// Removes and returns the value.
    pub fn take(&self) -> Option<T> {
        self.slot
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Whether a value is present.
    #[must_use]
    pub fn is_published(&self) -> bool {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl<T: Clone> Handle<T> {
    /// Returns a copy of the value, if one was published.
    #[must_use]
    pub fn get(&self) -> Option<T> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> Default for Handle<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Handle")
            .field("published", &self.is_published())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn clones_share_the_slot() {
        let producer: Handle<u32> = Handle::new();
        let consumer = producer.clone();
        assert_eq!(consumer.get(), None);

        producer.publish(7);

        assert_eq!(consumer.get(), Some(7));
        assert_eq!(consumer.take(), Some(7));
        assert!(!producer.is_published());
    }
}
