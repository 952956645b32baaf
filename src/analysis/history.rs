//! Fixed-capacity, time-ordered history ring.
//!
//! Backed by a `ringbuf` heap ring: storage is allocated once and the oldest
//! entry is overwritten when full, so per-session memory stays bounded no
//! matter how long a connection lives.

use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;

/// Bounded FIFO of recent samples, oldest first
pub struct HistoryBuffer<T> {
    ring: HeapRb<T>,
}

impl<T> HistoryBuffer<T> {
    /// Create a buffer holding at most `capacity` items (minimum 1)
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: HeapRb::new(capacity.max(1)),
        }
    }

    /// Append an item, returning the evicted oldest item when full
    pub fn push(&mut self, item: T) -> Option<T> {
        self.ring.push_overwrite(item)
    }

    pub fn len(&self) -> usize {
        self.ring.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity().get()
    }

    pub fn is_full(&self) -> bool {
        self.ring.is_full()
    }

    /// Iterate oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        let (head, tail) = self.ring.as_slices();
        head.iter().chain(tail.iter())
    }

    /// Most recent item
    pub fn latest(&self) -> Option<&T> {
        let (head, tail) = self.ring.as_slices();
        tail.last().or_else(|| head.last())
    }

    /// The most recent `n` items, oldest first
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &T> {
        let skip = self.len().saturating_sub(n);
        self.iter().skip(skip)
    }

    pub fn clear(&mut self) {
        self.ring.clear();
    }
}

impl<T: Clone> HistoryBuffer<T> {
    /// Copy of the contents, oldest first
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }
}

impl<T> std::fmt::Debug for HistoryBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryBuffer")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}
