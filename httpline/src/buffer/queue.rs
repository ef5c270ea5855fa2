//! Bounded single-producer / single-consumer queue of buffer indices.
//!
//! Head and tail are plain monotonically increasing counters with
//! modulo indexing into the slot array. The producer publishes a stored
//! index by advancing the tail with release ordering; the consumer reads
//! the tail with acquire and advances the head with release. Both roles
//! are played by the event-loop thread; the release/acquire pairing
//! defines the slot hand-off.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct IndexQueue {
    slots: Box<[UnsafeCell<u16>]>,
    head: AtomicU64,
    tail: AtomicU64,
}

// Safety: push is only called by the single producer and pop by the single
// consumer; slot hand-off is ordered by the release/acquire tail protocol.
unsafe impl Sync for IndexQueue {}

impl IndexQueue {
    /// Create a queue holding at most `capacity` indices.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be non-zero");
        let slots = (0..capacity)
            .map(|_| UnsafeCell::new(0u16))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        IndexQueue {
            slots,
            head: AtomicU64::new(0),
            tail: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of indices currently queued.
    pub fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        (tail - head) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enqueue an index. Returns it back when the queue is full.
    pub fn push(&self, index: u16) -> Result<(), u16> {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Relaxed);
        if tail - head >= self.slots.len() as u64 {
            return Err(index);
        }
        let slot = (tail % self.slots.len() as u64) as usize;
        // Safety: sole producer; the slot is outside the consumer's
        // visible range until the tail store below.
        unsafe {
            *self.slots[slot].get() = index;
        }
        self.tail.store(tail + 1, Ordering::Release);
        Ok(())
    }

    /// Dequeue the oldest index, if any.
    pub fn pop(&self) -> Option<u16> {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Relaxed);
        if head == tail {
            return None;
        }
        let slot = (head % self.slots.len() as u64) as usize;
        // Safety: sole consumer; the acquire load of tail above ordered
        // the producer's slot write before this read.
        let index = unsafe { *self.slots[slot].get() };
        self.head.store(head + 1, Ordering::Release);
        Some(index)
    }
}
