//! Lock-free single-producer/single-consumer ring buffer
//!
//! The buffer hands packets from the receive interrupt to the control loop. Slots are
//! preallocated and filled in place: the producer gets a [`WriteSlot`] guard, fills it
//! and commits it, the consumer peeks at the oldest slot and releases it when done.
//! One slot always stays empty to tell a full buffer from an empty one.

use alloc::sync::Arc;
use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::radio::ReceivedPacket;

/// Number of slots of the receive queue
pub const RX_QUEUE_LEN: usize = 10;

/// Queue between the receive interrupt and the control loop
pub type RxQueue = RingBuffer<ReceivedPacket, RX_QUEUE_LEN>;

/// Fixed-size ring of `N` slots holding at most `N - 1` items
pub struct RingBuffer<T, const N: usize> {
    slots: [UnsafeCell<T>; N],
    // Next slot to write, stored only by the producer
    head: AtomicUsize,
    // Next slot to read, stored only by the consumer
    tail: AtomicUsize,
    producer_claimed: AtomicBool,
    consumer_claimed: AtomicBool,
}

// Safety: a slot is accessed either by the producer (between head and tail) or by the
// consumer, never both, and each side is held by at most one handle.
unsafe impl<T: Send, const N: usize> Sync for RingBuffer<T, N> {}

impl<T: Default, const N: usize> RingBuffer<T, N> {
    /// Create an empty buffer with default-initialized slots
    pub fn new() -> Self {
        assert!(N >= 2, "ring buffer needs at least two slots");
        Self {
            slots: core::array::from_fn(|_| UnsafeCell::new(T::default())),
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            producer_claimed: AtomicBool::new(false),
            consumer_claimed: AtomicBool::new(false),
        }
    }
}

impl<T: Default, const N: usize> Default for RingBuffer<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> RingBuffer<T, N> {
    /// Claim the producer handle, `None` while another one is alive
    pub fn producer(self: &Arc<Self>) -> Option<Producer<T, N>> {
        self.producer_claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        Some(Producer {
            ring: Arc::clone(self),
        })
    }

    /// Claim the consumer handle, `None` while another one is alive
    pub fn consumer(self: &Arc<Self>) -> Option<Consumer<T, N>> {
        self.consumer_claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        Some(Consumer {
            ring: Arc::clone(self),
        })
    }

    /// Number of items waiting to be read
    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        (head + N - tail) % N
    }

    /// Check if no item is waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check if a write would be dropped
    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }

    /// Largest number of items the buffer holds
    pub const fn capacity(&self) -> usize {
        N - 1
    }
}

/// Write side of a [`RingBuffer`]
pub struct Producer<T, const N: usize> {
    ring: Arc<RingBuffer<T, N>>,
}

impl<T, const N: usize> Producer<T, N> {
    /// Reserve the next free slot, `None` if the buffer is full
    pub fn write_next(&mut self) -> Option<WriteSlot<'_, T, N>> {
        let head = self.ring.head.load(Ordering::Relaxed);
        let next = (head + 1) % N;
        if next == self.ring.tail.load(Ordering::Acquire) {
            return None;
        }
        Some(WriteSlot {
            ring: &self.ring,
            index: head,
        })
    }

    /// The buffer this handle writes to
    pub fn ring(&self) -> &Arc<RingBuffer<T, N>> {
        &self.ring
    }
}

impl<T, const N: usize> Drop for Producer<T, N> {
    fn drop(&mut self) {
        self.ring.producer_claimed.store(false, Ordering::Release);
    }
}

/// A reserved slot; invisible to the consumer until [`WriteSlot::commit`]
///
/// The slot still holds whatever was last written to it.
pub struct WriteSlot<'a, T, const N: usize> {
    ring: &'a RingBuffer<T, N>,
    index: usize,
}

impl<'a, T, const N: usize> WriteSlot<'a, T, N> {
    /// Publish the slot to the consumer
    pub fn commit(self) {
        self.ring
            .head
            .store((self.index + 1) % N, Ordering::Release);
    }
}

impl<'a, T, const N: usize> Deref for WriteSlot<'a, T, N> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: the slot lies outside the consumer's range until committed
        unsafe { &*self.ring.slots[self.index].get() }
    }
}

impl<'a, T, const N: usize> DerefMut for WriteSlot<'a, T, N> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: see `deref`; the guard borrows the producer mutably
        unsafe { &mut *self.ring.slots[self.index].get() }
    }
}

/// Read side of a [`RingBuffer`]
pub struct Consumer<T, const N: usize> {
    ring: Arc<RingBuffer<T, N>>,
}

impl<T, const N: usize> Consumer<T, N> {
    /// Peek at the oldest item
    pub fn read_next(&self) -> Option<&T> {
        let tail = self.ring.tail.load(Ordering::Relaxed);
        if tail == self.ring.head.load(Ordering::Acquire) {
            return None;
        }
        // Safety: committed slots are not touched by the producer until released
        Some(unsafe { &*self.ring.slots[tail].get() })
    }

    /// Release the oldest item, no-op if the buffer is empty
    pub fn read_next_done(&mut self) {
        let tail = self.ring.tail.load(Ordering::Relaxed);
        if tail != self.ring.head.load(Ordering::Acquire) {
            self.ring.tail.store((tail + 1) % N, Ordering::Release);
        }
    }

    /// The buffer this handle reads from
    pub fn ring(&self) -> &Arc<RingBuffer<T, N>> {
        &self.ring
    }
}

impl<T, const N: usize> Drop for Consumer<T, N> {
    fn drop(&mut self) {
        self.ring.consumer_claimed.store(false, Ordering::Release);
    }
}
