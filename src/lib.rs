//! ticket_mpmc - Bounded MPMC circular queue with per-slot ticket locks
//!
//! A fixed-capacity multi-producer/multi-consumer FIFO ring. Producers block
//! while the ring is full and consumers block while it is empty, without ever
//! calling into an OS primitive: all coordination is done with atomic
//! counters and cooperative spinning.
//!
//! - `push` / `pop` : blocking MPMC operations
//! - `push_unsafe` / `pop_unsafe` : single-producer / single-consumer
//!   variants that skip the ticket handshake on their side
//! - `close` : one-shot signal that no more values are coming, draining
//!   blocked consumers
//! - CAP must be a power of two no larger than 2^31
//!
//! Each slot carries a pair of 32-bit ticket counters per side. The tickets
//! only come into play when more than CAP threads of one side have lapped the
//! ring onto the same slot; within a slot they serve colliding threads
//! first-come-first-served, like a ticket lock. Payload visibility is
//! established by a release store / acquire load handshake on a per-slot
//! readiness flag, so the payload cell itself is a plain value.

#![warn(missing_docs)]

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;

use crossbeam_utils::{Backoff, CachePadded};

#[cfg(not(loom))]
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
#[cfg(loom)]
use loom::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Error returned by [`Queue::recv`] and [`Queue::recv_unsafe`] when the
/// queue has been closed and no value is forthcoming for the caller's
/// reserved slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("queue is closed and exhausted")]
pub struct Exhausted;

/// One ring cell: the payload, its readiness flag, and the two ticket pairs
/// that serialize same-slot collisions on each side.
struct Slot<T> {
    value: UnsafeCell<MaybeUninit<T>>,
    /// `true` while `value` holds a published, unconsumed payload.
    has_data: AtomicBool,
    /// Producer ticket dispenser.
    push_next: AtomicU32,
    /// Producer ticket currently being served.
    push_serving: AtomicU32,
    /// Consumer ticket dispenser.
    pop_next: AtomicU32,
    /// Consumer ticket currently being served.
    pop_serving: AtomicU32,
}

impl<T> Slot<T> {
    fn new() -> Self {
        Slot {
            value: UnsafeCell::new(MaybeUninit::uninit()),
            has_data: AtomicBool::new(false),
            push_next: AtomicU32::new(0),
            push_serving: AtomicU32::new(0),
            pop_next: AtomicU32::new(0),
            pop_serving: AtomicU32::new(0),
        }
    }
}

/// Bounded MPMC circular queue.
///
/// Values are routed to slots by a monotonically increasing 32-bit position
/// counter per side; slot index is `position % CAP`. Because CAP divides
/// 2^32, the mapping stays uniform when the counters wrap.
///
/// `push` blocks while the ring is full, `pop` blocks while it is empty.
/// Once every intended value has been pushed, call [`Queue::close`]; blocked
/// consumers then drain out with the exhausted outcome. Closing while
/// producers are still pushing is a contract violation, as is popping more
/// times than there are values before close.
///
/// # Example
///
/// ```
/// use ticket_mpmc::Queue;
///
/// let queue = Queue::<u32, 4>::new();
/// queue.push(1);
/// queue.push(2);
/// assert_eq!(queue.pop(), Some(1));
/// assert_eq!(queue.pop(), Some(2));
/// queue.close();
/// assert_eq!(queue.pop(), None);
/// ```
pub struct Queue<T, const CAP: usize = 32> {
    slots: Box<[CachePadded<Slot<T>>]>,
    /// Producer position counter (monotonic, wrapping).
    write_pos: CachePadded<AtomicU32>,
    /// Consumer position counter (monotonic, wrapping).
    read_pos: CachePadded<AtomicU32>,
    /// One-way latch: no more values will be pushed.
    closed: AtomicBool,
}

// Safety: slot access is serialized by the ticket pairs and the `has_data`
// handshake; payloads cross threads by value.
unsafe impl<T: Send, const CAP: usize> Send for Queue<T, CAP> {}
unsafe impl<T: Send, const CAP: usize> Sync for Queue<T, CAP> {}

impl<T, const CAP: usize> Queue<T, CAP> {
    const MASK: u32 = (CAP as u32).wrapping_sub(1);

    /// Create a new queue. Panics unless `0 < CAP <= 2^31` and CAP is a
    /// power of two, so that the 32-bit position counters wrap cleanly onto
    /// slot indices.
    pub fn new() -> Self {
        assert!(CAP > 0, "capacity must be greater than 0");
        assert!(CAP.is_power_of_two(), "capacity must be a power of 2");
        assert!(CAP <= 1 << 31, "capacity must be at most 2^31");

        let slots = (0..CAP)
            .map(|_| CachePadded::new(Slot::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Queue {
            slots,
            write_pos: CachePadded::new(AtomicU32::new(0)),
            read_pos: CachePadded::new(AtomicU32::new(0)),
            closed: AtomicBool::new(false),
        }
    }

    #[inline]
    fn slot_index(pos: u32) -> usize {
        (pos & Self::MASK) as usize
    }

    /// Blocking push: reserve the next write position, wait for the slot to
    /// come free, then publish.
    ///
    /// Two waits can occur. The ticket wait fires only when producers have
    /// lapped the whole ring onto this slot; raise CAP if that shows up in
    /// profiles. The `has_data` wait is the ordinary back-pressure path
    /// while the ring is full.
    ///
    /// Must not be called after [`Queue::close`].
    pub fn push(&self, value: T) {
        debug_assert!(!self.is_closed(), "push on a closed queue");

        let pos = self.write_pos.fetch_add(1, Ordering::AcqRel);
        let slot = &self.slots[Self::slot_index(pos)];
        let ticket = slot.push_next.fetch_add(1, Ordering::AcqRel);

        let backoff = Backoff::new();
        while slot.push_serving.load(Ordering::Acquire) != ticket {
            spin_wait(&backoff);
        }
        // Ring is full until the consumer a lap behind clears the cell.
        while slot.has_data.load(Ordering::Acquire) {
            spin_wait(&backoff);
        }

        unsafe {
            (*slot.value.get()).write(value);
        }
        slot.has_data.store(true, Ordering::Release);
        slot.push_serving.fetch_add(1, Ordering::Release);
    }

    /// Single-producer push: same contract as [`Queue::push`], minus the
    /// producer tickets. Pair it with `pop` to fan work out from one thread
    /// to many consumers.
    ///
    /// Must not be called after [`Queue::close`].
    ///
    /// # Safety
    ///
    /// The caller must be the only thread pushing to this queue, for the
    /// queue's whole lifetime. A second concurrent producer races on the
    /// position counter and on the payload cell.
    pub unsafe fn push_unsafe(&self, value: T) {
        debug_assert!(!self.is_closed(), "push on a closed queue");

        let pos = self.write_pos.load(Ordering::Relaxed);
        self.write_pos.store(pos.wrapping_add(1), Ordering::Relaxed);
        let slot = &self.slots[Self::slot_index(pos)];

        let backoff = Backoff::new();
        while slot.has_data.load(Ordering::Acquire) {
            spin_wait(&backoff);
        }

        unsafe {
            (*slot.value.get()).write(value);
        }
        slot.has_data.store(true, Ordering::Release);
    }

    /// Blocking pop: reserve the next read position, wait for its value,
    /// remove and return it.
    ///
    /// Returns `None` only when the queue has been closed and no value is
    /// forthcoming for this reservation. A value pushed before close is
    /// never missed: the closed checks compare against the final write
    /// position rather than bailing on the spot.
    pub fn pop(&self) -> Option<T> {
        let pos = self.read_pos.fetch_add(1, Ordering::AcqRel);
        let slot = &self.slots[Self::slot_index(pos)];
        let ticket = slot.pop_next.fetch_add(1, Ordering::AcqRel);

        // The write position whose value this ticket receives. Ticket order
        // on a slot can diverge from position order when reservations race
        // across a full ring lap, so the ticket decides, not `pos`.
        let target = (pos & Self::MASK).wrapping_add(ticket.wrapping_mul(CAP as u32));

        let backoff = Backoff::new();
        while slot.pop_serving.load(Ordering::Acquire) != ticket {
            if self.is_closed() && !self.value_forthcoming(target) {
                return None;
            }
            spin_wait(&backoff);
        }
        while !slot.has_data.load(Ordering::Acquire) {
            if self.is_closed() && !self.value_forthcoming(target) {
                return None;
            }
            spin_wait(&backoff);
        }

        let value = unsafe { (*slot.value.get()).assume_init_read() };
        slot.has_data.store(false, Ordering::Release);
        slot.pop_serving.fetch_add(1, Ordering::Release);
        Some(value)
    }

    /// Single-consumer pop: same contract as [`Queue::pop`], minus the
    /// consumer tickets. Pair it with `push` to collect results from many
    /// producers on one thread.
    ///
    /// # Safety
    ///
    /// The caller must be the only thread popping from this queue, for the
    /// queue's whole lifetime. A second concurrent consumer races on the
    /// position counter and on the payload cell.
    pub unsafe fn pop_unsafe(&self) -> Option<T> {
        let pos = self.read_pos.load(Ordering::Relaxed);
        self.read_pos.store(pos.wrapping_add(1), Ordering::Relaxed);
        let slot = &self.slots[Self::slot_index(pos)];

        let backoff = Backoff::new();
        while !slot.has_data.load(Ordering::Acquire) {
            if self.is_closed() && !self.value_forthcoming(pos) {
                return None;
            }
            spin_wait(&backoff);
        }

        let value = unsafe { (*slot.value.get()).assume_init_read() };
        slot.has_data.store(false, Ordering::Release);
        Some(value)
    }

    /// Value-returning flavor of [`Queue::pop`]: the exhausted outcome
    /// becomes an [`Exhausted`] error instead of `None`.
    pub fn recv(&self) -> Result<T, Exhausted> {
        self.pop().ok_or(Exhausted)
    }

    /// Value-returning flavor of [`Queue::pop_unsafe`].
    ///
    /// # Safety
    ///
    /// Same contract as [`Queue::pop_unsafe`].
    pub unsafe fn recv_unsafe(&self) -> Result<T, Exhausted> {
        unsafe { self.pop_unsafe() }.ok_or(Exhausted)
    }

    /// Signal that no more values will be pushed. Idempotent; never blocks.
    ///
    /// Consumers blocked on an empty queue drain out with the exhausted
    /// outcome. Producers never check this flag: pushing after close is a
    /// contract violation. Issue close strictly after every push has
    /// returned.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Whether [`Queue::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Whether a push for the wrapped write position `target` has been
    /// reserved. Only meaningful once `closed` has been observed: every push
    /// reserved before close completes, so the write position bounds the
    /// published stream.
    fn value_forthcoming(&self, target: u32) -> bool {
        let write_pos = self.write_pos.load(Ordering::Acquire);
        forthcoming(write_pos, target)
    }

    /// Capacity of the ring.
    pub const fn capacity(&self) -> usize {
        CAP
    }

    /// Advisory signed occupancy: `write_pos - read_pos`.
    ///
    /// Negative when more consumers than values have reserved positions;
    /// can exceed the capacity while producers are stalled against a full
    /// ring. Exact only under single-producer single-consumer usage sampled
    /// between operations.
    pub fn len(&self) -> i32 {
        let write_pos = self.write_pos.load(Ordering::Relaxed);
        let read_pos = self.read_pos.load(Ordering::Relaxed);
        write_pos.wrapping_sub(read_pos) as i32
    }

    /// Advisory emptiness check, same caveats as [`Queue::len`].
    pub fn is_empty(&self) -> bool {
        self.len() <= 0
    }
}

impl<T, const CAP: usize> Default for Queue<T, CAP> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const CAP: usize> Drop for Queue<T, CAP> {
    fn drop(&mut self) {
        // Published-but-unconsumed payloads are still owned by the queue.
        for slot in self.slots.iter() {
            if slot.has_data.load(Ordering::Relaxed) {
                unsafe {
                    (*slot.value.get()).assume_init_drop();
                }
            }
        }
    }
}

/// Signed wrapping comparison of two 32-bit positions: is `target` strictly
/// below `write_pos` in stream order?
#[inline]
fn forthcoming(write_pos: u32, target: u32) -> bool {
    (write_pos.wrapping_sub(target) as i32) > 0
}

/// Cooperative wait used inside the four spin loops: spin briefly, then
/// yield the quantum.
#[cfg(not(loom))]
#[inline]
fn spin_wait(backoff: &Backoff) {
    backoff.snooze();
}

/// loom's scheduler has to be told when a thread is spinning.
#[cfg(loom)]
fn spin_wait(_backoff: &Backoff) {
    loom::thread::yield_now();
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;

    #[test]
    fn smoke() {
        let q = Queue::<i32, 8>::new();
        q.push(42);
        assert_eq!(q.pop(), Some(42));
    }

    #[test]
    fn round_trip_then_exhausted() {
        let q = Queue::<i32, 4>::new();
        q.push(1);
        q.push(2);
        q.push(3);
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), Some(3));
        q.close();
        assert_eq!(q.pop(), None);
        assert_eq!(q.recv(), Err(Exhausted));
    }

    #[test]
    fn ring_wraps_at_minimum_capacity() {
        let q = Queue::<usize, 2>::new();
        for i in 0..1000 {
            q.push(i);
            assert_eq!(q.pop(), Some(i));
        }
    }

    #[test]
    fn unsafe_variants_round_trip() {
        let q = Queue::<i32, 4>::new();
        unsafe {
            q.push_unsafe(7);
            q.push_unsafe(8);
            assert_eq!(q.pop_unsafe(), Some(7));
            assert_eq!(q.pop_unsafe(), Some(8));
            q.close();
            assert_eq!(q.pop_unsafe(), None);
            assert_eq!(q.recv_unsafe(), Err(Exhausted));
        }
    }

    #[test]
    fn length_tracks_spsc_occupancy() {
        let q = Queue::<i32, 8>::new();
        assert_eq!(q.len(), 0);
        assert!(q.is_empty());
        q.push(1);
        assert_eq!(q.len(), 1);
        q.push(2);
        assert_eq!(q.len(), 2);
        assert!(!q.is_empty());
        q.pop();
        assert_eq!(q.len(), 1);
        q.pop();
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn close_is_idempotent() {
        let q = Queue::<i32, 4>::new();
        q.push(5);
        q.close();
        assert!(q.is_closed());
        q.close();
        assert!(q.is_closed());
        // A value published before close is still delivered.
        assert_eq!(q.pop(), Some(5));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn forthcoming_is_wrap_clean() {
        assert!(forthcoming(1, 0));
        assert!(!forthcoming(0, 0));
        assert!(!forthcoming(0, 1));
        // Near the 32-bit boundary the signed difference still orders the
        // stream correctly.
        assert!(forthcoming(3, u32::MAX - 1));
        assert!(!forthcoming(u32::MAX - 1, 3));
        assert!(forthcoming(u32::MAX, u32::MAX - 1));
    }

    #[test]
    fn capacity_reported() {
        let q = Queue::<i32, 1024>::new();
        assert_eq!(q.capacity(), 1024);
    }

    #[test]
    fn default_capacity_is_32() {
        let q: Queue<i32> = Queue::default();
        assert_eq!(q.capacity(), 32);
    }
}
