//! Lock-free single-producer single-consumer event ring.
//!
//! A fixed-capacity circular buffer of pooled [`FlowEvent`] slots bridging the
//! capture thread to the simulation thread. The producer claims a slot,
//! populates it and commits; the consumer polls slots in commit order. When
//! the ring is full the producer drops the packet — that is the only
//! backpressure mechanism, there is no blocking and no growth.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::model::FlowEvent;

/// Default ring capacity, sized to absorb high-throughput bursts while the
/// consumer is busy with a render pass.
pub const DEFAULT_CAPACITY: usize = 131_072;

/// Shared ring state. Only reachable through the [`Producer`] / [`Consumer`]
/// halves handed out by [`channel`], which is what makes the single-writer
/// single-reader discipline hold.
pub struct EventRing {
    slots: Box<[UnsafeCell<FlowEvent>]>,
    mask: u64,
    capacity: usize,
    write_seq: AtomicU64,
    read_seq: AtomicU64,
    dropped: AtomicU64,
}

// SAFETY: slots are only touched through the unique Producer and Consumer
// handles. The producer writes a slot strictly before publishing it with a
// release store of write_seq; the consumer only reads slots below an acquire
// load of write_seq, and releases them back with a release store of read_seq.
unsafe impl Sync for EventRing {}

impl EventRing {
    fn slot(&self, seq: u64) -> *mut FlowEvent {
        self.slots[(seq & self.mask) as usize].get()
    }
}

/// Creates a ring with `capacity` pre-allocated slots (must be a power of
/// two) and returns its producer and consumer halves.
pub fn channel(capacity: usize) -> (Producer, Consumer) {
    assert!(capacity.is_power_of_two(), "ring capacity must be a power of two");
    let slots: Vec<UnsafeCell<FlowEvent>> =
        (0..capacity).map(|_| UnsafeCell::new(FlowEvent::default())).collect();
    let ring = Arc::new(EventRing {
        slots: slots.into_boxed_slice(),
        mask: capacity as u64 - 1,
        capacity,
        write_seq: AtomicU64::new(0),
        read_seq: AtomicU64::new(0),
        dropped: AtomicU64::new(0),
    });
    (Producer { ring: ring.clone() }, Consumer { ring })
}

/// Writing half of the ring. Exactly one exists per ring.
pub struct Producer {
    ring: Arc<EventRing>,
}

impl Producer {
    /// Claims the next slot for writing.
    ///
    /// Returns `None` when `write - read == capacity` (ring full); the caller
    /// must drop the packet. The drop is counted for diagnostics. Committing
    /// the returned slot publishes it to the consumer; letting it fall out of
    /// scope uncommitted publishes nothing.
    pub fn claim(&mut self) -> Option<WriteSlot<'_>> {
        let ring = &*self.ring;
        let write = ring.write_seq.load(Ordering::Relaxed);
        let read = ring.read_seq.load(Ordering::Acquire);
        if write.wrapping_sub(read) >= ring.capacity as u64 {
            ring.dropped.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        Some(WriteSlot { ring, seq: write })
    }
}

/// A claimed, not yet published slot.
pub struct WriteSlot<'a> {
    ring: &'a EventRing,
    seq: u64,
}

impl WriteSlot<'_> {
    /// Publishes the slot to the consumer. Call only after the event has been
    /// fully populated.
    pub fn commit(self) {
        self.ring.write_seq.store(self.seq + 1, Ordering::Release);
    }
}

impl Deref for WriteSlot<'_> {
    type Target = FlowEvent;

    fn deref(&self) -> &FlowEvent {
        // SAFETY: the slot is above read_seq + capacity, so the consumer
        // cannot observe it until commit; the producer handle is unique.
        unsafe { &*self.ring.slot(self.seq) }
    }
}

impl DerefMut for WriteSlot<'_> {
    fn deref_mut(&mut self) -> &mut FlowEvent {
        // SAFETY: as above.
        unsafe { &mut *self.ring.slot(self.seq) }
    }
}

/// Reading half of the ring. Exactly one exists per ring.
pub struct Consumer {
    ring: Arc<EventRing>,
}

impl Consumer {
    /// Returns the oldest committed event, or `None` when the ring is empty.
    ///
    /// The slot stays valid exactly as long as the returned guard lives; the
    /// read sequence advances when the guard drops, at which point the
    /// producer may reuse the slot. Copy out anything needed past that.
    pub fn poll(&mut self) -> Option<PollGuard<'_>> {
        let ring = &*self.ring;
        let read = ring.read_seq.load(Ordering::Relaxed);
        let write = ring.write_seq.load(Ordering::Acquire);
        if read >= write {
            return None;
        }
        Some(PollGuard { ring, seq: read })
    }

    /// Committed events not yet polled. Diagnostic only.
    pub fn len(&self) -> usize {
        let write = self.ring.write_seq.load(Ordering::Relaxed);
        let read = self.ring.read_seq.load(Ordering::Relaxed);
        write.wrapping_sub(read) as usize
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity
    }

    /// Packets the producer dropped on a full ring. Diagnostic only.
    pub fn dropped(&self) -> u64 {
        self.ring.dropped.load(Ordering::Relaxed)
    }
}

/// Read access to one polled slot. Dropping the guard releases the slot back
/// to the producer.
pub struct PollGuard<'a> {
    ring: &'a EventRing,
    seq: u64,
}

impl Deref for PollGuard<'_> {
    type Target = FlowEvent;

    fn deref(&self) -> &FlowEvent {
        // SAFETY: commit happens-before the acquire load in poll, and the
        // producer cannot reclaim this slot until read_seq passes it.
        unsafe { &*self.ring.slot(self.seq) }
    }
}

impl Drop for PollGuard<'_> {
    fn drop(&mut self) {
        self.ring.read_seq.store(self.seq + 1, Ordering::Release);
    }
}
