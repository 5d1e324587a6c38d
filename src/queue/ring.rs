//! Fixed-capacity slot ring.
//!
//! A full ring never grows: the newest slot is overwritten with a loss marker.
//! That may discard two messages at once (the incoming one and the one
//! evicted for the marker), and the subscriber still learns about the loss.

use bytes::Bytes;

/// One queued item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Slot {
    /// A real message payload.
    Message(Bytes),
    /// Some messages were not retained.
    Dropped,
}

/// Circular buffer with `front`/`size` occupancy tracking.
#[derive(Debug)]
pub(crate) struct Ring {
    slots: Box<[Option<Slot>]>,
    front: usize,
    size: usize,
}

impl Ring {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            front: 0,
            size: 0,
        }
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.size
    }

    #[inline]
    pub(crate) fn is_full(&self) -> bool {
        self.size == self.capacity()
    }

    /// Appends a slot, or marks loss on the newest slot when full.
    ///
    /// Returns `false` when the ring was full.
    pub(crate) fn push(&mut self, slot: Slot) -> bool {
        let cap = self.capacity();
        if self.is_full() {
            let back = (self.front + cap - 1) % cap;
            self.slots[back] = Some(Slot::Dropped);
            return false;
        }
        let next = (self.front + self.size) % cap;
        self.slots[next] = Some(slot);
        self.size += 1;
        true
    }

    /// Removes the oldest slot.
    pub(crate) fn pop(&mut self) -> Option<Slot> {
        if self.size == 0 {
            return None;
        }
        let slot = self.slots[self.front].take();
        self.front = (self.front + 1) % self.capacity();
        self.size -= 1;
        slot
    }
}
