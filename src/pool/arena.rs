//! Fixed table of buffer slots.
//!
//! A slot either holds nothing (vacant), a parked frame queued in some
//! pool, or is checked out to an `Rtskb` in flight. Vacant slots are what
//! the non-real-time lifecycle paths construct new buffers into.

use std::sync::atomic::{AtomicU32, Ordering};

use crossbeam_queue::ArrayQueue;

use crate::pool::PoolId;
use crate::skb::Frame;

/// End-of-list marker for slot links
pub(crate) const NIL: u32 = u32::MAX;

struct Slot {
    /// FIFO successor, only touched under the lock of the pool queueing it
    next: AtomicU32,
    parked: spin::Mutex<Option<Box<Frame>>>,
}

pub(crate) struct Arena {
    slots: Box<[Slot]>,
    vacant: ArrayQueue<u32>,
}

impl Arena {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, NIL as usize);
        let slots = (0..capacity)
            .map(|_| Slot {
                next: AtomicU32::new(NIL),
                parked: spin::Mutex::new(None),
            })
            .collect();
        let vacant = ArrayQueue::new(capacity);
        for slot in 0..capacity as u32 {
            let _ = vacant.push(slot);
        }
        Self { slots, vacant }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Slots with no buffer constructed in them
    pub(crate) fn vacant(&self) -> usize {
        self.vacant.len()
    }

    /// Build a new buffer in a vacant slot. May call the global allocator.
    pub(crate) fn construct(&self, owner: PoolId) -> Option<Box<Frame>> {
        let slot = self.vacant.pop()?;
        Some(Frame::boxed(slot, owner))
    }

    /// Free a buffer's memory and give its slot back.
    pub(crate) fn destroy(&self, frame: Box<Frame>) {
        let slot = frame.slot;
        drop(frame);
        let _ = self.vacant.push(slot);
    }

    pub(crate) fn park(&self, frame: Box<Frame>) -> u32 {
        let slot = frame.slot;
        let entry = &self.slots[slot as usize];
        entry.next.store(NIL, Ordering::Relaxed);
        *entry.parked.lock() = Some(frame);
        slot
    }

    pub(crate) fn unpark(&self, slot: u32) -> Option<Box<Frame>> {
        self.slots.get(slot as usize)?.parked.lock().take()
    }

    pub(crate) fn next(&self, slot: u32) -> u32 {
        self.slots[slot as usize].next.load(Ordering::Relaxed)
    }

    pub(crate) fn set_next(&self, slot: u32, next: u32) {
        self.slots[slot as usize].next.store(next, Ordering::Relaxed);
    }
}
