//! Per-pool free list and accounting.

use crate::pool::arena::{Arena, NIL};
use crate::skb::Frame;
use crate::stats::PoolSnapshot;

pub(crate) struct PoolQueue {
    state: spin::Mutex<QueueState>,
}

impl PoolQueue {
    pub(crate) fn new() -> Self {
        Self {
            state: spin::Mutex::new(QueueState::closed()),
        }
    }

    #[inline]
    pub(crate) fn lock(&self) -> spin::MutexGuard<'_, QueueState> {
        self.state.lock()
    }
}

/// Free list plus the counters behind the balance invariant
/// `len + outstanding == assigned`.
pub(crate) struct QueueState {
    head: u32,
    tail: u32,
    len: usize,
    /// Buffers handed out and not yet returned
    pub(crate) outstanding: usize,
    /// Buffers belonging to this pool, queued or not
    pub(crate) assigned: usize,
    pub(crate) live: bool,
    /// Late returns go to the reserve cache
    pub(crate) to_cache: bool,
}

impl QueueState {
    fn closed() -> Self {
        Self {
            head: NIL,
            tail: NIL,
            len: 0,
            outstanding: 0,
            assigned: 0,
            live: false,
            to_cache: false,
        }
    }

    /// Reinitialize for a new pool occupying this table entry.
    pub(crate) fn open(&mut self) {
        *self = Self::closed();
        self.live = true;
    }

    /// Forget everything but keep the entry closed.
    pub(crate) fn retire(&mut self) {
        *self = Self::closed();
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn push_back(&mut self, arena: &Arena, frame: Box<Frame>) {
        let slot = arena.park(frame);
        if self.tail == NIL {
            self.head = slot;
        } else {
            arena.set_next(self.tail, slot);
        }
        self.tail = slot;
        self.len += 1;
    }

    pub(crate) fn pop_front(&mut self, arena: &Arena) -> Option<Box<Frame>> {
        if self.head == NIL {
            return None;
        }
        let slot = self.head;
        self.head = arena.next(slot);
        if self.head == NIL {
            self.tail = NIL;
        }
        self.len -= 1;
        arena.unpark(slot)
    }

    pub(crate) fn is_balanced(&self) -> bool {
        self.len + self.outstanding == self.assigned
    }

    pub(crate) fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            free: self.len,
            outstanding: self.outstanding,
            assigned: self.assigned,
        }
    }
}
