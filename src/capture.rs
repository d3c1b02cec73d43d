//! Packet capture hand-off
//!
//! A capture sink is a slow, best-effort consumer that keeps buffers for as
//! long as it likes. Buffers are marked with [`SkbAllocator::share`]; once
//! the stack frees a marked buffer, a companion taken from the capture pool
//! replaces it in its original pool and the buffer itself is delivered to
//! the sink, now owned by the capture pool.
//!
//! [`SkbAllocator::share`]: crate::SkbAllocator::share

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::skb::Rtskb;

/// Receiver of shared buffers.
///
/// `deliver` runs inside the free path of whatever context released the
/// buffer, possibly a real-time one. It must not block.
pub trait CaptureSink: Send + Sync {
    /// Take ownership of a buffer the stack is done with.
    fn deliver(&self, skb: Rtskb);

    /// Stop accepting buffers and let go of any handle that could keep
    /// delivered buffers, and through them the allocator, alive.
    /// Called once from [`SkbAllocator::shutdown`].
    ///
    /// [`SkbAllocator::shutdown`]: crate::SkbAllocator::shutdown
    fn close(&self) {}
}

/// Capture sink feeding a bounded channel
///
/// When the channel is full the buffer is dropped, which returns it to the
/// capture pool right away. Once closed, the sender is gone and every
/// further delivery counts as dropped; buffers already queued stay with
/// the receiver.
pub struct ChannelCapture {
    tx: spin::Mutex<Option<Sender<Rtskb>>>,
    dropped: AtomicU64,
}

impl ChannelCapture {
    /// Create a sink with room for `depth` pending buffers.
    pub fn bounded(depth: usize) -> (Self, Receiver<Rtskb>) {
        let (tx, rx) = crossbeam_channel::bounded(depth);
        (
            Self {
                tx: spin::Mutex::new(Some(tx)),
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    /// Buffers discarded because the consumer fell behind
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl CaptureSink for ChannelCapture {
    fn deliver(&self, skb: Rtskb) {
        let rejected = match self.tx.lock().as_ref() {
            Some(tx) => match tx.try_send(skb) {
                Ok(()) => None,
                Err(TrySendError::Full(skb)) | Err(TrySendError::Disconnected(skb)) => Some(skb),
            },
            None => Some(skb),
        };
        // Returned to the capture pool outside the lock
        if let Some(skb) = rejected {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            drop(skb);
        }
    }

    fn close(&self) {
        let tx = self.tx.lock().take();
        drop(tx);
    }
}
