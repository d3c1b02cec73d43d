//! Simulated NIC receive ring

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use bytes::{BufMut, Bytes, BytesMut};
use crossbeam_channel::{Sender, TrySendError};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use super::ScopedPool;
use crate::allocator::SkbAllocator;
use crate::error::AllocError;
use crate::skb::{Rtskb, RTSKB_SIZE};

pub(super) const ETH_HLEN: usize = 14;
pub(super) const ETH_P_IP: u16 = 0x0800;

/// Headroom reserved so the network header lands 4-byte aligned
const NET_IP_ALIGN: usize = 2;

const DRIVER_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];
const PEER_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x02];

/// Build the Ethernet frame the simulated peer keeps sending.
pub(super) fn frame_template(size: usize) -> Bytes {
    let mut frame = BytesMut::with_capacity(size.max(ETH_HLEN));
    frame.put_slice(&DRIVER_MAC);
    frame.put_slice(&PEER_MAC);
    frame.put_u16(ETH_P_IP);
    let mut fill = 0u8;
    while frame.len() < size {
        frame.put_u8(fill);
        fill = fill.wrapping_add(1);
    }
    frame.truncate(size);
    frame.freeze()
}

/// Driver-side counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DriverStats {
    /// Frames handed to the stack
    pub received: u64,
    /// Frames dropped because no replacement buffer was free
    pub dropped_no_buffer: u64,
    /// Frames dropped because the stack backlog was full
    pub dropped_backlog: u64,
    /// Transmit chains completed and freed
    pub tx_completed: u64,
}

/// Receive ring of pre-allocated buffers, refilled on every reception.
///
/// The ring's pool holds twice the ring size: one half sits in the ring,
/// the other half covers buffers being replaced while received frames
/// travel up the stack.
pub struct RxRing {
    allocator: SkbAllocator,
    ring: VecDeque<Rtskb>,
    align: usize,
    // dropped after the ring entries
    pool: ScopedPool,
}

impl RxRing {
    pub fn new(allocator: SkbAllocator, entries: usize, frame_size: usize) -> Result<Self, AllocError> {
        let pool = ScopedPool::create(&allocator, entries * 2)?;
        let align = if frame_size + NET_IP_ALIGN <= RTSKB_SIZE {
            NET_IP_ALIGN
        } else {
            0
        };
        let mut rx = Self {
            allocator,
            ring: VecDeque::with_capacity(entries),
            align,
            pool,
        };
        for _ in 0..entries {
            let skb = rx.fresh()?;
            rx.ring.push_back(skb);
        }
        Ok(rx)
    }

    /// Pool backing the ring
    pub fn pool(&self) -> crate::pool::PoolId {
        self.pool.id()
    }

    fn fresh(&self) -> Result<Rtskb, AllocError> {
        let mut skb = self.allocator.alloc(self.pool.id(), 0)?;
        if skb.reserve(self.align).is_err() {
            warn!(align = self.align, "rx headroom does not fit");
        }
        Ok(skb)
    }

    /// Receive `frame` into the oldest ring entry.
    ///
    /// The filled buffer is returned only if a replacement could be
    /// allocated; otherwise the frame is dropped and the entry reused.
    pub fn receive(&mut self, frame: &[u8], time_stamp: u64) -> Option<Rtskb> {
        let mut skb = self.ring.pop_front()?;
        if skb.put_slice(frame).is_err() {
            warn!(len = frame.len(), "frame larger than rx buffer");
            skb.trim(0);
            self.ring.push_back(skb);
            return None;
        }
        skb.meta_mut().time_stamp = time_stamp;

        match self.fresh() {
            Ok(replacement) => {
                self.ring.push_back(replacement);
                Some(skb)
            }
            Err(_) => {
                skb.trim(0);
                self.ring.push_back(skb);
                None
            }
        }
    }
}

/// Free completed transmit chains, copying each member out the way a
/// device would. Returns the number of chains completed.
pub(super) fn complete_tx(queue: &Mutex<Vec<Rtskb>>, scratch: &mut [u8]) -> u64 {
    let done = std::mem::take(&mut *queue.lock());
    let mut completed = 0;
    for chain in done {
        for member in chain.chain_iter() {
            if let Err(e) = member.copy_and_csum_dev(scratch) {
                warn!(error = %e, "tx copy failed");
            }
        }
        completed += 1;
    }
    completed
}

/// Receive interrupt loop. Returns the ring so its pool outlives every
/// frame still travelling through the stack.
pub(super) fn run(
    mut ring: RxRing,
    frame: Bytes,
    backlog: Sender<Rtskb>,
    tx_queue: &Mutex<Vec<Rtskb>>,
    interval: Duration,
    duration: Duration,
) -> (RxRing, DriverStats) {
    let mut stats = DriverStats::default();
    let mut scratch = vec![0u8; RTSKB_SIZE];
    let start = Instant::now();

    while start.elapsed() < duration {
        stats.tx_completed += complete_tx(tx_queue, &mut scratch);

        let stamp = start.elapsed().as_nanos() as u64;
        match ring.receive(&frame, stamp) {
            Some(skb) => match backlog.try_send(skb) {
                Ok(()) => stats.received += 1,
                Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                    stats.dropped_backlog += 1
                }
            },
            None => stats.dropped_no_buffer += 1,
        }

        std::thread::sleep(interval);
    }

    stats.tx_completed += complete_tx(tx_queue, &mut scratch);
    debug!(
        received = stats.received,
        dropped = stats.dropped_no_buffer + stats.dropped_backlog,
        "rx driver stopped"
    );
    (ring, stats)
}
