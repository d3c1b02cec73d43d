//! Buffer allocator
//!
//! [`SkbAllocator`] owns the slot arena, the pool table, the reserve cache
//! and the diagnostics counters. Handles are cheap to clone and every
//! allocated [`Rtskb`] keeps the shared state alive until it is freed.
//!
//! Locking: each pool has a spin lock whose critical sections are O(1).
//! Operations spanning two pools take both locks in ascending pool id
//! order. Arena slot locks nest strictly inside pool locks.

use std::fmt;
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;
use tracing::{error, info, warn};

use crate::capture::CaptureSink;
use crate::config::PoolsConfig;
use crate::error::{AllocError, Result};
use crate::pool::arena::Arena;
use crate::pool::queue::{PoolQueue, QueueState};
use crate::pool::PoolId;
use crate::skb::{Frame, Rtskb, RTSKB_SIZE};
use crate::stats::{PoolSnapshot, PoolStats, StatsSnapshot};

mod handoff;
mod lifecycle;

#[cfg(test)]
mod tests;

/// State shared by the allocator handles and every buffer in flight
pub(crate) struct Shared {
    arena: Arena,
    pools: Box<[PoolQueue]>,
    free_ids: ArrayQueue<u16>,
    stats: PoolStats,
    capture: Option<Arc<dyn CaptureSink>>,
    check_balance: bool,
    cache: PoolId,
}

type Guard<'a> = spin::MutexGuard<'a, QueueState>;

impl Shared {
    fn new(config: &PoolsConfig, capture: Option<Arc<dyn CaptureSink>>) -> Self {
        let max_pools = config.max_pools.clamp(2, u16::MAX as usize);
        let pools = (0..max_pools).map(|_| PoolQueue::new()).collect();
        let free_ids = ArrayQueue::new(max_pools);
        for id in 0..max_pools as u16 {
            let _ = free_ids.push(id);
        }

        Self {
            arena: Arena::new(config.max_buffers),
            pools,
            free_ids,
            stats: PoolStats::default(),
            capture,
            check_balance: config.check_balance,
            // first id handed out by the table
            cache: PoolId::new(0),
        }
    }

    #[inline]
    fn queue(&self, id: PoolId) -> Option<&PoolQueue> {
        self.pools.get(id.index())
    }

    /// The reserve cache stays out of the live counters.
    #[inline]
    fn counted(&self, id: PoolId) -> bool {
        id != self.cache
    }

    /// Lock two distinct pools in id order, returning guards in argument order.
    fn lock_pair(&self, a: PoolId, b: PoolId) -> Option<(Guard<'_>, Guard<'_>)> {
        if a == b {
            return None;
        }
        let qa = self.queue(a)?;
        let qb = self.queue(b)?;
        if a < b {
            let ga = qa.lock();
            let gb = qb.lock();
            Some((ga, gb))
        } else {
            let gb = qb.lock();
            let ga = qa.lock();
            Some((ga, gb))
        }
    }

    fn verify(&self, id: PoolId, state: &QueueState) {
        if self.check_balance && !state.is_balanced() {
            self.stats.balance_violation();
            let snap = state.snapshot();
            error!(
                pool = %id,
                free = snap.free,
                outstanding = snap.outstanding,
                assigned = snap.assigned,
                "pool balance mismatch"
            );
        }
    }

    /// Take a pool id from the table and mark it live.
    fn open_pool(&self) -> Result<PoolId> {
        let id = PoolId::new(self.free_ids.pop().ok_or(AllocError::PoolTableFull)?);
        let queue = self.queue(id).ok_or(AllocError::UnknownPool(id))?;
        let mut state = queue.lock();
        state.open();
        if self.counted(id) {
            self.stats.pool_created();
        }
        Ok(id)
    }

    /// Close an empty pool. Returns `false` if buffers were queued
    /// concurrently and the pool needs draining again.
    ///
    /// With `to_cache`, buffers still in flight go to the reserve cache
    /// when they come back instead of being destroyed.
    fn try_close(&self, id: PoolId, to_cache: bool) -> bool {
        let Some(queue) = self.queue(id) else {
            return true;
        };
        let mut state = queue.lock();
        if !state.live {
            return true;
        }
        if state.len() > 0 {
            return false;
        }
        state.live = false;
        state.to_cache = to_cache;
        let outstanding = state.outstanding;
        if outstanding == 0 {
            state.retire();
        }
        if self.counted(id) {
            self.stats.pool_released();
        }
        drop(state);

        if outstanding == 0 {
            let _ = self.free_ids.push(id.raw());
        } else {
            warn!(pool = %id, outstanding, "pool released with buffers in flight");
        }
        true
    }

    fn alloc(self: &Arc<Self>, pool: PoolId, size: usize) -> Result<Rtskb> {
        if size > RTSKB_SIZE {
            warn!(pool = %pool, size, capacity = RTSKB_SIZE, "allocation larger than buffer capacity");
            return Err(AllocError::SizeExceedsCapacity {
                requested: size,
                capacity: RTSKB_SIZE,
            });
        }
        if pool == self.cache {
            warn!("allocation from the reserve cache refused");
            return Err(AllocError::UnknownPool(pool));
        }
        let queue = self.queue(pool).ok_or(AllocError::UnknownPool(pool))?;

        let mut state = queue.lock();
        if !state.live {
            return Err(AllocError::UnknownPool(pool));
        }
        let Some(mut frame) = state.pop_front(&self.arena) else {
            drop(state);
            self.stats.alloc_failed();
            return Err(AllocError::Exhausted);
        };
        state.outstanding += 1;
        drop(state);

        debug_assert_eq!(frame.owner, pool);
        frame.reset(size);
        Ok(Rtskb::from_frame(frame, Arc::clone(self)))
    }

    /// Return a whole chain, each member to its own owner pool.
    pub(crate) fn release(self: &Arc<Self>, mut frame: Box<Frame>) {
        let mut next = frame.chain.take();
        self.return_one(frame);
        while let Some(mut member) = next {
            next = member.frame_mut().chain.take();
            drop(member);
        }
    }

    fn return_one(self: &Arc<Self>, mut frame: Box<Frame>) {
        let Some(companion) = frame.share.take() else {
            self.enqueue_returned(frame);
            return;
        };
        let Some(sink) = self.capture.as_ref() else {
            drop(companion);
            self.enqueue_returned(frame);
            return;
        };

        // The companion takes this buffer's place in its pool; the buffer
        // moves to the capture pool and on to the sink.
        let mut companion = companion.into_frame();
        std::mem::swap(&mut frame.owner, &mut companion.owner);
        self.enqueue_returned(companion);
        sink.deliver(Rtskb::from_frame(frame, Arc::clone(self)));
    }

    fn enqueue_returned(&self, frame: Box<Frame>) {
        let owner = frame.owner;
        let Some(queue) = self.queue(owner) else {
            error!(pool = %owner, "buffer returned to unknown pool");
            self.arena.destroy(frame);
            return;
        };

        let mut state = queue.lock();
        if state.outstanding == 0 {
            self.stats.balance_violation();
            error!(pool = %owner, "buffer returned to pool with nothing outstanding");
        } else {
            state.outstanding -= 1;
        }

        if state.live {
            state.push_back(&self.arena, frame);
            self.verify(owner, &state);
            return;
        }

        // Late return to a released pool: the buffer has no home left.
        state.assigned = state.assigned.saturating_sub(1);
        let to_cache = state.to_cache;
        let last = state.outstanding == 0;
        if last {
            state.retire();
        }
        if self.counted(owner) {
            self.stats.buffer_removed();
        }
        drop(state);

        warn!(pool = %owner, "buffer returned after its pool was released");
        if to_cache {
            self.park_in_cache(frame);
        } else {
            self.arena.destroy(frame);
        }
        if last {
            let _ = self.free_ids.push(owner.raw());
        }
    }

    /// Hand a constructed buffer to the reserve cache, destroying it only
    /// if the cache is already closed.
    fn park_in_cache(&self, mut frame: Box<Frame>) {
        let Some(queue) = self.queue(self.cache) else {
            self.arena.destroy(frame);
            return;
        };
        let mut cache = queue.lock();
        if !cache.live {
            drop(cache);
            self.arena.destroy(frame);
            return;
        }
        frame.owner = self.cache;
        cache.push_back(&self.arena, frame);
        cache.assigned += 1;
    }
}

/// Handle to a set of buffer pools sharing one arena and reserve cache
#[derive(Clone)]
pub struct SkbAllocator {
    shared: Arc<Shared>,
    global: PoolId,
}

impl SkbAllocator {
    /// Build the arena, fill the reserve cache and create the global pool.
    ///
    /// Fails if either cannot be fully populated.
    pub fn new(config: &PoolsConfig) -> Result<Self> {
        Self::build(config, None)
    }

    /// Like [`SkbAllocator::new`], with a capture sink for shared buffers.
    pub fn with_capture(config: &PoolsConfig, sink: Arc<dyn CaptureSink>) -> Result<Self> {
        Self::build(config, Some(sink))
    }

    fn build(config: &PoolsConfig, capture: Option<Arc<dyn CaptureSink>>) -> Result<Self> {
        let shared = Arc::new(Shared::new(config, capture));
        let cache = shared.open_pool()?;
        debug_assert_eq!(cache, shared.cache);

        let mut alloc = Self {
            shared,
            global: cache,
        };

        let filled = alloc.pool_extend(cache, config.cache_size);
        if let Err(e) = filled.require(cache) {
            error!(error = %e, "failed to fill reserve cache");
            alloc.drain_and_close(cache);
            return Err(e);
        }

        let global = alloc.pool_create(config.global_rtskbs)?;
        if let Err(e) = global.require() {
            error!(error = %e, "failed to create global pool");
            alloc.drain_and_close(global.id);
            alloc.drain_and_close(cache);
            return Err(e);
        }
        alloc.global = global.id;

        info!(
            cache = config.cache_size,
            global = config.global_rtskbs,
            arena = alloc.shared.arena.capacity(),
            "buffer pools initialized"
        );
        Ok(alloc)
    }

    /// The reserve cache used by the real-time lifecycle operations
    pub fn cache(&self) -> PoolId {
        self.shared.cache
    }

    /// The default pool created at start-up
    pub fn global_pool(&self) -> PoolId {
        self.global
    }

    /// Take a buffer from `pool` with a window of `size` bytes.
    ///
    /// Never blocks. An empty pool yields [`AllocError::Exhausted`] and
    /// leaves every pool untouched; a size above [`RTSKB_SIZE`] is refused
    /// before the pool is looked at.
    #[inline]
    pub fn alloc(&self, pool: PoolId, size: usize) -> Result<Rtskb> {
        self.shared.alloc(pool, size)
    }

    /// Return a buffer and its chain to their owner pools.
    ///
    /// Same as dropping it.
    #[inline]
    pub fn free(&self, skb: Rtskb) {
        drop(skb);
    }

    /// Allocator-wide counters
    pub fn stats(&self) -> StatsSnapshot {
        let mut snap = self.shared.stats.snapshot();
        snap.cache_free = self
            .shared
            .queue(self.shared.cache)
            .map(|q| q.lock().len())
            .unwrap_or(0);
        snap.arena_vacant = self.shared.arena.vacant();
        snap
    }

    /// Accounting of a live pool
    pub fn pool_stats(&self, pool: PoolId) -> Option<PoolSnapshot> {
        let state = self.shared.queue(pool)?.lock();
        state.live.then(|| state.snapshot())
    }

    /// Check `free + outstanding == assigned` for one pool.
    pub fn check_balance(&self, pool: PoolId) -> bool {
        match self.shared.queue(pool) {
            Some(queue) => {
                let state = queue.lock();
                !state.live || state.is_balanced()
            }
            None => false,
        }
    }

    /// Release the global pool and the reserve cache, and close the
    /// capture sink.
    ///
    /// Buffers still in flight are destroyed when they come back. Buffers
    /// already delivered to the sink stay with its consumer.
    pub fn shutdown(self) {
        self.drain_and_close(self.global);
        self.drain_and_close(self.shared.cache);
        if let Some(sink) = &self.shared.capture {
            sink.close();
        }
        let stats = self.stats();
        info!(
            pools_live_max = stats.pools_live_max,
            buffers_live_max = stats.buffers_live_max,
            "buffer pools released"
        );
    }
}

impl fmt::Debug for SkbAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SkbAllocator")
            .field("cache", &self.shared.cache)
            .field("global", &self.global)
            .field("capture", &self.shared.capture.is_some())
            .finish()
    }
}
