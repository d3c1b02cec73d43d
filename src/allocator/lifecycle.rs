//! Pool lifecycle: create, extend, shrink and release.
//!
//! Every operation comes in two flavours. The plain variants construct and
//! destroy buffers through the global allocator and must only run in
//! ordinary context. The `_rt` variants only move already constructed
//! buffers between a pool and the reserve cache, one O(1) critical section
//! per buffer, so they are safe in real-time context.
//!
//! All of them partially succeed: the returned [`Provisioned`] says how
//! many buffers were actually moved.

use tracing::{debug, error, warn};

use super::SkbAllocator;
use crate::error::Result;
use crate::pool::{NewPool, PoolId, Provisioned};

impl SkbAllocator {
    /// Create a pool and populate it with `count` new buffers.
    ///
    /// Fails only if the pool table is full; a short population is
    /// reported through [`NewPool::provisioned`].
    pub fn pool_create(&self, count: usize) -> Result<NewPool> {
        let id = self.shared.open_pool()?;
        let provisioned = self.pool_extend(id, count);
        debug!(pool = %id, requested = count, actual = provisioned.actual, "pool created");
        Ok(NewPool { id, provisioned })
    }

    /// Create a pool from the reserve cache. Real-time safe.
    pub fn pool_create_rt(&self, count: usize) -> Result<NewPool> {
        let id = self.shared.open_pool()?;
        let provisioned = self.pool_extend_rt(id, count);
        Ok(NewPool { id, provisioned })
    }

    /// Construct up to `count` new buffers into `pool`.
    pub fn pool_extend(&self, pool: PoolId, count: usize) -> Provisioned {
        let shared = &self.shared;
        let Some(queue) = shared.queue(pool) else {
            warn!(pool = %pool, "extend of unknown pool");
            return Provisioned::new(count, 0);
        };

        let mut added = 0;
        while added < count {
            let Some(frame) = shared.arena.construct(pool) else {
                error!(pool = %pool, added, requested = count, "buffer construction failed: arena full");
                break;
            };

            let mut state = queue.lock();
            if !state.live {
                drop(state);
                shared.arena.destroy(frame);
                warn!(pool = %pool, "extend of released pool");
                break;
            }
            state.push_back(&shared.arena, frame);
            state.assigned += 1;
            if shared.counted(pool) {
                shared.stats.buffer_added();
            }
            drop(state);
            added += 1;
        }
        Provisioned::new(count, added)
    }

    /// Move up to `count` buffers from the reserve cache into `pool`.
    /// Real-time safe.
    pub fn pool_extend_rt(&self, pool: PoolId, count: usize) -> Provisioned {
        let shared = &self.shared;
        let mut added = 0;
        while added < count {
            let Some((mut cache, mut state)) = shared.lock_pair(shared.cache, pool) else {
                break;
            };
            if !state.live {
                break;
            }
            let Some(mut frame) = cache.pop_front(&shared.arena) else {
                drop((cache, state));
                warn!(pool = %pool, added, requested = count, "buffer allocation from reserve cache failed");
                break;
            };
            cache.assigned -= 1;

            frame.owner = pool;
            state.push_back(&shared.arena, frame);
            state.assigned += 1;
            shared.stats.buffer_added();
            added += 1;
        }
        Provisioned::new(count, added)
    }

    /// Destroy up to `count` free buffers of `pool`.
    pub fn pool_shrink(&self, pool: PoolId, count: usize) -> Provisioned {
        let shared = &self.shared;
        let Some(queue) = shared.queue(pool) else {
            return Provisioned::new(count, 0);
        };

        let mut removed = 0;
        while removed < count {
            let mut state = queue.lock();
            let Some(frame) = state.pop_front(&shared.arena) else {
                break;
            };
            state.assigned -= 1;
            if shared.counted(pool) {
                shared.stats.buffer_removed();
            }
            drop(state);

            shared.arena.destroy(frame);
            removed += 1;
        }
        Provisioned::new(count, removed)
    }

    /// Move up to `count` free buffers of `pool` back into the reserve
    /// cache. Real-time safe.
    pub fn pool_shrink_rt(&self, pool: PoolId, count: usize) -> Provisioned {
        let shared = &self.shared;
        let mut removed = 0;
        while removed < count {
            let Some((mut cache, mut state)) = shared.lock_pair(shared.cache, pool) else {
                break;
            };
            let Some(mut frame) = state.pop_front(&shared.arena) else {
                break;
            };
            state.assigned -= 1;
            shared.stats.buffer_removed();

            frame.owner = shared.cache;
            cache.push_back(&shared.arena, frame);
            cache.assigned += 1;
            removed += 1;
        }
        Provisioned::new(count, removed)
    }

    /// Destroy every buffer of `pool` and close it.
    ///
    /// All buffers should have been returned first. Any still in flight
    /// are destroyed when freed, and the pool id is reused only after the
    /// last of them is back.
    pub fn pool_release(&self, pool: PoolId) {
        if pool == self.shared.cache {
            warn!("refusing to release the reserve cache");
            return;
        }
        self.drain_and_close(pool);
        debug!(pool = %pool, "pool released");
    }

    /// Return every buffer of `pool` to the reserve cache and close it.
    /// Real-time safe.
    ///
    /// Buffers still in flight join the reserve cache when freed.
    pub fn pool_release_rt(&self, pool: PoolId) {
        if pool == self.shared.cache {
            return;
        }
        loop {
            let _ = self.pool_shrink_rt(pool, usize::MAX);
            if self.shared.try_close(pool, true) {
                break;
            }
        }
    }

    pub(super) fn drain_and_close(&self, pool: PoolId) {
        loop {
            let _ = self.pool_shrink(pool, usize::MAX);
            if self.shared.try_close(pool, false) {
                break;
            }
        }
    }
}
