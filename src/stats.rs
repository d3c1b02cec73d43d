//! Allocator diagnostics
//!
//! Process-wide counters owned by the allocator. They are updated inside
//! the critical section of the queue operation they describe, but are
//! informational only: readers may observe slightly stale values.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

#[derive(Default)]
pub(crate) struct PoolStats {
    pools_live: AtomicUsize,
    pools_live_max: AtomicUsize,
    buffers_live: AtomicUsize,
    buffers_live_max: AtomicUsize,
    alloc_failures: AtomicU64,
    balance_violations: AtomicU64,
}

impl PoolStats {
    pub(crate) fn pool_created(&self) {
        let live = self.pools_live.fetch_add(1, Ordering::Relaxed) + 1;
        self.pools_live_max.fetch_max(live, Ordering::Relaxed);
    }

    pub(crate) fn pool_released(&self) {
        saturating_dec(&self.pools_live);
    }

    pub(crate) fn buffer_added(&self) {
        let live = self.buffers_live.fetch_add(1, Ordering::Relaxed) + 1;
        self.buffers_live_max.fetch_max(live, Ordering::Relaxed);
    }

    pub(crate) fn buffer_removed(&self) {
        saturating_dec(&self.buffers_live);
    }

    pub(crate) fn alloc_failed(&self) {
        self.alloc_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn balance_violation(&self) {
        self.balance_violations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            pools_live: self.pools_live.load(Ordering::Relaxed),
            pools_live_max: self.pools_live_max.load(Ordering::Relaxed),
            buffers_live: self.buffers_live.load(Ordering::Relaxed),
            buffers_live_max: self.buffers_live_max.load(Ordering::Relaxed),
            alloc_failures: self.alloc_failures.load(Ordering::Relaxed),
            balance_violations: self.balance_violations.load(Ordering::Relaxed),
            ..StatsSnapshot::default()
        }
    }
}

fn saturating_dec(counter: &AtomicUsize) {
    let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
}

/// Point-in-time copy of the allocator counters
///
/// The reserve cache is accounted separately: its pool and buffers are not
/// part of the live counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Pools currently created
    pub pools_live: usize,
    /// High-water mark of `pools_live`
    pub pools_live_max: usize,
    /// Buffers assigned to pools
    pub buffers_live: usize,
    /// High-water mark of `buffers_live`
    pub buffers_live_max: usize,
    /// Free buffers left in the reserve cache
    pub cache_free: usize,
    /// Arena slots with no buffer constructed
    pub arena_vacant: usize,
    /// Allocations refused because a pool was empty
    pub alloc_failures: u64,
    /// Balance check failures (corruption signal)
    pub balance_violations: u64,
}

/// Accounting of a single pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolSnapshot {
    /// Buffers waiting in the free list
    pub free: usize,
    /// Buffers handed out and not returned yet
    pub outstanding: usize,
    /// Buffers belonging to the pool
    pub assigned: usize,
}
