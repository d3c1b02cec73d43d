//! Prometheus metrics for rtskb
//!
//! Mirrors the allocator's diagnostic counters into gauges served at
//! /metrics. The allocator itself never touches the registry; the server
//! copies a [`StatsSnapshot`] in on each scrape.

use prometheus::{IntCounter, IntGauge, IntGaugeVec, Opts, Registry};

use crate::pool::PoolId;
use crate::stats::{PoolSnapshot, StatsSnapshot};

mod server;

pub use server::MetricsServer;

/// All rtskb metrics in one place
#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,

    // Pool table
    pub pools_live: IntGauge,
    pub pools_live_max: IntGauge,

    // Buffers
    pub buffers_live: IntGauge,
    pub buffers_live_max: IntGauge,
    pub cache_free: IntGauge,
    pub arena_vacant: IntGauge,

    // Per pool accounting
    pub pool_buffers: IntGaugeVec,

    // Failure signals
    pub alloc_failures_total: IntCounter,
    pub balance_violations_total: IntCounter,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let pools_live = IntGauge::with_opts(Opts::new(
            "rtskb_pools_live",
            "Pools currently created (reserve cache excluded)",
        ))
        .unwrap();

        let pools_live_max = IntGauge::with_opts(Opts::new(
            "rtskb_pools_live_max",
            "Maximum concurrent pools since startup",
        ))
        .unwrap();

        let buffers_live = IntGauge::with_opts(Opts::new(
            "rtskb_buffers_live",
            "Buffers assigned to pools (reserve cache excluded)",
        ))
        .unwrap();

        let buffers_live_max = IntGauge::with_opts(Opts::new(
            "rtskb_buffers_live_max",
            "Maximum assigned buffers since startup",
        ))
        .unwrap();

        let cache_free = IntGauge::with_opts(Opts::new(
            "rtskb_cache_free",
            "Buffers left in the reserve cache",
        ))
        .unwrap();

        let arena_vacant = IntGauge::with_opts(Opts::new(
            "rtskb_arena_vacant",
            "Arena slots with no buffer constructed",
        ))
        .unwrap();

        let pool_buffers = IntGaugeVec::new(
            Opts::new("rtskb_pool_buffers", "Buffers of a pool by state"),
            &["pool", "state"],
        )
        .unwrap();

        let alloc_failures_total = IntCounter::with_opts(Opts::new(
            "rtskb_alloc_failures_total",
            "Allocations refused because the pool was empty",
        ))
        .unwrap();

        let balance_violations_total = IntCounter::with_opts(Opts::new(
            "rtskb_balance_violations_total",
            "Pool balance check failures",
        ))
        .unwrap();

        registry.register(Box::new(pools_live.clone())).unwrap();
        registry.register(Box::new(pools_live_max.clone())).unwrap();
        registry.register(Box::new(buffers_live.clone())).unwrap();
        registry.register(Box::new(buffers_live_max.clone())).unwrap();
        registry.register(Box::new(cache_free.clone())).unwrap();
        registry.register(Box::new(arena_vacant.clone())).unwrap();
        registry.register(Box::new(pool_buffers.clone())).unwrap();
        registry
            .register(Box::new(alloc_failures_total.clone()))
            .unwrap();
        registry
            .register(Box::new(balance_violations_total.clone()))
            .unwrap();

        Self {
            registry,
            pools_live,
            pools_live_max,
            buffers_live,
            buffers_live_max,
            cache_free,
            arena_vacant,
            pool_buffers,
            alloc_failures_total,
            balance_violations_total,
        }
    }

    /// Copy an allocator snapshot into the gauges.
    pub fn observe(&self, stats: &StatsSnapshot) {
        self.pools_live.set(stats.pools_live as i64);
        self.pools_live_max.set(stats.pools_live_max as i64);
        self.buffers_live.set(stats.buffers_live as i64);
        self.buffers_live_max.set(stats.buffers_live_max as i64);
        self.cache_free.set(stats.cache_free as i64);
        self.arena_vacant.set(stats.arena_vacant as i64);

        // Counters only move forward; add the delta since the last observation
        let failures = stats.alloc_failures;
        let seen = self.alloc_failures_total.get();
        if failures > seen {
            self.alloc_failures_total.inc_by(failures - seen);
        }
        let violations = stats.balance_violations;
        let seen = self.balance_violations_total.get();
        if violations > seen {
            self.balance_violations_total.inc_by(violations - seen);
        }
    }

    /// Record one pool's accounting under its id.
    pub fn observe_pool(&self, pool: PoolId, snap: &PoolSnapshot) {
        let id = pool.index().to_string();
        self.pool_buffers
            .with_label_values(&[id.as_str(), "free"])
            .set(snap.free as i64);
        self.pool_buffers
            .with_label_values(&[id.as_str(), "outstanding"])
            .set(snap.outstanding as i64);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
