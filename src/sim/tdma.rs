//! TDMA calibration rounds
//!
//! A TDMA master builds a short-lived pool for every calibration round
//! from real-time context, so it only ever touches the reserve cache.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::allocator::SkbAllocator;

const CAL_FRAME_LEN: usize = 64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CalibrationStats {
    /// Calibration pools created and released
    pub cycles: u64,
    /// Rounds whose pool came out smaller than requested
    pub shortfalls: u64,
    /// Calibration frames sent
    pub frames: u64,
    /// Rounds skipped because no pool id was free
    pub skipped: u64,
}

pub(super) fn run(
    allocator: &SkbAllocator,
    cal_rtskbs: usize,
    interval: Duration,
    stop: &AtomicBool,
) -> CalibrationStats {
    let mut stats = CalibrationStats::default();
    let mut held = Vec::with_capacity(cal_rtskbs);

    while !stop.load(Ordering::Acquire) {
        match allocator.pool_create_rt(cal_rtskbs) {
            Ok(pool) => {
                if !pool.provisioned.is_complete() {
                    stats.shortfalls += 1;
                }
                for _ in 0..pool.provisioned.actual {
                    match allocator.alloc(pool.id, CAL_FRAME_LEN) {
                        Ok(skb) => held.push(skb),
                        Err(_) => break,
                    }
                }
                stats.frames += held.len() as u64;
                held.clear();

                allocator.pool_release_rt(pool.id);
                stats.cycles += 1;
            }
            Err(e) => {
                warn!(error = %e, "calibration round skipped");
                stats.skipped += 1;
            }
        }
        std::thread::sleep(interval);
    }

    debug!(cycles = stats.cycles, "calibration stopped");
    stats
}
