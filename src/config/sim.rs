//! Workload simulator configuration

use serde::Deserialize;
use std::time::Duration;

/// Shape of the simulated driver/stack/capture workload
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// How long to run (e.g., "5s", "1m")
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    /// Receive ring entries; the driver pool holds twice as many buffers
    pub rx_ring: usize,
    /// Size of generated frames in bytes
    pub frame_size: usize,
    /// Interval between simulated receive interrupts
    #[serde(with = "humantime_serde")]
    pub rx_interval: Duration,
    /// Share received frames with a capture consumer
    pub capture: bool,
    /// Pending frames the capture channel holds before dropping
    pub capture_depth: usize,
    /// Buffers in the capture pool
    pub capture_rtskbs: usize,
    /// Buffers in each calibration pool built from the reserve cache
    pub cal_rtskbs: usize,
    /// Clone every Nth received frame into the global pool (0 = never)
    pub clone_every: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(5),
            rx_ring: 32,
            frame_size: 1514,
            rx_interval: Duration::from_micros(100),
            capture: true,
            capture_depth: 64,
            capture_rtskbs: 64,
            cal_rtskbs: 8,
            clone_every: 16,
        }
    }
}
