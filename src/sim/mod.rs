//! Workload simulator
//!
//! Drives an allocator the way a real-time network stack does:
//!
//! - an rx driver thread filling a receive ring and refilling it per frame
//! - a stack thread that shares frames with capture, hands them to a
//!   socket pool, clones some into the global pool and answers each with
//!   a two-fragment transmit chain
//! - a TDMA thread building and tearing down calibration pools from the
//!   reserve cache
//! - a capture thread draining the capture channel
//!
//! Every pool the simulator creates is released before [`run`] returns.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::allocator::SkbAllocator;
use crate::capture::ChannelCapture;
use crate::config::SimConfig;
use crate::error::AllocError;
use crate::pool::PoolId;
use crate::skb::Rtskb;
use crate::stats::StatsSnapshot;

mod driver;
mod stack;
mod tdma;

pub use driver::{DriverStats, RxRing};
pub use stack::StackStats;
pub use tdma::CalibrationStats;

/// Calibration rounds run this many receive intervals apart
const CAL_INTERVAL_FACTOR: u32 = 10;

/// Pool released when dropped
pub(crate) struct ScopedPool {
    allocator: SkbAllocator,
    id: PoolId,
}

impl ScopedPool {
    /// Create a fully populated pool of `count` buffers.
    pub(crate) fn create(allocator: &SkbAllocator, count: usize) -> Result<Self, AllocError> {
        let pool = allocator.pool_create(count)?;
        let scoped = Self {
            allocator: allocator.clone(),
            id: pool.id,
        };
        pool.require()?;
        Ok(scoped)
    }

    pub(crate) fn id(&self) -> PoolId {
        self.id
    }
}

impl Drop for ScopedPool {
    fn drop(&mut self) {
        self.allocator.pool_release(self.id);
    }
}

/// The consumer end of a [`ChannelCapture`] installed on the allocator
pub struct CaptureTap {
    pub sink: Arc<ChannelCapture>,
    pub rx: Receiver<Rtskb>,
}

/// Simulator errors
#[derive(Debug)]
pub enum SimError {
    /// Setting up a pool failed
    Alloc(AllocError),
    /// A worker thread could not be started
    Spawn(std::io::Error),
    /// A worker thread panicked
    Panicked(&'static str),
}

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimError::Alloc(e) => write!(f, "pool setup failed: {}", e),
            SimError::Spawn(e) => write!(f, "failed to spawn thread: {}", e),
            SimError::Panicked(name) => write!(f, "{} thread panicked", name),
        }
    }
}

impl std::error::Error for SimError {}

impl From<AllocError> for SimError {
    fn from(e: AllocError) -> Self {
        SimError::Alloc(e)
    }
}

impl From<std::io::Error> for SimError {
    fn from(e: std::io::Error) -> Self {
        SimError::Spawn(e)
    }
}

/// Capture consumer counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CaptureStats {
    /// Frames received by the consumer
    pub captured: u64,
    /// Bytes in captured windows
    pub bytes: u64,
    /// Frames the sink discarded because the channel was full
    pub dropped: u64,
}

/// Outcome of one simulator run
#[derive(Debug, Clone, Serialize)]
pub struct SimReport {
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
    pub driver: DriverStats,
    pub stack: StackStats,
    pub calibration: CalibrationStats,
    pub capture: Option<CaptureStats>,
    /// Every pool passed its balance check before release
    pub balanced: bool,
    /// Allocator counters after the simulator's pools were released
    pub allocator: StatsSnapshot,
}

/// Stop flags of the background threads, raised on every exit path
struct StopFlags {
    tdma: Arc<AtomicBool>,
    capture: Arc<AtomicBool>,
}

impl StopFlags {
    fn new() -> Self {
        Self {
            tdma: Arc::new(AtomicBool::new(false)),
            capture: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Drop for StopFlags {
    fn drop(&mut self) {
        self.tdma.store(true, Ordering::Release);
        self.capture.store(true, Ordering::Release);
    }
}

fn join<T>(handle: JoinHandle<T>, name: &'static str) -> Result<T, SimError> {
    handle.join().map_err(|_| SimError::Panicked(name))
}

/// Run the workload for `config.duration`.
///
/// Capture runs only when it is enabled in `config` and a tap is given.
pub fn run(
    allocator: &SkbAllocator,
    config: &SimConfig,
    tap: Option<CaptureTap>,
) -> Result<SimReport, SimError> {
    let started = Instant::now();
    let tap = tap.filter(|_| config.capture);

    let ring = RxRing::new(allocator.clone(), config.rx_ring, config.frame_size)?;
    let socket = ScopedPool::create(allocator, config.rx_ring)?;
    let capture = match tap {
        Some(_) => Some(ScopedPool::create(allocator, config.capture_rtskbs)?),
        None => None,
    };
    let ring_pool = ring.pool();

    info!(
        rx_ring = config.rx_ring,
        frame_size = config.frame_size,
        capture = capture.is_some(),
        duration = ?config.duration,
        "simulation starting"
    );

    let (backlog_tx, backlog_rx) = crossbeam_channel::bounded(config.rx_ring);
    let tx_queue = Arc::new(Mutex::new(Vec::with_capacity(config.rx_ring)));
    let stop = StopFlags::new();

    let capture_thread = match &tap {
        Some(tap) => {
            let rx = tap.rx.clone();
            let stop = stop.capture.clone();
            Some(
                thread::Builder::new()
                    .name("rtskb-capture".into())
                    .spawn(move || drain_capture(rx, &stop))?,
            )
        }
        None => None,
    };

    let tdma_thread = {
        let allocator = allocator.clone();
        let stop = stop.tdma.clone();
        let cal_rtskbs = config.cal_rtskbs;
        let interval = config.rx_interval * CAL_INTERVAL_FACTOR;
        thread::Builder::new()
            .name("rtskb-tdma".into())
            .spawn(move || tdma::run(&allocator, cal_rtskbs, interval, &stop))?
    };

    let stack = stack::Stack {
        allocator: allocator.clone(),
        socket_pool: socket.id(),
        capture_pool: capture.as_ref().map(ScopedPool::id),
        clone_every: config.clone_every,
        tx_queue: tx_queue.clone(),
        stats: StackStats::default(),
    };
    let stack_thread = thread::Builder::new()
        .name("rtskb-stack".into())
        .spawn(move || stack.run(backlog_rx))?;

    let driver_thread = {
        let frame = driver::frame_template(config.frame_size);
        let tx_queue = tx_queue.clone();
        let interval = config.rx_interval;
        let duration = config.duration;
        thread::Builder::new()
            .name("rtskb-rx".into())
            .spawn(move || driver::run(ring, frame, backlog_tx, &tx_queue, interval, duration))?
    };

    // Shut down upstream first so no buffer outlives the pools below
    let driver_result = join(driver_thread, "rx driver");
    let stack_result = join(stack_thread, "stack");
    stop.tdma.store(true, Ordering::Release);
    let tdma_result = join(tdma_thread, "tdma");

    let mut scratch = vec![0u8; crate::skb::RTSKB_SIZE];
    let late_tx = driver::complete_tx(&tx_queue, &mut scratch);

    stop.capture.store(true, Ordering::Release);
    let capture_result = capture_thread.map(|t| join(t, "capture")).transpose();

    let (ring, mut driver_stats) = driver_result?;
    driver_stats.tx_completed += late_tx;
    let stack_stats = stack_result?;
    let calibration = tdma_result?;
    let mut capture_stats = capture_result?;
    if let (Some(stats), Some(tap)) = (capture_stats.as_mut(), tap.as_ref()) {
        stats.dropped = tap.sink.dropped();
    }

    let mut pools = vec![
        allocator.cache(),
        allocator.global_pool(),
        ring_pool,
        socket.id(),
    ];
    pools.extend(capture.as_ref().map(ScopedPool::id));
    let balanced = pools.iter().all(|&pool| {
        let ok = allocator.check_balance(pool);
        if !ok {
            warn!(pool = %pool, "pool out of balance after simulation");
        }
        ok
    });

    drop(ring);
    drop(socket);
    drop(capture);

    let report = SimReport {
        elapsed: started.elapsed(),
        driver: driver_stats,
        stack: stack_stats,
        calibration,
        capture: capture_stats,
        balanced,
        allocator: allocator.stats(),
    };
    info!(
        received = report.driver.received,
        delivered = report.stack.delivered,
        tx = report.driver.tx_completed,
        balanced,
        "simulation finished"
    );
    Ok(report)
}

fn drain_capture(rx: Receiver<Rtskb>, stop: &AtomicBool) -> CaptureStats {
    let mut stats = CaptureStats::default();
    let mut take = |skb: Rtskb| {
        stats.captured += 1;
        stats.bytes += skb.len() as u64;
    };

    loop {
        match rx.recv_timeout(Duration::from_millis(10)) {
            Ok(skb) => take(skb),
            Err(RecvTimeoutError::Timeout) => {
                if stop.load(Ordering::Acquire) {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    for skb in rx.try_iter() {
        take(skb);
    }

    debug!(captured = stats.captured, "capture stopped");
    stats
}
