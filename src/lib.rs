//! rtskb - Real-time socket buffer pools
//!
//! Fixed-capacity pools of pre-built packet buffers for a real-time
//! network stack. Allocation and free never block and never touch the
//! general-purpose allocator; pools are resized from ordinary context
//! through the heap or from real-time context through a reserve cache.

pub mod allocator;
pub mod capture;
pub mod config;
pub mod error;
pub mod metrics;
pub mod pool;
pub mod sim;
pub mod skb;
pub mod stats;

pub use allocator::SkbAllocator;
pub use capture::{CaptureSink, ChannelCapture};
pub use config::Config;
pub use error::{AllocError, WindowError};
pub use metrics::{Metrics, MetricsServer};
pub use pool::{NewPool, PoolId, Provisioned};
pub use skb::{ChainIter, ChecksumMode, PacketType, Rtskb, SkbMeta, RTSKB_SIZE};
pub use stats::{PoolSnapshot, StatsSnapshot};
