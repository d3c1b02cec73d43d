//! Allocator error types.

use std::fmt;

use crate::pool::PoolId;

/// Errors returned by pool and descriptor operations.
///
/// `Exhausted` is the expected backpressure signal; every other variant
/// points at a caller bug or a provisioning shortfall.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocError {
    /// The pool has no free descriptor
    Exhausted,
    /// Requested size does not fit into one descriptor
    SizeExceedsCapacity { requested: usize, capacity: usize },
    /// Every pool id is in use
    PoolTableFull,
    /// The pool id does not name a live pool
    UnknownPool(PoolId),
    /// A lifecycle operation provisioned fewer descriptors than required
    Shortfall {
        pool: PoolId,
        requested: usize,
        actual: usize,
    },
    /// No capture sink is installed on the allocator
    CaptureDisabled,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted => write!(f, "pool exhausted"),
            Self::SizeExceedsCapacity {
                requested,
                capacity,
            } => write!(
                f,
                "requested size {} exceeds buffer capacity {}",
                requested, capacity
            ),
            Self::PoolTableFull => write!(f, "pool table full"),
            Self::UnknownPool(id) => write!(f, "unknown pool {}", id),
            Self::Shortfall {
                pool,
                requested,
                actual,
            } => write!(
                f,
                "pool {} provisioned {} of {} requested buffers",
                pool, actual, requested
            ),
            Self::CaptureDisabled => write!(f, "no capture sink installed"),
        }
    }
}

impl std::error::Error for AllocError {}

/// Errors from moving a descriptor's data window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowError {
    /// Appending would run past the end of storage
    Overrun { len: usize, requested: usize },
    /// Prepending would run past the start of storage
    Underrun { headroom: usize, requested: usize },
    /// Removing more bytes than the window holds
    Truncated { len: usize, requested: usize },
}

impl fmt::Display for WindowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overrun { len, requested } => {
                write!(f, "put over storage end: len {} put {}", len, requested)
            }
            Self::Underrun {
                headroom,
                requested,
            } => write!(
                f,
                "push under storage start: headroom {} push {}",
                headroom, requested
            ),
            Self::Truncated { len, requested } => {
                write!(f, "pull past window end: len {} pull {}", len, requested)
            }
        }
    }
}

impl std::error::Error for WindowError {}

/// Result type for allocator operations.
pub type Result<T> = std::result::Result<T, AllocError>;
