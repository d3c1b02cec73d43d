//! Pool primitives
//!
//! Pools are FIFO free lists threaded through a fixed slot arena. The
//! links live in the arena, so enqueue and dequeue never allocate and hold
//! the pool's spin lock for constant time.

use std::fmt;

use serde::Serialize;

use crate::error::AllocError;

pub(crate) mod arena;
pub(crate) mod queue;

/// Handle naming one pool of an allocator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PoolId(u16);

impl PoolId {
    pub(crate) const fn new(raw: u16) -> Self {
        Self(raw)
    }

    pub(crate) const fn raw(self) -> u16 {
        self.0
    }

    /// Position in the allocator's pool table
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pool#{}", self.0)
    }
}

/// Outcome of a lifecycle operation that may partially succeed
#[must_use = "provisioning can fall short; compare `actual` with `requested`"]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Provisioned {
    /// Buffers the caller asked for
    pub requested: usize,
    /// Buffers actually moved
    pub actual: usize,
}

impl Provisioned {
    pub(crate) fn new(requested: usize, actual: usize) -> Self {
        Self { requested, actual }
    }

    /// Whether every requested buffer was provisioned
    pub fn is_complete(&self) -> bool {
        self.actual >= self.requested
    }

    /// Number of buffers the operation fell short by
    pub fn shortfall(&self) -> usize {
        self.requested.saturating_sub(self.actual)
    }

    /// Turn a shortfall on `pool` into an error.
    pub fn require(self, pool: PoolId) -> Result<usize, AllocError> {
        if self.is_complete() {
            Ok(self.actual)
        } else {
            Err(AllocError::Shortfall {
                pool,
                requested: self.requested,
                actual: self.actual,
            })
        }
    }
}

/// A freshly created pool and how far it got populated
#[must_use = "a new pool may be under-populated; check it or release it"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewPool {
    pub id: PoolId,
    pub provisioned: Provisioned,
}

impl NewPool {
    /// The pool id if it was fully populated.
    ///
    /// On shortfall the error names the pool, which the caller still owns
    /// and should release.
    pub fn require(self) -> Result<PoolId, AllocError> {
        self.provisioned.require(self.id).map(|_| self.id)
    }
}
