//! Ownership hand-off between pools.

use super::SkbAllocator;
use crate::error::{AllocError, Result};
use crate::pool::PoolId;
use crate::skb::Rtskb;

impl SkbAllocator {
    /// Move ownership of `skb` to `companion`, replenishing its current
    /// pool with a free buffer from `companion`.
    ///
    /// Both steps happen under the locks of both pools, so a concurrent
    /// allocation on either pool sees the exchange entirely or not at all.
    /// If `companion` is empty nothing changes and
    /// [`AllocError::Exhausted`] is returned. Only the head of a chain
    /// changes owner. The reserve cache is never a valid companion.
    pub fn acquire(&self, skb: &mut Rtskb, companion: PoolId) -> Result<()> {
        let shared = &self.shared;
        if companion == shared.cache {
            return Err(AllocError::UnknownPool(companion));
        }
        let owner = skb.owner();
        if owner == companion {
            return Ok(());
        }

        let (mut comp, mut orig) = shared
            .lock_pair(companion, owner)
            .ok_or(AllocError::UnknownPool(companion))?;
        if !comp.live {
            return Err(AllocError::UnknownPool(companion));
        }
        if !orig.live {
            return Err(AllocError::UnknownPool(owner));
        }

        let Some(mut fresh) = comp.pop_front(&shared.arena) else {
            drop((comp, orig));
            shared.stats.alloc_failed();
            return Err(AllocError::Exhausted);
        };
        comp.outstanding += 1;

        fresh.owner = owner;
        orig.push_back(&shared.arena, fresh);
        orig.outstanding = orig.outstanding.saturating_sub(1);

        skb.frame_mut().owner = companion;

        shared.verify(companion, &comp);
        shared.verify(owner, &orig);
        Ok(())
    }

    /// Copy `skb` into a new buffer from `pool`.
    ///
    /// The copy covers the data window plus any link-layer header in front
    /// of it, and carries over timestamp, priority, protocol, packet type,
    /// checksum state and header offsets. Chain, owner and capture state
    /// are not copied. The source is left untouched either way.
    pub fn clone_skb(&self, skb: &Rtskb, pool: PoolId) -> Result<Rtskb> {
        let total = skb.link_header_len() + skb.len();
        let mut copy = self.alloc(pool, total)?;
        copy.copy_contents_from(skb);
        Ok(copy)
    }

    /// Mark `skb` as shared with the capture sink.
    ///
    /// A companion buffer is reserved from `capture_pool` right away. When
    /// `skb` is freed, the companion replaces it in its owner pool and
    /// `skb` is delivered to the sink as a buffer of `capture_pool`.
    pub fn share(&self, skb: &mut Rtskb, capture_pool: PoolId) -> Result<()> {
        if self.shared.capture.is_none() {
            return Err(AllocError::CaptureDisabled);
        }
        if skb.is_shared() {
            return Ok(());
        }
        let companion = self.alloc(capture_pool, 0)?;
        skb.frame_mut().share = Some(companion);
        Ok(())
    }
}
