//! Real-time socket buffers
//!
//! An [`Rtskb`] is the allocation currency of the stack: a fixed-size
//! storage block plus a movable data window, packet metadata, and the
//! chain/ownership state used by the pool allocator.
//!
//! The header and the storage live in one heap block (`Frame`). While a
//! buffer sits in a pool the block is parked in its arena slot; allocating
//! moves the block into an `Rtskb` token, and dropping the token moves it
//! back into the owner pool.

use std::fmt;
use std::sync::Arc;

use crate::allocator::Shared;
use crate::error::WindowError;
use crate::pool::PoolId;

mod csum;

pub use csum::{csum_fold, csum_partial};


/// Storage capacity of every buffer in bytes
///
/// Large enough for a VLAN-tagged Ethernet frame including FCS.
pub const RTSKB_SIZE: usize = 1544;

/// How the packet was addressed on the link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PacketType {
    /// Addressed to this host
    #[default]
    Host,
    /// Link-layer broadcast
    Broadcast,
    /// Link-layer multicast
    Multicast,
    /// Addressed to another host (promiscuous receive)
    OtherHost,
    /// Outgoing packet looped back to a tap
    Outgoing,
    /// Local loopback
    Loopback,
}

/// Checksum state of the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChecksumMode {
    /// Nothing computed or verified
    #[default]
    None,
    /// Verified by hardware
    Unnecessary,
    /// Checksum still to be inserted on transmit
    ///
    /// `start` is relative to the window start, `offset` is where the
    /// folded result goes relative to `start`.
    Partial { start: u16, offset: u16 },
}

/// Protocol metadata carried alongside the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SkbMeta {
    /// Receive or transmit timestamp in nanoseconds
    pub time_stamp: u64,
    /// Transmit priority
    pub priority: u32,
    /// Ethertype in host order
    pub protocol: u16,
    /// Link-layer addressing class
    pub pkt_type: PacketType,
    /// Checksum state
    pub ip_summed: ChecksumMode,
}

/// Header block and storage of one buffer.
pub(crate) struct Frame {
    pub(crate) slot: u32,
    pub(crate) owner: PoolId,
    data_start: usize,
    data_end: usize,
    mac_header: Option<usize>,
    network_header: Option<usize>,
    transport_header: Option<usize>,
    meta: SkbMeta,
    /// Rest of the chain; `None` marks the tail
    pub(crate) chain: Option<Rtskb>,
    /// Companion reserved from the capture pool while shared
    pub(crate) share: Option<Rtskb>,
    buf: [u8; RTSKB_SIZE],
}

impl Frame {
    pub(crate) fn boxed(slot: u32, owner: PoolId) -> Box<Frame> {
        Box::new(Frame {
            slot,
            owner,
            data_start: 0,
            data_end: 0,
            mac_header: None,
            network_header: None,
            transport_header: None,
            meta: SkbMeta::default(),
            chain: None,
            share: None,
            buf: [0u8; RTSKB_SIZE],
        })
    }

    /// Prepare a freshly dequeued frame for a caller asking for `size` bytes.
    pub(crate) fn reset(&mut self, size: usize) {
        debug_assert!(size <= RTSKB_SIZE);
        self.data_start = 0;
        self.data_end = size;
        self.mac_header = None;
        self.network_header = None;
        self.transport_header = None;
        self.meta = SkbMeta::default();
        self.chain = None;
        self.share = None;
    }

    fn len(&self) -> usize {
        self.data_end - self.data_start
    }
}

/// An allocated buffer, exclusively owned.
///
/// Dropping an `Rtskb` frees it: every member of its chain goes back to the
/// pool that currently owns that member. Freeing never blocks and never
/// fails.
pub struct Rtskb {
    frame: Option<Box<Frame>>,
    shared: Arc<Shared>,
}

impl Rtskb {
    pub(crate) fn from_frame(frame: Box<Frame>, shared: Arc<Shared>) -> Self {
        Self {
            frame: Some(frame),
            shared,
        }
    }

    /// Take the frame out without returning it to a pool.
    pub(crate) fn into_frame(mut self) -> Box<Frame> {
        match self.frame.take() {
            Some(frame) => frame,
            None => unreachable!("rtskb without frame"),
        }
    }

    pub(crate) fn frame(&self) -> &Frame {
        match self.frame.as_deref() {
            Some(frame) => frame,
            None => unreachable!("rtskb without frame"),
        }
    }

    pub(crate) fn frame_mut(&mut self) -> &mut Frame {
        match self.frame.as_deref_mut() {
            Some(frame) => frame,
            None => unreachable!("rtskb without frame"),
        }
    }

    /// Storage capacity shared by all buffers
    #[inline]
    pub const fn capacity() -> usize {
        RTSKB_SIZE
    }

    /// Pool this buffer returns to when freed
    #[inline]
    pub fn owner(&self) -> PoolId {
        self.frame().owner
    }

    /// Length of the data window
    #[inline]
    pub fn len(&self) -> usize {
        self.frame().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Offset of the window start inside storage
    #[inline]
    pub fn headroom(&self) -> usize {
        self.frame().data_start
    }

    /// Unused storage after the window
    #[inline]
    pub fn tailroom(&self) -> usize {
        RTSKB_SIZE - self.frame().data_end
    }

    /// Bytes in the data window
    pub fn data(&self) -> &[u8] {
        let f = self.frame();
        &f.buf[f.data_start..f.data_end]
    }

    /// Mutable bytes in the data window
    pub fn data_mut(&mut self) -> &mut [u8] {
        let f = self.frame_mut();
        &mut f.buf[f.data_start..f.data_end]
    }

    /// Extend the window at the end, returning the added bytes.
    pub fn put(&mut self, n: usize) -> Result<&mut [u8], WindowError> {
        let f = self.frame_mut();
        if n > RTSKB_SIZE - f.data_end {
            return Err(WindowError::Overrun {
                len: f.len(),
                requested: n,
            });
        }
        let old_end = f.data_end;
        f.data_end += n;
        Ok(&mut f.buf[old_end..f.data_end])
    }

    /// Append `bytes` to the window.
    pub fn put_slice(&mut self, bytes: &[u8]) -> Result<(), WindowError> {
        self.put(bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }

    /// Extend the window at the front, returning the prepended bytes.
    pub fn push(&mut self, n: usize) -> Result<&mut [u8], WindowError> {
        let f = self.frame_mut();
        if n > f.data_start {
            return Err(WindowError::Underrun {
                headroom: f.data_start,
                requested: n,
            });
        }
        f.data_start -= n;
        let start = f.data_start;
        Ok(&mut f.buf[start..start + n])
    }

    /// Drop `n` bytes from the front of the window, returning what is left.
    pub fn pull(&mut self, n: usize) -> Result<&[u8], WindowError> {
        let f = self.frame_mut();
        if n > f.len() {
            return Err(WindowError::Truncated {
                len: f.len(),
                requested: n,
            });
        }
        f.data_start += n;
        Ok(&f.buf[f.data_start..f.data_end])
    }

    /// Shift the whole window back by `n` bytes to make headroom.
    pub fn reserve(&mut self, n: usize) -> Result<(), WindowError> {
        let f = self.frame_mut();
        if n > RTSKB_SIZE - f.data_end {
            return Err(WindowError::Overrun {
                len: f.len(),
                requested: n,
            });
        }
        f.data_start += n;
        f.data_end += n;
        Ok(())
    }

    /// Cut the window down to `len` bytes. Longer lengths are ignored.
    pub fn trim(&mut self, len: usize) {
        let f = self.frame_mut();
        if len < f.len() {
            f.data_end = f.data_start + len;
        }
    }

    pub fn meta(&self) -> &SkbMeta {
        &self.frame().meta
    }

    pub fn meta_mut(&mut self) -> &mut SkbMeta {
        &mut self.frame_mut().meta
    }

    /// Mark the current window start as the link-layer header.
    pub fn reset_mac_header(&mut self) {
        let f = self.frame_mut();
        f.mac_header = Some(f.data_start);
    }

    /// Mark the network header at `offset` bytes into the window.
    pub fn set_network_header(&mut self, offset: usize) {
        let f = self.frame_mut();
        f.network_header = Some(f.data_start + offset);
    }

    /// Mark the transport header at `offset` bytes into the window.
    pub fn set_transport_header(&mut self, offset: usize) {
        let f = self.frame_mut();
        f.transport_header = Some(f.data_start + offset);
    }

    /// Storage offset of the link-layer header
    pub fn mac_header(&self) -> Option<usize> {
        self.frame().mac_header
    }

    /// Storage offset of the network header
    pub fn network_header(&self) -> Option<usize> {
        self.frame().network_header
    }

    /// Storage offset of the transport header
    pub fn transport_header(&self) -> Option<usize> {
        self.frame().transport_header
    }

    /// Bytes between the link-layer header and the window start
    pub fn link_header_len(&self) -> usize {
        let f = self.frame();
        match f.mac_header {
            Some(mac) if mac <= f.data_start => f.data_start - mac,
            _ => 0,
        }
    }

    /// Whether a capture companion is attached
    pub fn is_shared(&self) -> bool {
        self.frame().share.is_some()
    }

    /// Append `member` (and anything chained to it) at the end of this chain.
    pub fn chain_append(&mut self, member: Rtskb) {
        let mut cursor = &mut self.frame_mut().chain;
        while let Some(next) = cursor {
            cursor = &mut next.frame_mut().chain;
        }
        *cursor = Some(member);
    }

    /// Detach everything after this buffer, leaving it as a one-element chain.
    pub fn chain_split(&mut self) -> Option<Rtskb> {
        self.frame_mut().chain.take()
    }

    /// Next link, `None` at the tail
    pub fn chain_next(&self) -> Option<&Rtskb> {
        self.frame().chain.as_ref()
    }

    pub fn is_chain_tail(&self) -> bool {
        self.frame().chain.is_none()
    }

    /// Iterate over this buffer and every buffer chained after it.
    pub fn chain_iter(&self) -> ChainIter<'_> {
        ChainIter { next: Some(self) }
    }

    /// Number of buffers in the chain starting here
    pub fn chain_len(&self) -> usize {
        self.chain_iter().count()
    }

    /// Total window length over the chain
    pub fn chain_bytes(&self) -> usize {
        self.chain_iter().map(Rtskb::len).sum()
    }

    /// Copy `src`'s window and link-layer header into this freshly
    /// allocated buffer along with its metadata.
    pub(crate) fn copy_contents_from(&mut self, src: &Rtskb) {
        let link = src.link_header_len();
        let s = src.frame();
        let base = s.data_start - link;
        let total = s.data_end - base;
        let d = self.frame_mut();
        debug_assert!(d.data_end - d.data_start == total);

        d.buf[..total].copy_from_slice(&s.buf[base..s.data_end]);
        d.data_start = link;
        d.data_end = total;
        d.meta = s.meta;

        let rebase = |offset: Option<usize>| offset.filter(|&o| o >= base).map(|o| o - base);
        d.mac_header = rebase(s.mac_header);
        d.network_header = rebase(s.network_header);
        d.transport_header = rebase(s.transport_header);
    }
}

impl Drop for Rtskb {
    fn drop(&mut self) {
        if let Some(frame) = self.frame.take() {
            self.shared.release(frame);
        }
    }
}

impl fmt::Debug for Rtskb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let frame = self.frame();
        f.debug_struct("Rtskb")
            .field("slot", &frame.slot)
            .field("owner", &frame.owner)
            .field("window", &(frame.data_start..frame.data_end))
            .field("chain_len", &self.chain_len())
            .field("shared", &frame.share.is_some())
            .finish()
    }
}

/// Iterator over the buffers of a chain, head first.
pub struct ChainIter<'a> {
    next: Option<&'a Rtskb>,
}

impl<'a> Iterator for ChainIter<'a> {
    type Item = &'a Rtskb;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.chain_next();
        Some(current)
    }
}
