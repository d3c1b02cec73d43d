//! Simulated protocol stack: receive, capture, clone and reply

use std::sync::Arc;

use bytes::BufMut;
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use super::driver::{ETH_HLEN, ETH_P_IP};
use crate::allocator::SkbAllocator;
use crate::pool::PoolId;
use crate::skb::{ChecksumMode, PacketType, Rtskb, RTSKB_SIZE};

const IP_HLEN: usize = 20;
const UDP_HLEN: usize = 8;
const TX_HEADER_LEN: usize = ETH_HLEN + IP_HLEN + UDP_HLEN;
const TX_HEADROOM: usize = 64;
const TX_PRIORITY: u32 = 1;

/// Stack-side counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StackStats {
    /// Frames taken over by the socket pool
    pub delivered: u64,
    /// Frames dropped because the socket pool was empty
    pub socket_dropped: u64,
    /// Frames too short for a link-layer header
    pub malformed: u64,
    /// Frames marked for capture
    pub shared: u64,
    /// Frames that could not be shared (capture pool empty)
    pub share_failures: u64,
    /// Copies handed to the raw listener
    pub cloned: u64,
    pub clone_failures: u64,
    /// Two-fragment replies queued for transmission
    pub tx_chains: u64,
    pub tx_failures: u64,
}

pub(super) struct Stack {
    pub(super) allocator: SkbAllocator,
    pub(super) socket_pool: PoolId,
    pub(super) capture_pool: Option<PoolId>,
    pub(super) clone_every: u64,
    pub(super) tx_queue: Arc<Mutex<Vec<Rtskb>>>,
    pub(super) stats: StackStats,
}

impl Stack {
    pub(super) fn run(mut self, backlog: Receiver<Rtskb>) -> StackStats {
        for skb in backlog.iter() {
            self.handle(skb);
        }
        debug!(delivered = self.stats.delivered, "stack stopped");
        self.stats
    }

    fn handle(&mut self, mut skb: Rtskb) {
        let Some((pkt_type, protocol)) = classify(skb.data()) else {
            self.stats.malformed += 1;
            return;
        };
        skb.reset_mac_header();
        if skb.pull(ETH_HLEN).is_err() {
            self.stats.malformed += 1;
            return;
        }
        skb.set_network_header(0);
        let meta = skb.meta_mut();
        meta.pkt_type = pkt_type;
        meta.protocol = protocol;

        if let Some(capture_pool) = self.capture_pool {
            match self.allocator.share(&mut skb, capture_pool) {
                Ok(()) => self.stats.shared += 1,
                Err(_) => self.stats.share_failures += 1,
            }
        }

        if self.allocator.acquire(&mut skb, self.socket_pool).is_err() {
            self.stats.socket_dropped += 1;
            return;
        }
        self.stats.delivered += 1;

        if self.clone_every != 0 && self.stats.delivered % self.clone_every == 0 {
            match self.allocator.clone_skb(&skb, self.allocator.global_pool()) {
                Ok(copy) => {
                    debug_assert_eq!(copy.data(), skb.data());
                    self.stats.cloned += 1;
                }
                Err(_) => self.stats.clone_failures += 1,
            }
        }

        match self.build_reply(skb.len()) {
            Some(chain) => {
                self.tx_queue.lock().push(chain);
                self.stats.tx_chains += 1;
            }
            None => self.stats.tx_failures += 1,
        }
    }

    /// Header fragment from the global pool, payload chained behind it.
    fn build_reply(&self, payload_len: usize) -> Option<Rtskb> {
        let global = self.allocator.global_pool();
        let payload_len = payload_len.min(RTSKB_SIZE);

        let mut head = self.allocator.alloc(global, 0).ok()?;
        head.reserve(TX_HEADROOM).ok()?;
        write_udp_header(head.push(TX_HEADER_LEN).ok()?, payload_len);
        head.reset_mac_header();
        head.set_network_header(ETH_HLEN);
        head.set_transport_header(ETH_HLEN + IP_HLEN);
        let meta = head.meta_mut();
        meta.protocol = ETH_P_IP;
        meta.priority = TX_PRIORITY;
        meta.pkt_type = PacketType::Outgoing;
        meta.ip_summed = ChecksumMode::Partial {
            start: (ETH_HLEN + IP_HLEN) as u16,
            offset: 6,
        };

        let mut payload = self.allocator.alloc(global, 0).ok()?;
        payload.put(payload_len).ok()?.fill(0xa5);
        head.chain_append(payload);
        Some(head)
    }
}

/// Link-layer addressing class and ethertype of a received frame.
fn classify(frame: &[u8]) -> Option<(PacketType, u16)> {
    if frame.len() < ETH_HLEN {
        return None;
    }
    let dest = &frame[..6];
    let pkt_type = if dest.iter().all(|&b| b == 0xff) {
        PacketType::Broadcast
    } else if dest[0] & 1 != 0 {
        PacketType::Multicast
    } else {
        PacketType::Host
    };
    Some((pkt_type, u16::from_be_bytes([frame[12], frame[13]])))
}

fn write_udp_header(mut hdr: &mut [u8], payload_len: usize) {
    let udp_len = (UDP_HLEN + payload_len) as u16;

    // Ethernet
    hdr.put_slice(&[0x02, 0x00, 0x00, 0x00, 0x00, 0x02]);
    hdr.put_slice(&[0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);
    hdr.put_u16(ETH_P_IP);

    // IPv4, no options
    hdr.put_u8(0x45);
    hdr.put_u8(0);
    hdr.put_u16(IP_HLEN as u16 + udp_len);
    hdr.put_u16(0);
    hdr.put_u16(0x4000);
    hdr.put_u8(64);
    hdr.put_u8(17);
    hdr.put_u16(0);
    hdr.put_slice(&[10, 0, 0, 1]);
    hdr.put_slice(&[10, 0, 0, 2]);

    // UDP, checksum filled in on transmit
    hdr.put_u16(37000);
    hdr.put_u16(37000);
    hdr.put_u16(udp_len);
    hdr.put_u16(0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        let mut frame = [0u8; ETH_HLEN];
        frame[..6].copy_from_slice(&[0xff; 6]);
        frame[12..14].copy_from_slice(&0x0806u16.to_be_bytes());
        assert_eq!(classify(&frame), Some((PacketType::Broadcast, 0x0806)));

        frame[..6].copy_from_slice(&[0x01, 0x00, 0x5e, 0, 0, 1]);
        assert_eq!(classify(&frame).map(|c| c.0), Some(PacketType::Multicast));

        frame[..6].copy_from_slice(&[0x02, 0, 0, 0, 0, 1]);
        assert_eq!(classify(&frame).map(|c| c.0), Some(PacketType::Host));

        assert_eq!(classify(&frame[..10]), None);
    }

    #[test]
    fn test_udp_header_layout() {
        let mut hdr = [0u8; TX_HEADER_LEN];
        write_udp_header(&mut hdr, 100);
        assert_eq!(&hdr[12..14], &ETH_P_IP.to_be_bytes());
        assert_eq!(hdr[14], 0x45);
        assert_eq!(u16::from_be_bytes([hdr[16], hdr[17]]), 128);
        assert_eq!(hdr[23], 17);
        assert_eq!(u16::from_be_bytes([hdr[38], hdr[39]]), 108);
    }
}
