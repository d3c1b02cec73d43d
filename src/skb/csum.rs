//! Internet checksum helpers for handing frames to a device.

use tracing::warn;

use super::{ChecksumMode, Rtskb};
use crate::error::WindowError;

/// Add `data` to a running ones' complement sum of big-endian 16-bit words.
///
/// An odd trailing byte is padded with zero.
pub fn csum_partial(data: &[u8], sum: u32) -> u32 {
    let mut acc = u64::from(sum);
    let mut words = data.chunks_exact(2);
    for word in &mut words {
        acc += u64::from(u16::from_be_bytes([word[0], word[1]]));
    }
    if let [last] = words.remainder() {
        acc += u64::from(u16::from_be_bytes([*last, 0]));
    }
    while acc >> 32 != 0 {
        acc = (acc & 0xffff_ffff) + (acc >> 32);
    }
    acc as u32
}

/// Fold a 32-bit partial sum to 16 bits and complement it.
pub fn csum_fold(sum: u32) -> u16 {
    let mut sum = sum;
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

impl Rtskb {
    /// Copy the window into a device buffer, inserting a pending checksum.
    ///
    /// With [`ChecksumMode::Partial`] everything from `start` on is summed
    /// and the folded result is stored big-endian at `start + offset`.
    /// Returns the number of bytes copied.
    pub fn copy_and_csum_dev(&self, to: &mut [u8]) -> Result<usize, WindowError> {
        let data = self.data();
        let len = data.len();
        if to.len() < len {
            return Err(WindowError::Overrun {
                len: to.len(),
                requested: len,
            });
        }

        let (start, offset) = match self.meta().ip_summed {
            ChecksumMode::Partial { start, offset } => (usize::from(start), usize::from(offset)),
            _ => {
                to[..len].copy_from_slice(data);
                return Ok(len);
            }
        };

        if start > len || start + offset + 2 > len {
            warn!(start, offset, len, "checksum position outside frame, copying as is");
            to[..len].copy_from_slice(data);
            return Ok(len);
        }

        to[..len].copy_from_slice(data);
        let csum = csum_fold(csum_partial(&to[start..len], 0));
        let at = start + offset;
        to[at..at + 2].copy_from_slice(&csum.to_be_bytes());
        Ok(len)
    }
}
