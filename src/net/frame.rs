//! Multi-fragment frame object.
//!
//! One logical Ethernet frame, carried as an ordered chain of pool buffers.
//! The first fragment starts with the link-layer header; a frame spanning
//! several RX descriptors arrives as several fragments. The frame owns its
//! buffers, so dropping it returns every fragment to the pool - payload
//! bytes are never copied between buffers.

use arrayvec::ArrayVec;

use crate::net::buffer::{GMAC_BUF_SIZE, PoolBuffer};
use crate::net::ethernet::GMAC_FRAME_SIZE_MAX;

/// Upper bound on fragments per frame: a maximum-size frame split into
/// full buffers, plus one short terminating fragment.
pub const FRAME_FRAGS_MAX: usize = GMAC_FRAME_SIZE_MAX / GMAC_BUF_SIZE + 2;

/// An ordered chain of owned buffer fragments forming one Ethernet frame.
pub struct Frame<'p> {
    frags: ArrayVec<PoolBuffer<'p>, FRAME_FRAGS_MAX>,
}

impl<'p> Frame<'p> {
    pub fn new() -> Self {
        Self {
            frags: ArrayVec::new(),
        }
    }

    /// Append a fragment. Fragment order is frame byte order.
    pub fn push_frag(&mut self, frag: PoolBuffer<'p>) {
        self.frags.push(frag);
    }

    /// Total frame length: the sum of the fragments' data lengths.
    pub fn len(&self) -> usize {
        self.frags.iter().map(|f| f.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.frags.is_empty()
    }

    pub fn frag_count(&self) -> usize {
        self.frags.len()
    }

    pub fn frags(&self) -> impl Iterator<Item = &PoolBuffer<'p>> {
        self.frags.iter()
    }

    /// Copy the frame's bytes into `out`, returning the copied length.
    /// This is a convenience for consumers that need contiguous data (and
    /// for tests); the driver itself never calls it.
    pub fn copy_into(&self, out: &mut [u8]) -> usize {
        let mut offset = 0;
        for frag in &self.frags {
            let data = frag.as_slice();
            out[offset..offset + data.len()].copy_from_slice(data);
            offset += data.len();
        }
        offset
    }
}

impl Default for Frame<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for Frame<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Frame")
            .field("frags", &self.frags.len())
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::buffer::PacketPool;

    fn frag_with(pool: &PacketPool, byte: u8, len: usize) -> PoolBuffer<'_> {
        let mut buf = pool.alloc().unwrap();
        buf.as_mut_slice()[..len].fill(byte);
        buf.set_len(len);
        buf
    }

    #[test]
    fn test_empty_frame() {
        let frame = Frame::new();
        assert!(frame.is_empty());
        assert_eq!(frame.len(), 0);
        assert_eq!(frame.frag_count(), 0);
    }

    #[test]
    fn test_fragment_chain_length() {
        let pool = PacketPool::new();
        let mut frame = Frame::new();

        frame.push_frag(frag_with(&pool, 0xAA, GMAC_BUF_SIZE));
        frame.push_frag(frag_with(&pool, 0xBB, 50));

        assert_eq!(frame.frag_count(), 2);
        assert_eq!(frame.len(), GMAC_BUF_SIZE + 50);
    }

    #[test]
    fn test_copy_into_preserves_order() {
        let pool = PacketPool::new();
        let mut frame = Frame::new();
        frame.push_frag(frag_with(&pool, 0x11, 3));
        frame.push_frag(frag_with(&pool, 0x22, 2));

        let mut out = [0u8; 8];
        let copied = frame.copy_into(&mut out);
        assert_eq!(copied, 5);
        assert_eq!(&out[..5], &[0x11, 0x11, 0x11, 0x22, 0x22]);
    }

    #[test]
    fn test_drop_returns_buffers() {
        let pool = PacketPool::new();
        let free_before = pool.free_buffers();

        let mut frame = Frame::new();
        frame.push_frag(frag_with(&pool, 0, 10));
        frame.push_frag(frag_with(&pool, 0, 10));
        assert_eq!(pool.free_buffers(), free_before - 2);

        drop(frame);
        assert_eq!(pool.free_buffers(), free_before);
    }

    #[test]
    fn test_max_frame_fits() {
        let pool = PacketPool::new();
        let mut frame = Frame::new();

        let mut remaining = GMAC_FRAME_SIZE_MAX;
        while remaining > 0 {
            let len = remaining.min(GMAC_BUF_SIZE);
            frame.push_frag(frag_with(&pool, 0, len));
            remaining -= len;
        }

        assert_eq!(frame.len(), GMAC_FRAME_SIZE_MAX);
        assert!(frame.frag_count() <= FRAME_FRAGS_MAX);
    }
}
