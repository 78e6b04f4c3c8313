//! Ring structures: the hardware-visible descriptor list and the
//! in-flight frame accounting ring.
//!
//! Both are fixed-capacity circular arrays with software cursors. `tail`
//! is the next slot to inspect or reclaim; `head` (TX only) is the next
//! slot to populate. Hardware keeps its own implicit cursor, observable
//! only through the descriptor ownership bits - the driver never assumes
//! it can read hardware's position directly.

use crate::net::frame::Frame;

/// Circular advance: `(idx + 1) mod len`.
#[inline]
pub(crate) fn modulo_inc(idx: u16, len: u16) -> u16 {
    let next = idx + 1;
    if next < len { next } else { 0 }
}

/// Fixed-capacity list of hardware descriptors plus the software cursors.
///
/// The array itself is what the hardware walks; its base address goes into
/// the queue's buffer-queue-base register, so the list must not move while
/// the engine is enabled.
pub(crate) struct DescList<D, const N: usize> {
    buf: [D; N],
    head: u16,
    tail: u16,
}

impl<D: Default, const N: usize> DescList<D, N> {
    pub fn new() -> Self {
        Self {
            buf: core::array::from_fn(|_| D::default()),
            head: 0,
            tail: 0,
        }
    }

    pub fn len(&self) -> u16 {
        N as u16
    }

    /// Descriptor list base address for the queue-base register.
    /// Must be word aligned, which `#[repr(align(4))]` descriptors give us.
    pub fn base_addr(&self) -> u32 {
        self.buf.as_ptr() as usize as u32
    }

    pub fn desc(&self, idx: usize) -> &D {
        &self.buf[idx]
    }

    pub fn desc_mut(&mut self, idx: usize) -> &mut D {
        &mut self.buf[idx]
    }

    pub fn head(&self) -> u16 {
        self.head
    }

    pub fn tail(&self) -> u16 {
        self.tail
    }

    pub fn set_tail(&mut self, tail: u16) {
        self.tail = tail;
    }

    pub fn advance_head(&mut self) {
        self.head = modulo_inc(self.head, N as u16);
    }

    pub fn advance_tail(&mut self) {
        self.tail = modulo_inc(self.tail, N as u16);
    }

    pub fn reset_cursors(&mut self) {
        self.head = 0;
        self.tail = 0;
    }
}

/// Accounting ring for frames the hardware is still transmitting.
///
/// One entry is pushed per submitted frame and popped when the frame's
/// last-buffer descriptor is reclaimed, keeping the fragment buffers alive
/// exactly as long as hardware may still read them.
pub(crate) struct FrameRing<'p, const N: usize> {
    buf: [Option<Frame<'p>>; N],
    head: u16,
    tail: u16,
}

impl<'p, const N: usize> FrameRing<'p, N> {
    pub fn new() -> Self {
        Self {
            buf: core::array::from_fn(|_| None),
            head: 0,
            tail: 0,
        }
    }

    /// Put one frame into the ring.
    pub fn put(&mut self, frame: Frame<'p>) {
        self.buf[self.head as usize] = Some(frame);
        self.head = modulo_inc(self.head, N as u16);

        assert!(self.tail != self.head, "frame ring overflow");
    }

    /// Take the oldest frame out of the ring.
    pub fn get(&mut self) -> Frame<'p> {
        assert!(self.tail != self.head, "retrieving frame from empty ring");

        let frame = self.buf[self.tail as usize]
            .take()
            .expect("frame ring slot empty below head");
        self.tail = modulo_inc(self.tail, N as u16);

        frame
    }

    pub fn is_empty(&self) -> bool {
        self.tail == self.head
    }

    /// Drop every pending frame (releasing its buffers) and zero the
    /// cursors.
    pub fn reset(&mut self) {
        for slot in self.buf.iter_mut() {
            *slot = None;
        }
        self.head = 0;
        self.tail = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::buffer::PacketPool;

    #[test]
    fn test_modulo_inc_wraps() {
        assert_eq!(modulo_inc(0, 4), 1);
        assert_eq!(modulo_inc(2, 4), 3);
        assert_eq!(modulo_inc(3, 4), 0);
    }

    #[test]
    fn test_desc_list_cursors() {
        let mut list: DescList<super::super::desc::TxDesc, 4> = DescList::new();
        assert_eq!(list.len(), 4);
        assert_eq!(list.head(), 0);

        for _ in 0..4 {
            list.advance_head();
        }
        assert_eq!(list.head(), 0);

        list.advance_tail();
        list.reset_cursors();
        assert_eq!(list.tail(), 0);
    }

    #[test]
    fn test_desc_list_base_is_word_aligned() {
        let list: DescList<super::super::desc::RxDesc, 4> = DescList::new();
        assert_eq!(list.base_addr() & 0x3, 0);
    }

    fn one_frag_frame(pool: &PacketPool) -> Frame<'_> {
        let mut frame = Frame::new();
        let mut buf = pool.alloc().unwrap();
        buf.set_len(60);
        frame.push_frag(buf);
        frame
    }

    #[test]
    fn test_frame_ring_fifo_order() {
        let pool = PacketPool::new();
        let mut ring: FrameRing<'_, 4> = FrameRing::new();

        let mut first = one_frag_frame(&pool);
        first.push_frag(pool.alloc().unwrap());
        ring.put(first);
        ring.put(one_frag_frame(&pool));

        assert!(!ring.is_empty());
        assert_eq!(ring.get().frag_count(), 2);
        assert_eq!(ring.get().frag_count(), 1);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_frame_ring_reset_releases_buffers() {
        let pool = PacketPool::new();
        let free_before = pool.free_buffers();
        let mut ring: FrameRing<'_, 4> = FrameRing::new();

        ring.put(one_frag_frame(&pool));
        ring.put(one_frag_frame(&pool));
        assert_eq!(pool.free_buffers(), free_before - 2);

        ring.reset();
        assert!(ring.is_empty());
        assert_eq!(pool.free_buffers(), free_before);
    }

    #[test]
    #[should_panic(expected = "frame ring overflow")]
    fn test_frame_ring_overflow_panics() {
        let pool = PacketPool::new();
        let mut ring: FrameRing<'_, 2> = FrameRing::new();
        ring.put(one_frag_frame(&pool));
        ring.put(one_frag_frame(&pool));
    }

    #[test]
    #[should_panic(expected = "empty ring")]
    fn test_frame_ring_empty_get_panics() {
        let mut ring: FrameRing<'_, 2> = FrameRing::new();
        let _ = ring.get();
    }
}
