//! DMA packet-buffer pool.
//!
//! Fixed-size, word-aligned buffers handed out as owned [`PoolBuffer`]
//! handles. The RX ring keeps one buffer wired into every descriptor slot;
//! on frame completion the slot's buffer is detached into the delivered
//! frame and immediately replaced from this pool, so the pool must hold at
//! least the ring size plus whatever the stack keeps in flight.
//!
//! Allocation is lock-free (an atomic bitmap tracks free slots) and never
//! blocks: under memory pressure [`PacketPool::alloc`] returns `None` and
//! the caller drops the frame. A handle returns its slot to the pool when
//! dropped, so buffer ownership moves with the handle instead of through a
//! ring of raw pointers.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

/// Per-fragment buffer size. The RX DMA buffer-size register counts in
/// units of 64 bytes, so this must stay a multiple of 64.
pub const GMAC_BUF_SIZE: usize = 128;

/// Number of buffers in the pool. Bounded by the bitmap width (256).
pub const POOL_BUF_COUNT: usize = 64;

const _: () = assert!(GMAC_BUF_SIZE % 64 == 0);
const _: () = assert!(POOL_BUF_COUNT <= 256);

const BITMAP_WORDS: usize = POOL_BUF_COUNT.div_ceil(32);

/// One pool slot. Aligned to the d-cache line so cache maintenance on a
/// buffer never touches a neighbour.
#[repr(C, align(32))]
struct BufCell(UnsafeCell<[u8; GMAC_BUF_SIZE]>);

/// Atomic bitmap for lock-free slot allocation: one bit per buffer,
/// 0 = free, 1 = allocated.
struct AtomicBitmap {
    words: [AtomicU32; BITMAP_WORDS],
}

impl AtomicBitmap {
    const fn new() -> Self {
        const ZERO: AtomicU32 = AtomicU32::new(0);
        Self {
            words: [ZERO; BITMAP_WORDS],
        }
    }

    /// Acquire the lowest free bit, or `None` if every slot is taken.
    fn acquire_bit(&self) -> Option<usize> {
        for (word_idx, word) in self.words.iter().enumerate() {
            loop {
                let current = word.load(Ordering::Acquire);

                let free_bit = (!current).trailing_zeros() as usize;
                if free_bit >= 32 || word_idx * 32 + free_bit >= POOL_BUF_COUNT {
                    break;
                }

                let mask = 1u32 << free_bit;
                match word.compare_exchange_weak(
                    current,
                    current | mask,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => return Some(word_idx * 32 + free_bit),
                    Err(_) => continue,
                }
            }
        }

        None
    }

    fn release_bit(&self, bit_idx: usize) {
        assert!(bit_idx < POOL_BUF_COUNT, "invalid buffer index {}", bit_idx);

        let mask = 1u32 << (bit_idx % 32);
        let prev = self.words[bit_idx / 32].fetch_and(!mask, Ordering::AcqRel);

        assert!(prev & mask != 0, "double release of buffer {}", bit_idx);
    }

    #[cfg(test)]
    fn is_allocated(&self, bit_idx: usize) -> bool {
        let mask = 1u32 << (bit_idx % 32);
        self.words[bit_idx / 32].load(Ordering::Acquire) & mask != 0
    }
}

/// Pool of DMA-visible packet buffers.
pub struct PacketPool {
    cells: [BufCell; POOL_BUF_COUNT],
    free_list: AtomicBitmap,

    alloc_count: AtomicUsize,
    free_count: AtomicUsize,
    alloc_failures: AtomicUsize,
}

// SAFETY: a cell's contents are only reachable through the PoolBuffer that
// owns its slot, and the atomic bitmap guarantees a slot has at most one
// owner at a time. The counters are atomics.
unsafe impl Sync for PacketPool {}

impl PacketPool {
    pub const fn new() -> Self {
        const EMPTY: BufCell = BufCell(UnsafeCell::new([0u8; GMAC_BUF_SIZE]));
        Self {
            cells: [EMPTY; POOL_BUF_COUNT],
            free_list: AtomicBitmap::new(),
            alloc_count: AtomicUsize::new(0),
            free_count: AtomicUsize::new(0),
            alloc_failures: AtomicUsize::new(0),
        }
    }

    /// Take a free buffer from the pool.
    ///
    /// Non-blocking; returns `None` when the pool is exhausted. The handle
    /// starts with a data length of zero and full `GMAC_BUF_SIZE` capacity.
    pub fn alloc(&self) -> Option<PoolBuffer<'_>> {
        let index = match self.free_list.acquire_bit() {
            Some(index) => index,
            None => {
                self.alloc_failures.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        self.alloc_count.fetch_add(1, Ordering::Relaxed);
        Some(PoolBuffer {
            pool: self,
            index: index as u16,
            len: 0,
        })
    }

    /// Number of buffers currently available.
    pub fn free_buffers(&self) -> usize {
        let allocated = self.alloc_count.load(Ordering::Relaxed) - self.free_count.load(Ordering::Relaxed);
        POOL_BUF_COUNT - allocated
    }

    /// Pool statistics snapshot.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            alloc_count: self.alloc_count.load(Ordering::Relaxed),
            free_count: self.free_count.load(Ordering::Relaxed),
            alloc_failures: self.alloc_failures.load(Ordering::Relaxed),
        }
    }

    fn cell_ptr(&self, index: usize) -> *mut u8 {
        self.cells[index].0.get() as *mut u8
    }

    fn release(&self, index: usize) {
        self.free_list.release_bit(index);
        self.free_count.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for PacketPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Pool statistics
#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    /// Total allocations
    pub alloc_count: usize,

    /// Total frees
    pub free_count: usize,

    /// Allocation failures (pool exhausted)
    pub alloc_failures: usize,
}

/// Owned handle to one pool buffer.
///
/// Holding the handle is holding the buffer: moving it moves ownership,
/// dropping it returns the slot to the pool. The data length tracks how
/// many bytes of the fixed capacity are valid.
pub struct PoolBuffer<'p> {
    pool: &'p PacketPool,
    index: u16,
    len: u16,
}

impl<'p> PoolBuffer<'p> {
    /// Fixed buffer capacity.
    pub fn capacity(&self) -> usize {
        GMAC_BUF_SIZE
    }

    /// Valid data length.
    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Set the valid data length after the buffer has been filled (by DMA
    /// or by the stack building an outgoing fragment).
    pub fn set_len(&mut self, len: usize) {
        assert!(len <= GMAC_BUF_SIZE, "length {} exceeds buffer capacity", len);
        self.len = len as u16;
    }

    /// The buffer address as the GMAC bus master sees it (the low 32 bits
    /// of the buffer's location; SAM parts have a 32-bit address space).
    pub fn dma_addr(&self) -> u32 {
        self.as_ptr() as usize as u32
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.pool.cell_ptr(self.index as usize)
    }

    /// Valid data as a slice.
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the bitmap gives this handle exclusive ownership of the
        // cell, and len never exceeds the cell size.
        unsafe { core::slice::from_raw_parts(self.as_ptr(), self.len as usize) }
    }

    /// The whole capacity as a mutable slice, for filling the buffer.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: exclusive ownership of the cell through &mut self.
        unsafe {
            core::slice::from_raw_parts_mut(self.pool.cell_ptr(self.index as usize), GMAC_BUF_SIZE)
        }
    }
}

impl Drop for PoolBuffer<'_> {
    fn drop(&mut self) {
        self.pool.release(self.index as usize);
    }
}

impl core::fmt::Debug for PoolBuffer<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PoolBuffer")
            .field("index", &self.index)
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;

    #[test]
    fn test_atomic_bitmap_acquire_release() {
        let bitmap = AtomicBitmap::new();

        let bit0 = bitmap.acquire_bit().unwrap();
        assert_eq!(bit0, 0);
        assert!(bitmap.is_allocated(0));

        let bit1 = bitmap.acquire_bit().unwrap();
        assert_eq!(bit1, 1);

        bitmap.release_bit(bit0);
        assert!(!bitmap.is_allocated(0));

        // Lowest free bit is handed out again
        assert_eq!(bitmap.acquire_bit().unwrap(), 0);
    }

    #[test]
    fn test_atomic_bitmap_exhaustion() {
        let bitmap = AtomicBitmap::new();

        let mut bits = Vec::new();
        for _ in 0..POOL_BUF_COUNT {
            bits.push(bitmap.acquire_bit().unwrap());
        }
        assert!(bitmap.acquire_bit().is_none());

        bitmap.release_bit(bits[10]);
        assert_eq!(bitmap.acquire_bit().unwrap(), bits[10]);
    }

    #[test]
    #[should_panic(expected = "double release")]
    fn test_bitmap_double_release_panics() {
        let bitmap = AtomicBitmap::new();
        let bit = bitmap.acquire_bit().unwrap();
        bitmap.release_bit(bit);
        bitmap.release_bit(bit);
    }

    #[test]
    fn test_pool_alloc_and_drop() {
        let pool = PacketPool::new();

        let buf = pool.alloc().unwrap();
        assert_eq!(buf.capacity(), GMAC_BUF_SIZE);
        assert_eq!(buf.len(), 0);
        assert_eq!(pool.free_buffers(), POOL_BUF_COUNT - 1);

        drop(buf);
        assert_eq!(pool.free_buffers(), POOL_BUF_COUNT);

        let stats = pool.stats();
        assert_eq!(stats.alloc_count, 1);
        assert_eq!(stats.free_count, 1);
    }

    #[test]
    fn test_pool_exhaustion_counts_failures() {
        let pool = PacketPool::new();

        let taken: Vec<_> = (0..POOL_BUF_COUNT).map(|_| pool.alloc().unwrap()).collect();
        assert!(pool.alloc().is_none());
        assert_eq!(pool.stats().alloc_failures, 1);

        drop(taken);
        assert!(pool.alloc().is_some());
    }

    #[test]
    fn test_buffer_data_round_trip() {
        let pool = PacketPool::new();

        let mut buf = pool.alloc().unwrap();
        buf.as_mut_slice()[..4].copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        buf.set_len(4);

        assert_eq!(buf.as_slice(), &[0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn test_buffer_alignment() {
        let pool = PacketPool::new();

        // Word alignment is what the descriptor address field requires;
        // the cells are in fact cache-line aligned.
        for _ in 0..4 {
            let buf = pool.alloc().unwrap();
            assert_eq!(buf.dma_addr() & 0x1F, 0);
            core::mem::forget(buf);
        }
    }

    #[test]
    #[should_panic(expected = "exceeds buffer capacity")]
    fn test_set_len_over_capacity_panics() {
        let pool = PacketPool::new();
        let mut buf = pool.alloc().unwrap();
        buf.set_len(GMAC_BUF_SIZE + 1);
    }
}
