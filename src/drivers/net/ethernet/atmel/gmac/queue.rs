//! Per-queue descriptor-ring engine.
//!
//! A [`Queue`] owns one RX and one TX descriptor list, the buffer
//! accounting that shadows the RX list, and the ring of in-flight TX
//! frames. The RX side is driven from interrupt context (reassembly and
//! error recovery), the TX side from both the send path (append at `head`)
//! and interrupt context (reclaim at `tail`); the head/tail split plus the
//! descriptor ownership bits are the only synchronization with hardware.
//!
//! Invariants the engine maintains:
//! - exactly one descriptor per ring carries the wrap bit, always the last
//!   slot;
//! - every hardware-owned RX slot has its accounted buffer wired into the
//!   descriptor address word - a slot is never left without a buffer, since
//!   that would stall the receiver permanently;
//! - one accounting entry exists per in-flight TX frame, released exactly
//!   once when its last-buffer descriptor is reclaimed.

use crate::drivers::net::netdev::NetworkError;
use crate::net::buffer::{GMAC_BUF_SIZE, PacketPool, PoolBuffer};
use crate::net::frame::Frame;

use super::cache::{dcache_clean, dcache_invalidate, dmb};
use super::desc::{GMAC_RXW0_ADDR, RxDesc, TxDesc};
use super::regs::{
    GMAC_DCFGR, GMAC_DCFGR_FBLDO_INCR4, GMAC_IER, GMAC_INT_EN_FLAGS, GMAC_NCR, GMAC_NCR_RXEN,
    GMAC_NCR_TSTART, GMAC_NCR_TXEN, GMAC_RBQB, GMAC_RBQB_ADDR_MASK, GMAC_TBQB, GmacRegs,
    gmac_dcfgr_drbs, gmac_rbqbapq, gmac_tbqbapq,
};
use super::ring::{DescList, FrameRing, modulo_inc};

/// Per-queue error counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Frames dropped because no replacement buffer was available
    pub rx_frames_dropped: u32,
    /// RX ring hard resets after receive errors
    pub rx_flushed: u32,
    /// TX ring hard resets after transmit errors
    pub tx_flushed: u32,
}

/// The RX buffer-queue-base register for a queue index.
fn receive_queue_base_reg(que_idx: u8) -> usize {
    if que_idx == 0 {
        GMAC_RBQB
    } else {
        gmac_rbqbapq(que_idx as usize - 1)
    }
}

/// One hardware queue: descriptor rings, buffer accounting, counters.
pub struct Queue<'p, const RX: usize, const TX: usize> {
    que_idx: u8,
    rx_desc_list: DescList<RxDesc, RX>,
    tx_desc_list: DescList<TxDesc, TX>,
    /// Index-aligned with `rx_desc_list`: the buffer wired into each slot.
    rx_frag_list: [Option<PoolBuffer<'p>>; RX],
    /// In-flight TX frames, oldest first.
    tx_frames: FrameRing<'p, TX>,
    pool: &'p PacketPool,

    err_rx_frames_dropped: u32,
    err_rx_flushed_count: u32,
    err_tx_flushed_count: u32,
}

impl<'p, const RX: usize, const TX: usize> Queue<'p, RX, TX> {
    pub fn new(que_idx: u8, pool: &'p PacketPool) -> Self {
        Self {
            que_idx,
            rx_desc_list: DescList::new(),
            tx_desc_list: DescList::new(),
            rx_frag_list: core::array::from_fn(|_| None),
            tx_frames: FrameRing::new(),
            pool,

            err_rx_frames_dropped: 0,
            err_rx_flushed_count: 0,
            err_tx_flushed_count: 0,
        }
    }

    /// Bring the queue up: populate both descriptor lists, point the
    /// hardware at them, configure DMA and unmask the queue's interrupts.
    pub fn init(&mut self, regs: &GmacRegs) -> Result<(), NetworkError> {
        assert!(
            (self.rx_desc_list.base_addr() & !GMAC_RBQB_ADDR_MASK) == 0,
            "RX descriptors have to be word aligned"
        );
        assert!(
            (self.tx_desc_list.base_addr() & !GMAC_RBQB_ADDR_MASK) == 0,
            "TX descriptors have to be word aligned"
        );

        self.rx_descriptors_init()?;
        self.tx_descriptors_init();

        regs.write(receive_queue_base_reg(self.que_idx), self.rx_desc_list.base_addr());
        regs.write(GMAC_TBQB, self.tx_desc_list.base_addr());

        // Receive buffer size is programmed in multiples of 64 bytes
        regs.write(
            GMAC_DCFGR,
            gmac_dcfgr_drbs((GMAC_BUF_SIZE / 64) as u32) | GMAC_DCFGR_FBLDO_INCR4,
        );

        regs.write(GMAC_IER, GMAC_INT_EN_FLAGS);

        self.err_rx_frames_dropped = 0;
        self.err_rx_flushed_count = 0;
        self.err_tx_flushed_count = 0;

        log::info!("queue {} activated", self.que_idx);

        Ok(())
    }

    /// Wire a freshly allocated buffer into every RX slot and hand the
    /// whole list to hardware, wrap bit on the last slot.
    fn rx_descriptors_init(&mut self) -> Result<(), NetworkError> {
        let len = RX;
        self.rx_desc_list.set_tail(0);

        for i in 0..len {
            let Some(buf) = self.pool.alloc() else {
                self.free_rx_bufs();
                log::error!("failed to reserve RX packet buffers");
                return Err(NetworkError::NoBuffers);
            };
            assert_eq!(
                buf.capacity(),
                GMAC_BUF_SIZE,
                "incorrect length of RX data buffer"
            );
            assert!(
                (buf.dma_addr() & !GMAC_RXW0_ADDR) == 0,
                "misaligned RX buffer address"
            );

            self.rx_desc_list
                .desc_mut(i)
                .release_to_hardware(buf.dma_addr(), i == len - 1);
            self.rx_frag_list[i] = Some(buf);
        }

        Ok(())
    }

    /// Every TX slot idle (used bit set), wrap on the last, no frames in
    /// flight.
    fn tx_descriptors_init(&mut self) {
        let len = TX;
        self.tx_desc_list.reset_cursors();

        for i in 0..len {
            self.tx_desc_list.desc_mut(i).reset(i == len - 1);
        }

        self.tx_frames.reset();
    }

    fn free_rx_bufs(&mut self) {
        for slot in self.rx_frag_list.iter_mut() {
            *slot = None;
        }
    }

    /// Reassemble the next complete frame out of the RX ring, if any.
    ///
    /// Scans forward from `tail` over hardware-delivered descriptors; only
    /// a contiguous delivered span terminating in an EOF flag counts as a
    /// frame. Consumed slots are re-armed with fresh buffers as the span is
    /// walked. Returns `None` when no complete frame is waiting, and also
    /// when the frame had to be dropped for want of buffers (the ring is
    /// kept consistent either way).
    pub fn frame_get(&mut self) -> Option<Frame<'p>> {
        let len = self.rx_desc_list.len();

        // Peek without mutating. The scan is bounded by the ring size: a
        // ring fully delivered without any EOF yields nothing.
        let mut cursor = self.rx_desc_list.tail();
        let mut complete = false;
        let mut scanned = 0u16;
        while scanned < len {
            let desc = self.rx_desc_list.desc(cursor as usize);
            if !desc.is_software_owned() {
                break;
            }
            if desc.is_eof() {
                complete = true;
                break;
            }
            cursor = modulo_inc(cursor, len);
            scanned += 1;
        }

        // An incomplete frame may still be dropped by the GMAC; do not
        // process it, even partially.
        if !complete {
            return None;
        }

        let mut tail = self.rx_desc_list.tail();
        let mut frame = Some(Frame::new());
        let mut frame_len: usize = 0;

        assert!(
            self.rx_desc_list.desc(tail as usize).is_sof(),
            "first RX fragment is missing the SOF bit"
        );

        loop {
            let desc = self.rx_desc_list.desc(tail as usize);
            let eof = desc.is_eof();
            let desc_addr = desc.addr();
            // Hardware fills every non-terminal fragment to the full
            // configured buffer size; the EOF descriptor records the total
            // frame length, from which the final fragment's share follows.
            let frag_len = if eof {
                desc.frame_len() - frame_len
            } else {
                GMAC_BUF_SIZE
            };
            frame_len += frag_len;

            let mut frag = match self.rx_frag_list[tail as usize].take() {
                Some(frag) => frag,
                None => panic!("RX slot {} has no accounted buffer", tail),
            };
            assert!(
                frag.dma_addr() == desc_addr,
                "RX descriptor and buffer list desynchronized"
            );

            let new_frag = if let Some(out) = frame.as_mut() {
                // The fragment was written by DMA; drop stale cache lines
                // before anything reads it.
                dcache_invalidate(frag.as_ptr() as usize, frag.capacity());

                match self.pool.alloc() {
                    Some(new_frag) => {
                        frag.set_len(frag_len);
                        out.push_frag(frag);
                        new_frag
                    }
                    None => {
                        // Out of buffers. Abandon the frame under assembly
                        // but keep walking the span so `tail` advances and
                        // each slot is re-armed with the buffer it already
                        // had - a slot without a buffer would stall the
                        // receiver for good.
                        self.err_rx_frames_dropped += 1;
                        frame = None;
                        frag
                    }
                }
            } else {
                frag
            };

            let wrap = tail == len - 1;
            let addr = new_frag.dma_addr();
            self.rx_desc_list
                .desc_mut(tail as usize)
                .release_to_hardware(addr, wrap);
            self.rx_frag_list[tail as usize] = Some(new_frag);

            tail = modulo_inc(tail, len);
            if eof {
                break;
            }
        }

        self.rx_desc_list.set_tail(tail);
        log::debug!("frame complete: len={}, tail={}", frame_len, tail);

        frame
    }

    /// Write an outgoing frame into the TX ring and start transmission.
    ///
    /// Never blocks. The frame's buffers stay owned by the accounting ring
    /// until the hardware reports the last fragment sent. The upper layer
    /// must bound outstanding fragments to ring capacity minus one;
    /// exceeding that is a ring-overflow invariant violation, not a
    /// runtime error.
    pub fn submit(&mut self, regs: &GmacRegs, frame: Frame<'p>) -> Result<(), NetworkError> {
        if frame.is_empty() {
            return Err(NetworkError::EmptyFrame);
        }

        let len = self.tx_desc_list.len();
        let first = self.tx_desc_list.head();
        let frag_count = frame.frag_count();

        for (i, frag) in frame.frags().enumerate() {
            // The DMA engine reads the fragment straight from memory.
            dcache_clean(frag.as_ptr() as usize, frag.capacity());

            let head = self.tx_desc_list.head();
            // The first fragment keeps its used bit while the rest of the
            // frame is written, so hardware cannot start on a frame that
            // is only partially described.
            self.tx_desc_list.desc_mut(head as usize).write_fragment(
                frag.dma_addr(),
                frag.len(),
                i == frag_count - 1,
                head == len - 1,
                head == first,
            );

            self.tx_desc_list.advance_head();
            assert!(
                self.tx_desc_list.head() != self.tx_desc_list.tail(),
                "TX descriptor list overflow"
            );
        }

        // Mark the slot after the frame as used so hardware scanning ahead
        // recognizes the end of available work.
        let stop = self.tx_desc_list.head();
        self.tx_desc_list.desc_mut(stop as usize).mark_used();

        // Every fragment must be in place before the first one is released.
        dmb();
        self.tx_desc_list.desc_mut(first as usize).release_first();

        self.tx_frames.put(frame);

        // The register write barriers again, so the released first
        // descriptor is visible before transmission starts.
        regs.set_bits(GMAC_NCR, GMAC_NCR_TSTART);

        Ok(())
    }

    /// Reclaim descriptors for one completed frame and release its handle.
    ///
    /// The GMAC reports completion by setting the used bit on the *first*
    /// descriptor of the frame; the rest of the span is identified by
    /// walking to the last-buffer flag. Only one frame is processed per
    /// invocation - the interrupt fires again while more completions are
    /// pending.
    pub fn tx_completed(&mut self) {
        assert!(
            self.tx_desc_list
                .desc(self.tx_desc_list.tail() as usize)
                .is_used(),
            "first buffer of a frame is not marked as owned by software"
        );

        while self.tx_desc_list.tail() != self.tx_desc_list.head() {
            let idx = self.tx_desc_list.tail() as usize;
            let last = self.tx_desc_list.desc(idx).is_last_buffer();
            self.tx_desc_list.advance_tail();

            if last {
                // Exactly one accounting entry per frame, regardless of
                // how many fragments it spanned.
                let frame = self.tx_frames.get();
                log::debug!("tx done: {} frags released", frame.frag_count());
                break;
            }
        }
    }

    /// Hard-reset the RX ring after a receive error.
    ///
    /// Whatever partial frame spans the error point cannot be trusted, so
    /// every slot is returned to hardware with cleared status; the wired
    /// buffers stay in place. Hardware may have lost its internal ring
    /// pointer, so the base address is reprogrammed before the receiver is
    /// re-enabled.
    pub fn rx_error_handler(&mut self, regs: &GmacRegs) {
        self.err_rx_flushed_count += 1;

        regs.clear_bits(GMAC_NCR, GMAC_NCR_RXEN);

        self.rx_desc_list.set_tail(0);
        for i in 0..RX {
            self.rx_desc_list.desc_mut(i).surrender();
        }

        regs.write(receive_queue_base_reg(self.que_idx), self.rx_desc_list.base_addr());

        regs.set_bits(GMAC_NCR, GMAC_NCR_RXEN);
    }

    /// Hard-reset the TX ring after a transmit error.
    ///
    /// Every in-flight frame is released (its buffers go back to the
    /// pool - hardware has abandoned them) and the descriptor list returns
    /// to the all-used idle state before the transmitter is re-enabled.
    pub fn tx_error_handler(&mut self, regs: &GmacRegs) {
        self.err_tx_flushed_count += 1;

        // Stop transmission, clean the transmit pipeline
        regs.clear_bits(GMAC_NCR, GMAC_NCR_TXEN);

        self.tx_descriptors_init();

        regs.set_bits(GMAC_NCR, GMAC_NCR_TXEN);
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            rx_frames_dropped: self.err_rx_frames_dropped,
            rx_flushed: self.err_rx_flushed_count,
            tx_flushed: self.err_tx_flushed_count,
        }
    }
}

/// Hardware-side test hooks: the controller tests simulate the DMA engine
/// through these instead of reaching into the ring internals.
#[cfg(test)]
impl<'p, const RX: usize, const TX: usize> Queue<'p, RX, TX> {
    pub(crate) fn rx_frag_list_mut(&mut self, slot: usize) -> &mut PoolBuffer<'p> {
        self.rx_frag_list[slot].as_mut().unwrap()
    }

    pub(crate) fn hw_deliver_rx(&mut self, slot: usize, frame_len: usize, sof: bool, eof: bool) {
        self.rx_desc_list.desc_mut(slot).hw_deliver(frame_len, sof, eof);
    }

    pub(crate) fn hw_complete_tx_first(&mut self, slot: usize) {
        self.tx_desc_list.desc_mut(slot).hw_complete();
    }
}

/// Minimal parked state for a hardware priority queue this configuration
/// leaves unused: single-descriptor rings the engine can never advance
/// into, so any stray hardware activity on the queue is harmless.
pub(crate) struct IdleQueue {
    rx_desc_list: DescList<RxDesc, 1>,
    tx_desc_list: DescList<TxDesc, 1>,
}

impl IdleQueue {
    pub fn new() -> Self {
        Self {
            rx_desc_list: DescList::new(),
            tx_desc_list: DescList::new(),
        }
    }

    /// Park the queue: descriptors taken from hardware with the wrap bit
    /// set, base registers pointed at them.
    pub fn park(&mut self, regs: &GmacRegs, que_idx: u8) {
        self.rx_desc_list.desc_mut(0).park_idle();
        self.tx_desc_list.desc_mut(0).reset(true);

        let bank = que_idx as usize - 1;
        regs.write(gmac_rbqbapq(bank), self.rx_desc_list.base_addr());
        regs.write(gmac_tbqbapq(bank), self.tx_desc_list.base_addr());

        log::info!("queue {} set to idle", que_idx);
    }
}
