//! Atmel/Microchip SAM GMAC Ethernet MAC driver.
//!
//! Zero-copy descriptor-ring driver for the GMAC found on SAM E5x/E7x
//! parts. Received payload is never copied: buffers are wired into the RX
//! ring, detached into a [`Frame`] when a complete frame lands, and
//! replaced from the packet pool. Outgoing frames keep ownership of their
//! fragment buffers until hardware reports the last descriptor done.
//!
//! # Hardware model
//!
//! - one combined interrupt per queue; the status register clears on read
//! - descriptor ownership bits are the only hardware/software
//!   synchronization
//! - priority queues exist but are parked idle; queue 0 carries all
//!   traffic
//!
//! # Contexts
//!
//! [`Gmac::send`] runs in the caller's context and only appends at the TX
//! ring head; [`Gmac::handle_interrupt`] runs in interrupt context and
//! reclaims from the tail. [`GmacDevice`] wraps the controller in a mutex
//! for platforms where both contexts need a shared handle.
//!
//! # Limitations
//!
//! - one-shot PHY setup is out of scope; feed link state in through
//!   [`Gmac::link_up`]
//! - no statistics collection beyond the error counters

pub mod cache;
pub mod desc;
pub mod queue;
pub mod regs;
pub mod ring;

use crate::drivers::net::netdev::{Duplex, LinkSpeed, NetworkError};
use crate::net::buffer::PacketPool;
use crate::net::ethernet::MacAddress;
use crate::net::frame::Frame;

use queue::{IdleQueue, Queue, QueueStats};
use regs::{
    GMAC_HRB, GMAC_HRT, GMAC_IDR, GMAC_INT_RX_ERR_BITS, GMAC_INT_TX_ERR_BITS, GMAC_ISR,
    GMAC_ISR_HRESP, GMAC_ISR_RCOMP, GMAC_ISR_TCOMP, GMAC_NCFGR, GMAC_NCFGR_CLK_MCK_8,
    GMAC_NCFGR_CLK_MCK_16, GMAC_NCFGR_CLK_MCK_32, GMAC_NCFGR_CLK_MCK_48, GMAC_NCFGR_CLK_MCK_64,
    GMAC_NCFGR_CLK_MCK_96, GMAC_NCFGR_FD, GMAC_NCFGR_LFERD, GMAC_NCFGR_MAXFS, GMAC_NCFGR_MTIHEN,
    GMAC_NCFGR_RFCS, GMAC_NCFGR_RXCOEN, GMAC_NCFGR_SPD, GMAC_NCR, GMAC_NCR_CLRSTAT, GMAC_NCR_MPE,
    GMAC_NCR_RXEN, GMAC_NCR_TXEN, GMAC_SAB1, GMAC_SAT1, GMAC_UR, GmacRegs, gmac_idrpq, gmac_isrpq,
};

// ============================================================================
// Configuration
// ============================================================================

/// RX descriptors on the main queue.
pub const MAIN_QUEUE_RX_DESC_COUNT: usize = 16;

/// TX descriptors on the main queue.
pub const MAIN_QUEUE_TX_DESC_COUNT: usize = 8;

/// Hardware priority queues beyond queue 0; all parked idle.
pub const GMAC_PRIORITY_QUEUE_NUM: usize = 2;

/// Master clock feeding the MAC, used to derive the MDC divisor.
pub const MCK_FREQ_HZ: u32 = 120_000_000;

/// How the PHY is wired to the MAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhyConnection {
    Mii,
    Rmii,
}

impl PhyConnection {
    fn ur_value(self) -> u32 {
        match self {
            PhyConnection::Mii => 0x1,
            PhyConnection::Rmii => 0x0,
        }
    }
}

/// Pick the MCK-to-MDC divisor. Per 802.3, MDC must stay below 2.5 MHz.
fn mck_clock_divisor(mck: u32) -> Result<u32, NetworkError> {
    let divisor = if mck <= 20_000_000 {
        GMAC_NCFGR_CLK_MCK_8
    } else if mck <= 40_000_000 {
        GMAC_NCFGR_CLK_MCK_16
    } else if mck <= 80_000_000 {
        GMAC_NCFGR_CLK_MCK_32
    } else if mck <= 120_000_000 {
        GMAC_NCFGR_CLK_MCK_48
    } else if mck <= 160_000_000 {
        GMAC_NCFGR_CLK_MCK_64
    } else if mck <= 240_000_000 {
        GMAC_NCFGR_CLK_MCK_96
    } else {
        log::error!("no valid MDC clock divisor for MCK {}", mck);
        return Err(NetworkError::InvalidMdcClock);
    };

    Ok(divisor)
}

// ============================================================================
// Controller
// ============================================================================

/// GMAC controller instance.
///
/// Owns the main queue's rings and the parked priority queues. The
/// descriptor lists live inside this struct and their addresses are
/// programmed into hardware by [`Gmac::init`], so the instance must be at
/// its final location before `init` runs and must not move afterwards.
pub struct Gmac<'p> {
    regs: GmacRegs,
    queue: Queue<'p, MAIN_QUEUE_RX_DESC_COUNT, MAIN_QUEUE_TX_DESC_COUNT>,
    idle_queues: [IdleQueue; GMAC_PRIORITY_QUEUE_NUM],
    phy_connection: PhyConnection,
    mac_addr: MacAddress,
    link: bool,
}

impl<'p> Gmac<'p> {
    /// Create a controller for the GMAC register block at `base_addr`,
    /// drawing RX buffers from `pool`.
    pub fn new(base_addr: usize, pool: &'p PacketPool, phy_connection: PhyConnection) -> Self {
        Self {
            regs: GmacRegs::new(base_addr),
            queue: Queue::new(0, pool),
            idle_queues: core::array::from_fn(|_| IdleQueue::new()),
            phy_connection,
            mac_addr: MacAddress::zero(),
            link: false,
        }
    }

    /// Bring the MAC up: core register setup, MAC address, main queue
    /// activation, priority queues parked. The interface stays disabled
    /// until the PHY layer reports [`Gmac::link_up`].
    pub fn init(&mut self, mac: MacAddress) -> Result<(), NetworkError> {
        let mck_divisor = mck_clock_divisor(MCK_FREQ_HZ)?;

        // Network control to its default value, statistics cleared
        self.regs.write(GMAC_NCR, GMAC_NCR_CLRSTAT | GMAC_NCR_MPE);

        // Disable and drain all interrupts, priority-queue banks included
        self.regs.write(GMAC_IDR, u32::MAX);
        let _ = self.regs.read(GMAC_ISR);
        for bank in 0..GMAC_PRIORITY_QUEUE_NUM {
            self.regs.write(gmac_idrpq(bank), u32::MAX);
            let _ = self.regs.read(gmac_isrpq(bank));
        }

        // Accept all multicast frames while MTIHEN is set
        self.regs.write(GMAC_HRB, u32::MAX);
        self.regs.write(GMAC_HRT, u32::MAX);

        self.regs.write(
            GMAC_NCFGR,
            GMAC_NCFGR_MTIHEN
                | GMAC_NCFGR_LFERD
                | GMAC_NCFGR_RFCS
                | GMAC_NCFGR_RXCOEN
                | GMAC_NCFGR_MAXFS
                | mck_divisor,
        );

        self.regs.write(GMAC_UR, self.phy_connection.ur_value());

        self.set_mac_address(mac);

        self.queue.init(&self.regs)?;

        for (i, idle) in self.idle_queues.iter_mut().enumerate() {
            idle.park(&self.regs, (i + 1) as u8);
        }

        Ok(())
    }

    /// Program the MAC address into the type-1 specific-address filter.
    pub fn set_mac_address(&mut self, mac: MacAddress) {
        self.mac_addr = mac;
        let b = mac.as_bytes();

        self.regs.write(
            GMAC_SAB1,
            (b[3] as u32) << 24 | (b[2] as u32) << 16 | (b[1] as u32) << 8 | b[0] as u32,
        );
        self.regs.write(GMAC_SAT1, (b[5] as u32) << 8 | b[4] as u32);

        log::info!("MAC: {}", mac);
    }

    pub fn mac_address(&self) -> MacAddress {
        self.mac_addr
    }

    /// PHY layer reports the link as negotiated: configure duplex/speed
    /// and enable both engines.
    pub fn link_up(&mut self, duplex: Duplex, speed: LinkSpeed) {
        let mut val = self.regs.read(GMAC_NCFGR);
        val &= !(GMAC_NCFGR_FD | GMAC_NCFGR_SPD);
        if duplex == Duplex::Full {
            val |= GMAC_NCFGR_FD;
        }
        if speed == LinkSpeed::Speed100 {
            val |= GMAC_NCFGR_SPD;
        }
        self.regs.write(GMAC_NCFGR, val);

        self.regs.set_bits(GMAC_NCR, GMAC_NCR_RXEN | GMAC_NCR_TXEN);
        self.link = true;

        log::info!("link up: {:?}, {:?} duplex", speed, duplex);
    }

    /// PHY layer reports the link lost.
    pub fn link_down(&mut self) {
        self.link = false;
        log::info!("link down");
    }

    pub fn is_link_up(&self) -> bool {
        self.link
    }

    /// Enqueue a frame for transmission. Non-blocking; failures after this
    /// point are reported through the error-interrupt path, not to the
    /// caller.
    pub fn send(&mut self, frame: Frame<'p>) -> Result<(), NetworkError> {
        log::debug!("eth tx: {} frags, {} bytes", frame.frag_count(), frame.len());
        self.queue.submit(&self.regs, frame)
    }

    /// Combined-interrupt entry point.
    ///
    /// Reads the status register exactly once (it clears on read) and
    /// demultiplexes: RX error beats RX completion, TX error beats TX
    /// completion, and a hardware response error is only logged. Every
    /// complete received frame is passed to `sink` in reception order.
    pub fn handle_interrupt<F>(&mut self, mut sink: F)
    where
        F: FnMut(Frame<'p>),
    {
        let isr = self.regs.read(GMAC_ISR);
        log::debug!("GMAC_ISR=0x{:08x}", isr);

        // RX
        if isr & GMAC_INT_RX_ERR_BITS != 0 {
            self.queue.rx_error_handler(&self.regs);
        } else if isr & GMAC_ISR_RCOMP != 0 {
            // More than one frame may have been received; drain every
            // complete one
            while let Some(frame) = self.queue.frame_get() {
                sink(frame);
            }
        }

        // TX
        if isr & GMAC_INT_TX_ERR_BITS != 0 {
            self.queue.tx_error_handler(&self.regs);
        } else if isr & GMAC_ISR_TCOMP != 0 {
            self.queue.tx_completed();
        }

        if isr & GMAC_ISR_HRESP != 0 {
            log::debug!("hardware response error");
        }
    }

    /// Error-counter snapshot for the main queue.
    pub fn stats(&self) -> QueueStats {
        self.queue.stats()
    }
}

// ============================================================================
// Shared-device wrapper
// ============================================================================

/// Mutex-wrapped controller for sharing between the send path and the
/// interrupt handler.
///
/// Both entry points take the same lock, so on a single-core target the
/// platform's interrupt entry must not preempt a lock holder (mask the
/// GMAC interrupt around send-path use, or use an IRQ-safe lock at the
/// platform layer).
pub struct GmacDevice<'p> {
    inner: spin::Mutex<Gmac<'p>>,
}

impl<'p> GmacDevice<'p> {
    pub fn new(base_addr: usize, pool: &'p PacketPool, phy_connection: PhyConnection) -> Self {
        Self {
            inner: spin::Mutex::new(Gmac::new(base_addr, pool, phy_connection)),
        }
    }

    pub fn init(&self, mac: MacAddress) -> Result<(), NetworkError> {
        self.inner.lock().init(mac)
    }

    pub fn send(&self, frame: Frame<'p>) -> Result<(), NetworkError> {
        self.inner.lock().send(frame)
    }

    pub fn handle_interrupt<F>(&self, sink: F)
    where
        F: FnMut(Frame<'p>),
    {
        self.inner.lock().handle_interrupt(sink)
    }

    pub fn link_up(&self, duplex: Duplex, speed: LinkSpeed) {
        self.inner.lock().link_up(duplex, speed)
    }

    pub fn link_down(&self) {
        self.inner.lock().link_down()
    }

    pub fn stats(&self) -> QueueStats {
        self.inner.lock().stats()
    }
}
