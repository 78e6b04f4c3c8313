//! Zero-copy Ethernet MAC driver for the Atmel/Microchip SAM GMAC.
//!
//! The GMAC moves frames through fixed-size circular lists of two-word
//! DMA descriptors. Hardware and software hand each descriptor back and
//! forth through single ownership bits; no lock is ever held across the
//! hardware boundary. Received payload is never copied: buffers are wired
//! into the RX ring, detached into a [`net::frame::Frame`] when a complete
//! frame lands, and replaced with fresh buffers from the
//! [`net::buffer::PacketPool`]. Transmitted frames keep ownership of their
//! fragment buffers until the hardware reports the last descriptor done.
//!
//! ## Layout
//!
//! - `drivers::net::ethernet::atmel::gmac` - the controller itself:
//!   register map, descriptor protocol, per-queue ring engine, interrupt
//!   dispatch
//! - `net` - the pieces the driver shares with the stack above it: MAC
//!   addresses, the packet-buffer pool, and the multi-fragment frame object
//!
//! ## Scope
//!
//! PHY management (MDIO, autonegotiation) lives outside this crate; the
//! controller only consumes `link_up`/`link_down` notifications. Priority
//! queues are parked idle - only queue 0 carries traffic.

#![no_std]

#[cfg(test)]
extern crate std;

pub mod drivers;
pub mod net;
