//! Atmel/Microchip Ethernet controllers.

pub mod gmac;
