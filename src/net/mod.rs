//! Types shared between the MAC driver and the network stack above it.

pub mod buffer;
pub mod ethernet;
pub mod frame;

pub use buffer::{PacketPool, PoolBuffer};
pub use ethernet::MacAddress;
pub use frame::Frame;
