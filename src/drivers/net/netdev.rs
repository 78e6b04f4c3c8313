//! Network Device Abstraction
//!
//! Error and link-parameter types shared by network device drivers.
//!
//! # Thread Safety
//!
//! Drivers are not required to be thread-safe at the type level.
//! Synchronization is handled by the caller (e.g., wrapping in a `Mutex`);
//! individual drivers may use lock-free techniques internally (e.g., DMA
//! ring ownership bits).

use core::fmt;

/// Errors that can occur during network device operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkError {
    /// Could not reserve enough packet buffers to populate the RX ring
    NoBuffers,

    /// A frame with no fragments was submitted for transmission
    EmptyFrame,

    /// No valid MDC clock divisor exists for the configured master clock
    InvalidMdcClock,
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::NoBuffers => write!(f, "failed to reserve packet buffers"),
            NetworkError::EmptyFrame => write!(f, "frame has no fragments"),
            NetworkError::InvalidMdcClock => write!(f, "no valid MDC clock divisor"),
        }
    }
}

/// Link duplex mode, as negotiated by the (out-of-crate) PHY layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Duplex {
    Half,
    Full,
}

/// Link speed. The GMAC's configuration register selects 10 or 100 Mbit/s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSpeed {
    Speed10,
    Speed100,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::string::ToString;

    #[test]
    fn test_error_display() {
        assert_eq!(
            NetworkError::NoBuffers.to_string(),
            "failed to reserve packet buffers"
        );
        assert_eq!(NetworkError::EmptyFrame.to_string(), "frame has no fragments");
    }
}
