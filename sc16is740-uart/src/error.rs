//! Common error types for sc16is740-uart.
//!
//! This module provides a centralized Error enum using thiserror,
//! with conversions from the bus-level errors of [`crate::hw_trait`].

use std::time::Duration;

use thiserror::Error;

use crate::hw_trait::HwError;

/// Main error type for UART bridge operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A bus transaction failed; never retried by the driver
    #[error("Transport error: {0}")]
    Transport(#[from] HwError),

    /// A bounded wait for FIFO space ran out
    #[error("Timed out after {waited:?} waiting for {op}")]
    Timeout { op: &'static str, waited: Duration },

    /// Register index outside 0-15
    #[error("Invalid register index {0} (must be below 16)")]
    InvalidRegister(u8),

    /// Baud rate that cannot be programmed with the configured oscillator
    #[error("Baud rate {baud_rate} not reachable with a {oscillator_hz} Hz oscillator")]
    InvalidBaudRate { baud_rate: u32, oscillator_hz: u32 },

    /// Burst larger than the transport can move in one transaction
    #[error("Burst of {len} bytes exceeds transport limit of {max}")]
    BurstTooLong { len: usize, max: usize },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Convenience type alias for Results using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
