//! Driver for the NXP SC16IS740 I2C/SPI to UART bridge.
//!
//! The chip exposes sixteen 8-bit registers and a pair of 64-byte FIFOs.
//! This crate splits access to it in two layers:
//!
//! - [`transport`]: bus-specific register framing for I2C and SPI
//! - [`uart::BufferedUart`]: a serial stream with overrun policy, peek and
//!   flush, built only on the transport's register and burst primitives
//!
//! Bus drivers are abstracted by the traits in [`hw_trait`]; Linux
//! userspace implementations (i2c-dev, spidev, sysfs GPIO) live in
//! [`hw_trait::linux`].

pub mod config;
pub mod error;
pub mod hw_trait;
pub mod peripheral;
pub mod tracing;
pub mod transport;
pub mod uart;

#[cfg(test)]
pub(crate) mod sim;

pub use error::{Error, Result};
pub use peripheral::sc16is740::LineOptions;
pub use transport::{I2cTransport, RegisterTransport, SpiTransport, SpiTransportConfig};
pub use uart::BufferedUart;
