//! Hardware abstraction layer traits.
//!
//! This module defines the host-side bus interfaces (I2C, SPI, GPIO) that
//! the UART bridge transports are written against. Implementations may be
//! direct Linux hardware access (see [`linux`]), a bus tunneled through
//! some other controller, or a simulator in tests.

use async_trait::async_trait;
use thiserror::Error;

#[cfg(target_os = "linux")]
pub mod linux;

/// Errors reported by a host bus primitive.
#[derive(Error, Debug)]
pub enum HwError {
    /// Underlying device I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No device acknowledged the address or a data byte
    #[error("NACK from device at 0x{address:02X}")]
    Nack { address: u8 },

    /// The bus did not complete the transaction in time
    #[error("bus timeout")]
    Timeout,

    /// Anything else the bus driver wants to report
    #[error("bus error: {0}")]
    Bus(String),
}

/// Result type for bus primitives.
pub type Result<T> = std::result::Result<T, HwError>;

/// I2C bus master.
#[async_trait]
pub trait I2c: Send {
    /// Write `data` to the device at `address` in one transaction.
    async fn write(&mut self, address: u8, data: &[u8]) -> Result<()>;

    /// Read `buf.len()` bytes from the device at `address`.
    async fn read(&mut self, address: u8, buf: &mut [u8]) -> Result<()>;

    /// Write `data`, then read into `buf` after a repeated start, without
    /// releasing the bus in between.
    async fn write_read(&mut self, address: u8, data: &[u8], buf: &mut [u8]) -> Result<()>;
}

/// SPI clock polarity and phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpiMode {
    /// CPOL=0, CPHA=0
    #[default]
    Mode0,
    /// CPOL=0, CPHA=1
    Mode1,
    /// CPOL=1, CPHA=0
    Mode2,
    /// CPOL=1, CPHA=1
    Mode3,
}

/// Order in which bits of a byte are shifted out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BitOrder {
    #[default]
    MsbFirst,
    LsbFirst,
}

/// Bus settings applied by [`Spi::configure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiConfig {
    pub clock_hz: u32,
    pub mode: SpiMode,
    pub bit_order: BitOrder,
}

impl Default for SpiConfig {
    fn default() -> Self {
        Self {
            clock_hz: 4_000_000,
            mode: SpiMode::Mode0,
            bit_order: BitOrder::MsbFirst,
        }
    }
}

/// SPI bus master. Chip select is not part of this trait; callers drive it
/// through an [`OutputPin`].
#[async_trait]
pub trait Spi: Send {
    /// Apply clock speed, mode and bit order.
    async fn configure(&mut self, config: &SpiConfig) -> Result<()>;

    /// Shift out `data`, discarding whatever is clocked in.
    async fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Full-duplex transfer: each byte of `buf` is sent and replaced by the
    /// byte received in the same clock cycles.
    async fn transfer_in_place(&mut self, buf: &mut [u8]) -> Result<()>;
}

/// A digital output, used for chip select.
#[async_trait]
pub trait OutputPin: Send {
    async fn set_high(&mut self) -> Result<()>;
    async fn set_low(&mut self) -> Result<()>;
}

/// Placeholder pin for buses whose controller drives chip select itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPin;

#[async_trait]
impl OutputPin for NoPin {
    async fn set_high(&mut self) -> Result<()> {
        Ok(())
    }

    async fn set_low(&mut self) -> Result<()> {
        Ok(())
    }
}
