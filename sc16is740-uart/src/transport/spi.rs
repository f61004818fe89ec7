//! SPI register transport
//!
//! Each transaction is one chip-select-low window holding a command byte
//! and its payload:
//!
//! - read: `0x80 | (reg << 3)`, then one dummy byte clocked to receive
//!   the value
//! - write: `reg << 3`, then the value
//! - bursts: the RHR/THR command followed by up to 64 payload bytes
//!
//! The whole window goes out as a single full-duplex transfer, which keeps
//! the framing intact on controllers that drive chip select themselves.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time;

use super::{check_burst, RegisterTransport};
use crate::error::Result;
use crate::hw_trait::{OutputPin, Spi, SpiConfig};
use crate::peripheral::sc16is740::{registers, subaddress};
use crate::tracing::prelude::*;

/// Bounded by the frame buffer, not by the bus protocol.
pub const SPI_MAX_BURST: usize = 64;

const READ_FLAG: u8 = 0x80;

/// Bus settings and sharing mode for [`SpiTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiTransportConfig {
    pub bus: SpiConfig,
    /// Reconfigure the bus before every transaction because other devices
    /// on it use different settings.
    pub shared: bool,
    /// Wait after each reconfiguration in shared mode
    pub settle_delay: Duration,
}

impl Default for SpiTransportConfig {
    fn default() -> Self {
        Self {
            bus: SpiConfig::default(),
            shared: false,
            settle_delay: Duration::from_micros(50),
        }
    }
}

/// SC16IS740 on an SPI bus with its own chip select.
pub struct SpiTransport<SPI, CS> {
    spi: SPI,
    cs: CS,
    config: SpiTransportConfig,
}

impl<SPI: Spi, CS: OutputPin> SpiTransport<SPI, CS> {
    /// Exclusive bus with default settings.
    pub fn new(spi: SPI, cs: CS) -> Self {
        Self::with_config(spi, cs, SpiTransportConfig::default())
    }

    pub fn with_config(spi: SPI, cs: CS, config: SpiTransportConfig) -> Self {
        Self { spi, cs, config }
    }

    /// Switch to shared-bus mode with the given settle delay.
    pub fn shared(mut self, settle_delay: Duration) -> Self {
        self.config.shared = true;
        self.config.settle_delay = settle_delay;
        self
    }

    pub fn config(&self) -> &SpiTransportConfig {
        &self.config
    }

    pub fn into_inner(self) -> (SPI, CS) {
        (self.spi, self.cs)
    }

    async fn configure_bus(&mut self) -> Result<()> {
        self.spi.configure(&self.config.bus).await?;
        Ok(())
    }

    // Chip select is released even when the transfer fails.
    async fn transaction(&mut self, frame: &mut [u8]) -> Result<()> {
        if self.config.shared {
            self.configure_bus().await?;
            if !self.config.settle_delay.is_zero() {
                time::sleep(self.config.settle_delay).await;
            }
        }

        self.cs.set_low().await?;
        let transferred = self.spi.transfer_in_place(frame).await;
        let released = self.cs.set_high().await;
        transferred?;
        released?;
        Ok(())
    }
}

#[async_trait]
impl<SPI: Spi, CS: OutputPin> RegisterTransport for SpiTransport<SPI, CS> {
    async fn read_register(&mut self, reg: u8) -> Result<u8> {
        let mut frame = [READ_FLAG | subaddress(reg), 0];
        self.transaction(&mut frame).await?;
        trace!("read_register reg={} value={}", reg, frame[1]);
        Ok(frame[1])
    }

    async fn write_register(&mut self, reg: u8, value: u8) -> Result<()> {
        let mut frame = [subaddress(reg), value];
        let result = self.transaction(&mut frame).await;
        trace!("write_register reg={} value={} ok={}", reg, value, result.is_ok());
        result
    }

    async fn read_burst(&mut self, buf: &mut [u8]) -> Result<()> {
        check_burst(buf.len(), SPI_MAX_BURST)?;
        let len = buf.len();
        let mut frame = [0u8; SPI_MAX_BURST + 1];
        frame[0] = READ_FLAG | subaddress(registers::RHR_THR);
        self.transaction(&mut frame[..=len]).await?;
        buf.copy_from_slice(&frame[1..=len]);
        trace!("read_burst len={}", len);
        Ok(())
    }

    async fn write_burst(&mut self, data: &[u8]) -> Result<()> {
        check_burst(data.len(), SPI_MAX_BURST)?;
        let len = data.len();
        let mut frame = [0u8; SPI_MAX_BURST + 1];
        frame[0] = subaddress(registers::RHR_THR);
        frame[1..=len].copy_from_slice(data);
        self.transaction(&mut frame[..=len]).await?;
        trace!("write_burst len={}", len);
        Ok(())
    }

    async fn pre_begin(&mut self) -> Result<()> {
        self.cs.set_high().await?;
        if !self.config.shared {
            self.configure_bus().await?;
        }
        debug!(
            "SPI transport ready: {:?}, shared={}",
            self.config.bus, self.config.shared
        );
        Ok(())
    }

    fn max_burst_read_len(&self) -> usize {
        SPI_MAX_BURST
    }

    fn max_burst_write_len(&self) -> usize {
        SPI_MAX_BURST
    }
}
