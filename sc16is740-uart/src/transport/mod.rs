//! Register-level access to the bridge chip.
//!
//! A [`RegisterTransport`] knows how one particular host bus addresses the
//! chip's registers and how many FIFO bytes it can move per transaction.
//! It has no notion of streams, flow control or overrun policy; that is
//! [`crate::uart::BufferedUart`]'s job.

use async_trait::async_trait;

use crate::error::Result;

pub mod i2c;
pub mod spi;

pub use i2c::I2cTransport;
pub use spi::{SpiTransport, SpiTransportConfig};

/// Bus-specific register and FIFO access.
///
/// Register arguments are logical indices below 16. Burst reads drain RHR
/// and burst writes fill THR. Every method is a single bus transaction and
/// reports failure from that transaction without retrying.
#[async_trait]
pub trait RegisterTransport: Send {
    async fn read_register(&mut self, reg: u8) -> Result<u8>;

    async fn write_register(&mut self, reg: u8, value: u8) -> Result<()>;

    /// Fill `buf` from the receive FIFO. `buf.len()` must not exceed
    /// [`max_burst_read_len`](Self::max_burst_read_len).
    async fn read_burst(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Push `data` into the transmit FIFO. `data.len()` must not exceed
    /// [`max_burst_write_len`](Self::max_burst_write_len).
    async fn write_burst(&mut self, data: &[u8]) -> Result<()>;

    /// Bus setup run at the start of every `begin`.
    async fn pre_begin(&mut self) -> Result<()>;

    fn max_burst_read_len(&self) -> usize;

    fn max_burst_write_len(&self) -> usize;
}

#[async_trait]
impl<T: RegisterTransport + ?Sized> RegisterTransport for Box<T> {
    async fn read_register(&mut self, reg: u8) -> Result<u8> {
        (**self).read_register(reg).await
    }

    async fn write_register(&mut self, reg: u8, value: u8) -> Result<()> {
        (**self).write_register(reg, value).await
    }

    async fn read_burst(&mut self, buf: &mut [u8]) -> Result<()> {
        (**self).read_burst(buf).await
    }

    async fn write_burst(&mut self, data: &[u8]) -> Result<()> {
        (**self).write_burst(data).await
    }

    async fn pre_begin(&mut self) -> Result<()> {
        (**self).pre_begin().await
    }

    fn max_burst_read_len(&self) -> usize {
        (**self).max_burst_read_len()
    }

    fn max_burst_write_len(&self) -> usize {
        (**self).max_burst_write_len()
    }
}

pub(crate) fn check_burst(len: usize, max: usize) -> Result<()> {
    if len > max {
        return Err(crate::error::Error::BurstTooLong { len, max });
    }
    Ok(())
}
