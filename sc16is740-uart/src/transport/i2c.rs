//! I2C register transport
//!
//! Every register access starts with a sub-address byte, `reg << 3`, which
//! leaves the channel bits at zero (the SC16IS740 has a single channel).
//!
//! - write: `[sub, value]` in one transaction
//! - read: `[sub]`, repeated start, 1-byte read
//! - burst write: `[sub(THR), data...]`, at most 31 data bytes so the whole
//!   transaction fits a 32-byte bus buffer together with the sub-address
//! - burst read: `[sub(RHR)]`, repeated start, N-byte read with no address
//!   byte in the buffer, so up to 32 bytes

use async_trait::async_trait;

use super::{check_burst, RegisterTransport};
use crate::error::Result;
use crate::hw_trait::I2c;
use crate::peripheral::sc16is740::{registers, subaddress};
use crate::tracing::prelude::*;

pub const I2C_MAX_BURST_READ: usize = 32;
pub const I2C_MAX_BURST_WRITE: usize = 31;

/// 7-bit addresses selected by the A0/A1 jumpers, indexed by jumper value.
///
/// The datasheet table lists 8-bit addresses including the R/W bit; these
/// are those values shifted right by one.
const JUMPER_ADDRESSES: [u8; 4] = [0x4D, 0x4C, 0x49, 0x48];

/// Resolve a jumper setting (0-3) or a literal 7-bit address.
pub fn device_address(addr: u8) -> u8 {
    JUMPER_ADDRESSES
        .get(addr as usize)
        .copied()
        .unwrap_or(addr)
}

/// SC16IS740 on an I2C bus.
pub struct I2cTransport<I2C> {
    i2c: I2C,
    address: u8,
}

impl<I2C: I2c> I2cTransport<I2C> {
    /// `addr` is either the A0/A1 jumper setting (0-3) or the actual 7-bit
    /// address.
    pub fn new(i2c: I2C, addr: u8) -> Self {
        Self {
            i2c,
            address: device_address(addr),
        }
    }

    /// The resolved 7-bit bus address.
    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn into_inner(self) -> I2C {
        self.i2c
    }
}

#[async_trait]
impl<I2C: I2c> RegisterTransport for I2cTransport<I2C> {
    async fn read_register(&mut self, reg: u8) -> Result<u8> {
        let mut value = [0u8; 1];
        self.i2c
            .write_read(self.address, &[subaddress(reg)], &mut value)
            .await?;
        trace!("read_register reg={} value={}", reg, value[0]);
        Ok(value[0])
    }

    async fn write_register(&mut self, reg: u8, value: u8) -> Result<()> {
        let result = self
            .i2c
            .write(self.address, &[subaddress(reg), value])
            .await;
        trace!("write_register reg={} value={} ok={}", reg, value, result.is_ok());
        Ok(result?)
    }

    async fn read_burst(&mut self, buf: &mut [u8]) -> Result<()> {
        check_burst(buf.len(), I2C_MAX_BURST_READ)?;
        self.i2c
            .write_read(self.address, &[subaddress(registers::RHR_THR)], buf)
            .await?;
        trace!("read_burst len={}", buf.len());
        Ok(())
    }

    async fn write_burst(&mut self, data: &[u8]) -> Result<()> {
        check_burst(data.len(), I2C_MAX_BURST_WRITE)?;
        let mut frame = [0u8; I2C_MAX_BURST_WRITE + 1];
        frame[0] = subaddress(registers::RHR_THR);
        frame[1..=data.len()].copy_from_slice(data);
        self.i2c
            .write(self.address, &frame[..=data.len()])
            .await?;
        trace!("write_burst len={}", data.len());
        Ok(())
    }

    async fn pre_begin(&mut self) -> Result<()> {
        debug!("Using SC16IS740 at I2C address 0x{:02X}", self.address);
        Ok(())
    }

    fn max_burst_read_len(&self) -> usize {
        I2C_MAX_BURST_READ
    }

    fn max_burst_write_len(&self) -> usize {
        I2C_MAX_BURST_WRITE
    }
}
