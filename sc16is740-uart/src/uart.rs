//! Buffered serial stream on top of an SC16IS740.
//!
//! [`BufferedUart`] turns register access through any [`RegisterTransport`]
//! into the usual serial operations: availability, byte and burst reads and
//! writes, peek and flush. The only buffering is the chip's own pair of
//! 64-byte FIFOs plus a single lookahead byte for [`BufferedUart::peek`];
//! FIFO levels are always read live from `RXLVL` and `TXLVL`.
//!
//! Writes follow an overrun policy. When blocking (the default), a write
//! waits for FIFO space. When dropping, a single byte is written regardless
//! of space and a burst is cut short to the space that was free. Waits poll
//! the chip every [`poll_interval`](BufferedUart::with_poll_interval) and
//! give up with [`Error::Timeout`] after
//! [`write_timeout`](BufferedUart::with_write_timeout). Dropping the future
//! of a waiting call also cancels it.
//!
//! ```ignore
//! let transport = I2cTransport::new(LinuxI2c::open("/dev/i2c-1")?, 0);
//! let mut uart = BufferedUart::new(transport);
//! uart.begin(9600, LineOptions::OPTIONS_8N1).await?;
//! uart.write_bytes(b"hello\r\n").await?;
//! while let Some(byte) = uart.read().await? {
//!     println!("{byte:02x}");
//! }
//! ```

use std::time::Duration;

use tokio::time::{self, Instant};

use crate::config::UartConfig;
use crate::error::{Error, Result};
use crate::peripheral::sc16is740::{
    self, lcr, registers, special, Fcr, LineOptions, Lsr, DEFAULT_OSCILLATOR_HZ, FIFO_SIZE,
};
use crate::tracing::prelude::*;
use crate::transport::RegisterTransport;

/// Default bound on a single wait for FIFO space or drain.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default delay between FIFO level polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Serial stream over an SC16IS740.
pub struct BufferedUart<T> {
    transport: T,
    oscillator_hz: u32,
    block_on_overrun: bool,
    write_timeout: Option<Duration>,
    poll_interval: Duration,
    peeked: Option<u8>,
}

impl<T: RegisterTransport> BufferedUart<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            oscillator_hz: DEFAULT_OSCILLATOR_HZ,
            block_on_overrun: true,
            write_timeout: Some(DEFAULT_WRITE_TIMEOUT),
            poll_interval: DEFAULT_POLL_INTERVAL,
            peeked: None,
        }
    }

    /// Apply oscillator, overrun policy and wait settings from a config.
    /// Line settings are applied separately by [`begin`](Self::begin).
    pub fn from_config(transport: T, config: &UartConfig) -> Self {
        Self::new(transport)
            .with_oscillator_hz(config.oscillator_hz)
            .with_write_timeout(config.write_timeout())
            .with_poll_interval(config.poll_interval())
            .block_on_overrun(config.block_on_overrun)
    }

    /// Crystal frequency feeding the baud generator. Takes effect at the
    /// next [`begin`](Self::begin).
    pub fn with_oscillator_hz(mut self, hz: u32) -> Self {
        self.oscillator_hz = hz;
        self
    }

    /// Bound every wait for FIFO space; `None` waits forever.
    pub fn with_write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Choose what writes do when the transmit FIFO is full: wait for room
    /// (`true`, the default) or write anyway and let the chip drop data.
    pub fn block_on_overrun(mut self, block: bool) -> Self {
        self.block_on_overrun = block;
        self
    }

    pub fn set_block_on_overrun(&mut self, block: bool) {
        self.block_on_overrun = block;
    }

    pub fn blocks_on_overrun(&self) -> bool {
        self.block_on_overrun
    }

    pub fn oscillator_hz(&self) -> u32 {
        self.oscillator_hz
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Program baud rate and line options, then enable and clear both
    /// FIFOs. May be called again to reconfigure; any buffered data,
    /// including a peeked byte, is discarded.
    pub async fn begin(&mut self, baud_rate: u32, options: LineOptions) -> Result<()> {
        let div = sc16is740::divisor(self.oscillator_hz, baud_rate).ok_or(
            Error::InvalidBaudRate {
                baud_rate,
                oscillator_hz: self.oscillator_hz,
            },
        )?;

        self.transport.pre_begin().await?;

        self.transport
            .write_register(registers::LCR, lcr::SPECIAL_START)
            .await?;
        if let Err(e) = self.program_divisor(div, options).await {
            // Never leave the divisor bank mapped over RHR/IER.
            if let Err(restore) = self
                .transport
                .write_register(registers::LCR, options.bits())
                .await
            {
                warn!("Failed to restore LCR after error: {}", restore);
            }
            return Err(e);
        }

        let fcr = Fcr::FIFO_ENABLE | Fcr::RX_FIFO_RESET | Fcr::TX_FIFO_RESET;
        self.transport
            .write_register(registers::FCR_IIR, fcr.bits())
            .await?;
        self.peeked = None;

        debug!(
            "UART configured: {} baud {} (divisor {}, oscillator {} Hz)",
            baud_rate, options, div, self.oscillator_hz
        );
        Ok(())
    }

    async fn program_divisor(&mut self, div: u16, options: LineOptions) -> Result<()> {
        let [low, high] = div.to_le_bytes();
        self.transport.write_register(special::DLL, low).await?;
        self.transport.write_register(special::DLH, high).await?;
        self.transport
            .write_register(registers::LCR, lcr::SPECIAL_END)
            .await?;
        self.transport
            .write_register(registers::LCR, options.bits() & lcr::OPTIONS_MASK)
            .await
    }

    /// Bytes ready to read: the receive FIFO level, plus one for a byte
    /// held by [`peek`](Self::peek).
    pub async fn available(&mut self) -> Result<usize> {
        let level = self.rx_level().await?;
        Ok(level + usize::from(self.peeked.is_some()))
    }

    /// Free space in the transmit FIFO.
    pub async fn available_for_write(&mut self) -> Result<usize> {
        Ok(self.transport.read_register(registers::TXLVL).await? as usize)
    }

    async fn rx_level(&mut self) -> Result<usize> {
        Ok(self.transport.read_register(registers::RXLVL).await? as usize)
    }

    /// Next received byte, or `None` when nothing is waiting.
    pub async fn read(&mut self) -> Result<Option<u8>> {
        if let Some(byte) = self.peeked.take() {
            return Ok(Some(byte));
        }
        if self.rx_level().await? == 0 {
            return Ok(None);
        }
        Ok(Some(self.transport.read_register(registers::RHR_THR).await?))
    }

    /// Next received byte without consuming it. Repeated calls return the
    /// same byte until [`read`](Self::read) takes it.
    pub async fn peek(&mut self) -> Result<Option<u8>> {
        if self.peeked.is_none() {
            self.peeked = self.read().await?;
        }
        Ok(self.peeked)
    }

    /// Write one byte. In drop mode the byte is written even if the FIFO is
    /// full.
    pub async fn write(&mut self, byte: u8) -> Result<usize> {
        if self.block_on_overrun {
            self.wait_for_tx_space(1).await?;
        }
        self.transport
            .write_register(registers::RHR_THR, byte)
            .await?;
        Ok(1)
    }

    /// Write a buffer in bursts and return the number of bytes that went
    /// into the FIFO.
    ///
    /// Blocking mode transfers everything or fails. If a wait for space
    /// times out after some chunks went out, the count so far is returned
    /// instead of [`Error::Timeout`]. Drop mode transfers only as much as
    /// fits and may return less than `data.len()`.
    pub async fn write_bytes(&mut self, data: &[u8]) -> Result<usize> {
        // Half the ceiling leaves headroom for framing overhead.
        let max_chunk = (self.transport.max_burst_write_len() / 2).max(1);
        let mut written = 0;

        while written < data.len() {
            let wanted = (data.len() - written).min(max_chunk);
            let chunk = if self.block_on_overrun {
                match self.wait_for_tx_space(wanted).await {
                    Ok(()) => wanted,
                    Err(Error::Timeout { waited, .. }) if written > 0 => {
                        warn!(
                            "write_bytes: stopped after {} of {} bytes, waited {:?}",
                            written,
                            data.len(),
                            waited
                        );
                        return Ok(written);
                    }
                    Err(e) => return Err(e),
                }
            } else {
                let free = self.available_for_write().await?;
                wanted.min(free)
            };
            if chunk == 0 {
                break;
            }

            self.transport
                .write_burst(&data[written..written + chunk])
                .await?;
            written += chunk;

            if chunk < wanted {
                break;
            }
        }

        if written < data.len() {
            debug!("write_bytes: FIFO full, wrote {} of {}", written, data.len());
        }
        Ok(written)
    }

    /// Read up to `buf.len()` bytes in one burst.
    ///
    /// Returns `None` when nothing is waiting; otherwise the count, which
    /// is bounded by what is available and by the transport's burst
    /// ceiling.
    pub async fn read_bytes(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        let available = self.available().await?;
        if available == 0 {
            return Ok(None);
        }
        let count = buf
            .len()
            .min(available)
            .min(self.transport.max_burst_read_len());
        if count == 0 {
            return Ok(Some(0));
        }

        let mut filled = 0;
        if let Some(byte) = self.peeked {
            buf[0] = byte;
            filled = 1;
        }
        if count > filled {
            self.transport.read_burst(&mut buf[filled..count]).await?;
        }
        // Released only once the burst succeeded, so a failed burst keeps it.
        self.peeked = None;
        Ok(Some(count))
    }

    /// Wait until the transmit FIFO is completely empty.
    pub async fn flush(&mut self) -> Result<()> {
        self.wait_until("transmit FIFO to drain", FIFO_SIZE).await
    }

    async fn wait_for_tx_space(&mut self, needed: usize) -> Result<()> {
        self.wait_until("transmit FIFO space", needed).await
    }

    // Poll TXLVL until it reaches `needed`, bounded by `write_timeout`.
    async fn wait_until(&mut self, op: &'static str, needed: usize) -> Result<()> {
        let start = Instant::now();
        loop {
            if self.available_for_write().await? >= needed {
                return Ok(());
            }
            if let Some(limit) = self.write_timeout {
                let waited = start.elapsed();
                if waited >= limit {
                    warn!("Gave up waiting for {} after {:?}", op, waited);
                    return Err(Error::Timeout { op, waited });
                }
            }
            time::sleep(self.poll_interval).await;
        }
    }

    /// Raw register read for features the stream API does not cover (GPIO
    /// pins, XON/XOFF). `reg` is the logical index, 0-15.
    pub async fn read_register(&mut self, reg: u8) -> Result<u8> {
        check_register(reg)?;
        self.transport.read_register(reg).await
    }

    /// Raw register write; see [`read_register`](Self::read_register).
    pub async fn write_register(&mut self, reg: u8, value: u8) -> Result<()> {
        check_register(reg)?;
        self.transport.write_register(reg, value).await
    }

    /// Decoded line status register.
    pub async fn line_status(&mut self) -> Result<Lsr> {
        let lsr = Lsr::from_bits_retain(self.transport.read_register(registers::LSR).await?);
        if lsr.has_error() {
            warn!("Line status reports errors: {:?}", lsr);
        }
        Ok(lsr)
    }

    /// Check the bus link by writing patterns to the scratch-pad register
    /// and reading them back. The previous contents are restored.
    pub async fn scratch_test(&mut self) -> Result<bool> {
        let saved = self.transport.read_register(registers::SPR).await?;
        let mut ok = true;
        for pattern in [0x55, 0xAA] {
            self.transport.write_register(registers::SPR, pattern).await?;
            let readback = self.transport.read_register(registers::SPR).await?;
            if readback != pattern {
                error!(
                    "Scratch register mismatch: wrote 0x{:02X}, read 0x{:02X}",
                    pattern, readback
                );
                ok = false;
                break;
            }
        }
        self.transport.write_register(registers::SPR, saved).await?;
        Ok(ok)
    }
}

fn check_register(reg: u8) -> Result<()> {
    if reg >= registers::COUNT {
        return Err(Error::InvalidRegister(reg));
    }
    Ok(())
}
