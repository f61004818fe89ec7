//! Linux userspace implementations of the bus traits.
//!
//! - [`LinuxI2c`] talks to `/dev/i2c-N` with the `I2C_RDWR` ioctl, so a
//!   write followed by a read is issued as one combined transaction with a
//!   repeated start.
//! - [`LinuxSpi`] talks to `/dev/spidevB.C` with `SPI_IOC_MESSAGE`. Each
//!   call is one message, so the kernel keeps its own chip select asserted
//!   for exactly one frame. Open with `no_cs` when chip select is driven
//!   through a GPIO instead.
//! - [`SysfsPin`] drives a GPIO through `/sys/class/gpio`.
//!
//! The ioctls complete in microseconds and are called inline rather than
//! on a blocking thread.

use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use nix::errno::Errno;

use super::{BitOrder, HwError, I2c, OutputPin, Result, Spi, SpiConfig, SpiMode};
use crate::tracing::prelude::*;

mod ioctl {
    /// `struct i2c_msg` from `<linux/i2c.h>`
    #[repr(C)]
    pub struct I2cMsg {
        pub addr: u16,
        pub flags: u16,
        pub len: u16,
        pub buf: *mut u8,
    }

    /// `struct i2c_rdwr_ioctl_data` from `<linux/i2c-dev.h>`
    #[repr(C)]
    pub struct I2cRdwrData {
        pub msgs: *mut I2cMsg,
        pub nmsgs: u32,
    }

    pub const I2C_RDWR: u16 = 0x0707;
    pub const I2C_M_RD: u16 = 0x0001;

    nix::ioctl_write_ptr_bad!(i2c_rdwr, I2C_RDWR, I2cRdwrData);

    /// `struct spi_ioc_transfer` from `<linux/spi/spidev.h>`
    #[repr(C)]
    #[derive(Debug, Default)]
    pub struct SpiIocTransfer {
        pub tx_buf: u64,
        pub rx_buf: u64,
        pub len: u32,
        pub speed_hz: u32,
        pub delay_usecs: u16,
        pub bits_per_word: u8,
        pub cs_change: u8,
        pub tx_nbits: u8,
        pub rx_nbits: u8,
        pub word_delay_usecs: u8,
        pub pad: u8,
    }

    pub const SPI_IOC_MAGIC: u8 = b'k';
    pub const SPI_CPHA: u8 = 0x01;
    pub const SPI_CPOL: u8 = 0x02;
    pub const SPI_NO_CS: u8 = 0x40;

    nix::ioctl_write_buf!(spi_message, SPI_IOC_MAGIC, 0, SpiIocTransfer);
    nix::ioctl_write_ptr!(spi_write_mode, SPI_IOC_MAGIC, 1, u8);
    nix::ioctl_write_ptr!(spi_write_lsb_first, SPI_IOC_MAGIC, 2, u8);
    nix::ioctl_write_ptr!(spi_write_bits_per_word, SPI_IOC_MAGIC, 3, u8);
    nix::ioctl_write_ptr!(spi_write_max_speed_hz, SPI_IOC_MAGIC, 4, u32);
}

fn map_errno(err: Errno, address: u8) -> HwError {
    match err {
        Errno::ENXIO | Errno::EREMOTEIO => HwError::Nack { address },
        Errno::ETIMEDOUT => HwError::Timeout,
        other => HwError::Io(other.into()),
    }
}

fn open_rw(path: &Path) -> Result<File> {
    Ok(OpenOptions::new().read(true).write(true).open(path)?)
}

/// I2C bus backed by the i2c-dev character device.
pub struct LinuxI2c {
    file: File,
    path: PathBuf,
}

impl LinuxI2c {
    /// Open an I2C adapter, e.g. `/dev/i2c-1`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = open_rw(&path)?;
        debug!("Opened I2C adapter {}", path.display());
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // Issue all messages as one combined transaction: a START before the
    // first, repeated STARTs between, a single STOP after the last.
    fn rdwr(&self, address: u8, write: Option<&[u8]>, read: Option<&mut [u8]>) -> Result<()> {
        let mut msgs = Vec::with_capacity(2);
        if let Some(data) = write {
            msgs.push(ioctl::I2cMsg {
                addr: address as u16,
                flags: 0,
                len: data.len() as u16,
                // The kernel only reads from write buffers.
                buf: data.as_ptr() as *mut u8,
            });
        }
        if let Some(buf) = read {
            msgs.push(ioctl::I2cMsg {
                addr: address as u16,
                flags: ioctl::I2C_M_RD,
                len: buf.len() as u16,
                buf: buf.as_mut_ptr(),
            });
        }

        let data = ioctl::I2cRdwrData {
            msgs: msgs.as_mut_ptr(),
            nmsgs: msgs.len() as u32,
        };

        // SAFETY: every message points at a live buffer of the stated
        // length for the duration of the call, and `data` points at `msgs`.
        unsafe { ioctl::i2c_rdwr(self.file.as_raw_fd(), &data) }
            .map(|_| ())
            .map_err(|e| map_errno(e, address))
    }
}

#[async_trait]
impl I2c for LinuxI2c {
    async fn write(&mut self, address: u8, data: &[u8]) -> Result<()> {
        self.rdwr(address, Some(data), None)
    }

    async fn read(&mut self, address: u8, buf: &mut [u8]) -> Result<()> {
        self.rdwr(address, None, Some(buf))
    }

    async fn write_read(&mut self, address: u8, data: &[u8], buf: &mut [u8]) -> Result<()> {
        self.rdwr(address, Some(data), Some(buf))
    }
}

/// SPI bus backed by the spidev character device.
pub struct LinuxSpi {
    file: File,
    clock_hz: u32,
    no_cs: bool,
}

impl LinuxSpi {
    /// Open a spidev node, e.g. `/dev/spidev0.0`.
    ///
    /// With `no_cs` set the controller leaves chip select alone and the
    /// caller is expected to drive it through a GPIO.
    pub fn open(path: impl AsRef<Path>, no_cs: bool) -> Result<Self> {
        let path = path.as_ref();
        let file = open_rw(path)?;
        debug!("Opened SPI device {} (no_cs={})", path.display(), no_cs);
        Ok(Self {
            file,
            clock_hz: SpiConfig::default().clock_hz,
            no_cs,
        })
    }

    fn message(&self, tx: *const u8, rx: *mut u8, len: usize) -> Result<()> {
        let transfer = [ioctl::SpiIocTransfer {
            tx_buf: tx as u64,
            rx_buf: rx as u64,
            len: len as u32,
            speed_hz: self.clock_hz,
            bits_per_word: 8,
            ..Default::default()
        }];

        // SAFETY: tx/rx are either null or valid for `len` bytes for the
        // duration of the call.
        unsafe { ioctl::spi_message(self.file.as_raw_fd(), &transfer) }
            .map(|_| ())
            .map_err(|e| map_errno(e, 0))
    }
}

#[async_trait]
impl Spi for LinuxSpi {
    async fn configure(&mut self, config: &SpiConfig) -> Result<()> {
        let mut mode = match config.mode {
            SpiMode::Mode0 => 0,
            SpiMode::Mode1 => ioctl::SPI_CPHA,
            SpiMode::Mode2 => ioctl::SPI_CPOL,
            SpiMode::Mode3 => ioctl::SPI_CPOL | ioctl::SPI_CPHA,
        };
        if self.no_cs {
            mode |= ioctl::SPI_NO_CS;
        }
        let lsb_first: u8 = match config.bit_order {
            BitOrder::MsbFirst => 0,
            BitOrder::LsbFirst => 1,
        };
        let bits: u8 = 8;
        let fd = self.file.as_raw_fd();

        // SAFETY: each pointer refers to a local that outlives the call.
        unsafe {
            ioctl::spi_write_mode(fd, &mode).map_err(|e| map_errno(e, 0))?;
            ioctl::spi_write_lsb_first(fd, &lsb_first).map_err(|e| map_errno(e, 0))?;
            ioctl::spi_write_bits_per_word(fd, &bits).map_err(|e| map_errno(e, 0))?;
            ioctl::spi_write_max_speed_hz(fd, &config.clock_hz).map_err(|e| map_errno(e, 0))?;
        }
        self.clock_hz = config.clock_hz;
        trace!("SPI configured: {:?}", config);
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.message(data.as_ptr(), std::ptr::null_mut(), data.len())
    }

    async fn transfer_in_place(&mut self, buf: &mut [u8]) -> Result<()> {
        let len = buf.len();
        let ptr = buf.as_mut_ptr();
        self.message(ptr, ptr, len)
    }
}

/// GPIO output driven through the legacy sysfs interface.
///
/// The `value` file stays open so that toggling chip select costs one
/// write.
pub struct SysfsPin {
    number: u32,
    value: File,
}

impl SysfsPin {
    /// Export `number` (if needed) and configure it as an output, initially
    /// high.
    pub fn export(number: u32) -> Result<Self> {
        let base = PathBuf::from(format!("/sys/class/gpio/gpio{number}"));
        if !base.exists() {
            fs::write("/sys/class/gpio/export", number.to_string())?;
        }
        // "high" switches to output and drives the line high in one step,
        // so chip select never glitches low.
        fs::write(base.join("direction"), "high")?;
        let value = OpenOptions::new().write(true).open(base.join("value"))?;
        debug!("Exported GPIO {} as output", number);
        Ok(Self { number, value })
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    fn set(&mut self, high: bool) -> Result<()> {
        self.value.seek(SeekFrom::Start(0))?;
        self.value.write_all(if high { b"1" } else { b"0" })?;
        Ok(())
    }
}

#[async_trait]
impl OutputPin for SysfsPin {
    async fn set_high(&mut self) -> Result<()> {
        self.set(true)
    }

    async fn set_low(&mut self) -> Result<()> {
        self.set(false)
    }
}
