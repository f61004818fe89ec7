//! Configuration management for sc16is740-uart.
//!
//! This module handles loading configuration from JSON files and
//! environment variables. Command-line arguments, handled by the binary,
//! take precedence over both.
//!
//! ```json
//! {
//!   "uart": { "baud_rate": 115200, "line": "8N1", "block_on_overrun": true },
//!   "bus": { "type": "i2c", "device": "/dev/i2c-1", "address": 0 }
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hw_trait::{BitOrder, SpiConfig, SpiMode};
use crate::peripheral::sc16is740::{LineOptions, DEFAULT_OSCILLATOR_HZ};
use crate::transport::SpiTransportConfig;

/// Environment variable overriding [`UartConfig::baud_rate`]
pub const ENV_BAUD: &str = "SC16IS740_BAUD";
/// Environment variable overriding [`UartConfig::line`]
pub const ENV_LINE: &str = "SC16IS740_LINE";
/// Environment variable overriding [`UartConfig::oscillator_hz`]
pub const ENV_OSCILLATOR_HZ: &str = "SC16IS740_OSCILLATOR_HZ";

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Config {
    /// Serial line and driver policy
    #[serde(default)]
    pub uart: UartConfig,

    /// How the chip is attached
    pub bus: BusConfig,
}

/// Serial line settings and driver policy.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct UartConfig {
    pub baud_rate: u32,

    /// Data bits, parity, stop bits, e.g. "8N1"
    pub line: LineOptions,

    /// Crystal frequency
    pub oscillator_hz: u32,

    /// Wait for FIFO space instead of overwriting
    pub block_on_overrun: bool,

    /// Bound on each wait for FIFO space; null waits forever
    pub write_timeout_ms: Option<u64>,

    /// Delay between FIFO level polls
    pub poll_interval_ms: u64,
}

impl Default for UartConfig {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            line: LineOptions::OPTIONS_8N1,
            oscillator_hz: DEFAULT_OSCILLATOR_HZ,
            block_on_overrun: true,
            write_timeout_ms: Some(5000),
            poll_interval_ms: 1,
        }
    }
}

impl UartConfig {
    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout_ms.map(Duration::from_millis)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Bus attachment.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BusConfig {
    I2c(I2cBusConfig),
    Spi(SpiBusConfig),
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct I2cBusConfig {
    /// Adapter device node
    pub device: PathBuf,

    /// A0/A1 jumper setting (0-3) or literal 7-bit address
    #[serde(default)]
    pub address: u8,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SpiBusConfig {
    /// spidev device node
    pub device: PathBuf,

    /// GPIO used as chip select; the controller's own chip select when
    /// absent
    #[serde(default)]
    pub cs_gpio: Option<u32>,

    #[serde(default = "default_spi_clock_hz")]
    pub clock_hz: u32,

    /// SPI mode 0-3
    #[serde(default)]
    pub mode: u8,

    #[serde(default)]
    pub lsb_first: bool,

    /// Reconfigure before every transaction
    #[serde(default)]
    pub shared: bool,

    #[serde(default = "default_settle_us")]
    pub settle_us: u64,
}

fn default_spi_clock_hz() -> u32 {
    SpiConfig::default().clock_hz
}

fn default_settle_us() -> u64 {
    50
}

impl SpiBusConfig {
    pub fn transport_config(&self) -> Result<SpiTransportConfig> {
        let mode = match self.mode {
            0 => SpiMode::Mode0,
            1 => SpiMode::Mode1,
            2 => SpiMode::Mode2,
            3 => SpiMode::Mode3,
            other => return Err(Error::Config(format!("invalid SPI mode {other}"))),
        };
        let bit_order = if self.lsb_first {
            BitOrder::LsbFirst
        } else {
            BitOrder::MsbFirst
        };
        Ok(SpiTransportConfig {
            bus: SpiConfig {
                clock_hz: self.clock_hz,
                mode,
                bit_order,
            },
            shared: self.shared,
            settle_delay: Duration::from_micros(self.settle_us),
        })
    }
}

impl Config {
    /// Parse a JSON configuration file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("reading {}: {e}", path.display())))?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Apply `SC16IS740_*` environment overrides.
    pub fn apply_env(&mut self) -> Result<()> {
        self.uart.apply_overrides(|name| std::env::var(name).ok())
    }
}

impl UartConfig {
    /// Apply overrides from any name -> value lookup.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(baud) = lookup(ENV_BAUD) {
            self.baud_rate = parse_number(ENV_BAUD, &baud)?;
        }
        if let Some(line) = lookup(ENV_LINE) {
            self.line = line
                .parse()
                .map_err(|e| Error::Config(format!("{ENV_LINE}: {e}")))?;
        }
        if let Some(hz) = lookup(ENV_OSCILLATOR_HZ) {
            self.oscillator_hz = parse_number(ENV_OSCILLATOR_HZ, &hz)?;
        }
        Ok(())
    }
}

fn parse_number(name: &str, value: &str) -> Result<u32> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{name}: not a number: {value:?}")))
}
