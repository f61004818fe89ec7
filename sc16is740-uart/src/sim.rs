//! Simulated SC16IS740 for tests.
//!
//! The model decodes real I2C and SPI framing, keeps both 64-byte FIFOs,
//! and connects the UART side to a [`Peer`] that plays the device on the
//! other end of the serial line. The line moves one byte in each direction
//! every `pace` bus transactions, so FIFO levels change while the driver
//! polls them. A pace of zero freezes the line.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::hw_trait::{HwError, I2c, OutputPin, Result, Spi, SpiConfig};
use crate::peripheral::sc16is740::{lcr, registers, special, LineOptions, FIFO_SIZE};

/// Bus-level events, recorded in order for framing assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    I2cWrite { address: u8, data: Vec<u8> },
    I2cRead { address: u8, len: usize },
    I2cWriteRead { address: u8, data: Vec<u8>, len: usize },
    SpiConfigure(SpiConfig),
    SpiFrame(Vec<u8>),
    CsLow,
    CsHigh,
}

struct Chip {
    address: u8,
    regs: [u8; 16],
    lcr: u8,
    dll: u8,
    dlh: u8,
    enhanced: [u8; 8],
    rx: VecDeque<u8>,
    tx: VecDeque<u8>,
    /// Bytes the peer has queued but the line has not delivered yet
    to_chip: VecDeque<u8>,
    /// Bytes that arrived at the peer
    at_peer: Vec<u8>,
    pace: usize,
    ticks: usize,
    tx_overruns: usize,
    rx_overruns: usize,
    /// Successful transactions left before the injected failure
    fail_in: Option<usize>,
    i2c_pointer: u8,
    cs_low: bool,
    spi_command: Option<u8>,
    events: Vec<BusEvent>,
    /// (dll, dlh) captured each time LCR leaves the divisor bank
    divisor_writes: Vec<(u8, u8)>,
}

impl Chip {
    fn new(address: u8) -> Self {
        Self {
            address,
            regs: [0; 16],
            lcr: 0x1D,
            dll: 0,
            dlh: 0,
            enhanced: [0; 8],
            rx: VecDeque::new(),
            tx: VecDeque::new(),
            to_chip: VecDeque::new(),
            at_peer: Vec::new(),
            pace: 1,
            ticks: 0,
            tx_overruns: 0,
            rx_overruns: 0,
            fail_in: None,
            i2c_pointer: 0,
            cs_low: false,
            spi_command: None,
            events: Vec::new(),
            divisor_writes: Vec::new(),
        }
    }

    fn data_mask(&self) -> u8 {
        LineOptions::from_bits(self.lcr).data_bits.mask()
    }

    /// Start of a bus transaction: advance the line, honor fault injection.
    fn transaction(&mut self) -> Result<()> {
        match self.fail_in {
            Some(0) => {
                self.fail_in = None;
                return Err(HwError::Timeout);
            }
            Some(n) => self.fail_in = Some(n - 1),
            None => {}
        }
        if self.pace == 0 {
            return Ok(());
        }
        self.ticks += 1;
        if self.ticks % self.pace == 0 {
            let mask = self.data_mask();
            if let Some(byte) = self.tx.pop_front() {
                self.at_peer.push(byte & mask);
            }
            if let Some(byte) = self.to_chip.pop_front() {
                if self.rx.len() < FIFO_SIZE {
                    self.rx.push_back(byte & mask);
                } else {
                    self.rx_overruns += 1;
                }
            }
        }
        Ok(())
    }

    fn read_reg(&mut self, reg: u8) -> u8 {
        let reg = reg & 0x0F;
        if self.lcr == lcr::SPECIAL_START && reg <= special::DLH {
            return if reg == special::DLL { self.dll } else { self.dlh };
        }
        if self.lcr == lcr::SPECIAL_END && (2..8).contains(&reg) && reg != registers::LCR {
            return self.enhanced[reg as usize];
        }
        match reg {
            registers::RHR_THR => self.rx.pop_front().unwrap_or(0),
            registers::LCR => self.lcr,
            registers::TXLVL => (FIFO_SIZE - self.tx.len()) as u8,
            registers::RXLVL => self.rx.len() as u8,
            registers::LSR => {
                let mut lsr = 0;
                if !self.rx.is_empty() {
                    lsr |= 0x01;
                }
                if self.rx_overruns > 0 {
                    lsr |= 0x02;
                }
                if self.tx.is_empty() {
                    lsr |= 0x60;
                }
                lsr
            }
            _ => self.regs[reg as usize],
        }
    }

    fn write_reg(&mut self, reg: u8, value: u8) {
        let reg = reg & 0x0F;
        if self.lcr == lcr::SPECIAL_START && reg <= special::DLH {
            if reg == special::DLL {
                self.dll = value;
            } else {
                self.dlh = value;
            }
            return;
        }
        if self.lcr == lcr::SPECIAL_END && (2..8).contains(&reg) && reg != registers::LCR {
            self.enhanced[reg as usize] = value;
            return;
        }
        match reg {
            registers::RHR_THR => {
                if self.tx.len() < FIFO_SIZE {
                    self.tx.push_back(value);
                } else {
                    self.tx_overruns += 1;
                }
            }
            registers::FCR_IIR => {
                if value & 0x02 != 0 {
                    self.rx.clear();
                }
                if value & 0x04 != 0 {
                    self.tx.clear();
                }
                self.regs[reg as usize] = value;
            }
            registers::LCR => {
                if self.lcr == lcr::SPECIAL_START && value != lcr::SPECIAL_START {
                    self.divisor_writes.push((self.dll, self.dlh));
                }
                self.lcr = value;
            }
            _ => self.regs[reg as usize] = value,
        }
    }

    fn check_address(&self, address: u8) -> Result<()> {
        if address != self.address {
            return Err(HwError::Nack { address });
        }
        Ok(())
    }

    fn i2c_write(&mut self, address: u8, data: &[u8]) -> Result<()> {
        self.events.push(BusEvent::I2cWrite {
            address,
            data: data.to_vec(),
        });
        self.transaction()?;
        self.check_address(address)?;
        let Some((&sub, payload)) = data.split_first() else {
            return Ok(());
        };
        let reg = sub >> 3;
        self.i2c_pointer = reg;
        for &byte in payload {
            self.write_reg(reg, byte);
        }
        Ok(())
    }

    fn i2c_read(&mut self, address: u8, buf: &mut [u8]) -> Result<()> {
        self.events.push(BusEvent::I2cRead {
            address,
            len: buf.len(),
        });
        self.transaction()?;
        self.check_address(address)?;
        let reg = self.i2c_pointer;
        for byte in buf.iter_mut() {
            *byte = self.read_reg(reg);
        }
        Ok(())
    }

    fn i2c_write_read(&mut self, address: u8, data: &[u8], buf: &mut [u8]) -> Result<()> {
        self.events.push(BusEvent::I2cWriteRead {
            address,
            data: data.to_vec(),
            len: buf.len(),
        });
        self.transaction()?;
        self.check_address(address)?;
        let reg = data.first().map(|sub| sub >> 3).unwrap_or(self.i2c_pointer);
        for byte in buf.iter_mut() {
            *byte = self.read_reg(reg);
        }
        Ok(())
    }

    fn spi_transfer(&mut self, buf: &mut [u8]) -> Result<()> {
        self.events.push(BusEvent::SpiFrame(buf.to_vec()));
        if !self.cs_low {
            return Err(HwError::Bus("clocked with chip select high".into()));
        }
        self.transaction()?;
        for byte in buf.iter_mut() {
            match self.spi_command {
                None => {
                    self.spi_command = Some(*byte);
                    *byte = 0xFF;
                }
                Some(cmd) if cmd & 0x80 != 0 => {
                    *byte = self.read_reg((cmd >> 3) & 0x0F);
                }
                Some(cmd) => {
                    self.write_reg((cmd >> 3) & 0x0F, *byte);
                    *byte = 0;
                }
            }
        }
        Ok(())
    }
}

/// Handle shared by the bus, chip-select and peer views of one chip.
#[derive(Clone)]
pub struct SimChip(Arc<Mutex<Chip>>);

impl SimChip {
    pub fn new(address: u8) -> Self {
        Self(Arc::new(Mutex::new(Chip::new(address))))
    }

    pub fn i2c(&self) -> SimI2c {
        SimI2c(self.clone())
    }

    pub fn spi(&self) -> SimSpi {
        SimSpi(self.clone())
    }

    pub fn cs(&self) -> SimCs {
        SimCs(self.clone())
    }

    pub fn peer(&self) -> Peer {
        Peer(self.clone())
    }

    /// Line speed: one byte each way every `pace` transactions, 0 = frozen.
    pub fn set_pace(&self, pace: usize) {
        self.0.lock().pace = pace;
    }

    pub fn fail_next(&self) {
        self.fail_after(0);
    }

    /// Fail the transaction after the next `ok` successful ones.
    pub fn fail_after(&self, ok: usize) {
        self.0.lock().fail_in = Some(ok);
    }

    pub fn events(&self) -> Vec<BusEvent> {
        self.0.lock().events.clone()
    }

    pub fn clear_events(&self) {
        self.0.lock().events.clear();
    }

    pub fn lcr(&self) -> u8 {
        self.0.lock().lcr
    }

    pub fn fcr(&self) -> u8 {
        self.0.lock().regs[registers::FCR_IIR as usize]
    }

    pub fn divisor_writes(&self) -> Vec<(u8, u8)> {
        self.0.lock().divisor_writes.clone()
    }

    pub fn tx_level(&self) -> usize {
        self.0.lock().tx.len()
    }

    pub fn rx_level(&self) -> usize {
        self.0.lock().rx.len()
    }

    pub fn tx_overruns(&self) -> usize {
        self.0.lock().tx_overruns
    }

    pub fn rx_overruns(&self) -> usize {
        self.0.lock().rx_overruns
    }

    pub fn cs_is_low(&self) -> bool {
        self.0.lock().cs_low
    }

    /// Fill the transmit FIFO directly, as if earlier writes were pending.
    pub fn preload_tx(&self, data: &[u8]) {
        self.0.lock().tx.extend(data.iter().copied());
    }

    /// Put bytes straight into the receive FIFO, bypassing the line.
    pub fn preload_rx(&self, data: &[u8]) {
        self.0.lock().rx.extend(data.iter().copied());
    }

    pub fn register(&self, reg: u8) -> u8 {
        self.0.lock().regs[reg as usize]
    }
}

pub struct SimI2c(SimChip);

#[async_trait]
impl I2c for SimI2c {
    async fn write(&mut self, address: u8, data: &[u8]) -> Result<()> {
        self.0 .0.lock().i2c_write(address, data)
    }

    async fn read(&mut self, address: u8, buf: &mut [u8]) -> Result<()> {
        self.0 .0.lock().i2c_read(address, buf)
    }

    async fn write_read(&mut self, address: u8, data: &[u8], buf: &mut [u8]) -> Result<()> {
        self.0 .0.lock().i2c_write_read(address, data, buf)
    }
}

pub struct SimSpi(SimChip);

#[async_trait]
impl Spi for SimSpi {
    async fn configure(&mut self, config: &SpiConfig) -> Result<()> {
        self.0 .0.lock().events.push(BusEvent::SpiConfigure(*config));
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let mut scratch = data.to_vec();
        self.0 .0.lock().spi_transfer(&mut scratch)
    }

    async fn transfer_in_place(&mut self, buf: &mut [u8]) -> Result<()> {
        self.0 .0.lock().spi_transfer(buf)
    }
}

pub struct SimCs(SimChip);

#[async_trait]
impl OutputPin for SimCs {
    async fn set_high(&mut self) -> Result<()> {
        let mut chip = self.0 .0.lock();
        chip.events.push(BusEvent::CsHigh);
        chip.cs_low = false;
        chip.spi_command = None;
        Ok(())
    }

    async fn set_low(&mut self) -> Result<()> {
        let mut chip = self.0 .0.lock();
        chip.events.push(BusEvent::CsLow);
        chip.cs_low = true;
        chip.spi_command = None;
        Ok(())
    }
}

/// The far end of the serial line.
pub struct Peer(SimChip);

impl Peer {
    /// Queue bytes for transmission toward the chip.
    pub fn send(&self, data: &[u8]) {
        self.0 .0.lock().to_chip.extend(data.iter().copied());
    }

    /// Take everything received so far.
    pub fn take_received(&self) -> Vec<u8> {
        std::mem::take(&mut self.0 .0.lock().at_peer)
    }

    /// Move everything in the chip's TX FIFO across the line immediately.
    pub fn drain_now(&self) {
        let mut chip = self.0 .0.lock();
        let mask = chip.data_mask();
        while let Some(byte) = chip.tx.pop_front() {
            chip.at_peer.push(byte & mask);
        }
    }
}

/// Deterministic byte sequence for round-trip tests.
pub fn pseudo_random(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
    (0..len)
        .map(|_| {
            // xorshift32
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 24) as u8
        })
        .collect()
}
