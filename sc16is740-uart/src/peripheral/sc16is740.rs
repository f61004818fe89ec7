//! SC16IS740 register map and line settings
//!
//! Register numbers here are the logical indices 0-15. On the wire they are
//! shifted left by three to leave room for the channel selector, see
//! [`subaddress`].
//!
//! Datasheet: <https://www.nxp.com/docs/en/data-sheet/SC16IS740_750_760.pdf>

use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use strum::EnumIter;

/// Depth of each hardware FIFO
pub const FIFO_SIZE: usize = 64;

/// Crystal fitted on most breakout boards
pub const DEFAULT_OSCILLATOR_HZ: u32 = 1_843_200;

/// General register set
pub mod registers {
    pub const RHR_THR: u8 = 0x00;
    pub const IER: u8 = 0x01;
    pub const FCR_IIR: u8 = 0x02;
    pub const LCR: u8 = 0x03;
    pub const MCR: u8 = 0x04;
    pub const LSR: u8 = 0x05;
    pub const MSR: u8 = 0x06;
    pub const SPR: u8 = 0x07;
    pub const TXLVL: u8 = 0x08;
    pub const RXLVL: u8 = 0x09;
    pub const IODIR: u8 = 0x0A;
    pub const IOSTATE: u8 = 0x0B;
    pub const IOINTENA: u8 = 0x0C;
    pub const IOCONTROL: u8 = 0x0E;
    pub const EFCR: u8 = 0x0F;

    /// One past the last valid register index
    pub const COUNT: u8 = 16;
}

/// Divisor latches, mapped while LCR holds [`lcr::SPECIAL_START`]
pub mod special {
    pub const DLL: u8 = 0x00;
    pub const DLH: u8 = 0x01;
}

/// Enhanced register set, mapped while LCR holds [`lcr::SPECIAL_END`]
pub mod enhanced {
    pub const EFR: u8 = 0x02;
    pub const XON1: u8 = 0x04;
    pub const XON2: u8 = 0x05;
    pub const XOFF1: u8 = 0x06;
    pub const XOFF2: u8 = 0x07;
}

/// LCR values that switch register banks
pub mod lcr {
    /// Divisor latch enable; DLL/DLH replace RHR/IER
    pub const SPECIAL_START: u8 = 0x80;
    /// Enhanced feature bank
    pub const SPECIAL_END: u8 = 0xBF;
    /// Bits of LCR that carry the line options
    pub const OPTIONS_MASK: u8 = 0x3F;
}

/// Wire sub-address for `reg` on channel 0.
pub fn subaddress(reg: u8) -> u8 {
    debug_assert!(reg < registers::COUNT, "register index {reg} out of range");
    (reg & 0x0F) << 3
}

/// Baud-rate divisor for the DLL/DLH pair. Truncates; no rounding.
pub fn divisor(oscillator_hz: u32, baud_rate: u32) -> Option<u16> {
    let denom = baud_rate.checked_mul(16)?;
    if denom == 0 {
        return None;
    }
    match oscillator_hz / denom {
        0 => None,
        div => u16::try_from(div).ok(),
    }
}

bitflags! {
    /// FIFO control register (write only)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Fcr: u8 {
        const FIFO_ENABLE = 0x01;
        const RX_FIFO_RESET = 0x02;
        const TX_FIFO_RESET = 0x04;
    }
}

bitflags! {
    /// Line status register
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Lsr: u8 {
        const DATA_READY = 0x01;
        const OVERRUN_ERROR = 0x02;
        const PARITY_ERROR = 0x04;
        const FRAMING_ERROR = 0x08;
        const BREAK_INTERRUPT = 0x10;
        const THR_EMPTY = 0x20;
        const THR_TSR_EMPTY = 0x40;
        const FIFO_DATA_ERROR = 0x80;
    }
}

impl Lsr {
    /// Any of the receive error conditions
    pub fn has_error(self) -> bool {
        self.intersects(
            Lsr::OVERRUN_ERROR
                | Lsr::PARITY_ERROR
                | Lsr::FRAMING_ERROR
                | Lsr::BREAK_INTERRUPT
                | Lsr::FIFO_DATA_ERROR,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter)]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

impl DataBits {
    pub fn count(self) -> u8 {
        match self {
            DataBits::Five => 5,
            DataBits::Six => 6,
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        }
    }

    /// Mask of the bits that survive transmission
    pub fn mask(self) -> u8 {
        (0xFFu16 >> (8 - self.count())) as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter)]
pub enum Parity {
    None,
    Odd,
    Even,
    /// Parity bit forced to 1
    Mark,
    /// Parity bit forced to 0
    Space,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter)]
pub enum StopBits {
    One,
    /// Two stop bits (1.5 with five data bits)
    Two,
}

/// Data bits, parity and stop bits, as programmed into LCR[5:0].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LineOptions {
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
}

impl LineOptions {
    pub const OPTIONS_8N1: Self = Self::new(DataBits::Eight, Parity::None, StopBits::One);
    pub const OPTIONS_8E1: Self = Self::new(DataBits::Eight, Parity::Even, StopBits::One);
    pub const OPTIONS_8O1: Self = Self::new(DataBits::Eight, Parity::Odd, StopBits::One);

    pub const OPTIONS_8N2: Self = Self::new(DataBits::Eight, Parity::None, StopBits::Two);
    pub const OPTIONS_8E2: Self = Self::new(DataBits::Eight, Parity::Even, StopBits::Two);
    pub const OPTIONS_8O2: Self = Self::new(DataBits::Eight, Parity::Odd, StopBits::Two);

    pub const OPTIONS_7N1: Self = Self::new(DataBits::Seven, Parity::None, StopBits::One);
    pub const OPTIONS_7E1: Self = Self::new(DataBits::Seven, Parity::Even, StopBits::One);
    pub const OPTIONS_7O1: Self = Self::new(DataBits::Seven, Parity::Odd, StopBits::One);

    pub const OPTIONS_7N2: Self = Self::new(DataBits::Seven, Parity::None, StopBits::Two);
    pub const OPTIONS_7E2: Self = Self::new(DataBits::Seven, Parity::Even, StopBits::Two);
    pub const OPTIONS_7O2: Self = Self::new(DataBits::Seven, Parity::Odd, StopBits::Two);

    pub const fn new(data_bits: DataBits, parity: Parity, stop_bits: StopBits) -> Self {
        Self {
            data_bits,
            parity,
            stop_bits,
        }
    }

    /// LCR[5:0] encoding.
    pub fn bits(&self) -> u8 {
        let word_length = match self.data_bits {
            DataBits::Five => 0b00,
            DataBits::Six => 0b01,
            DataBits::Seven => 0b10,
            DataBits::Eight => 0b11,
        };
        let stop = match self.stop_bits {
            StopBits::One => 0,
            StopBits::Two => 0b100,
        };
        // [5] forced, [4] even, [3] enable
        let parity = match self.parity {
            Parity::None => 0,
            Parity::Odd => 0b001000,
            Parity::Even => 0b011000,
            Parity::Mark => 0b101000,
            Parity::Space => 0b111000,
        };
        word_length | stop | parity
    }

    /// Decode LCR[5:0]; the upper bits are ignored.
    pub fn from_bits(bits: u8) -> Self {
        let data_bits = match bits & 0b11 {
            0b00 => DataBits::Five,
            0b01 => DataBits::Six,
            0b10 => DataBits::Seven,
            _ => DataBits::Eight,
        };
        let stop_bits = if bits & 0b100 != 0 {
            StopBits::Two
        } else {
            StopBits::One
        };
        let parity = match (bits >> 3) & 0b111 {
            0b001 => Parity::Odd,
            0b011 => Parity::Even,
            0b101 => Parity::Mark,
            0b111 => Parity::Space,
            _ => Parity::None,
        };
        Self::new(data_bits, parity, stop_bits)
    }
}

impl Default for LineOptions {
    fn default() -> Self {
        Self::OPTIONS_8N1
    }
}

impl fmt::Display for LineOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parity = match self.parity {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
            Parity::Mark => 'M',
            Parity::Space => 'S',
        };
        let stop = match self.stop_bits {
            StopBits::One => 1,
            StopBits::Two => 2,
        };
        write!(f, "{}{}{}", self.data_bits.count(), parity, stop)
    }
}

/// Parse error for [`LineOptions`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid line options {0:?}, expected e.g. \"8N1\" or \"7E2\"")]
pub struct ParseLineOptionsError(pub String);

impl FromStr for LineOptions {
    type Err = ParseLineOptionsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseLineOptionsError(s.to_string());
        let chars: Vec<char> = s.trim().chars().collect();
        let &[data, parity, stop] = chars.as_slice() else {
            return Err(err());
        };

        let data_bits = match data {
            '5' => DataBits::Five,
            '6' => DataBits::Six,
            '7' => DataBits::Seven,
            '8' => DataBits::Eight,
            _ => return Err(err()),
        };
        let parity = match parity.to_ascii_uppercase() {
            'N' => Parity::None,
            'O' => Parity::Odd,
            'E' => Parity::Even,
            'M' => Parity::Mark,
            'S' => Parity::Space,
            _ => return Err(err()),
        };
        let stop_bits = match stop {
            '1' => StopBits::One,
            '2' => StopBits::Two,
            _ => return Err(err()),
        };
        Ok(Self::new(data_bits, parity, stop_bits))
    }
}

impl TryFrom<String> for LineOptions {
    type Error = ParseLineOptionsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LineOptions> for String {
    fn from(value: LineOptions) -> Self {
        value.to_string()
    }
}
