//! Byte conventions and character framing (ISO7816-3 §8.1)

use derive_more::Display;

/// Initial character of a direct convention ATR
pub const TS_DIRECT: u8 = 0x3B;

/// Initial character of an inverse convention ATR
pub const TS_INVERSE: u8 = 0x3F;

/// `TS_INVERSE` as seen through a receiver still decoding direct convention
pub const TS_INVERSE_SEEN_AS_DIRECT: u8 = 0x03;

/// `TS_DIRECT` as seen through a receiver decoding inverse convention
pub const TS_DIRECT_SEEN_AS_INVERSE: u8 = 0x23;

/// Bit and level ordering used on the I/O line
#[derive(Debug, Display, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Convention {
    /// High level is 1, LSB first
    #[default]
    #[display("direct")]
    Direct,
    /// Low level is 1, MSB first
    #[display("inverse")]
    Inverse,
}

impl Convention {
    /// Map a line byte to its logical value, or a logical byte to its line value
    ///
    /// The mapping is its own inverse, so the same call serves both directions.
    pub const fn translate(self, byte: u8) -> u8 {
        match self {
            Self::Direct => byte,
            Self::Inverse => invert(byte),
        }
    }

    /// Parity bit the UART must generate and check for this convention
    pub const fn parity(self) -> Parity {
        match self {
            Self::Direct => Parity::Even,
            Self::Inverse => Parity::Odd,
        }
    }

    /// The other convention
    pub const fn flipped(self) -> Self {
        match self {
            Self::Direct => Self::Inverse,
            Self::Inverse => Self::Direct,
        }
    }

    /// True for inverse convention
    pub const fn is_inverse(self) -> bool {
        matches!(self, Self::Inverse)
    }
}

impl From<bool> for Convention {
    /// `true` selects inverse convention
    fn from(inverse: bool) -> Self {
        if inverse { Self::Inverse } else { Self::Direct }
    }
}

/// Inverse convention transform: every 0 bit at position i sets bit 7-i
pub const fn invert(byte: u8) -> u8 {
    !byte.reverse_bits()
}

/// Parity mode of the serial frame
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    /// Even parity (direct convention)
    #[display("even")]
    Even,
    /// Odd parity (inverse convention)
    #[display("odd")]
    Odd,
}

/// Character frame pushed to the serial line whenever rate or convention change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFormat {
    /// Bit rate in baud
    pub baud: u32,
    /// Parity mode
    pub parity: Parity,
    /// Stop bits; the card needs two to signal parity errors
    pub stop_bits: u8,
}

impl FrameFormat {
    /// 8 data bits, convention parity, two stop bits
    pub const fn new(baud: u32, convention: Convention) -> Self {
        Self {
            baud,
            parity: convention.parity(),
            stop_bits: 2,
        }
    }
}
