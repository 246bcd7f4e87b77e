//! Bit rate negotiation from TA1 (ISO7816-3 §8.3, tables 7 and 8)

use core::fmt;

/// Baud rate adjustment factor Di, indexed by the low nibble of TA1; 0 is RFU
pub const DI_TABLE: [u16; 16] = [0, 1, 2, 4, 8, 16, 32, 64, 12, 20, 0, 0, 0, 0, 0, 0];

/// Clock rate conversion factor Fi, indexed by the high nibble of TA1; 0 is RFU
pub const FI_TABLE: [u16; 16] = [
    372, 372, 558, 744, 1116, 1488, 1860, 0, 0, 512, 768, 1024, 1536, 2048, 0, 0,
];

/// Maximum card clock in units of 100 kHz, indexed like [`FI_TABLE`]
pub const FMAX_TABLE: [u8; 16] = [40, 50, 60, 80, 120, 160, 200, 0, 0, 50, 75, 100, 150, 200, 0, 0];

/// TA1 names a reserved table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum NegotiationError {
    /// High nibble selects an RFU Fi
    #[error("TA1 {ta1:#04x} selects a reserved Fi")]
    ReservedFi {
        /// The offending TA1
        ta1: u8,
    },
    /// Low nibble selects an RFU Di
    #[error("TA1 {ta1:#04x} selects a reserved Di")]
    ReservedDi {
        /// The offending TA1
        ta1: u8,
    },
}

/// Rate parameters decoded from TA1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateParameters {
    /// The TA1 byte they were decoded from
    pub ta1: u8,
    /// Clock rate conversion factor
    pub fi: u16,
    /// Baud rate adjustment factor
    pub di: u16,
    /// Maximum card clock in units of 100 kHz
    pub fmax_100khz: u8,
}

impl RateParameters {
    /// Look up Fi and Di for a TA1 byte
    pub const fn from_ta1(ta1: u8) -> Result<Self, NegotiationError> {
        let fi_index = (ta1 >> 4) as usize;
        let di_index = (ta1 & 0x0F) as usize;
        let fi = FI_TABLE[fi_index];
        let di = DI_TABLE[di_index];
        if fi == 0 {
            return Err(NegotiationError::ReservedFi { ta1 });
        }
        if di == 0 {
            return Err(NegotiationError::ReservedDi { ta1 });
        }
        Ok(Self {
            ta1,
            fi,
            di,
            fmax_100khz: FMAX_TABLE[fi_index],
        })
    }

    /// Bit rate for a card running at `card_clock_hz`
    pub const fn baud(&self, card_clock_hz: u32) -> u32 {
        ((card_clock_hz as u64 * self.di as u64) / self.fi as u64) as u32
    }

    /// Length of one ETU in card clocks
    pub const fn clocks_per_etu(&self) -> u16 {
        self.fi / self.di
    }
}

impl fmt::Display for RateParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TA1={:#04x} Fi={} Di={} f(max)={}.{} MHz ETU={} clocks",
            self.ta1,
            self.fi,
            self.di,
            self.fmax_100khz / 10,
            self.fmax_100khz % 10,
            self.clocks_per_etu()
        )
    }
}

/// Result of the post-ATR negotiation step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Negotiation {
    /// No TA1, or the ATR was incomplete; the ATR rate stays
    Skipped,
    /// The transport now runs at the negotiated rate
    Applied {
        /// Decoded parameters
        params: RateParameters,
        /// The new bit rate
        baud: u32,
    },
    /// TA1 was unusable; the ATR rate stays
    Failed(NegotiationError),
}

impl Negotiation {
    /// True if the bit rate was changed
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}
