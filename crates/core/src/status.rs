//! Status word definitions for T=0 exchanges

use core::fmt;

use tracing::Level;

/// Status Word (SW1-SW2) closing an APDU exchange
///
/// Besides the values a card can send, the engine reports transport failures
/// through a few reserved sentinels. Cards only ever send SW1 with a high
/// nibble of `6` or `9`; every sentinel uses `F`, so the two sets never overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusWord {
    /// First status byte (SW1)
    pub sw1: u8,
    /// Second status byte (SW2)
    pub sw2: u8,
}

impl StatusWord {
    /// No procedure byte arrived within the waiting time
    pub const PROCEDURE_TIMEOUT: Self = Self::from_u16(0xFFFF);

    /// A data byte of a receive transfer did not arrive
    pub const RECEIVE_TIMEOUT: Self = Self::from_u16(0xFFFE);

    /// SW1 or SW2 did not arrive after the data phase
    pub const STATUS_TIMEOUT: Self = Self::from_u16(0xFFFD);

    /// All engine sentinels
    pub const SENTINELS: [Self; 3] = [
        Self::PROCEDURE_TIMEOUT,
        Self::RECEIVE_TIMEOUT,
        Self::STATUS_TIMEOUT,
    ];

    /// Create a new status word
    pub const fn new(sw1: u8, sw2: u8) -> Self {
        Self { sw1, sw2 }
    }

    /// Create from a u16 value (SW1 | SW2)
    pub const fn from_u16(status: u16) -> Self {
        Self {
            sw1: (status >> 8) as u8,
            sw2: status as u8,
        }
    }

    /// Convert to a u16 value (SW1 | SW2)
    pub const fn to_u16(&self) -> u16 {
        ((self.sw1 as u16) << 8) | (self.sw2 as u16)
    }

    /// Check whether a byte can be SW1 sent by a card
    pub const fn is_card_sw1(byte: u8) -> bool {
        matches!(byte & 0xF0, 0x60 | 0x90)
    }

    /// Check if this status word is an engine sentinel rather than card output
    pub const fn is_sentinel(&self) -> bool {
        self.sw1 & 0xF0 == 0xF0
    }

    /// Check if this status word indicates success (90 00)
    pub const fn is_success(&self) -> bool {
        self.sw1 == 0x90 && self.sw2 == 0x00
    }

    /// Check if this status word indicates more data is available (61 XX)
    pub const fn is_more_data_available(&self) -> bool {
        self.sw1 == 0x61
    }

    /// Check for the proprietary "response of XX bytes pending" used by some pay-TV cards (9F XX)
    pub const fn is_response_pending(&self) -> bool {
        self.sw1 == 0x9F
    }

    /// Bytes available when SW1 is 61 or 9F
    pub const fn remaining_bytes(&self) -> Option<u8> {
        if self.is_more_data_available() || self.is_response_pending() {
            Some(self.sw2)
        } else {
            None
        }
    }

    /// Check if this status word indicates a warning (62 XX or 63 XX)
    pub const fn is_warning(&self) -> bool {
        self.sw1 == 0x62 || self.sw1 == 0x63
    }

    /// Check if this status word indicates wrong length (67 00)
    pub const fn is_wrong_length(&self) -> bool {
        self.sw1 == 0x67 && self.sw2 == 0x00
    }

    /// Get the appropriate tracing level for this status word
    pub const fn tracing_level(&self) -> Level {
        if self.is_success() || self.is_more_data_available() || self.is_response_pending() {
            Level::DEBUG
        } else if self.is_warning() {
            Level::INFO
        } else {
            Level::WARN
        }
    }

    /// Get a description of this status word
    pub const fn description(&self) -> &'static str {
        match (self.sw1, self.sw2) {
            (0xFF, 0xFF) => "Procedure byte timeout",
            (0xFF, 0xFE) => "Receive timeout",
            (0xFF, 0xFD) => "Status word timeout",
            (0x90, 0x00) => "Success",
            (0x9F, _) => "Response bytes pending",
            (0x61, _) => "More data available",
            (0x62, 0x81) => "Part of returned data may be corrupted",
            (0x62, 0x82) => "End of file/record reached before reading Le bytes",
            (0x62, _) => "Warning, non-volatile memory unchanged",
            (0x63, _) => "Warning, non-volatile memory changed",
            (0x64, 0x00) => "State of non-volatile memory unchanged",
            (0x65, 0x81) => "Memory failure",
            (0x67, 0x00) => "Wrong length",
            (0x69, 0x82) => "Security status not satisfied",
            (0x69, 0x85) => "Conditions of use not satisfied",
            (0x69, 0x86) => "Command not allowed",
            (0x6A, 0x82) => "File not found",
            (0x6A, 0x83) => "Record not found",
            (0x6A, 0x86) => "Incorrect parameters P1-P2",
            (0x6B, 0x00) => "Wrong parameters P1-P2",
            (0x6C, _) => "Wrong Le field",
            (0x6D, 0x00) => "Instruction code not supported or invalid",
            (0x6E, 0x00) => "Class not supported",
            (0x6F, 0x00) => "No precise diagnosis",
            _ => "Unknown status word",
        }
    }
}

impl From<(u8, u8)> for StatusWord {
    fn from(tuple: (u8, u8)) -> Self {
        Self::new(tuple.0, tuple.1)
    }
}

impl From<u16> for StatusWord {
    fn from(status: u16) -> Self {
        Self::from_u16(status)
    }
}

impl From<StatusWord> for u16 {
    fn from(status: StatusWord) -> Self {
        status.to_u16()
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X} {:02X}", self.sw1, self.sw2)
    }
}
