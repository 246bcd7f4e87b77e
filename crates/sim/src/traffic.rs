//! Wire capture

use std::fmt;

use bytes::{Bytes, BytesMut};

/// Raw bytes seen on the I/O line, split by direction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Traffic {
    /// Bytes the host transmitted
    pub host_to_card: BytesMut,
    /// Bytes the host received
    pub card_to_host: BytesMut,
    /// Characters the host received at the wrong rate
    pub framing_errors: usize,
    /// Characters that completed while the host was not listening
    pub missed: usize,
    /// Host characters the card could not decode
    pub rejected: usize,
}

impl Traffic {
    /// Frozen copy of the host transmissions
    pub fn sent(&self) -> Bytes {
        self.host_to_card.clone().freeze()
    }

    /// Frozen copy of the host receptions
    pub fn received(&self) -> Bytes {
        self.card_to_host.clone().freeze()
    }

    /// True if every character crossed the line intact
    pub const fn is_clean(&self) -> bool {
        self.framing_errors == 0 && self.missed == 0 && self.rejected == 0
    }
}

impl fmt::Display for Traffic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TX [{}] RX [{}]",
            hex::encode_upper(&self.host_to_card),
            hex::encode_upper(&self.card_to_host)
        )?;
        if !self.is_clean() {
            write!(
                f,
                " framing={} missed={} rejected={}",
                self.framing_errors, self.missed, self.rejected
            )?;
        }
        Ok(())
    }
}
