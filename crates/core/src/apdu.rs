//! T=0 command/response exchange driven by procedure bytes (ISO7816-3 §10.3)
//!
//! The card decides the transfer granularity. After the header the engine
//! waits for a procedure byte, moves one byte or everything left as told,
//! and goes back to waiting until the card sends SW1 SW2.

use core::fmt;

use tracing::{Level, debug, event, trace};

use crate::config::{RxTimeoutPolicy, SessionConfig};
use crate::hal::SerialLine;
use crate::status::StatusWord;
use crate::time::{Abort, Clock};
use crate::transport::Transport;
use crate::{Error, Result};

/// NULL procedure byte: the card needs more time
pub const PROCEDURE_NULL: u8 = 0x60;

/// The five header bytes of a T=0 command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApduHeader {
    /// Class byte
    pub cla: u8,
    /// Instruction byte
    pub ins: u8,
    /// Parameter 1
    pub p1: u8,
    /// Parameter 2
    pub p2: u8,
    /// Number of data bytes to transfer in either direction
    pub p3: u8,
}

impl ApduHeader {
    /// Create a new header
    pub const fn new(cla: u8, ins: u8, p1: u8, p2: u8, p3: u8) -> Self {
        Self { cla, ins, p1, p2, p3 }
    }

    /// Header bytes in transmission order
    pub const fn to_bytes(&self) -> [u8; 5] {
        [self.cla, self.ins, self.p1, self.p2, self.p3]
    }

    /// Declared transfer length
    pub const fn len(&self) -> usize {
        self.p3 as usize
    }

    /// True if no data bytes are declared
    pub const fn is_empty(&self) -> bool {
        self.p3 == 0
    }
}

impl fmt::Display for ApduHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X} {:02X} {:02X} {:02X} {:02X}",
            self.cla, self.ins, self.p1, self.p2, self.p3
        )
    }
}

/// Which way the data bytes of an exchange travel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Data goes to the card (case 3)
    Send,
    /// Data comes from the card (case 2)
    Receive,
}

/// Meaning of a procedure byte for a given INS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Procedure {
    /// Complement of INS: move one data byte
    SingleByte,
    /// INS itself: move all remaining data bytes
    AllRemaining,
    /// `0x60`: keep waiting
    Null,
    /// First status byte; SW2 follows
    Sw1(u8),
    /// Anything else, ignored
    Unknown,
}

impl Procedure {
    /// Classify `byte` received during an exchange with instruction `ins`
    ///
    /// INS+1 and its complement are accepted for the Vpp variants of the
    /// early T=0 cards.
    pub const fn classify(byte: u8, ins: u8) -> Self {
        let ins_vpp = ins.wrapping_add(1);
        if byte == !ins || byte == !ins_vpp {
            Self::SingleByte
        } else if byte == ins || byte == ins_vpp {
            Self::AllRemaining
        } else if byte == PROCEDURE_NULL {
            Self::Null
        } else if StatusWord::is_card_sw1(byte) {
            Self::Sw1(byte)
        } else {
            Self::Unknown
        }
    }
}

/// Outcome of one exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApduResult {
    /// Status word from the card, or an engine sentinel
    pub status: StatusWord,
    /// Data bytes moved, at most P3
    pub transferred: usize,
    /// Last procedure byte read, if any
    pub last_procedure: Option<u8>,
}

impl ApduResult {
    /// True if the card answered 90 00
    pub const fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Run one command/response exchange
///
/// `timeout_ms` bounds the wait for every single byte from the card.
pub(crate) fn exchange<L, C>(
    transport: &mut Transport<L, C>,
    header: &ApduHeader,
    direction: Direction,
    buf: &mut [u8],
    timeout_ms: u32,
    config: &SessionConfig,
    abort: &dyn Abort,
) -> Result<ApduResult>
where
    L: SerialLine,
    C: Clock,
{
    let len = header.len();
    if buf.len() < len {
        return Err(Error::BufferTooSmall {
            required: len,
            capacity: buf.len(),
        });
    }

    debug!(%header, ?direction, timeout_ms, "APDU");
    transport.stop_listening();
    transport.write_all(&header.to_bytes());
    transport.listen();

    let mut n = 0;
    let mut last_procedure = None;
    let status = 'exchange: loop {
        if n >= len {
            break read_status(transport, timeout_ms, abort);
        }

        let Some(byte) = transport.read_byte_until(timeout_ms, abort) else {
            debug!(transferred = n, "No procedure byte");
            break StatusWord::PROCEDURE_TIMEOUT;
        };
        last_procedure = Some(byte);

        let count = match Procedure::classify(byte, header.ins) {
            Procedure::SingleByte => 1,
            Procedure::AllRemaining => len - n,
            Procedure::Null => continue,
            Procedure::Sw1(sw1) => {
                break match transport.read_byte_until(timeout_ms, abort) {
                    Some(sw2) => StatusWord::new(sw1, sw2),
                    None => StatusWord::STATUS_TIMEOUT,
                };
            }
            Procedure::Unknown => {
                trace!(byte = format_args!("{byte:#04x}"), "Ignoring unexpected procedure byte");
                continue;
            }
        };
        trace!(count, "Transfer granted");

        match direction {
            Direction::Send => {
                transport.stop_listening();
                transport.write_all(&buf[n..n + count]);
                transport.listen();
                n += count;
            }
            Direction::Receive => {
                for _ in 0..count {
                    let Some(byte) = transport.read_byte_until(timeout_ms, abort) else {
                        debug!(transferred = n, "Receive timeout");
                        break 'exchange match config.rx_timeout_policy {
                            RxTimeoutPolicy::SynthesizeFromTrailing
                                if n >= 2 && StatusWord::is_card_sw1(buf[n - 2]) =>
                            {
                                n -= 2;
                                StatusWord::new(buf[n], buf[n + 1])
                            }
                            _ => StatusWord::RECEIVE_TIMEOUT,
                        };
                    };
                    buf[n] = byte;
                    n += 1;
                }
            }
        }
    };

    transport.stop_listening();

    let level = status.tracing_level();
    let description = status.description();
    if level == Level::DEBUG {
        event!(Level::DEBUG, %status, transferred = n, "APDU complete");
    } else if level == Level::INFO {
        event!(Level::INFO, %status, description, transferred = n, "APDU complete");
    } else {
        event!(Level::WARN, %status, description, transferred = n, "APDU complete");
    }

    Ok(ApduResult {
        status,
        transferred: n,
        last_procedure,
    })
}

/// Read SW1 SW2 after the data phase
fn read_status<L: SerialLine, C: Clock>(
    transport: &mut Transport<L, C>,
    timeout: u32,
    abort: &dyn Abort,
) -> StatusWord {
    let Some(sw1) = transport.read_byte_until(timeout, abort) else {
        return StatusWord::STATUS_TIMEOUT;
    };
    match transport.read_byte_until(timeout, abort) {
        Some(sw2) => StatusWord::new(sw1, sw2),
        None => StatusWord::STATUS_TIMEOUT,
    }
}
