//! Answer To Reset acquisition and decoding (ISO7816-3 §8)

use core::fmt;

use heapless::Vec;
use tracing::{debug, trace, warn};

use crate::config::SessionConfig;
use crate::convention::{
    TS_DIRECT, TS_DIRECT_SEEN_AS_INVERSE, TS_INVERSE, TS_INVERSE_SEEN_AS_DIRECT, invert,
};
use crate::hal::{CardHal, SerialLine};
use crate::time::{Abort, Clock, Deadline};
use crate::transport::Transport;

/// Largest ATR the engine stores
pub const MAX_ATR_LEN: usize = 32;

const TA_PRESENT: u8 = 0x10;
const TB_PRESENT: u8 = 0x20;
const TC_PRESENT: u8 = 0x40;
const TD_PRESENT: u8 = 0x80;

/// Which character the decoder expects next
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum AtrState {
    Ts,
    T0,
    Ta,
    Tb,
    Tc,
    Td,
    Historical,
}

impl AtrState {
    /// First interface character flagged in a format byte at or after `from`
    fn next_present(flags: u8, from: Self) -> Self {
        [
            (Self::Ta, TA_PRESENT),
            (Self::Tb, TB_PRESENT),
            (Self::Tc, TC_PRESENT),
            (Self::Td, TD_PRESENT),
        ]
        .into_iter()
        .find(|&(state, bit)| state >= from && flags & bit != 0)
        .map_or(Self::Historical, |(state, _)| state)
    }
}

/// Incremental ATR decoder
///
/// Fed logical bytes one at a time. The expected length grows as T0 and each
/// TDn announce further characters.
#[derive(Debug, Clone)]
pub struct AtrParser {
    state: AtrState,
    received: usize,
    expected_len: usize,
    historical_len: u8,
    format: u8,
    ta1: Option<u8>,
    protocols: u16,
}

impl Default for AtrParser {
    fn default() -> Self {
        Self::new()
    }
}

impl AtrParser {
    /// Decoder waiting for TS
    pub const fn new() -> Self {
        Self {
            state: AtrState::Ts,
            received: 0,
            // TS and T0 are mandatory
            expected_len: 2,
            historical_len: 0,
            format: 0,
            ta1: None,
            protocols: 0,
        }
    }

    /// Consume one byte; returns true once the announced length is reached
    pub fn feed(&mut self, byte: u8) -> bool {
        self.received += 1;
        match self.state {
            AtrState::Ts => self.state = AtrState::T0,
            AtrState::T0 | AtrState::Td => {
                self.format = byte;
                self.expected_len += (byte >> 4).count_ones() as usize;
                if self.state == AtrState::T0 {
                    self.historical_len = byte & 0x0F;
                    self.expected_len += self.historical_len as usize;
                } else {
                    self.protocols |= 1 << (byte & 0x0F);
                }
                self.state = AtrState::next_present(byte, AtrState::Ta);
            }
            AtrState::Ta | AtrState::Tb | AtrState::Tc => {
                if self.state == AtrState::Ta && self.ta1.is_none() {
                    self.ta1 = Some(byte);
                }
                let after = match self.state {
                    AtrState::Ta => AtrState::Tb,
                    AtrState::Tb => AtrState::Tc,
                    _ => AtrState::Td,
                };
                self.state = AtrState::next_present(self.format, after);
            }
            AtrState::Historical => {}
        }
        trace!(
            byte = format_args!("{byte:#04x}"),
            state = ?self.state,
            received = self.received,
            expected = self.expected_len,
            "ATR byte"
        );
        self.is_complete()
    }

    /// True once every announced byte has been consumed
    pub const fn is_complete(&self) -> bool {
        self.received >= self.expected_len
    }

    /// Bytes consumed so far
    pub const fn received(&self) -> usize {
        self.received
    }

    /// Length announced so far
    pub const fn expected_len(&self) -> usize {
        self.expected_len
    }

    /// First TA character, if one has been seen
    pub const fn ta1(&self) -> Option<u8> {
        self.ta1
    }
}

/// Decoded Answer To Reset of one power cycle
#[derive(Clone, PartialEq, Eq)]
pub struct AtrRecord {
    raw: Vec<u8, MAX_ATR_LEN>,
    expected_len: usize,
    historical_len: u8,
    ta1: Option<u8>,
    protocols: u16,
}

impl AtrRecord {
    fn from_parser(raw: Vec<u8, MAX_ATR_LEN>, parser: &AtrParser) -> Self {
        Self {
            raw,
            expected_len: parser.expected_len,
            historical_len: parser.historical_len,
            ta1: parser.ta1,
            protocols: parser.protocols,
        }
    }

    /// Decode an ATR that is already in logical form
    ///
    /// Bytes past the announced length or past [`MAX_ATR_LEN`] are ignored.
    pub fn parse(bytes: &[u8]) -> Self {
        let mut parser = AtrParser::new();
        let mut raw = Vec::new();
        for &byte in bytes {
            if raw.push(byte).is_err() {
                break;
            }
            if parser.feed(byte) {
                break;
            }
        }
        Self::from_parser(raw, &parser)
    }

    /// The bytes received, in logical form
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// Number of bytes received
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// True if no byte was received at all
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Length announced by T0 and the TDn characters
    pub const fn expected_len(&self) -> usize {
        self.expected_len
    }

    /// True if every announced byte arrived
    pub fn is_complete(&self) -> bool {
        self.raw.len() >= self.expected_len
    }

    /// Number of historical characters announced by T0
    pub const fn historical_len(&self) -> u8 {
        self.historical_len
    }

    /// Historical characters, when all of them arrived
    pub fn historical_bytes(&self) -> Option<&[u8]> {
        let start = self.expected_len.checked_sub(self.historical_len as usize)?;
        self.raw.get(start..self.expected_len)
    }

    /// TA1, carrying the Fi/Di rate indices; `None` if it was not transmitted
    pub const fn ta1(&self) -> Option<u8> {
        self.ta1
    }

    /// Initial character
    pub fn ts(&self) -> Option<u8> {
        self.raw.first().copied()
    }

    /// Whether the card offers protocol `T=t`
    ///
    /// A card without TD1 implicitly offers only T=0.
    pub const fn offers_protocol(&self, t: u8) -> bool {
        if t > 15 {
            return false;
        }
        if self.protocols == 0 {
            return t == 0;
        }
        self.protocols & (1 << t) != 0
    }
}

impl fmt::Debug for AtrRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtrRecord")
            .field("raw", &format_args!("{:02X?}", self.raw.as_slice()))
            .field("expected_len", &self.expected_len)
            .field("historical_len", &self.historical_len)
            .field("ta1", &self.ta1)
            .finish()
    }
}

/// Read an ATR off the line
///
/// Listens at the ATR rate until the announced length is received, the
/// deadline passes or `abort` fires. The first byte settles the convention:
/// a TS that only makes sense under the other convention flips the transport.
pub(crate) fn acquire<H, L, C>(
    transport: &mut Transport<L, C>,
    hal: &mut H,
    config: &SessionConfig,
    abort: &dyn Abort,
) -> AtrRecord
where
    H: CardHal,
    L: SerialLine,
    C: Clock,
{
    let mut parser = AtrParser::new();
    let mut raw: Vec<u8, MAX_ATR_LEN> = Vec::new();

    transport.configure(config.atr_baud(), transport.convention());
    transport.listen();

    let mut deadline = Deadline::start(transport.clock(), config.atr_timeout_ms);
    while !parser.is_complete() {
        if abort.aborted() || deadline.expired(transport.clock()) {
            break;
        }
        let Some(mut byte) = transport.try_read() else {
            continue;
        };
        deadline.extend(transport.clock().now_ms(), config.atr_extend_ms);

        if raw.is_empty() {
            if config.trigger_on_atr {
                hal.trigger_pulse();
            }
            if byte == TS_INVERSE_SEEN_AS_DIRECT || byte == TS_DIRECT_SEEN_AS_INVERSE {
                byte = invert(byte);
                let convention = transport.convention().flipped();
                debug!(%convention, "TS indicates other convention, switching");
                transport.set_convention(convention);
            } else if byte != TS_DIRECT && byte != TS_INVERSE {
                warn!(ts = format_args!("{byte:#04x}"), "Unexpected initial character");
            }
        }

        if raw.push(byte).is_err() {
            warn!(capacity = MAX_ATR_LEN, "ATR longer than buffer, truncating");
            break;
        }
        parser.feed(byte);
    }

    transport.stop_listening();

    let record = AtrRecord::from_parser(raw, &parser);
    if record.is_complete() {
        debug!(atr = ?record, "ATR received");
    } else {
        warn!(
            received = record.len(),
            expected = record.expected_len(),
            "ATR incomplete"
        );
    }
    record
}
