//! Behavioural model of a T=0 card
//!
//! The card answers reset with a fixed ATR, then serves one [`ApduScript`] per
//! received command header. Everything it sends is scheduled on the virtual
//! timeline at character rate, so a host that is not listening, or listening
//! at the wrong rate, loses bytes the way a real UART would.

use std::collections::VecDeque;
use std::ops::RangeInclusive;

use bytes::{BufMut, BytesMut};
use cardglitch_core::apdu::ApduHeader;
use cardglitch_core::config::{ATR_CLOCKS_PER_ETU, DEFAULT_CARD_CLOCK_HZ};
use cardglitch_core::negotiation::RateParameters;
use cardglitch_core::{AtrRecord, Convention, StatusWord};
use tracing::{debug, trace};

/// ETUs per character: start bit, eight data bits, parity and two stop bits
const ETU_PER_CHAR: u64 = 12;

/// Status returned for headers with no script queued
pub const INS_NOT_SUPPORTED: StatusWord = StatusWord::new(0x6D, 0x00);

/// One step of a card's response to a command header
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardAction {
    /// Transmit these logical bytes back to back
    Send(Vec<u8>),
    /// Wait for this many data bytes from the host
    Receive(usize),
}

/// The card side of one APDU exchange
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApduScript {
    actions: Vec<CardAction>,
}

impl ApduScript {
    /// Empty script
    pub const fn new() -> Self {
        Self {
            actions: Vec::new(),
        }
    }

    /// Send a single procedure byte
    pub fn procedure(self, byte: u8) -> Self {
        self.send([byte])
    }

    /// Send raw logical bytes
    pub fn send(mut self, bytes: impl AsRef<[u8]>) -> Self {
        self.actions.push(CardAction::Send(bytes.as_ref().to_vec()));
        self
    }

    /// Wait for `count` data bytes from the host
    pub fn receive(mut self, count: usize) -> Self {
        self.actions.push(CardAction::Receive(count));
        self
    }

    /// Finish with a status word
    pub fn status(self, status: StatusWord) -> Self {
        self.send([status.sw1, status.sw2])
    }

    /// Acknowledge `INS` once and return `data` followed by `status`
    pub fn respond(ins: u8, data: &[u8], status: StatusWord) -> Self {
        Self::new().procedure(ins).send(data).status(status)
    }

    /// Acknowledge `INS` once, accept `len` bytes and answer `status`
    pub fn accept(ins: u8, len: usize, status: StatusWord) -> Self {
        Self::new().procedure(ins).receive(len).status(status)
    }

    /// The steps in order
    pub fn actions(&self) -> &[CardAction] {
        &self.actions
    }
}

/// Glitch sensitivity: a pulse whose width falls in `ticks` corrupts the next
/// command, which then answers `status` regardless of its script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultModel {
    /// Pulse widths that upset the card
    pub ticks: RangeInclusive<u16>,
    /// Status returned by the corrupted command
    pub status: StatusWord,
}

/// Static properties of the simulated card
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardProfile {
    /// Convention the card transmits in
    pub convention: Convention,
    /// ATR in logical form, TS included
    pub atr: Vec<u8>,
    /// Delay between reset release and the TS start bit
    pub atr_latency_us: u32,
    /// Delay between the last received byte and the card's reply
    pub turnaround_us: u32,
    /// Card clock frequency
    pub clock_hz: u32,
    /// Whether the card switches to the TA1 rate right after its ATR
    pub follows_ta1: bool,
    /// Optional glitch sensitivity
    pub fault: Option<FaultModel>,
}

impl Default for CardProfile {
    fn default() -> Self {
        Self {
            convention: Convention::Direct,
            atr: vec![0x3B, 0x00],
            atr_latency_us: 2_000,
            turnaround_us: 500,
            clock_hz: DEFAULT_CARD_CLOCK_HZ,
            follows_ta1: true,
            fault: None,
        }
    }
}

impl CardProfile {
    /// Card answering with `atr` in the given convention
    ///
    /// The TS byte of `atr` should match the convention: `0x3B` for direct,
    /// `0x3F` for inverse.
    pub fn new(convention: Convention, atr: impl Into<Vec<u8>>) -> Self {
        Self {
            convention,
            atr: atr.into(),
            ..Self::default()
        }
    }

    /// Set the ATR latency
    pub const fn with_atr_latency_us(mut self, us: u32) -> Self {
        self.atr_latency_us = us;
        self
    }

    /// Set the reply turnaround
    pub const fn with_turnaround_us(mut self, us: u32) -> Self {
        self.turnaround_us = us;
        self
    }

    /// Set the card clock
    pub const fn with_clock_hz(mut self, hz: u32) -> Self {
        self.clock_hz = hz;
        self
    }

    /// Keep the ATR rate after the ATR even if TA1 asks for another
    pub const fn ignoring_ta1(mut self) -> Self {
        self.follows_ta1 = false;
        self
    }

    /// Make the card glitchable
    pub fn with_fault(mut self, ticks: RangeInclusive<u16>, status: StatusWord) -> Self {
        self.fault = Some(FaultModel { ticks, status });
        self
    }

    /// Bit rate used for the ATR
    pub const fn atr_baud(&self) -> u32 {
        self.clock_hz / ATR_CLOCKS_PER_ETU
    }

    /// Bit rate after the ATR
    pub fn operating_baud(&self) -> u32 {
        let record = AtrRecord::parse(&self.atr);
        match record.ta1().map(RateParameters::from_ta1) {
            Some(Ok(params)) if self.follows_ta1 && record.is_complete() => {
                params.baud(self.clock_hz)
            }
            _ => self.atr_baud(),
        }
    }
}

/// A character on its way to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Outgoing {
    pub(crate) ready_at_us: u64,
    pub(crate) raw: u8,
    pub(crate) baud: u32,
}

/// Two rates are compatible if they differ by at most 5%
pub(crate) const fn rates_match(a: u32, b: u32) -> bool {
    (a.abs_diff(b) as u64) * 20 <= b as u64
}

/// Duration of one character at `baud`
pub(crate) const fn char_time_us(baud: u32) -> u64 {
    if baud == 0 {
        return u64::MAX / 4;
    }
    ETU_PER_CHAR * 1_000_000 / baud as u64
}

/// Runtime state of the simulated card
#[derive(Debug)]
pub(crate) struct SimCard {
    pub(crate) profile: CardProfile,
    active: bool,
    baud: u32,
    outgoing: VecDeque<Outgoing>,
    tx_free_at_us: u64,
    header: Vec<u8>,
    pending: VecDeque<CardAction>,
    expecting: usize,
    fault_armed: bool,
    pub(crate) scripts: VecDeque<ApduScript>,
    pub(crate) headers: Vec<ApduHeader>,
    pub(crate) received: BytesMut,
    pub(crate) resets: usize,
}

impl SimCard {
    pub(crate) fn new(profile: CardProfile) -> Self {
        let baud = profile.atr_baud();
        Self {
            profile,
            active: false,
            baud,
            outgoing: VecDeque::new(),
            tx_free_at_us: 0,
            header: Vec::with_capacity(5),
            pending: VecDeque::new(),
            expecting: 0,
            fault_armed: false,
            scripts: VecDeque::new(),
            headers: Vec::new(),
            received: BytesMut::new(),
            resets: 0,
        }
    }

    pub(crate) const fn is_active(&self) -> bool {
        self.active
    }

    /// Follow the supply, clock and reset pins
    pub(crate) fn update_pins(&mut self, powered: bool, clocked: bool, reset: bool, now_us: u64) {
        let active = powered && clocked && !reset;
        if active == self.active {
            return;
        }
        self.active = active;
        self.outgoing.clear();
        self.header.clear();
        self.pending.clear();
        self.expecting = 0;
        self.fault_armed = false;
        if !active {
            trace!(now_us, "Card inactive");
            return;
        }

        self.resets += 1;
        self.baud = self.profile.atr_baud();
        self.tx_free_at_us = now_us + u64::from(self.profile.atr_latency_us);
        let atr = self.profile.atr.clone();
        debug!(atr = %hex::encode_upper(&atr), now_us, "Card answering reset");
        self.schedule_at(&atr, self.tx_free_at_us);
        self.baud = self.profile.operating_baud();
    }

    /// Queue logical bytes after the turnaround delay
    fn schedule(&mut self, bytes: &[u8], now_us: u64) {
        let start = (now_us + u64::from(self.profile.turnaround_us)).max(self.tx_free_at_us);
        self.schedule_at(bytes, start);
    }

    fn schedule_at(&mut self, bytes: &[u8], start_us: u64) {
        let char_us = char_time_us(self.baud);
        let mut at = start_us;
        for &byte in bytes {
            at += char_us;
            self.outgoing.push_back(Outgoing {
                ready_at_us: at,
                raw: self.profile.convention.translate(byte),
                baud: self.baud,
            });
        }
        self.tx_free_at_us = at;
    }

    /// Next character that has finished arriving by `now_us`
    pub(crate) fn take_ready(&mut self, now_us: u64) -> Option<Outgoing> {
        match self.outgoing.front() {
            Some(next) if next.ready_at_us <= now_us => self.outgoing.pop_front(),
            _ => None,
        }
    }

    /// Discard characters that completed before `now_us`; returns how many
    pub(crate) fn drop_missed(&mut self, now_us: u64) -> usize {
        let before = self.outgoing.len();
        self.outgoing.retain(|o| o.ready_at_us >= now_us);
        before - self.outgoing.len()
    }

    /// A character from the host finished arriving
    ///
    /// Returns false if the card could not decode it.
    pub(crate) fn receive(&mut self, raw: u8, line_baud: u32, now_us: u64) -> bool {
        if !self.active || !rates_match(line_baud, self.baud) {
            return false;
        }
        self.tx_free_at_us = self.tx_free_at_us.max(now_us);
        let byte = self.profile.convention.translate(raw);

        if self.expecting > 0 {
            self.received.put_u8(byte);
            self.expecting -= 1;
            if self.expecting == 0 {
                self.run(now_us);
            }
            return true;
        }
        if !self.pending.is_empty() {
            trace!(byte = format_args!("{byte:#04x}"), "Card ignoring unexpected byte");
            return true;
        }

        self.header.push(byte);
        if self.header.len() == 5 {
            self.begin_command(now_us);
        }
        true
    }

    fn begin_command(&mut self, now_us: u64) {
        let header = ApduHeader::new(
            self.header[0],
            self.header[1],
            self.header[2],
            self.header[3],
            self.header[4],
        );
        self.header.clear();
        self.headers.push(header);

        let script = match (&self.profile.fault, self.fault_armed) {
            (Some(fault), true) => {
                self.fault_armed = false;
                debug!(%header, status = %fault.status, "Command corrupted by glitch");
                ApduScript::new().status(fault.status)
            }
            _ => self
                .scripts
                .pop_front()
                .unwrap_or_else(|| ApduScript::new().status(INS_NOT_SUPPORTED)),
        };
        self.pending = script.actions.into();
        self.run(now_us);
    }

    fn run(&mut self, now_us: u64) {
        while let Some(action) = self.pending.pop_front() {
            match action {
                CardAction::Send(bytes) => self.schedule(&bytes, now_us),
                CardAction::Receive(0) => {}
                CardAction::Receive(count) => {
                    self.expecting = count;
                    return;
                }
            }
        }
    }

    /// A Vcc glitch of `ticks` hit the card
    pub(crate) fn glitch(&mut self, ticks: u16) {
        if let Some(fault) = &self.profile.fault
            && self.active
            && fault.ticks.contains(&ticks)
        {
            self.fault_armed = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cardglitch_core::convention::invert;

    #[test]
    fn test_operating_baud_follows_ta1() {
        let card = CardProfile::new(Convention::Direct, [0x3B, 0x10, 0x96]);
        assert_eq!(card.atr_baud(), 9_622);
        assert_eq!(card.operating_baud(), 223_721);
        assert_eq!(card.clone().ignoring_ta1().operating_baud(), 9_622);

        let reserved = CardProfile::new(Convention::Direct, [0x3B, 0x10, 0x71]);
        assert_eq!(reserved.operating_baud(), 9_622);
    }

    #[test]
    fn test_atr_is_scheduled_in_card_convention() {
        let mut card = SimCard::new(CardProfile::new(Convention::Inverse, [0x3F, 0x00]));
        card.update_pins(true, true, false, 0);
        assert!(card.take_ready(0).is_none());

        let char_us = char_time_us(9_622);
        let ts = card.take_ready(2_000 + char_us).unwrap();
        assert_eq!(ts.raw, 0x03);
        let t0 = card.take_ready(u64::MAX).unwrap();
        assert_eq!(t0.raw, invert(0x00));
        assert_eq!(t0.ready_at_us, 2_000 + 2 * char_us);
    }

    #[test]
    fn test_script_runs_after_header() {
        let mut card = SimCard::new(CardProfile::default());
        card.update_pins(true, true, false, 0);
        card.drop_missed(u64::MAX);
        card.scripts.push_back(ApduScript::accept(0xD6, 2, StatusWord::new(0x90, 0x00)));

        for byte in [0x00, 0xD6, 0x00, 0x00, 0x02] {
            assert!(card.receive(byte, 9_622, 10_000));
        }
        assert_eq!(card.take_ready(u64::MAX).map(|o| o.raw), Some(0xD6));
        assert!(card.take_ready(u64::MAX).is_none());

        card.receive(0xAA, 9_622, 20_000);
        card.receive(0x55, 9_622, 21_000);
        assert_eq!(&card.received[..], &[0xAA, 0x55]);
        assert_eq!(card.take_ready(u64::MAX).map(|o| o.raw), Some(0x90));
        assert_eq!(card.take_ready(u64::MAX).map(|o| o.raw), Some(0x00));
        assert_eq!(card.headers, vec![ApduHeader::new(0x00, 0xD6, 0x00, 0x00, 0x02)]);
    }

    #[test]
    fn test_rate_mismatch_is_not_decoded() {
        let mut card = SimCard::new(CardProfile::default());
        card.update_pins(true, true, false, 0);
        assert!(!card.receive(0x00, 115_200, 0));
        assert!(card.headers.is_empty());
    }

    #[test]
    fn test_glitch_in_window_corrupts_next_command() {
        let profile = CardProfile::default().with_fault(10..=12, StatusWord::new(0x90, 0x00));
        let mut card = SimCard::new(profile);
        card.update_pins(true, true, false, 0);
        card.drop_missed(u64::MAX);
        card.scripts.push_back(ApduScript::new().status(StatusWord::new(0x69, 0x82)));

        card.glitch(9);
        card.glitch(11);
        for byte in [0x00, 0x20, 0x00, 0x01, 0x00] {
            card.receive(byte, 9_622, 10_000);
        }
        assert_eq!(card.take_ready(u64::MAX).map(|o| o.raw), Some(0x90));
        assert_eq!(card.scripts.len(), 1);
    }
}
