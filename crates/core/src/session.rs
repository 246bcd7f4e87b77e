//! Card session: the single owner of all protocol state
//!
//! A [`CardSession`] sequences the hardware through power-up, reads the ATR,
//! applies the negotiated bit rate once and then runs APDU exchanges. The
//! convention, bit rate, power state and phase live here and nowhere else.

use derive_more::Display;
use tracing::{debug, info, instrument, trace, warn};

use crate::apdu::{self, ApduHeader, ApduResult, Direction};
use crate::atr::{self, AtrRecord};
use crate::config::SessionConfig;
use crate::convention::Convention;
use crate::hal::{CardHal, SerialLine};
use crate::negotiation::{Negotiation, RateParameters};
use crate::time::{Abort, Clock, Deadline};
use crate::transport::Transport;
use crate::{Error, Result};

/// Card supply state
#[derive(Debug, Display, Clone, Copy, Default, PartialEq, Eq)]
pub enum PowerState {
    /// No Vcc, clock stopped, reset asserted
    #[default]
    #[display("off")]
    Off,
    /// Power-up sequence in progress
    #[display("resetting")]
    Resetting,
    /// Powered, clocked and out of reset
    #[display("active")]
    Active,
}

/// Protocol progress within one power cycle
///
/// A complete ATR moves the session through `AtrAcquired` to `Negotiated`
/// once the bit rate is settled from TA1, whether it was applied, absent or
/// unusable. The first exchange answered with a card status word confirms
/// the link and moves it to `Ready`. A partial ATR stays in `AtrAcquired`.
#[derive(Debug, Display, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionPhase {
    /// No ATR read yet
    #[default]
    #[display("uninitialized")]
    Uninitialized,
    /// ATR read; negotiation is pending or was impossible
    #[display("ATR acquired")]
    AtrAcquired,
    /// Bit rate settled after the ATR
    #[display("negotiated")]
    Negotiated,
    /// The card has answered at the settled rate
    #[display("ready")]
    Ready,
}

/// What [`CardSession::acquire_atr`] produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtrOutcome {
    /// The received ATR, possibly partial
    pub atr: AtrRecord,
    /// What happened to the bit rate afterwards
    pub negotiation: Negotiation,
}

/// One card slot driven through a [`CardHal`] and a half-duplex [`SerialLine`]
#[derive(Debug)]
pub struct CardSession<H, L, C> {
    hal: H,
    transport: Transport<L, C>,
    config: SessionConfig,
    power: PowerState,
    phase: SessionPhase,
    atr: Option<AtrRecord>,
}

impl<H, L, C> CardSession<H, L, C>
where
    H: CardHal,
    L: SerialLine,
    C: Clock,
{
    /// Create a session; the line is set to the ATR rate and left not listening
    pub fn new(hal: H, line: L, clock: C, config: SessionConfig) -> Self {
        let transport = Transport::new(
            line,
            clock,
            config.atr_baud(),
            config.initial_convention,
            config.guard_time_us,
        );
        Self {
            hal,
            transport,
            config,
            power: PowerState::Off,
            phase: SessionPhase::Uninitialized,
            atr: None,
        }
    }

    /// Cold-start the card
    ///
    /// Reset is held for `reset_hold_ms` before Vcc is applied, then the I/O
    /// line is released high, the clock started and reset released. A card
    /// that is already powered is powered down first.
    #[instrument(level = "debug", skip_all)]
    pub fn power_on(&mut self) {
        if self.power != PowerState::Off {
            self.power_off();
        }
        self.reset_protocol_state();
        self.power = PowerState::Resetting;

        self.hal.set_reset(true);
        self.transport.clock_mut().delay_ms(self.config.reset_hold_ms);
        self.hal.set_power(true);
        self.transport.set_idle();
        self.hal.set_clock_freerun(true);
        self.hal.set_reset(false);

        self.power = PowerState::Active;
        debug!("Card powered");
    }

    /// Power the card down, stopping the clock only while it reads low
    #[instrument(level = "debug", skip_all)]
    pub fn power_off(&mut self) {
        self.hal.set_reset(true);

        let deadline = Deadline::start(self.transport.clock(), self.config.clock_stop_timeout_ms);
        while self.hal.clock_is_high() {
            if deadline.expired(self.transport.clock()) {
                warn!("Card clock never read low, stopping it anyway");
                break;
            }
        }
        self.hal.set_clock_freerun(false);
        self.hal.set_power(false);
        self.transport.stop_listening();

        self.power = PowerState::Off;
        self.reset_protocol_state();
        debug!("Card powered down");
    }

    /// Read the ATR, then negotiate the bit rate from TA1
    pub fn acquire_atr(&mut self) -> Result<AtrOutcome> {
        self.acquire_atr_until(&())
    }

    /// Like [`acquire_atr`](Self::acquire_atr), giving up once `abort` fires
    ///
    /// Only valid once per power cycle. An incomplete ATR is returned as is
    /// and skips negotiation.
    #[instrument(level = "debug", skip_all)]
    pub fn acquire_atr_until(&mut self, abort: &dyn Abort) -> Result<AtrOutcome> {
        self.require_power()?;
        if self.phase != SessionPhase::Uninitialized {
            return Err(Error::InvalidPhase {
                operation: "ATR acquisition",
                phase: self.phase,
            });
        }

        let atr = atr::acquire(&mut self.transport, &mut self.hal, &self.config, abort);
        self.phase = SessionPhase::AtrAcquired;

        let negotiation = if atr.is_complete() {
            self.negotiate(atr.ta1())
        } else {
            Negotiation::Skipped
        };
        self.atr = Some(atr.clone());
        Ok(AtrOutcome { atr, negotiation })
    }

    /// Apply TA1 to the transport; runs at most once per power cycle
    fn negotiate(&mut self, ta1: Option<u8>) -> Negotiation {
        debug_assert_eq!(self.phase, SessionPhase::AtrAcquired);
        self.phase = SessionPhase::Negotiated;
        let Some(ta1) = ta1 else {
            return Negotiation::Skipped;
        };

        match RateParameters::from_ta1(ta1) {
            Ok(params) => {
                let baud = params.baud(self.config.card_clock_hz);
                info!(%params, baud, "Card rate negotiated");
                self.transport.set_baud(baud);
                Negotiation::Applied { params, baud }
            }
            Err(error) => {
                warn!(%error, baud = self.transport.baud(), "Keeping ATR rate");
                Negotiation::Failed(error)
            }
        }
    }

    /// Run one T=0 exchange
    ///
    /// `buf` holds the bytes to send, or receives the card's data. It must be
    /// at least P3 bytes long. `timeout_ms` bounds the wait for each byte from
    /// the card; [`SessionConfig::apdu_timeout_ms`] is the usual choice.
    pub fn send_apdu(
        &mut self,
        header: ApduHeader,
        direction: Direction,
        buf: &mut [u8],
        timeout_ms: u32,
    ) -> Result<ApduResult> {
        self.send_apdu_until(header, direction, buf, timeout_ms, &())
    }

    /// Like [`send_apdu`](Self::send_apdu), giving up once `abort` fires
    ///
    /// An abort ends the exchange with the sentinel of the wait it cut short.
    #[instrument(level = "debug", skip_all, fields(header = %header))]
    pub fn send_apdu_until(
        &mut self,
        header: ApduHeader,
        direction: Direction,
        buf: &mut [u8],
        timeout_ms: u32,
        abort: &dyn Abort,
    ) -> Result<ApduResult> {
        self.require_power()?;
        if !self.phase.allows_exchange() {
            return Err(Error::InvalidPhase {
                operation: "APDU exchange",
                phase: self.phase,
            });
        }
        let result = apdu::exchange(
            &mut self.transport,
            &header,
            direction,
            buf,
            timeout_ms,
            &self.config,
            abort,
        )?;
        if self.phase == SessionPhase::Negotiated && !result.status.is_sentinel() {
            self.phase = SessionPhase::Ready;
            debug!(baud = self.transport.baud(), "Card answering, session ready");
        }
        Ok(result)
    }

    /// Wait up to `timeout_ms` for a raw protocol byte, convention applied
    pub fn read_byte(&mut self, timeout_ms: u32) -> Option<u8> {
        self.transport.listen();
        self.transport.read_byte(timeout_ms)
    }

    /// Transmit one protocol byte, convention applied
    pub fn write_byte(&mut self, byte: u8) {
        self.transport.stop_listening();
        self.transport.write_byte(byte);
    }

    /// Current byte convention
    pub const fn convention(&self) -> Convention {
        self.transport.convention()
    }

    /// Override the byte convention, keeping the bit rate
    pub fn set_convention(&mut self, convention: Convention) {
        debug!(%convention, "Convention overridden");
        self.transport.set_convention(convention);
    }

    /// Current bit rate
    pub const fn baud_rate(&self) -> u32 {
        self.transport.baud()
    }

    /// Force a bit rate, keeping the convention
    pub fn set_baud(&mut self, baud: u32) {
        debug!(baud, "Bit rate overridden");
        self.transport.set_baud(baud);
    }

    /// Fire a Vcc glitch of `ticks` timer ticks
    pub fn glitch(&mut self, ticks: u16) {
        self.hal.glitch_pulse(ticks);
        trace!(ticks, "Glitch fired");
    }

    /// Pulse the external trigger output
    pub fn trigger(&mut self) {
        self.hal.trigger_pulse();
    }

    /// Clock the card by hand for `count` edges
    ///
    /// Only meaningful while the free-running clock is stopped.
    pub fn clock_pulses(&mut self, count: u16) {
        self.hal.clock_pulses(count);
    }

    /// Supply state
    pub const fn power_state(&self) -> PowerState {
        self.power
    }

    /// Protocol phase
    pub const fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// ATR of the current power cycle
    pub const fn atr(&self) -> Option<&AtrRecord> {
        self.atr.as_ref()
    }

    /// Session configuration
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The hardware interface
    pub const fn hal(&self) -> &H {
        &self.hal
    }

    /// Mutable access to the hardware interface
    pub const fn hal_mut(&mut self) -> &mut H {
        &mut self.hal
    }

    /// The byte transport
    pub const fn transport(&self) -> &Transport<L, C> {
        &self.transport
    }

    /// Take the hardware back
    pub fn into_parts(self) -> (H, L, C) {
        let (line, clock) = self.transport.into_parts();
        (self.hal, line, clock)
    }

    const fn require_power(&self) -> Result<()> {
        match self.power {
            PowerState::Active => Ok(()),
            _ => Err(Error::NotPowered),
        }
    }

    fn reset_protocol_state(&mut self) {
        self.atr = None;
        self.phase = SessionPhase::Uninitialized;
        self.transport
            .configure(self.config.atr_baud(), self.config.initial_convention);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::atomic::AtomicBool;

    use super::*;
    use crate::convention::{Parity, invert};
    use crate::negotiation::NegotiationError;
    use crate::status::StatusWord;
    use crate::transport::mock::{Journal, LineEvent, MockClock, MockHal, MockLine};

    type MockSession = CardSession<MockHal, MockLine, MockClock>;

    const TIMEOUT_MS: u32 = 5;

    fn session(rx: &[u8]) -> (MockSession, Journal) {
        let journal: Journal = Rc::new(RefCell::new(Vec::new()));
        let session = CardSession::new(
            MockHal::with_journal(journal.clone()),
            MockLine::with_journal(rx, journal.clone()),
            MockClock::with_journal(journal.clone()),
            SessionConfig::default(),
        );
        journal.borrow_mut().clear();
        (session, journal)
    }

    fn powered(rx: &[u8]) -> MockSession {
        let (mut session, _) = session(rx);
        session.power_on();
        session
    }

    fn without_configure(journal: &Journal) -> Vec<LineEvent> {
        journal
            .borrow()
            .iter()
            .filter(|e| !matches!(e, LineEvent::Configure(_)))
            .copied()
            .collect()
    }

    #[test]
    fn test_power_on_sequence() {
        let (mut session, journal) = session(&[]);
        session.power_on();
        assert_eq!(
            without_configure(&journal),
            vec![
                LineEvent::Reset(true),
                LineEvent::DelayMs(12),
                LineEvent::Power(true),
                LineEvent::Idle,
                LineEvent::ClockFreerun(true),
                LineEvent::Reset(false),
            ]
        );
        assert_eq!(session.power_state(), PowerState::Active);
        assert_eq!(session.phase(), SessionPhase::Uninitialized);
    }

    #[test]
    fn test_power_off_waits_for_clock_low() {
        let (mut session, journal) = session(&[]);
        session.power_on();
        journal.borrow_mut().clear();
        session.hal().clock_high_reads.set(3);
        session.power_off();
        assert_eq!(session.hal().clock_high_reads.get(), 0);
        assert_eq!(
            without_configure(&journal),
            vec![
                LineEvent::Reset(true),
                LineEvent::ClockFreerun(false),
                LineEvent::Power(false),
            ]
        );
        assert_eq!(session.power_state(), PowerState::Off);
    }

    #[test]
    fn test_power_off_gives_up_on_stuck_clock() {
        let mut session = powered(&[]);
        session.hal().clock_high_reads.set(u32::MAX);
        session.power_off();
        assert!(session.hal().clock_high_reads.get() > 0);
        assert!(session.hal().events.contains(&LineEvent::ClockFreerun(false)));
    }

    #[test]
    fn test_operations_need_power() {
        let (mut session, _) = session(&[0x3B, 0x00]);
        assert_eq!(session.acquire_atr().unwrap_err(), Error::NotPowered);
        let header = ApduHeader::new(0x00, 0xB0, 0, 0, 0);
        assert_eq!(
            session
                .send_apdu(header, Direction::Receive, &mut [], TIMEOUT_MS)
                .unwrap_err(),
            Error::NotPowered
        );
    }

    #[test]
    fn test_inverse_card_without_ta1() {
        let mut session = powered(&[0x03, invert(0x20), invert(0x00)]);
        let outcome = session.acquire_atr().unwrap();
        assert_eq!(outcome.atr.len(), 3);
        assert!(outcome.atr.is_complete());
        assert_eq!(outcome.atr.ta1(), None);
        assert_eq!(outcome.negotiation, Negotiation::Skipped);
        assert_eq!(session.convention(), Convention::Inverse);
        assert_eq!(session.baud_rate(), session.config().atr_baud());
        assert_eq!(session.phase(), SessionPhase::Negotiated);
        assert_eq!(session.atr(), Some(&outcome.atr));
    }

    #[test]
    fn test_ta1_11_keeps_atr_rate() {
        let mut session = powered(&[0x3B, 0x10, 0x11]);
        let outcome = session.acquire_atr().unwrap();
        assert!(outcome.negotiation.is_applied());
        assert_eq!(session.baud_rate(), session.config().atr_baud());
        assert_eq!(session.phase(), SessionPhase::Negotiated);
    }

    #[test]
    fn test_negotiation_preserves_inverse_convention() {
        let mut session = powered(&[0x03, invert(0x10), invert(0x96)]);
        let outcome = session.acquire_atr().unwrap();
        let Negotiation::Applied { params, baud } = outcome.negotiation else {
            panic!("expected negotiation, got {:?}", outcome.negotiation);
        };
        assert_eq!(params.ta1, 0x96);
        assert_eq!(baud, 223_721);
        assert_eq!(session.baud_rate(), 223_721);
        let frame = *session.transport().line().frames.last().unwrap();
        assert_eq!(frame.baud, 223_721);
        assert_eq!(frame.parity, Parity::Odd);
    }

    #[test]
    fn test_reserved_ta1_is_recoverable() {
        let mut session = powered(&[0x3B, 0x10, 0x71, 0x5B, 0x42, 0x90, 0x00]);
        let outcome = session.acquire_atr().unwrap();
        assert_eq!(
            outcome.negotiation,
            Negotiation::Failed(NegotiationError::ReservedFi { ta1: 0x71 })
        );
        assert_eq!(session.baud_rate(), session.config().atr_baud());
        assert_eq!(session.phase(), SessionPhase::Negotiated);

        let mut buf = [0u8; 1];
        let header = ApduHeader::new(0x00, 0xA4, 0, 0, 1);
        let result = session
            .send_apdu(header, Direction::Receive, &mut buf, TIMEOUT_MS)
            .unwrap();
        assert!(result.is_success());
        assert_eq!(buf, [0x42]);
        assert_eq!(session.phase(), SessionPhase::Ready);
    }

    #[test]
    fn test_partial_atr_skips_negotiation() {
        let mut session = powered(&[0x3B, 0x13, 0x96]);
        let outcome = session.acquire_atr().unwrap();
        assert!(!outcome.atr.is_complete());
        assert_eq!(outcome.atr.ta1(), Some(0x96));
        assert_eq!(outcome.negotiation, Negotiation::Skipped);
        assert_eq!(session.phase(), SessionPhase::AtrAcquired);
        assert!(session.phase().allows_exchange());
    }

    #[test]
    fn test_atr_once_per_power_cycle() {
        let mut session = powered(&[0x3B, 0x00, 0x3B, 0x00]);
        session.acquire_atr().unwrap();
        assert_eq!(
            session.acquire_atr().unwrap_err(),
            Error::InvalidPhase {
                operation: "ATR acquisition",
                phase: SessionPhase::Negotiated,
            }
        );

        session.power_off();
        session.power_on();
        assert!(session.acquire_atr().unwrap().atr.is_complete());
    }

    #[test]
    fn test_apdu_before_atr_rejected() {
        let mut session = powered(&[]);
        let header = ApduHeader::new(0x00, 0xB0, 0, 0, 0);
        let err = session
            .send_apdu(header, Direction::Receive, &mut [], TIMEOUT_MS)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPhase { .. }));
        assert!(session.transport().line().tx.is_empty());
    }

    #[test]
    fn test_power_cycle_restores_defaults() {
        let mut session = powered(&[0x03, invert(0x10), invert(0x96)]);
        session.acquire_atr().unwrap();
        assert_eq!(session.convention(), Convention::Inverse);

        session.power_off();
        assert_eq!(session.convention(), Convention::Direct);
        assert_eq!(session.baud_rate(), session.config().atr_baud());
        assert_eq!(session.phase(), SessionPhase::Uninitialized);
        assert!(session.atr().is_none());
    }

    #[test]
    fn test_escape_hatch_bytes() {
        let mut session = powered(&[invert(0x9F)]);
        session.set_convention(Convention::Inverse);
        assert_eq!(session.read_byte(5), Some(0x9F));
        assert_eq!(session.read_byte(5), None);
        session.write_byte(0xA4);
        assert_eq!(session.transport().line().tx, vec![invert(0xA4)]);
        assert!(!session.transport().is_listening());
    }

    #[test]
    fn test_glitch_controls_forward_to_hal() {
        let mut session = powered(&[]);
        session.trigger();
        session.glitch(7);
        session.clock_pulses(40);
        assert_eq!(
            &session.hal().events[session.hal().events.len() - 3..],
            &[
                LineEvent::Trigger,
                LineEvent::Glitch(7),
                LineEvent::ClockPulses(40)
            ]
        );
    }

    #[test]
    fn test_set_baud_keeps_convention() {
        let mut session = powered(&[]);
        session.set_convention(Convention::Inverse);
        session.set_baud(19_200);
        assert_eq!(session.baud_rate(), 19_200);
        assert_eq!(session.convention(), Convention::Inverse);
    }

    #[test]
    fn test_ready_only_after_card_answers() {
        let header = ApduHeader::new(0x00, 0xB0, 0, 0, 0);
        let mut session = powered(&[0x3B, 0x00, 0x90, 0x00]);
        session.acquire_atr().unwrap();
        assert_eq!(session.phase(), SessionPhase::Negotiated);

        let result = session
            .send_apdu(header, Direction::Receive, &mut [], TIMEOUT_MS)
            .unwrap();
        assert!(result.is_success());
        assert_eq!(session.phase(), SessionPhase::Ready);

        // a silent card afterwards does not demote the session
        let result = session
            .send_apdu(header, Direction::Receive, &mut [], TIMEOUT_MS)
            .unwrap();
        assert_eq!(result.status, StatusWord::STATUS_TIMEOUT);
        assert_eq!(session.phase(), SessionPhase::Ready);
    }

    #[test]
    fn test_sentinel_keeps_session_negotiated() {
        let mut session = powered(&[0x3B, 0x00]);
        session.acquire_atr().unwrap();
        let header = ApduHeader::new(0x00, 0xB0, 0, 0, 0);
        let result = session
            .send_apdu(header, Direction::Receive, &mut [], TIMEOUT_MS)
            .unwrap();
        assert_eq!(result.status, StatusWord::STATUS_TIMEOUT);
        assert_eq!(session.phase(), SessionPhase::Negotiated);
    }

    #[test]
    fn test_abort_cuts_apdu_short() {
        let mut session = powered(&[0x3B, 0x00]);
        session.acquire_atr().unwrap();
        let abort = AtomicBool::new(true);
        let mut buf = [0u8; 2];
        let result = session
            .send_apdu_until(
                ApduHeader::new(0x00, 0xB0, 0, 0, 2),
                Direction::Receive,
                &mut buf,
                1000,
                &abort,
            )
            .unwrap();
        assert_eq!(result.status, StatusWord::PROCEDURE_TIMEOUT);
        assert!(session.transport().clock().now_ms() < 100);
    }
}
