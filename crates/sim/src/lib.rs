//! Simulated hardware for the cardglitch protocol engine
//!
//! A [`Simulator`] ties a behavioural card model to implementations of the
//! engine's hardware traits. All parts share one virtual timeline, so a full
//! power-up, ATR and APDU exchange runs deterministically and instantly.
//!
//! ```
//! use cardglitch_core::{ApduHeader, Direction, SessionConfig, StatusWord};
//! use cardglitch_sim::{ApduScript, CardProfile, Simulator};
//!
//! let sim = Simulator::new(CardProfile::default());
//! sim.push_script(ApduScript::respond(0xB0, &[0x01, 0x02], StatusWord::new(0x90, 0x00)));
//!
//! let mut session = sim.session(SessionConfig::default());
//! session.power_on();
//! session.acquire_atr().unwrap();
//!
//! let mut buf = [0u8; 2];
//! let header = ApduHeader::new(0x00, 0xB0, 0x00, 0x00, 2);
//! let result = session
//!     .send_apdu(header, Direction::Receive, &mut buf, 1000)
//!     .unwrap();
//! assert!(result.is_success());
//! assert_eq!(buf, [0x01, 0x02]);
//! ```
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

use std::cell::RefCell;
use std::rc::Rc;

use bytes::Bytes;
use cardglitch_core::{ApduHeader, CardSession, SessionConfig};

pub mod card;
pub mod clock;
pub mod hal;
pub mod line;
pub mod traffic;
mod world;

pub use card::{ApduScript, CardAction, CardProfile, FaultModel};
pub use clock::SimClock;
pub use hal::{HalEvent, HalRecord, SimHal};
pub use line::SimLine;
pub use traffic::Traffic;

use card::SimCard;
use world::{Shared, World};

/// Session type driving a simulated card
pub type SimSession = CardSession<SimHal, SimLine, SimClock>;

/// A simulated card slot
#[derive(Debug, Clone)]
pub struct Simulator {
    world: Shared,
}

impl Simulator {
    /// Create a slot holding a card with the given profile
    pub fn new(profile: CardProfile) -> Self {
        Self {
            world: Rc::new(RefCell::new(World::new(SimCard::new(profile)))),
        }
    }

    /// Start the millisecond counter at `ms`, to exercise wraparound
    pub fn with_epoch_ms(self, ms: u32) -> Self {
        self.world.borrow_mut().epoch_ms = ms;
        self
    }

    /// Virtual time consumed by every read of the millisecond counter
    pub fn with_poll_cost_us(self, us: u32) -> Self {
        self.world.borrow_mut().poll_cost_us = us.max(1);
        self
    }

    /// Pin driver handle
    pub fn hal(&self) -> SimHal {
        SimHal::new(self.world.clone())
    }

    /// I/O line handle
    pub fn line(&self) -> SimLine {
        SimLine::new(self.world.clone())
    }

    /// Clock handle
    pub fn clock(&self) -> SimClock {
        SimClock::new(self.world.clone())
    }

    /// Session wired to this slot
    pub fn session(&self, config: SessionConfig) -> SimSession {
        CardSession::new(self.hal(), self.line(), self.clock(), config)
    }

    /// Queue the card's behaviour for the next command header
    pub fn push_script(&self, script: ApduScript) {
        self.world.borrow_mut().card.scripts.push_back(script);
    }

    /// Scripts not consumed yet
    pub fn pending_scripts(&self) -> usize {
        self.world.borrow().card.scripts.len()
    }

    /// Make the clock line read high forever
    pub fn set_clock_stuck_high(&self, stuck: bool) {
        self.world.borrow_mut().clock_stuck_high = stuck;
    }

    /// Wire capture so far
    pub fn traffic(&self) -> Traffic {
        self.world.borrow().traffic.clone()
    }

    /// Everything the host did to the contacts, in order
    pub fn hal_events(&self) -> Vec<HalRecord> {
        self.world.borrow().hal_events.clone()
    }

    /// Command headers the card decoded
    pub fn headers(&self) -> Vec<ApduHeader> {
        self.world.borrow().card.headers.clone()
    }

    /// Data bytes the card accepted from the host
    pub fn card_received(&self) -> Bytes {
        self.world.borrow().card.received.clone().freeze()
    }

    /// Number of times the card left reset
    pub fn resets(&self) -> usize {
        self.world.borrow().card.resets
    }

    /// Whether the card is powered, clocked and out of reset
    pub fn card_active(&self) -> bool {
        self.world.borrow().card.is_active()
    }

    /// Whether the host has released the I/O line to idle
    pub fn line_idle(&self) -> bool {
        self.world.borrow().line.idle
    }

    /// Microseconds since the simulation started
    pub fn now_us(&self) -> u64 {
        self.world.borrow().now_us
    }

    /// The card profile
    pub fn profile(&self) -> CardProfile {
        self.world.borrow().card.profile.clone()
    }
}
