//! ISO7816-3 protocol engine for bit-banged smartcard interfaces
//!
//! This crate drives a contact smartcard through a minimal set of pins: a
//! power switch, a reset line, a card clock and a single half-duplex I/O line
//! run by a software serial port. It is meant for fault-injection rigs where
//! the host must control every edge the card sees.
//!
//! ## Overview
//!
//! - [`time`]: millisecond clock abstraction and wraparound-safe deadlines
//! - [`convention`]: direct and inverse byte conventions and line framing
//! - [`hal`]: the pin and serial-line traits a board implements
//! - [`transport`]: convention-aware, guard-timed byte I/O over the line
//! - [`atr`]: incremental ATR parser and acquisition
//! - [`negotiation`]: Fi/Di tables and bit rate selection from TA1
//! - [`apdu`]: the T=0 procedure-byte engine
//! - [`session`]: power sequencing, phases and glitch controls
//!
//! Timeouts are reported in band as reserved [`StatusWord`] values that no
//! card can produce, so a caller sweeping glitch parameters always gets a
//! value back.
//!
//! The crate builds without `std` when the default `std` feature is disabled.
#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

pub mod apdu;
pub mod atr;
pub mod config;
pub mod convention;
pub mod hal;
pub mod negotiation;
pub mod session;
pub mod status;
pub mod time;
pub mod transport;

mod error;
pub use error::{Error, Result};

pub use apdu::{ApduHeader, ApduResult, Direction, Procedure};
pub use atr::{AtrParser, AtrRecord};
pub use config::{RxTimeoutPolicy, SessionConfig};
pub use convention::{Convention, FrameFormat, Parity};
pub use hal::{CardHal, SerialLine};
pub use negotiation::{Negotiation, NegotiationError, RateParameters};
pub use session::{AtrOutcome, CardSession, PowerState, SessionPhase};
pub use status::StatusWord;
pub use time::{Abort, Clock, Deadline};
pub use transport::Transport;

/// Prelude module containing commonly used traits and types
pub mod prelude {
    pub use crate::{
        Abort, ApduHeader, ApduResult, AtrOutcome, AtrRecord, CardHal, CardSession, Clock,
        Convention, Direction, Error, Negotiation, Result, SerialLine, SessionConfig,
        SessionPhase, StatusWord,
    };
}
