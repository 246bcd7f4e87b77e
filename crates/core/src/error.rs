//! Core error type
//!
//! Transport timeouts and negotiation failures are returned as data (status
//! sentinels, [`Negotiation::Failed`](crate::negotiation::Negotiation)). This
//! type only covers calls rejected before any card I/O happens.

use crate::session::SessionPhase;

/// Errors raised by [`CardSession`](crate::session::CardSession) operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The caller's buffer cannot hold the declared transfer length
    #[error("Buffer too small: {required} bytes declared, {capacity} available")]
    BufferTooSmall {
        /// Length declared in P3
        required: usize,
        /// Length of the caller's buffer
        capacity: usize,
    },

    /// The card is not powered up
    #[error("Card is not powered")]
    NotPowered,

    /// The operation is not valid in the current session phase
    #[error("{operation} not allowed while session is {phase}")]
    InvalidPhase {
        /// Rejected operation
        operation: &'static str,
        /// Phase the session was in
        phase: SessionPhase,
    },
}

/// Result type for session operations
pub type Result<T, E = Error> = core::result::Result<T, E>;
