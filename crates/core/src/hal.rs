//! Hardware abstraction consumed by the protocol engine
//!
//! The engine never touches pins, timers or registers. A board support crate
//! implements these traits; the `cardglitch-sim` crate implements them for a
//! simulated card.

use crate::convention::FrameFormat;

/// Power, reset, clock and fault-injection outputs of the card interface
///
/// Implementations only drive pins. The order of operations required by
/// ISO7816-3 is enforced by [`CardSession`](crate::session::CardSession).
pub trait CardHal {
    /// Switch card Vcc on or off
    fn set_power(&mut self, on: bool);

    /// Drive RST: `true` holds the card in reset
    fn set_reset(&mut self, asserted: bool);

    /// Start or stop the free-running card clock
    fn set_clock_freerun(&mut self, on: bool);

    /// Current level of the clock output
    fn clock_is_high(&self) -> bool;

    /// Emit `count` clock edges by hand while the free-running clock is stopped
    fn clock_pulses(&mut self, count: u16);

    /// Pull Vcc to the glitch level for exactly `ticks` timer ticks
    ///
    /// Must run with fixed timing and without calling anything whose latency
    /// varies.
    fn glitch_pulse(&mut self, ticks: u16);

    /// Pulse the external trigger output used to sync instruments
    fn trigger_pulse(&mut self);
}

/// Half-duplex asynchronous serial line shared between TX and RX
pub trait SerialLine {
    /// Apply a new baud rate and frame format
    fn configure(&mut self, frame: FrameFormat);

    /// Arm the receiver; the transmitter is released
    fn listen(&mut self);

    /// Disarm the receiver so the line can be driven
    fn stop_listening(&mut self);

    /// Drive the I/O line to its idle high level
    fn set_idle(&mut self);

    /// Take one received byte, exactly as it appeared on the line
    fn read(&mut self) -> Option<u8>;

    /// Transmit one byte exactly as given
    fn write(&mut self, byte: u8);
}
