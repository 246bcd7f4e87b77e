//! Byte transport over the half-duplex card I/O line
//!
//! The transport owns the serial line and the time source. It applies the
//! session convention to every byte in both directions and keeps track of
//! whether the line is armed for receiving or transmitting.

#[cfg(test)]
pub(crate) mod mock;

use tracing::trace;

use crate::convention::{Convention, FrameFormat};
use crate::hal::SerialLine;
use crate::time::{Abort, Clock, Deadline, poll_until};

/// Convention-aware byte transport
#[derive(Debug)]
pub struct Transport<L, C> {
    line: L,
    clock: C,
    convention: Convention,
    baud: u32,
    guard_time_us: u32,
    listening: bool,
}

impl<L: SerialLine, C: Clock> Transport<L, C> {
    /// Create a transport and push the initial frame format to the line
    ///
    /// The line starts in transmit mode, not listening.
    pub fn new(
        mut line: L,
        clock: C,
        baud: u32,
        convention: Convention,
        guard_time_us: u32,
    ) -> Self {
        line.configure(FrameFormat::new(baud, convention));
        line.stop_listening();
        Self {
            line,
            clock,
            convention,
            baud,
            guard_time_us,
            listening: false,
        }
    }

    /// Current byte convention
    pub const fn convention(&self) -> Convention {
        self.convention
    }

    /// Current bit rate
    pub const fn baud(&self) -> u32 {
        self.baud
    }

    /// Whether the receiver is armed
    pub const fn is_listening(&self) -> bool {
        self.listening
    }

    /// Change the convention, keeping the bit rate
    pub fn set_convention(&mut self, convention: Convention) {
        self.configure(self.baud, convention);
    }

    /// Change the bit rate, keeping the convention
    pub fn set_baud(&mut self, baud: u32) {
        self.configure(baud, self.convention);
    }

    /// Reprogram the line with a new rate and convention
    pub fn configure(&mut self, baud: u32, convention: Convention) {
        trace!(baud, %convention, "Configuring card line");
        self.baud = baud;
        self.convention = convention;
        self.line.configure(FrameFormat::new(baud, convention));
    }

    /// Arm the receiver
    pub fn listen(&mut self) {
        if !self.listening {
            trace!("Line direction: receive");
            self.line.listen();
            self.listening = true;
        }
    }

    /// Release the receiver so the engine can transmit
    pub fn stop_listening(&mut self) {
        if self.listening {
            trace!("Line direction: transmit");
            self.line.stop_listening();
            self.listening = false;
        }
    }

    /// Drive the line to its idle level
    pub fn set_idle(&mut self) {
        self.line.set_idle();
    }

    /// Take a pending byte without waiting, in logical form
    pub fn try_read(&mut self) -> Option<u8> {
        self.line.read().map(|raw| self.convention.translate(raw))
    }

    /// Wait up to `timeout_ms` for a byte
    ///
    /// Returns `None` when nothing arrived in time.
    pub fn read_byte(&mut self, timeout_ms: u32) -> Option<u8> {
        self.read_byte_until(timeout_ms, &())
    }

    /// Like [`read_byte`](Self::read_byte) but also gives up once `abort` fires
    pub fn read_byte_until(&mut self, timeout_ms: u32, abort: &dyn Abort) -> Option<u8> {
        let deadline = Deadline::start(&self.clock, timeout_ms);
        let line = &mut self.line;
        let byte = poll_until(&self.clock, deadline, abort, || line.read())
            .map(|raw| self.convention.translate(raw));
        match byte {
            Some(b) => trace!(byte = format_args!("{b:#04x}"), "RX"),
            None => trace!(timeout_ms, "RX timeout"),
        }
        byte
    }

    /// Translate and transmit one byte immediately
    pub fn write_byte(&mut self, byte: u8) {
        trace!(byte = format_args!("{byte:#04x}"), "TX");
        self.line.write(self.convention.translate(byte));
    }

    /// Wait the guard time, then transmit one byte
    pub fn write_guarded(&mut self, byte: u8) {
        self.clock.delay_us(self.guard_time_us);
        self.write_byte(byte);
    }

    /// Transmit a sequence, each byte preceded by the guard time
    pub fn write_all(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.write_guarded(byte);
        }
    }

    /// The time source
    pub const fn clock(&self) -> &C {
        &self.clock
    }

    /// Mutable access to the time source, for sequencing delays
    pub const fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }

    /// The underlying line
    pub const fn line(&self) -> &L {
        &self.line
    }

    /// Mutable access to the underlying line
    pub const fn line_mut(&mut self) -> &mut L {
        &mut self.line
    }

    /// Take the line and clock back
    pub fn into_parts(self) -> (L, C) {
        (self.line, self.clock)
    }
}

#[cfg(test)]
mod tests {
    use super::mock::{LineEvent, MockClock, MockLine};
    use super::*;
    use crate::convention::invert;

    fn transport(rx: &[u8]) -> Transport<MockLine, MockClock> {
        Transport::new(MockLine::with_rx(rx), MockClock::new(), 9622, Convention::Direct, 520)
    }

    #[test]
    fn test_new_configures_line() {
        let t = transport(&[]);
        assert_eq!(
            t.line().frames,
            vec![FrameFormat::new(9622, Convention::Direct)]
        );
        assert!(!t.is_listening());
    }

    #[test]
    fn test_read_byte_translates_convention() {
        let mut t = transport(&[0x3B, invert(0x9F)]);
        assert_eq!(t.read_byte(10), Some(0x3B));
        t.set_convention(Convention::Inverse);
        assert_eq!(t.read_byte(10), Some(0x9F));
        assert_eq!(t.line().frames.last().map(|f| f.parity), Some(crate::convention::Parity::Odd));
    }

    #[test]
    fn test_read_byte_times_out() {
        let mut t = transport(&[]);
        let start = t.clock().now_ms();
        assert_eq!(t.read_byte(25), None);
        assert!(t.clock().now_ms().wrapping_sub(start) >= 25);
    }

    #[test]
    fn test_read_byte_aborts() {
        let mut t = transport(&[]);
        let flag = core::sync::atomic::AtomicBool::new(true);
        let start = t.clock().now_ms();
        assert_eq!(t.read_byte_until(1000, &flag), None);
        assert!(t.clock().now_ms().wrapping_sub(start) < 1000);
    }

    #[test]
    fn test_write_all_applies_guard_time() {
        let mut t = transport(&[]);
        t.set_convention(Convention::Inverse);
        t.write_all(&[0xA4, 0x00]);
        assert_eq!(t.line().tx, vec![invert(0xA4), invert(0x00)]);
        assert_eq!(t.clock().delays_us(), vec![520, 520]);
    }

    #[test]
    fn test_direction_switches_are_tracked() {
        let mut t = transport(&[]);
        t.listen();
        t.listen();
        t.stop_listening();
        let switches: Vec<_> = t
            .line()
            .events
            .iter()
            .filter(|e| matches!(e, LineEvent::Listen | LineEvent::StopListening))
            .cloned()
            .collect();
        // the initial stop from `new` plus one listen and one stop
        assert_eq!(
            switches,
            vec![LineEvent::StopListening, LineEvent::Listen, LineEvent::StopListening]
        );
    }
}
