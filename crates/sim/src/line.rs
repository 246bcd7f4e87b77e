//! Host end of the simulated half-duplex I/O line

use bytes::BufMut;
use cardglitch_core::{FrameFormat, SerialLine};
use tracing::trace;

use crate::card::{char_time_us, rates_match};
use crate::world::Shared;

/// Software UART attached to the simulated card
///
/// Writes take one character time on the virtual clock. Reads only return
/// characters the card finished sending while the receiver was armed and
/// configured for the card's rate.
#[derive(Debug, Clone)]
pub struct SimLine {
    world: Shared,
}

impl SimLine {
    pub(crate) const fn new(world: Shared) -> Self {
        Self { world }
    }

    /// Frame format last pushed by the host
    pub fn frame(&self) -> Option<FrameFormat> {
        self.world.borrow().line.frame
    }

    /// Whether the receiver is armed
    pub fn is_listening(&self) -> bool {
        self.world.borrow().line.listening
    }
}

impl SerialLine for SimLine {
    fn configure(&mut self, frame: FrameFormat) {
        self.world.borrow_mut().line.frame = Some(frame);
    }

    fn listen(&mut self) {
        let mut world = self.world.borrow_mut();
        let now = world.now_us;
        let missed = world.card.drop_missed(now);
        if missed > 0 {
            trace!(missed, "Characters lost while transmitting");
        }
        world.traffic.missed += missed;
        world.line.listening = true;
    }

    fn stop_listening(&mut self) {
        self.world.borrow_mut().line.listening = false;
    }

    fn set_idle(&mut self) {
        self.world.borrow_mut().line.idle = true;
    }

    fn read(&mut self) -> Option<u8> {
        let mut world = self.world.borrow_mut();
        if !world.line.listening {
            return None;
        }
        let now = world.now_us;
        let incoming = world.card.take_ready(now)?;
        if !rates_match(world.line.baud(), incoming.baud) {
            trace!(
                line_baud = world.line.baud(),
                card_baud = incoming.baud,
                "Framing error"
            );
            world.traffic.framing_errors += 1;
            return None;
        }
        world.traffic.card_to_host.put_u8(incoming.raw);
        Some(incoming.raw)
    }

    fn write(&mut self, byte: u8) {
        let mut world = self.world.borrow_mut();
        let baud = world.line.baud();
        world.now_us = world.now_us.saturating_add(char_time_us(baud));
        world.traffic.host_to_card.put_u8(byte);
        let now = world.now_us;
        if !world.card.receive(byte, baud, now) {
            world.traffic.rejected += 1;
        }
    }
}
