//! State shared by the simulated clock, line and card pins

use std::cell::RefCell;
use std::rc::Rc;

use cardglitch_core::FrameFormat;

use crate::card::SimCard;
use crate::hal::HalRecord;
use crate::traffic::Traffic;

pub(crate) type Shared = Rc<RefCell<World>>;

/// Levels the host drives onto the card contacts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Pins {
    pub(crate) power: bool,
    pub(crate) reset: bool,
    pub(crate) clock: bool,
}

impl Default for Pins {
    fn default() -> Self {
        Self {
            power: false,
            reset: true,
            clock: false,
        }
    }
}

/// Host side of the I/O line
#[derive(Debug, Default)]
pub(crate) struct LineState {
    pub(crate) frame: Option<FrameFormat>,
    pub(crate) listening: bool,
    pub(crate) idle: bool,
}

impl LineState {
    pub(crate) fn baud(&self) -> u32 {
        self.frame.map_or(0, |f| f.baud)
    }
}

#[derive(Debug)]
pub(crate) struct World {
    pub(crate) now_us: u64,
    pub(crate) epoch_ms: u32,
    pub(crate) poll_cost_us: u32,
    pub(crate) card: SimCard,
    pub(crate) pins: Pins,
    pub(crate) line: LineState,
    pub(crate) hal_events: Vec<HalRecord>,
    pub(crate) traffic: Traffic,
    pub(crate) clock_level: bool,
    pub(crate) clock_stuck_high: bool,
}

impl World {
    pub(crate) fn new(card: SimCard) -> Self {
        Self {
            now_us: 0,
            epoch_ms: 0,
            poll_cost_us: 10,
            card,
            pins: Pins::default(),
            line: LineState::default(),
            hal_events: Vec::new(),
            traffic: Traffic::default(),
            clock_level: false,
            clock_stuck_high: false,
        }
    }

    /// Millisecond counter value the host sees
    pub(crate) const fn now_ms(&self) -> u32 {
        self.epoch_ms.wrapping_add((self.now_us / 1_000) as u32)
    }

    /// Push the current pin levels to the card
    pub(crate) fn sync_card(&mut self) {
        let Pins {
            power,
            reset,
            clock,
        } = self.pins;
        self.card.update_pins(power, clock, reset, self.now_us);
    }
}
