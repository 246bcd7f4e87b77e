//! Simulated card contacts and fault-injection outputs

use std::fmt;

use cardglitch_core::CardHal;

use crate::world::Shared;

/// Something the host did to the card contacts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalEvent {
    /// Vcc switched
    Power(bool),
    /// RST driven; `true` holds the card in reset
    Reset(bool),
    /// Free-running clock started or stopped
    ClockFreerun(bool),
    /// Manual clock edges
    ClockPulses(u16),
    /// Vcc glitch
    Glitch(u16),
    /// External trigger pulse
    Trigger,
}

impl fmt::Display for HalEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Power(on) => write!(f, "power {}", if *on { "on" } else { "off" }),
            Self::Reset(asserted) => {
                write!(f, "reset {}", if *asserted { "asserted" } else { "released" })
            }
            Self::ClockFreerun(on) => {
                write!(f, "clock {}", if *on { "running" } else { "stopped" })
            }
            Self::ClockPulses(count) => write!(f, "{count} clock pulses"),
            Self::Glitch(ticks) => write!(f, "glitch {ticks} ticks"),
            Self::Trigger => f.write_str("trigger"),
        }
    }
}

/// A [`HalEvent`] with its time on the virtual clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HalRecord {
    /// Microseconds since the simulation started
    pub at_us: u64,
    /// What happened
    pub event: HalEvent,
}

/// Pin driver for the simulated card
#[derive(Debug, Clone)]
pub struct SimHal {
    world: Shared,
}

impl SimHal {
    pub(crate) const fn new(world: Shared) -> Self {
        Self { world }
    }

    fn record(&self, event: HalEvent) {
        let mut world = self.world.borrow_mut();
        let at_us = world.now_us;
        world.hal_events.push(HalRecord { at_us, event });
    }
}

impl CardHal for SimHal {
    fn set_power(&mut self, on: bool) {
        self.record(HalEvent::Power(on));
        let mut world = self.world.borrow_mut();
        world.pins.power = on;
        world.sync_card();
    }

    fn set_reset(&mut self, asserted: bool) {
        self.record(HalEvent::Reset(asserted));
        let mut world = self.world.borrow_mut();
        world.pins.reset = asserted;
        world.sync_card();
    }

    fn set_clock_freerun(&mut self, on: bool) {
        self.record(HalEvent::ClockFreerun(on));
        let mut world = self.world.borrow_mut();
        world.pins.clock = on;
        if !on {
            world.clock_level = false;
        }
        world.sync_card();
    }

    fn clock_is_high(&self) -> bool {
        let mut world = self.world.borrow_mut();
        if world.clock_stuck_high {
            return true;
        }
        if !world.pins.clock {
            return world.clock_level;
        }
        world.clock_level = !world.clock_level;
        world.clock_level
    }

    fn clock_pulses(&mut self, count: u16) {
        self.record(HalEvent::ClockPulses(count));
    }

    fn glitch_pulse(&mut self, ticks: u16) {
        self.record(HalEvent::Glitch(ticks));
        self.world.borrow_mut().card.glitch(ticks);
    }

    fn trigger_pulse(&mut self) {
        self.record(HalEvent::Trigger);
    }
}
