//! Scripted hardware doubles for unit tests

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use crate::convention::FrameFormat;
use crate::hal::{CardHal, SerialLine};
use crate::time::Clock;

/// Everything the mocks observed, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LineEvent {
    Configure(FrameFormat),
    Listen,
    StopListening,
    Idle,
    Write(u8),
    Power(bool),
    Reset(bool),
    ClockFreerun(bool),
    ClockPulses(u16),
    Glitch(u16),
    Trigger,
    DelayMs(u32),
}

pub(crate) type Journal = Rc<RefCell<Vec<LineEvent>>>;

/// Line that hands out a fixed script of raw bytes, all available immediately
#[derive(Debug, Default)]
pub(crate) struct MockLine {
    pub(crate) rx: VecDeque<u8>,
    pub(crate) tx: Vec<u8>,
    pub(crate) frames: Vec<FrameFormat>,
    pub(crate) events: Vec<LineEvent>,
    journal: Option<Journal>,
}

impl MockLine {
    pub(crate) fn with_rx(rx: &[u8]) -> Self {
        Self {
            rx: rx.iter().copied().collect(),
            ..Self::default()
        }
    }

    pub(crate) fn with_journal(rx: &[u8], journal: Journal) -> Self {
        Self {
            journal: Some(journal),
            ..Self::with_rx(rx)
        }
    }

    fn record(&mut self, event: LineEvent) {
        self.events.push(event);
        if let Some(journal) = &self.journal {
            journal.borrow_mut().push(event);
        }
    }
}

impl SerialLine for MockLine {
    fn configure(&mut self, frame: FrameFormat) {
        self.frames.push(frame);
        self.record(LineEvent::Configure(frame));
    }

    fn listen(&mut self) {
        self.record(LineEvent::Listen);
    }

    fn stop_listening(&mut self) {
        self.record(LineEvent::StopListening);
    }

    fn set_idle(&mut self) {
        self.record(LineEvent::Idle);
    }

    fn read(&mut self) -> Option<u8> {
        self.rx.pop_front()
    }

    fn write(&mut self, byte: u8) {
        self.tx.push(byte);
        self.record(LineEvent::Write(byte));
    }
}

/// Clock that advances one millisecond every time it is read
#[derive(Debug, Default)]
pub(crate) struct MockClock {
    now: Cell<u32>,
    delays_us: Vec<u32>,
    journal: Option<Journal>,
}

impl MockClock {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn starting_at(now: u32) -> Self {
        Self {
            now: Cell::new(now),
            ..Self::default()
        }
    }

    pub(crate) fn with_journal(journal: Journal) -> Self {
        Self {
            journal: Some(journal),
            ..Self::default()
        }
    }

    pub(crate) fn delays_us(&self) -> Vec<u32> {
        self.delays_us.clone()
    }
}

impl Clock for MockClock {
    fn now_ms(&self) -> u32 {
        let now = self.now.get();
        self.now.set(now.wrapping_add(1));
        now
    }

    fn delay_us(&mut self, us: u32) {
        self.delays_us.push(us);
    }

    fn delay_ms(&mut self, ms: u32) {
        self.now.set(self.now.get().wrapping_add(ms));
        if let Some(journal) = &self.journal {
            journal.borrow_mut().push(LineEvent::DelayMs(ms));
        }
    }
}

/// Card interface pins that only record what was asked of them
#[derive(Debug, Default)]
pub(crate) struct MockHal {
    /// Number of `clock_is_high` reads that return true before the clock reads low
    pub(crate) clock_high_reads: Cell<u32>,
    pub(crate) events: Vec<LineEvent>,
    journal: Option<Journal>,
}

impl MockHal {
    pub(crate) fn with_journal(journal: Journal) -> Self {
        Self {
            journal: Some(journal),
            ..Self::default()
        }
    }

    fn record(&mut self, event: LineEvent) {
        self.events.push(event);
        if let Some(journal) = &self.journal {
            journal.borrow_mut().push(event);
        }
    }
}

impl CardHal for MockHal {
    fn set_power(&mut self, on: bool) {
        self.record(LineEvent::Power(on));
    }

    fn set_reset(&mut self, asserted: bool) {
        self.record(LineEvent::Reset(asserted));
    }

    fn set_clock_freerun(&mut self, on: bool) {
        self.record(LineEvent::ClockFreerun(on));
    }

    fn clock_is_high(&self) -> bool {
        let remaining = self.clock_high_reads.get();
        if remaining == 0 {
            return false;
        }
        self.clock_high_reads.set(remaining - 1);
        true
    }

    fn clock_pulses(&mut self, count: u16) {
        self.record(LineEvent::ClockPulses(count));
    }

    fn glitch_pulse(&mut self, ticks: u16) {
        self.record(LineEvent::Glitch(ticks));
    }

    fn trigger_pulse(&mut self) {
        self.record(LineEvent::Trigger);
    }
}
