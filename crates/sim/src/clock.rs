//! Virtual time

use cardglitch_core::Clock;

use crate::world::Shared;

/// Clock running on the simulator's virtual timeline
///
/// Every read of the millisecond counter costs a few microseconds, so busy
/// polls make progress without real time passing.
#[derive(Debug, Clone)]
pub struct SimClock {
    world: Shared,
}

impl SimClock {
    pub(crate) const fn new(world: Shared) -> Self {
        Self { world }
    }

    /// Microseconds since the simulation started
    pub fn now_us(&self) -> u64 {
        self.world.borrow().now_us
    }
}

impl Clock for SimClock {
    fn now_ms(&self) -> u32 {
        let mut world = self.world.borrow_mut();
        world.now_us += u64::from(world.poll_cost_us);
        world.now_ms()
    }

    fn delay_us(&mut self, us: u32) {
        self.world.borrow_mut().now_us += u64::from(us);
    }

    fn delay_ms(&mut self, ms: u32) {
        self.world.borrow_mut().now_us += u64::from(ms) * 1_000;
    }
}
