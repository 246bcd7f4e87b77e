//! Millisecond time source and wraparound-safe deadlines
//!
//! Every wait in the engine is a bounded busy-poll against a free-running
//! millisecond counter. The counter is a `u32` that overflows, so all
//! comparisons go through signed wrapping differences.

/// Monotonic time source and busy-wait delays
pub trait Clock {
    /// Free-running millisecond counter
    fn now_ms(&self) -> u32;

    /// Busy-wait for the given number of microseconds
    fn delay_us(&mut self, us: u32);

    /// Busy-wait for the given number of milliseconds
    fn delay_ms(&mut self, ms: u32) {
        for _ in 0..ms {
            self.delay_us(1_000);
        }
    }
}

impl<C: Clock + ?Sized> Clock for &mut C {
    fn now_ms(&self) -> u32 {
        (**self).now_ms()
    }

    fn delay_us(&mut self, us: u32) {
        (**self).delay_us(us)
    }

    fn delay_ms(&mut self, ms: u32) {
        (**self).delay_ms(ms)
    }
}

/// Returns true if `a` is later than `b` on the wrapping counter
pub const fn time_after(a: u32, b: u32) -> bool {
    (b.wrapping_sub(a) as i32) < 0
}

/// A point in time after which a wait gives up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: u32,
}

impl Deadline {
    /// Deadline `timeout_ms` after `now`
    pub const fn after(now: u32, timeout_ms: u32) -> Self {
        Self {
            at: now.wrapping_add(timeout_ms),
        }
    }

    /// Deadline `timeout_ms` from the clock's current reading
    pub fn start<C: Clock + ?Sized>(clock: &C, timeout_ms: u32) -> Self {
        Self::after(clock.now_ms(), timeout_ms)
    }

    /// Check whether the deadline has been reached at `now`
    pub const fn expired_at(&self, now: u32) -> bool {
        !time_after(self.at, now)
    }

    /// Check whether the deadline has been reached
    pub fn expired<C: Clock + ?Sized>(&self, clock: &C) -> bool {
        self.expired_at(clock.now_ms())
    }

    /// Push the deadline out so at least `quantum_ms` remain after `now`
    ///
    /// Never moves the deadline earlier.
    pub const fn extend(&mut self, now: u32, quantum_ms: u32) {
        let floor = now.wrapping_add(quantum_ms);
        if time_after(floor, self.at) {
            self.at = floor;
        }
    }

    /// The counter value at which the deadline fires
    pub const fn at(&self) -> u32 {
        self.at
    }
}

/// Busy-poll `f` until it yields a value, the deadline passes, or `abort` fires
pub fn poll_until<C, T, F>(clock: &C, deadline: Deadline, abort: &dyn Abort, mut f: F) -> Option<T>
where
    C: Clock + ?Sized,
    F: FnMut() -> Option<T>,
{
    loop {
        if let Some(value) = f() {
            return Some(value);
        }
        if abort.aborted() || deadline.expired(clock) {
            return None;
        }
    }
}

/// Cooperative cancellation checked inside every busy-poll loop
pub trait Abort {
    /// Returns true once the caller wants the current operation to give up
    fn aborted(&self) -> bool;
}

/// Never aborts
impl Abort for () {
    fn aborted(&self) -> bool {
        false
    }
}

impl Abort for core::sync::atomic::AtomicBool {
    fn aborted(&self) -> bool {
        self.load(core::sync::atomic::Ordering::Relaxed)
    }
}

impl<A: Abort + ?Sized> Abort for &A {
    fn aborted(&self) -> bool {
        (**self).aborted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicBool;

    #[test]
    fn test_time_after_wraps() {
        assert!(time_after(5, 3));
        assert!(!time_after(3, 5));
        assert!(time_after(2, u32::MAX - 2));
        assert!(!time_after(u32::MAX - 2, 2));
    }

    #[test]
    fn test_deadline_across_overflow() {
        let deadline = Deadline::after(u32::MAX - 5, 10);
        assert_eq!(deadline.at(), 4);
        assert!(!deadline.expired_at(u32::MAX));
        assert!(!deadline.expired_at(3));
        assert!(deadline.expired_at(4));
        assert!(deadline.expired_at(100));
    }

    #[test]
    fn test_deadline_extend_never_shrinks() {
        let mut deadline = Deadline::after(0, 1000);
        deadline.extend(100, 10);
        assert_eq!(deadline.at(), 1000);

        deadline.extend(995, 10);
        assert_eq!(deadline.at(), 1005);
    }

    #[test]
    fn test_abort_signals() {
        assert!(!().aborted());
        let flag = AtomicBool::new(false);
        assert!(!(&flag).aborted());
        flag.store(true, core::sync::atomic::Ordering::Relaxed);
        assert!(flag.aborted());
    }
}
