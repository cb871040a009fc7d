//! Cancellation of blocking waits.
//!
//! Blocking operations poll a [`Cancellation`] between attempts. A wait can
//! be aborted from another context with a [`CancelToken`], bounded in time
//! with a [`Deadline`], or left unbounded with [`Never`].

use core::sync::atomic::{AtomicBool, Ordering};

use crate::cpu::time::Clock;

/// Source of cancellation for a blocking wait.
pub trait Cancellation {
    /// Returns true if the wait must stop.
    fn is_cancelled(&self) -> bool;
}

/// Never cancels.
#[derive(Debug, Copy, Clone, Default)]
pub struct Never;

impl Cancellation for Never {
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Cancellation flag that can be raised from an interrupt handler or another
/// task.
#[derive(Debug, Default)]
pub struct CancelToken(AtomicBool);

impl CancelToken {
    /// Returns a new token that is not cancelled.
    pub const fn new() -> CancelToken {
        CancelToken(AtomicBool::new(false))
    }

    /// Cancels every wait observing this token.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Rearms the token.
    pub fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Cancellation for CancelToken {
    fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Cancels once `ticks` clock ticks have elapsed since creation.
///
/// The elapsed time is computed with wrapping arithmetic, so a deadline
/// survives one wrap of the counter. It must be shorter than the counter
/// period.
pub struct Deadline<'a, C: Clock> {
    clock: &'a C,
    start: u32,
    ticks: u32,
}

impl<'a, C: Clock> Deadline<'a, C> {
    /// Returns a deadline `ticks` ticks from now.
    pub fn after(clock: &'a C, ticks: u32) -> Deadline<'a, C> {
        Deadline {
            clock,
            start: clock.now(),
            ticks,
        }
    }
}

impl<C: Clock> Cancellation for Deadline<'_, C> {
    fn is_cancelled(&self) -> bool {
        self.clock.now().wrapping_sub(self.start) >= self.ticks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use core::sync::atomic::AtomicU32;

    struct FakeClock(AtomicU32);

    impl Clock for FakeClock {
        fn now(&self) -> u32 {
            self.0.load(Ordering::Relaxed)
        }
    }

    #[test]
    fn token() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
        token.reset();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn deadline_across_counter_wrap() {
        let clock = FakeClock(AtomicU32::new(u32::MAX - 10));
        let deadline = Deadline::after(&clock, 100);

        clock.0.store(50, Ordering::Relaxed);
        assert!(!deadline.is_cancelled());

        clock.0.store(89, Ordering::Relaxed);
        assert!(deadline.is_cancelled());
    }
}
