//! Time source used by blocking retry loops.

use std::time::{Duration, Instant};

/// Monotonic time source with a blocking sleep.
///
/// Retry loops take a clock instead of calling [`std::thread::sleep`]
/// directly so tests can advance virtual time without real delays.
pub trait Clock {
    /// Returns the current instant.
    fn now(&self) -> Instant;

    /// Blocks the calling thread for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Wall-clock implementation backed by the standard library.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
