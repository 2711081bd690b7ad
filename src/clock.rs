//! Time source for the control loop.
//!
//! Everything that waits or measures elapsed time goes through [`Clock`], so the
//! same firmware code runs against wall-clock time on a host and against a
//! [`ManualClock`] in tests, where sleeping simply advances a counter.

use std::cell::Cell;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

pub trait Clock {
    /// Monotonic time since the clock's origin.
    fn elapsed(&self) -> Duration;

    /// Blocks the caller. On the device this stalls the whole loop.
    fn sleep(&self, duration: Duration);

    /// Wall-clock seconds since the Unix epoch, used to stamp API payloads.
    fn unix_seconds(&self) -> u64;

    fn now_ms(&self) -> u64 {
        self.elapsed().as_millis() as u64
    }
}

#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }

    fn unix_seconds(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs())
    }
}

/// Deterministic clock for tests and fast simulation.
///
/// `sleep` advances time instantly. Busy-wait loops never sleep, they only poll
/// [`Clock::elapsed`], so a non-zero `auto_step` is needed whenever code under test
/// polls a pin against a timeout: every `elapsed()` call then moves time forward.
#[derive(Debug)]
pub struct ManualClock {
    now: Cell<Duration>,
    auto_step: Cell<Duration>,
    epoch_offset: u64,
}

impl ManualClock {
    pub const DEFAULT_EPOCH: u64 = 1_700_000_000;

    pub fn new() -> Self {
        Self {
            now: Cell::new(Duration::ZERO),
            auto_step: Cell::new(Duration::ZERO),
            epoch_offset: Self::DEFAULT_EPOCH,
        }
    }

    pub fn with_auto_step(step: Duration) -> Self {
        let clock = Self::new();
        clock.auto_step.set(step);
        clock
    }

    pub fn advance(&self, duration: Duration) {
        self.now.set(self.now.get() + duration);
    }

    pub fn set_auto_step(&self, step: Duration) {
        self.auto_step.set(step);
    }

    /// Current time without applying the auto step.
    pub fn peek(&self) -> Duration {
        self.now.get()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn elapsed(&self) -> Duration {
        let now = self.now.get();
        self.now.set(now + self.auto_step.get());
        now
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }

    fn unix_seconds(&self) -> u64 {
        self.epoch_offset + self.now.get().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_sleep_advances_time() {
        let clock = ManualClock::new();
        assert_eq!(clock.now_ms(), 0);
        clock.sleep(Duration::from_millis(1500));
        assert_eq!(clock.now_ms(), 1500);
        assert_eq!(clock.unix_seconds(), ManualClock::DEFAULT_EPOCH + 1);
    }

    #[test]
    fn test_manual_clock_auto_step() {
        let clock = ManualClock::with_auto_step(Duration::from_micros(10));
        let first = clock.elapsed();
        let second = clock.elapsed();
        assert_eq!(second - first, Duration::from_micros(10));
        assert_eq!(clock.peek(), Duration::from_micros(20));
    }
}
