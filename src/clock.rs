//! Timestamp sources for the rate estimator (§4.4).

use std::time::{SystemTime, UNIX_EPOCH};

/// A source of timestamps, abstracted so tests can inject a controllable clock.
pub trait Clock: Send + Sync + 'static {
    /// Current timestamp in microseconds since an arbitrary but monotonic epoch.
    fn now_micros(&self) -> u64;
}

/// The default clock: wall-clock time via `SystemTime`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_micros(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time before UNIX epoch")
            .as_micros() as u64
    }
}

/// A faster, monotonic clock anchored to wall-clock time at construction,
/// backed by the CPU timestamp counter via `quanta`. Avoids NTP-induced
/// backward jumps, at the cost of losing absolute accuracy across long runs.
#[derive(Debug, Clone)]
pub struct QuantaClock {
    clock: quanta::Clock,
    start_wall_micros: u64,
    start_instant: quanta::Instant,
}

impl Default for QuantaClock {
    fn default() -> Self {
        let clock = quanta::Clock::new();
        let start_instant = clock.now();
        let start_wall_micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time before UNIX epoch")
            .as_micros() as u64;
        Self {
            clock,
            start_wall_micros,
            start_instant,
        }
    }
}

impl Clock for QuantaClock {
    fn now_micros(&self) -> u64 {
        let delta = self.clock.now().duration_since(self.start_instant);
        self.start_wall_micros + delta.as_micros() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_advances() {
        let clock = SystemClock;
        let a = clock.now_micros();
        std::thread::sleep(std::time::Duration::from_micros(50));
        let b = clock.now_micros();
        assert!(b >= a);
    }
}
