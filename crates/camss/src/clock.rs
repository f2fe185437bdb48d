use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// A monotonic clock, measuring time in nanoseconds.
///
/// Completed buffers are stamped with `now_ns` as they leave the engine.  Clocks cannot go backward, so timestamps of
/// buffers completed in order never decrease.  Implementations are read from interrupt context and must neither block
/// nor allocate.
pub trait Clock: Send + Sync {
    fn now_ns(&self) -> u64;
}

/// A clock backed by [Instant], counting from its creation.
#[derive(Debug)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos().try_into().unwrap_or(u64::MAX)
    }
}

/// A clock which only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ns: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ns),
        }
    }

    /// Advance this clock.
    ///
    /// # Panics
    ///
    /// Panics in debug builds only if the increment is zero.
    pub fn advance(&self, increment_ns: u64) {
        debug_assert!(
            increment_ns != 0,
            "Attempt to advance a clock by no time at all"
        );
        self.now.fetch_add(increment_ns, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now_ns(&self) -> u64 {
        self.now.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_never_goes_back() {
        let clock = MonotonicClock::new();
        let mut last = clock.now_ns();
        for _ in 0..1000 {
            let now = clock.now_ns();
            assert!(now >= last);
            last = now;
        }
    }

    #[test]
    fn test_manual_advances() {
        let clock = ManualClock::new(5);
        assert_eq!(clock.now_ns(), 5);
        clock.advance(10);
        assert_eq!(clock.now_ns(), 15);
    }
}
