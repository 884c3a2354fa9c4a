//! Nullable clock — deterministic time for testing.

use shoal_types::Clock;
use std::sync::atomic::{AtomicU64, Ordering};

/// A deterministic clock for testing.
///
/// Time only advances when you tell it to. Shared between the test and the
/// node under test behind an `Arc`.
#[derive(Debug, Default)]
pub struct NullClock {
    current_ms: AtomicU64,
}

impl NullClock {
    pub fn new(initial_ms: u64) -> Self {
        Self {
            current_ms: AtomicU64::new(initial_ms),
        }
    }

    /// Start at whole seconds.
    pub fn at_secs(secs: u64) -> Self {
        Self::new(secs.saturating_mul(1000))
    }

    /// Advance time by a number of milliseconds.
    pub fn advance(&self, ms: u64) {
        self.current_ms.fetch_add(ms, Ordering::SeqCst);
    }

    /// Set the time to a specific value.
    pub fn set(&self, ms: u64) {
        self.current_ms.store(ms, Ordering::SeqCst);
    }
}

impl Clock for NullClock {
    fn now_ms(&self) -> u64 {
        self.current_ms.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_moves_only_when_told() {
        let clock = NullClock::at_secs(1_000);
        assert_eq!(clock.now_ms(), 1_000_000);
        assert_eq!(clock.now().as_secs(), 1_000);
        clock.advance(1_500);
        assert_eq!(clock.now_ms(), 1_001_500);
        assert_eq!(clock.now().as_secs(), 1_001);
        clock.set(5);
        assert_eq!(clock.now_ms(), 5);
    }
}
