//! Deterministic clocks.

use mirrordb_engine::Clock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A clock that only moves when told to.
///
/// Clones share the same time, so two engines built from clones of one
/// `ManualClock` see each other's heartbeats at exactly the ages a test
/// sets up.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    millis: Arc<AtomicU64>,
}

impl ManualClock {
    /// Creates a clock reading `millis`.
    pub fn new(millis: u64) -> Self {
        Self {
            millis: Arc::new(AtomicU64::new(millis)),
        }
    }

    /// Sets the time.
    pub fn set(&self, millis: u64) {
        self.millis.store(millis, Ordering::SeqCst);
    }

    /// Moves the time forward.
    pub fn advance(&self, by: Duration) {
        self.millis
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

/// A wall clock driven by tokio's time, so `tokio::time::pause` and
/// `advance` move it along with timers.
#[derive(Debug, Clone)]
pub struct PausedClock {
    base: u64,
    origin: tokio::time::Instant,
}

impl PausedClock {
    /// Creates a clock reading `base` millis now.
    pub fn new(base: u64) -> Self {
        Self {
            base,
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Clock for PausedClock {
    fn now_millis(&self) -> u64 {
        self.base + self.origin.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_is_shared() {
        let clock = ManualClock::new(1_000);
        let other = clock.clone();
        clock.advance(Duration::from_millis(250));
        assert_eq!(other.now_millis(), 1_250);
        other.set(5);
        assert_eq!(clock.now_millis(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn paused_clock_follows_tokio_time() {
        let clock = PausedClock::new(10_000);
        tokio::time::advance(Duration::from_millis(700)).await;
        assert_eq!(clock.now_millis(), 10_700);
    }
}
