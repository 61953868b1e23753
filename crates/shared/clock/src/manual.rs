use chrono::{Duration, Utc};
use sentinel_core::Timestamp;
use sentinel_ports::Clock;
use std::sync::{Arc, RwLock};

/// Clock that stands still until advanced
///
/// Reads never block on an async runtime, so it can back the synchronous
/// [`Clock`] trait from any context.
pub struct ManualClock {
    current: RwLock<Timestamp>,
}

impl ManualClock {
    /// Create a clock frozen at `initial_time` (or now)
    pub fn new(initial_time: Option<Timestamp>) -> Arc<Self> {
        Arc::new(Self {
            current: RwLock::new(initial_time.unwrap_or_else(Utc::now)),
        })
    }

    /// Move time forward
    pub fn advance(&self, duration: Duration) {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        *current += duration;
    }

    /// Jump to an explicit time (may move backwards)
    pub fn set_time(&self, time: Timestamp) {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        *current = time;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.current.read().unwrap_or_else(|e| e.into_inner())
    }

    fn name(&self) -> &str {
        "ManualClock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_is_frozen_until_advanced() {
        let clock = ManualClock::new(None);
        let t1 = clock.now();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(clock.now(), t1);

        clock.advance(Duration::seconds(5));
        assert_eq!(clock.now() - t1, Duration::seconds(5));
    }

    #[test]
    fn test_set_time() {
        let clock = ManualClock::new(None);
        let target = clock.now() - Duration::hours(2);
        clock.set_time(target);
        assert_eq!(clock.now(), target);
    }
}
