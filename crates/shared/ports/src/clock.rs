use sentinel_core::Timestamp;

/// Port for time abstraction
///
/// Every time-windowed decision (breaker windows, cooldowns, cache TTLs,
/// idle cleanup) reads time through this trait so tests can drive it.
pub trait Clock: Send + Sync {
    /// Get the current time according to this clock
    fn now(&self) -> Timestamp;

    /// Get the clock's name/identifier for debugging
    fn name(&self) -> &str {
        "Clock"
    }
}
