//! Sentinel Clock Infrastructure
//!
//! - [`SystemClock`]: wall-clock time for production
//! - [`ManualClock`]: frozen time that only moves when told to, for
//!   deterministic breaker, cache and idle-cleanup tests
//!
//! ## Usage
//!
//! ```ignore
//! use sentinel_clock::{Clock, ManualClock};
//! use chrono::Duration;
//!
//! let clock = ManualClock::new(None);
//! let t0 = clock.now();
//! clock.advance(Duration::minutes(31));
//! assert_eq!(clock.now() - t0, Duration::minutes(31));
//! ```

mod manual;
mod system;

pub use manual::ManualClock;
pub use system::SystemClock;

// Re-export the Clock trait for convenience
pub use sentinel_ports::Clock;
