//! Hermes Clock Infrastructure
//!
//! Two time sources behind the `Clock` port:
//!
//! - `SystemClock` - wall-clock time for production
//! - `ManualClock` - frozen time that only moves when told to, for tests
//!
//! ```ignore
//! use hermes_clock::{Clock, ManualClock};
//! use chrono::Duration;
//!
//! let clock = ManualClock::new(start);
//! clock.advance(Duration::seconds(5));
//! assert_eq!(clock.now() - start, Duration::seconds(5));
//! ```

mod manual;
mod system;

pub use manual::ManualClock;
pub use system::SystemClock;

// Re-export the Clock trait for convenience
pub use hermes_ports::Clock;
