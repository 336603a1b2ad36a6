use chrono::Duration;
use hermes_core::Timestamp;
use hermes_ports::Clock;
use parking_lot::RwLock;

/// Clock that only moves when explicitly advanced
///
/// Shared behind an `Arc` between a test and the component under test so
/// timestamps are deterministic.
#[derive(Debug)]
pub struct ManualClock {
    current: RwLock<Timestamp>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        ManualClock {
            current: RwLock::new(start),
        }
    }

    pub fn advance(&self, duration: Duration) {
        *self.current.write() += duration;
    }

    /// Jump to an absolute time; may move backwards
    pub fn set(&self, time: Timestamp) {
        *self.current.write() = time;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.current.read()
    }

    fn name(&self) -> &str {
        "manual"
    }
}
