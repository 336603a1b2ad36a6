use hermes_core::Timestamp;

/// Time source for the engine
///
/// Gap timeouts are measured against it, so tests can freeze or step time
/// without waiting on the wall clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;

    /// Label used in logs
    fn name(&self) -> &str {
        "clock"
    }
}
