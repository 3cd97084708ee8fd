// Clock port: every timestamp the engine writes comes from here

/// Wall clock in epoch milliseconds
///
/// Job timestamps, claim deadlines and delay due times all use this unit, so a
/// fake clock (see `mocks::ManualClock`) can drive stall and delay sweeps in tests.
pub trait TimeProvider: Send + Sync {
    fn now_millis(&self) -> i64;
}

/// Reads `chrono::Utc::now()`
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}
