//! Injectable wall-clock, so every timestamp the worker writes is
//! deterministic under test.

use std::time::SystemTime;

/// Supplies the current time. Implementations must be cheap to call and
/// safe to share across worker threads.
pub trait Clock: Send + Sync {
    /// The current wall-clock time.
    fn now(&self) -> SystemTime;
}

/// The real system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// A clock that always returns a fixed instant, for deterministic tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub SystemTime);

impl FixedClock {
    /// A fixed clock pinned to the Unix epoch plus `secs` seconds.
    #[must_use]
    pub fn at_unix_secs(secs: u64) -> Self {
        Self(SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(secs))
    }
}

impl Clock for FixedClock {
    fn now(&self) -> SystemTime {
        self.0
    }
}
