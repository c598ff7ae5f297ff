use std::fmt::Debug;
use std::time::Instant;

use crate::Timestamp;

/// A monotonic source of timestamps for allocation records and sampling.
#[cfg_attr(test, mockall::automock)]
pub trait Clock: Debug + Send + Sync {
    /// The current time in nanoseconds. Never goes backwards.
    fn now(&self) -> Timestamp;
}

/// Nanoseconds elapsed since the clock was created.
///
/// This is the clock a [`Tracker`][crate::Tracker] uses unless another one is configured.
#[derive(Clone, Copy, Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Creates a clock that starts counting from zero now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Timestamp {
        // u64 nanoseconds last for centuries, so saturation is a formality.
        u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}
