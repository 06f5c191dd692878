//! Monotonic time source abstraction.
//!
//! The cadence logic never reads wall-clock time directly; it goes through
//! the [`Clock`] trait so tests can drive it on simulated time (see
//! [`crate::testing::SimulatedClock`]).

use std::ops::{Add, AddAssign, Sub};
use std::time::{Duration, Instant};

/// A monotonic point in time with microsecond resolution.
///
/// Timestamps are relative to an arbitrary epoch (for [`SystemClock`], the
/// clock's construction). Only differences between timestamps from the same
/// clock are meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp {
    us: i64,
}

impl Timestamp {
    /// Construct from microseconds since the clock epoch.
    pub fn from_micros(us: i64) -> Self {
        Self { us }
    }

    /// Construct from milliseconds since the clock epoch.
    pub fn from_millis(ms: i64) -> Self {
        Self { us: ms * 1_000 }
    }

    /// Microseconds since the clock epoch.
    pub fn as_micros(self) -> i64 {
        self.us
    }

    /// Milliseconds since the clock epoch, truncated.
    pub fn as_millis(self) -> i64 {
        self.us / 1_000
    }

    /// Saturating difference to an earlier timestamp.
    pub fn duration_since(self, earlier: Timestamp) -> Duration {
        Duration::from_micros(self.us.saturating_sub(earlier.us).max(0) as u64)
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Timestamp {
        Timestamp {
            us: self.us + rhs.as_micros() as i64,
        }
    }
}

impl AddAssign<Duration> for Timestamp {
    fn add_assign(&mut self, rhs: Duration) {
        self.us += rhs.as_micros() as i64;
    }
}

impl Sub<Timestamp> for Timestamp {
    type Output = Duration;

    fn sub(self, rhs: Timestamp) -> Duration {
        self.duration_since(rhs)
    }
}

/// Monotonic time source.
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> Timestamp;

    /// Current time in milliseconds since the clock epoch.
    fn now_ms(&self) -> i64 {
        self.now().as_millis()
    }

    /// Current time in microseconds since the clock epoch.
    fn now_us(&self) -> i64 {
        self.now().as_micros()
    }
}

/// Production clock anchored to [`Instant`].
///
/// Guaranteed monotonic; unaffected by wall-clock adjustments.
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Create a clock whose epoch is the moment of construction.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_micros(self.origin.elapsed().as_micros() as i64)
    }
}
