//! Time types used by waits and callouts
//!
//! All framework time is a monotonic nanosecond count provided by
//! [`Platform::now`](crate::platform::Platform::now). [`Timestamp`] is a point
//! on that clock, [`Duration`] a signed distance between two points and
//! [`Deadline`] the argument of a wait call.
//!
//! The clock is unsigned and durations are signed, so all mixed arithmetic
//! splits a duration into direction and magnitude and shifts the clock value
//! with checked unsigned operations. Leaving the representable range is a
//! programming error and panics.

use core::ops::{Add, Sub};

/// A point on the platform's monotonic clock, in nanoseconds.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Create a new timestamp
    pub const fn new(t: u64) -> Self {
        Self(t)
    }

    /// convert the timestamp to a u64
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for Timestamp {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

impl From<Timestamp> for u64 {
    fn from(value: Timestamp) -> Self {
        value.as_u64()
    }
}

impl Sub<Timestamp> for Timestamp {
    type Output = Duration;

    /// The signed distance from `rhs` to `self`.
    fn sub(self, rhs: Timestamp) -> Duration {
        let magnitude: i64 = self
            .0
            .abs_diff(rhs.0)
            .try_into()
            .expect("time difference does not fit within i64 nanoseconds");
        if self.0 < rhs.0 {
            Duration(-magnitude)
        } else {
            Duration(magnitude)
        }
    }
}

/// A signed distance between two [`Timestamp`]s, in nanoseconds.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Duration(i64);

impl Duration {
    /// create a new duration
    pub const fn new(t: i64) -> Self {
        Self(t)
    }

    /// a duration of `micros` microseconds
    pub const fn from_micros(micros: i64) -> Self {
        Self(micros * 1_000)
    }

    /// a duration of `millis` milliseconds
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis * 1_000_000)
    }

    /// a duration of `secs` seconds
    pub const fn from_secs(secs: i64) -> Self {
        Self(secs * 1_000_000_000)
    }

    /// convert the duration to an i64
    pub const fn as_i64(self) -> i64 {
        self.0
    }

    /// How far this duration moves a clock value, as a direction and an
    /// unsigned magnitude.
    const fn split(self) -> (bool, u64) {
        (self.0 < 0, self.0.unsigned_abs())
    }
}

impl From<i64> for Duration {
    fn from(value: i64) -> Self {
        Self::new(value)
    }
}

impl From<Duration> for i64 {
    fn from(value: Duration) -> Self {
        value.as_i64()
    }
}

impl Add<Duration> for Duration {
    type Output = Duration;

    fn add(self, rhs: Duration) -> Self::Output {
        match self.0.checked_add(rhs.0) {
            Some(total) => Self(total),
            None => panic!("duration arithmetic overflowed"),
        }
    }
}

impl Sub<Duration> for Duration {
    type Output = Duration;

    fn sub(self, rhs: Duration) -> Self::Output {
        match self.0.checked_sub(rhs.0) {
            Some(total) => Self(total),
            None => panic!("duration arithmetic overflowed"),
        }
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Self::Output {
        let (backwards, magnitude) = rhs.split();
        let shifted = if backwards {
            self.0.checked_sub(magnitude)
        } else {
            self.0.checked_add(magnitude)
        };
        Self(shifted.expect("timestamp shifted outside the clock's range"))
    }
}

impl Sub<Duration> for Timestamp {
    type Output = Timestamp;

    fn sub(self, rhs: Duration) -> Self::Output {
        let (backwards, magnitude) = rhs.split();
        let shifted = if backwards {
            self.0.checked_add(magnitude)
        } else {
            self.0.checked_sub(magnitude)
        };
        Self(shifted.expect("timestamp shifted outside the clock's range"))
    }
}

/// When a wait call gives up on its own.
///
/// An absolute deadline is measured against the same clock the callout
/// subsystem uses, so a timed wait and its hidden timeout callout agree on
/// "now".
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    /// Do not block: report what is ready right now or fail with
    /// [`WaitError::WouldBlock`](crate::error::WaitError::WouldBlock).
    Poll,
    /// Block until the clock reaches the given point.
    At(Timestamp),
    /// Block until an object in the wait set is satisfied, however long
    /// that takes.
    #[default]
    Forever,
}

impl Deadline {
    /// `true` if this deadline never expires
    pub const fn is_forever(self) -> bool {
        matches!(self, Deadline::Forever)
    }

    /// the absolute expiry, if there is one
    pub const fn expiry(self) -> Option<Timestamp> {
        match self {
            Deadline::At(t) => Some(t),
            _ => None,
        }
    }
}
