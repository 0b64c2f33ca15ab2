//! Virtual Clock
//!
//! Logical time for the scheduler. A [`Step`] is a signed duration, an
//! [`Instant`] is a point reached by accumulating steps from zero. The
//! [`VirtualClock`] only ever moves forward and never consults wall time.

use parking_lot::Mutex;
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Sub};
use std::sync::Arc;

/// A logical duration. Arithmetic saturates at the `i64` bounds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Step(pub i64);

impl Step {
    pub const ZERO: Step = Step(0);
    pub const ONE: Step = Step(1);

    /// The raw number of steps.
    pub fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for Step {
    fn from(n: i64) -> Self {
        Step(n)
    }
}

impl From<i32> for Step {
    fn from(n: i32) -> Self {
        Step(i64::from(n))
    }
}

impl From<u32> for Step {
    fn from(n: u32) -> Self {
        Step(i64::from(n))
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add for Step {
    type Output = Step;

    fn add(self, rhs: Step) -> Step {
        Step(self.0.saturating_add(rhs.0))
    }
}

impl Sub for Step {
    type Output = Step;

    fn sub(self, rhs: Step) -> Step {
        Step(self.0.saturating_sub(rhs.0))
    }
}

impl Mul<i64> for Step {
    type Output = Step;

    fn mul(self, rhs: i64) -> Step {
        Step(self.0.saturating_mul(rhs))
    }
}

/// A point in virtual time, measured in steps since zero.
///
/// `Instant::MAX` is the last representable instant; stepping past it stays
/// there.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Instant(i64);

impl Instant {
    pub const ZERO: Instant = Instant(0);
    pub const MAX: Instant = Instant(i64::MAX);

    /// The instant reached after `step` from zero.
    pub fn at(step: Step) -> Self {
        Instant::ZERO + step
    }

    /// Steps elapsed since zero.
    pub fn ticks(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

impl Add<Step> for Instant {
    type Output = Instant;

    fn add(self, rhs: Step) -> Instant {
        Instant(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign<Step> for Instant {
    fn add_assign(&mut self, rhs: Step) {
        *self = *self + rhs;
    }
}

impl Sub for Instant {
    type Output = Step;

    fn sub(self, rhs: Instant) -> Step {
        Step(self.0.saturating_sub(rhs.0))
    }
}

impl PartialEq<i64> for Instant {
    fn eq(&self, other: &i64) -> bool {
        self.0 == *other
    }
}

/// Monotonic logical clock.
#[derive(Debug, Default)]
pub struct VirtualClock {
    now: Instant,
}

impl VirtualClock {
    /// A clock at `Instant::ZERO`.
    pub fn new() -> Self {
        Self::default()
    }

    /// The current instant.
    pub fn now(&self) -> Instant {
        self.now
    }

    /// Move forward by `by`. Negative steps are ignored and `Instant::MAX`
    /// is never passed.
    pub fn advance(&mut self, by: Step) {
        if by > Step::ZERO {
            self.now += by;
        }
    }

    /// Move forward to `to` if it is later than `now`.
    pub fn advance_to(&mut self, to: Instant) {
        self.now = self.now.max(to);
    }
}

/// Read-only view of a group's clock, handed to operations.
#[derive(Clone)]
pub struct ClockReader {
    now: Arc<dyn Fn() -> Instant + Send + Sync>,
}

impl ClockReader {
    pub(crate) fn new<S>(state: Arc<Mutex<S>>, read: fn(&S) -> Instant) -> Self
    where
        S: Send + 'static,
    {
        Self {
            now: Arc::new(move || read(&state.lock())),
        }
    }

    /// Current logical instant of the group.
    pub fn now(&self) -> Instant {
        (self.now)()
    }
}

impl fmt::Debug for ClockReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClockReader").field("now", &self.now()).finish()
    }
}
