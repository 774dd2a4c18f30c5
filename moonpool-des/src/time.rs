//! Simulated time.
//!
//! Time is an abstract, non-negative real value: one unit means whatever the
//! model author decides (a second, a minute, a tick). It advances only when
//! the kernel pops an event, never from wall-clock observation.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SimulationError;

/// A point on the simulated timeline.
///
/// Always finite and non-negative, which lets it carry a total order even
/// though it wraps an `f64`. Deserialization enforces the same bounds.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct SimTime(f64);

impl SimTime {
    /// The zero-point of simulated time.
    pub const ZERO: SimTime = SimTime(0.0);

    /// Wrap a raw value, returning `None` if it is negative or not finite.
    pub fn from_f64(value: f64) -> Option<Self> {
        if value.is_finite() && value >= 0.0 {
            // Normalise -0.0 so equality and hashing agree with ordering.
            Some(SimTime(value + 0.0))
        } else {
            None
        }
    }

    /// Return the raw value.
    #[inline]
    pub fn as_f64(self) -> f64 {
        self.0
    }

    /// The point `delay` units after `self`.
    ///
    /// Returns `None` if `delay` is negative or not finite, or if the sum
    /// overflows to infinity.
    pub fn after(self, delay: f64) -> Option<SimTime> {
        if !delay.is_finite() || delay < 0.0 {
            return None;
        }
        SimTime::from_f64(self.0 + delay)
    }

    /// Elapsed time between `earlier` and `self`, or `None` if `earlier` is later.
    pub fn since(self, earlier: SimTime) -> Option<f64> {
        if earlier <= self {
            Some(self.0 - earlier.0)
        } else {
            None
        }
    }
}

impl TryFrom<f64> for SimTime {
    type Error = SimulationError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        SimTime::from_f64(value).ok_or(SimulationError::InvalidTime(value))
    }
}

impl From<SimTime> for f64 {
    fn from(time: SimTime) -> f64 {
        time.0
    }
}

impl PartialEq for SimTime {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SimTime {}

impl PartialOrd for SimTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SimTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl PartialEq<f64> for SimTime {
    fn eq(&self, other: &f64) -> bool {
        self.0 == *other
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t={}", self.0)
    }
}
