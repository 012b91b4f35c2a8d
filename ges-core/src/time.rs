//! Virtual simulation time.

use serde::{Deserialize, Serialize};
use std::{
    cmp::Ordering,
    fmt::{self, Display},
};

/// A point on the simulated clock, in virtual seconds since the start of the
/// simulation.
///
/// `SimTime` is always finite and non-negative, which lets it be totally
/// ordered and used as the primary key of the scheduler's heap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SimTime(f64);

impl SimTime {
    /// The beginning of every simulation.
    pub const ZERO: SimTime = SimTime(0.0);

    /// Creates a time from a number of virtual seconds.
    ///
    /// # Panics
    ///
    /// Panics if `secs` is negative, NaN or infinite. Use
    /// [`try_from_secs`](Self::try_from_secs) for untrusted input.
    pub fn from_secs(secs: f64) -> Self {
        match Self::try_from_secs(secs) {
            Some(time) => time,
            None => panic!("SimTime must be finite and non-negative, got {secs}"),
        }
    }

    /// Creates a time from a number of virtual seconds, or `None` if `secs`
    /// is negative, NaN or infinite.
    pub fn try_from_secs(secs: f64) -> Option<Self> {
        if secs.is_finite() && secs >= 0.0 {
            // Normalizes -0.0 so equal times hash and compare identically.
            Some(Self(secs + 0.0))
        } else {
            None
        }
    }

    /// The number of virtual seconds since the start of the simulation.
    pub fn as_secs(self) -> f64 {
        self.0
    }

    /// Returns the time `delay` seconds after `self`, or `None` if the delay
    /// is negative or not finite.
    pub fn checked_add(self, delay: f64) -> Option<Self> {
        if !delay.is_finite() || delay < 0.0 {
            return None;
        }
        Self::try_from_secs(self.0 + delay)
    }

    /// The number of seconds from `earlier` to `self`, or `None` if `earlier`
    /// is later than `self`.
    pub fn duration_since(self, earlier: SimTime) -> Option<f64> {
        if earlier <= self {
            Some(self.0 - earlier.0)
        } else {
            None
        }
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

impl From<u32> for SimTime {
    fn from(secs: u32) -> Self {
        Self(secs as f64)
    }
}

impl Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_values() {
        assert!(SimTime::try_from_secs(-1.0).is_none());
        assert!(SimTime::try_from_secs(f64::NAN).is_none());
        assert!(SimTime::try_from_secs(f64::INFINITY).is_none());
        assert_eq!(SimTime::try_from_secs(-0.0), Some(SimTime::ZERO));
    }

    #[test]
    fn ordering_and_arithmetic() {
        let early = SimTime::from_secs(1.5);
        let late = early.checked_add(2.0).unwrap();
        assert!(early < late);
        assert_eq!(late.as_secs(), 3.5);
        assert_eq!(late.duration_since(early), Some(2.0));
        assert_eq!(early.duration_since(late), None);
        assert_eq!(early.checked_add(-0.1), None);
        assert_eq!(SimTime::from(7), SimTime::from_secs(7.0));
    }

    #[test]
    fn display() {
        assert_eq!(SimTime::from_secs(2.25).to_string(), "2.250s");
    }
}
