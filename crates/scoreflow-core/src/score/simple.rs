//! SimpleScore - single-level score.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Neg, Sub};

use super::traits::{ParseableScore, Score, ScoreParseError};

/// A score with a single integer level.
///
/// The simplest score type, useful when there is only one kind of
/// constraint to optimize.
///
/// # Examples
///
/// ```
/// use scoreflow_core::{Score, SimpleScore};
///
/// let worse = SimpleScore::of(-5);
/// let better = SimpleScore::of(-3);
///
/// assert!(better > worse);
/// assert!(!worse.is_feasible());
/// assert_eq!(worse + better, SimpleScore::of(-8));
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SimpleScore {
    value: i64,
}

impl SimpleScore {
    /// The zero score.
    pub const ZERO: SimpleScore = SimpleScore { value: 0 };

    /// A score of one.
    pub const ONE: SimpleScore = SimpleScore { value: 1 };

    /// Creates a new score with the given value.
    #[inline]
    pub const fn of(value: i64) -> Self {
        SimpleScore { value }
    }

    /// Returns the score value.
    #[inline]
    pub const fn value(&self) -> i64 {
        self.value
    }
}

impl Score for SimpleScore {
    #[inline]
    fn zero() -> Self {
        SimpleScore::ZERO
    }

    #[inline]
    fn is_feasible(&self) -> bool {
        self.value >= 0
    }

    #[inline]
    fn levels_count() -> usize {
        1
    }

    fn to_level_numbers(&self) -> Vec<i64> {
        vec![self.value]
    }
}

impl Ord for SimpleScore {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value.cmp(&other.value)
    }
}

impl PartialOrd for SimpleScore {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Add for SimpleScore {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        SimpleScore::of(self.value + other.value)
    }
}

impl Sub for SimpleScore {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        SimpleScore::of(self.value - other.value)
    }
}

impl Neg for SimpleScore {
    type Output = Self;

    fn neg(self) -> Self {
        SimpleScore::of(-self.value)
    }
}

impl fmt::Debug for SimpleScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SimpleScore({})", self.value)
    }
}

impl fmt::Display for SimpleScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl ParseableScore for SimpleScore {
    fn parse(s: &str) -> Result<Self, ScoreParseError> {
        s.trim()
            .parse::<i64>()
            .map(SimpleScore::of)
            .map_err(|e| ScoreParseError::new(s, e.to_string()))
    }
}

impl From<i64> for SimpleScore {
    fn from(value: i64) -> Self {
        SimpleScore::of(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feasibility() {
        assert!(SimpleScore::of(0).is_feasible());
        assert!(SimpleScore::of(7).is_feasible());
        assert!(!SimpleScore::of(-1).is_feasible());
    }

    #[test]
    fn test_ordering() {
        assert!(SimpleScore::of(0) > SimpleScore::of(-5));
        assert!(SimpleScore::of(-10) < SimpleScore::of(-5));
    }

    #[test]
    fn test_arithmetic() {
        let a = SimpleScore::of(10);
        let b = SimpleScore::of(3);
        assert_eq!(a + b, SimpleScore::of(13));
        assert_eq!(a - b, SimpleScore::of(7));
        assert_eq!(-a, SimpleScore::of(-10));
    }

    #[test]
    fn test_parse() {
        assert_eq!(SimpleScore::parse("42").unwrap(), SimpleScore::of(42));
        assert_eq!(SimpleScore::parse(" -10 ").unwrap(), SimpleScore::of(-10));
        assert!(SimpleScore::parse("ten").is_err());
    }

    #[test]
    fn test_level_numbers() {
        assert_eq!(SimpleScore::levels_count(), 1);
        assert_eq!(SimpleScore::of(-5).to_level_numbers(), vec![-5]);
    }
}
