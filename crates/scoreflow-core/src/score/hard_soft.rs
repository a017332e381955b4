//! HardSoftScore - two-level score.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Neg, Sub};

use super::traits::{ParseableScore, Score, ScoreParseError};

/// A score with a hard and a soft level.
///
/// Hard constraints must not be broken (a negative hard level makes the
/// solution infeasible); soft constraints are optimization objectives.
/// Comparison is lexicographic: hard first, then soft.
///
/// # Examples
///
/// ```
/// use scoreflow_core::{HardSoftScore, Score};
///
/// let broken = HardSoftScore::of(-1, 0);
/// let costly = HardSoftScore::of(0, -999);
///
/// // Any hard break is worse than any soft cost.
/// assert!(costly > broken);
/// assert!(costly.is_feasible());
/// assert!(!broken.is_feasible());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HardSoftScore {
    hard: i64,
    soft: i64,
}

impl HardSoftScore {
    /// The zero score.
    pub const ZERO: HardSoftScore = HardSoftScore { hard: 0, soft: 0 };

    /// Creates a new score with the given hard and soft values.
    #[inline]
    pub const fn of(hard: i64, soft: i64) -> Self {
        HardSoftScore { hard, soft }
    }

    /// Creates a hard-only score.
    #[inline]
    pub const fn of_hard(hard: i64) -> Self {
        HardSoftScore { hard, soft: 0 }
    }

    /// Creates a soft-only score.
    #[inline]
    pub const fn of_soft(soft: i64) -> Self {
        HardSoftScore { hard: 0, soft }
    }

    /// Returns the hard level.
    #[inline]
    pub const fn hard(&self) -> i64 {
        self.hard
    }

    /// Returns the soft level.
    #[inline]
    pub const fn soft(&self) -> i64 {
        self.soft
    }
}

impl Score for HardSoftScore {
    #[inline]
    fn zero() -> Self {
        HardSoftScore::ZERO
    }

    #[inline]
    fn is_feasible(&self) -> bool {
        self.hard >= 0
    }

    #[inline]
    fn levels_count() -> usize {
        2
    }

    fn to_level_numbers(&self) -> Vec<i64> {
        vec![self.hard, self.soft]
    }
}

impl Ord for HardSoftScore {
    fn cmp(&self, other: &Self) -> Ordering {
        self.hard
            .cmp(&other.hard)
            .then_with(|| self.soft.cmp(&other.soft))
    }
}

impl PartialOrd for HardSoftScore {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Add for HardSoftScore {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        HardSoftScore::of(self.hard + other.hard, self.soft + other.soft)
    }
}

impl Sub for HardSoftScore {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        HardSoftScore::of(self.hard - other.hard, self.soft - other.soft)
    }
}

impl Neg for HardSoftScore {
    type Output = Self;

    fn neg(self) -> Self {
        HardSoftScore::of(-self.hard, -self.soft)
    }
}

impl fmt::Debug for HardSoftScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HardSoftScore({}hard/{}soft)", self.hard, self.soft)
    }
}

impl fmt::Display for HardSoftScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}hard/{}soft", self.hard, self.soft)
    }
}

impl ParseableScore for HardSoftScore {
    fn parse(s: &str) -> Result<Self, ScoreParseError> {
        let trimmed = s.trim();
        let (hard_part, soft_part) = trimmed
            .split_once('/')
            .ok_or_else(|| ScoreParseError::new(s, "expected '<h>hard/<s>soft'"))?;
        let hard = hard_part
            .strip_suffix("hard")
            .ok_or_else(|| ScoreParseError::new(s, "missing 'hard' suffix"))?
            .parse::<i64>()
            .map_err(|e| ScoreParseError::new(s, e.to_string()))?;
        let soft = soft_part
            .strip_suffix("soft")
            .ok_or_else(|| ScoreParseError::new(s, "missing 'soft' suffix"))?
            .parse::<i64>()
            .map_err(|e| ScoreParseError::new(s, e.to_string()))?;
        Ok(HardSoftScore::of(hard, soft))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feasibility() {
        assert!(HardSoftScore::of(0, -100).is_feasible());
        assert!(!HardSoftScore::of(-1, 100).is_feasible());
    }

    #[test]
    fn test_lexicographic_ordering() {
        assert!(HardSoftScore::of(0, -999) > HardSoftScore::of(-1, 0));
        assert!(HardSoftScore::of(0, -1) > HardSoftScore::of(0, -2));
    }

    #[test]
    fn test_arithmetic() {
        let a = HardSoftScore::of(-1, -10);
        let b = HardSoftScore::of(-2, 3);
        assert_eq!(a + b, HardSoftScore::of(-3, -7));
        assert_eq!(a - b, HardSoftScore::of(1, -13));
        assert_eq!(-a, HardSoftScore::of(1, 10));
    }

    #[test]
    fn test_display_and_parse_round_trip() {
        let score = HardSoftScore::of(-2, 45);
        assert_eq!(score.to_string(), "-2hard/45soft");
        assert_eq!(HardSoftScore::parse("-2hard/45soft").unwrap(), score);
        assert!(HardSoftScore::parse("-2/45").is_err());
    }

    #[test]
    fn test_level_numbers() {
        assert_eq!(HardSoftScore::levels_count(), 2);
        assert_eq!(HardSoftScore::of(-1, 3).to_level_numbers(), vec![-1, 3]);
    }
}
