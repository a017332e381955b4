//! Core Score trait definition.

use std::fmt::{Debug, Display};
use std::ops::{Add, Neg, Sub};

use thiserror::Error;

/// Core trait for all score types.
///
/// Scores represent the quality of a working solution. The propagation
/// network accumulates them per constraint and sums them on demand, so
/// implementations must be:
/// - Immutable (operations return new instances)
/// - Thread-safe (`Send + Sync`)
/// - Totally ordered (higher is better)
///
/// # Score levels
///
/// Scores can have multiple levels (e.g. hard/soft):
/// - Hard constraints must be satisfied for a solution to be feasible
/// - Soft constraints are optimization objectives
///
/// When comparing scores, higher-priority levels win first.
pub trait Score:
    Copy
    + Debug
    + Display
    + Default
    + Send
    + Sync
    + PartialEq
    + Eq
    + PartialOrd
    + Ord
    + Add<Output = Self>
    + Sub<Output = Self>
    + Neg<Output = Self>
    + 'static
{
    /// Returns the zero score (identity element for addition).
    fn zero() -> Self;

    /// Returns true if this score represents a feasible solution.
    ///
    /// A solution is feasible when all hard levels are `>= 0`.
    fn is_feasible(&self) -> bool;

    /// Returns the number of score levels.
    ///
    /// `SimpleScore` has 1 level, `HardSoftScore` has 2.
    fn levels_count() -> usize;

    /// Returns the score values per level, highest priority first.
    fn to_level_numbers(&self) -> Vec<i64>;
}

/// Scores that can round-trip through a string representation.
pub trait ParseableScore: Score {
    /// Parses a score from its display format.
    ///
    /// - `SimpleScore`: `"42"`
    /// - `HardSoftScore`: `"-1hard/-100soft"`
    fn parse(s: &str) -> Result<Self, ScoreParseError>;
}

/// Error when parsing a score from a string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid score '{input}': {reason}")]
pub struct ScoreParseError {
    /// The rejected input.
    pub input: String,
    /// Why it was rejected.
    pub reason: String,
}

impl ScoreParseError {
    pub(crate) fn new(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            reason: reason.into(),
        }
    }
}
