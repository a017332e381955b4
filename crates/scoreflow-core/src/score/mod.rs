//! Score types.
//!
//! A score is an immutable, totally ordered measure of solution quality.
//! The network only ever adds and subtracts scores, so the trait surface
//! stays small: arithmetic, feasibility and level introspection.

mod hard_soft;
mod simple;
mod traits;

pub use hard_soft::HardSoftScore;
pub use simple::SimpleScore;
pub use traits::{ParseableScore, Score, ScoreParseError};
