//! scoreflow-core - Score types and constraint identity for scoreflow
//!
//! This crate provides the small vocabulary shared by everything that sits
//! on top of the propagation network:
//! - Score types for representing solution quality
//! - Constraint identity and impact direction

pub mod constraint;
pub mod score;

pub use constraint::{ConstraintRef, ImpactType};
pub use score::{HardSoftScore, ParseableScore, Score, ScoreParseError, SimpleScore};
