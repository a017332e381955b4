//! Incremental constraint-scoring propagation network.
//!
//! Constraints are declared as streams of fact tuples (filter, map, join,
//! group, existence checks) terminated by penalize/reward sinks. The built
//! [`Network`] keeps every intermediate result alive between evaluations,
//! so changing one fact re-scores in time proportional to what that fact
//! touches rather than to the problem size.
//!
//! # Example
//!
//! ```
//! use scoreflow_core::{ConstraintRef, SimpleScore};
//! use scoreflow_network::{Fact, FactAccess, NetworkBuilder};
//!
//! let mut builder = NetworkBuilder::<SimpleScore>::new();
//! let hours = builder.for_each::<i64>();
//! let overloaded = builder.filter(hours, |facts| *facts.get_as::<i64>(0) > 8);
//! builder.penalize(
//!     overloaded,
//!     ConstraintRef::new("demo", "Overloaded shift"),
//!     SimpleScore::ONE,
//! );
//! let mut network = builder.build()?;
//!
//! let long_shift = Fact::new(9i64);
//! network.insert(&long_shift)?;
//! assert_eq!(network.settle()?, SimpleScore::of(-1));
//!
//! network.retract(&long_shift)?;
//! assert_eq!(network.settle()?, SimpleScore::ZERO);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! The network is single-threaded by design; facts and user closures are
//! shared with [`std::rc::Rc`], never across threads.

pub mod builder;
pub mod collector;
pub mod error;
pub mod fact;
pub mod key;
pub mod network;
pub mod tuple;

mod index;
mod node;
mod queue;

pub use builder::{JoinSpec, NetworkBuilder, StreamId};
pub use collector::{
    average, count, custom, max_i64, min_i64, sum_f64, sum_i64, CollectorSpec, CustomCollector,
    ValueFn,
};
pub use error::{BuildError, PropagationError};
pub use fact::{Fact, FactAccess};
pub use key::IndexKey;
pub use network::Network;
pub use node::scorer::ConstraintMatch;
pub use tuple::{FactVec, TupleState};

#[cfg(test)]
mod equivalence_tests;
#[cfg(test)]
mod network_tests;
