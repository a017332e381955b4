//! Error types for network construction and propagation.
//!
//! Two disjoint families, mirroring when they can occur:
//! - [`BuildError`]: the declarative graph description is malformed. Detected
//!   before any fact flows; the builder is simply corrected and re-run.
//! - [`PropagationError`]: a programming invariant of the network broke while
//!   settling. The settle pass aborts, the network is poisoned and must be
//!   rebuilt, never resumed.
//!
//! User-supplied functions (predicates, mappers, collectors, weighers) are
//! plain closures; a panic in one is caught at the settle dispatch site and
//! reported as [`PropagationError::UserFunctionPanic`] naming the node and
//! the tuple being handled, poisoning the network like any other
//! propagation failure.

use thiserror::Error;

use crate::tuple::TupleState;

/// A malformed node-graph description, reported at build time.
#[derive(Debug, Error)]
pub enum BuildError {
    /// A non-terminal stream is never fed into another node.
    #[error("stream produced by {node} is never consumed; every non-terminal stream feeds exactly one consumer")]
    DanglingStream { node: String },

    /// A stream was used as input more than once.
    #[error("stream produced by {node} is consumed {count} times; every stream feeds exactly one consumer")]
    StreamReused { node: String, count: usize },

    /// A node would produce tuples outside the supported 1..=4 arity range.
    #[error("{node} would produce tuples of arity {arity}; supported arities are 1 through 4")]
    ArityOutOfRange { node: String, arity: usize },

    /// The two inputs of a concat node have different shapes.
    #[error("concat inputs disagree on arity: left is {left}, right is {right}")]
    ConcatArityMismatch { left: usize, right: usize },

    /// The graph contains no terminal scoring node.
    #[error("network has no scoring node; nothing would ever be scored")]
    NoConstraints,

    /// Two scoring nodes share a constraint name.
    #[error("constraint '{0}' is defined twice")]
    DuplicateConstraint(String),

    /// A node references a downstream node that does not come later in
    /// dependency order. Cannot happen through the builder API; kept as a
    /// build-time assertion.
    #[error("{node} feeds {downstream}, which is not downstream of it")]
    DependencyOrderViolation { node: String, downstream: String },
}

/// A broken propagation invariant. Fatal: the settle pass aborts and the
/// network is poisoned.
#[derive(Debug, Error)]
pub enum PropagationError {
    /// An earlier settle pass failed; the network must be rebuilt.
    #[error("network is poisoned by an earlier propagation failure; rebuild it")]
    Poisoned,

    /// A fact of a type no entry node was declared for was supplied.
    #[error("no fact source registered for type {0}")]
    UnregisteredFactType(&'static str),

    /// Update/retract for a fact the source never saw inserted.
    #[error("{node}: fact of type {type_name} is not known to this source")]
    UnknownFact {
        node: String,
        type_name: &'static str,
    },

    /// Insert of a fact that is already live in the source.
    #[error("{node}: fact of type {type_name} was already inserted")]
    DuplicateFact {
        node: String,
        type_name: &'static str,
    },

    /// A tuple reached a lifecycle point its state forbids, e.g. an event
    /// for a DEAD tuple.
    #[error("{node}: tuple {tuple} is in impossible state {state:?}")]
    ImpossibleState {
        node: String,
        tuple: String,
        state: TupleState,
    },

    /// A store slot held something other than what the consuming node put
    /// there.
    #[error("{node}: store slot {slot} of tuple {tuple} holds {found}, expected {expected}")]
    SlotMismatch {
        node: String,
        tuple: String,
        slot: usize,
        expected: &'static str,
        found: &'static str,
    },

    /// A reference counter (group contributors, exists matches) went below
    /// zero.
    #[error("{node}: {counter} for tuple {tuple} dropped below zero")]
    CountUnderflow {
        node: String,
        tuple: String,
        counter: &'static str,
    },

    /// An undo action was invoked twice, or invoked without a prior apply.
    #[error("{node}: undo for tuple {tuple} applied twice")]
    DoubleUndo { node: String, tuple: String },

    /// An indexer was asked to remove a tuple it does not hold.
    #[error("{node}: indexer has no entry for tuple {tuple} under key {key}")]
    MissingIndexEntry {
        node: String,
        tuple: String,
        key: String,
    },

    /// A user-supplied function panicked while a node was handling a tuple.
    /// The panic is caught, wrapped here and never resumes propagation.
    #[error("{node}: user function panicked while handling tuple {tuple}: {message}")]
    UserFunctionPanic {
        node: String,
        tuple: String,
        message: String,
    },

    /// Catch-all for internal bookkeeping that cannot be broken from the
    /// outside.
    #[error("{node}: internal invariant broken: {message}")]
    Internal { node: String, message: String },
}
