//! The node zoo: one module per stream operation.
//!
//! Nodes are stored in one flat `Vec` in dependency order (producers before
//! consumers), each paired with the propagation queue of the same index.
//! Events address a consumer through a [`Target`]: the node id plus which
//! input side of that node the tuple arrives on.

use std::rc::Rc;

use crate::error::PropagationError;
use crate::fact::Fact;
use crate::key::IndexKey;
use crate::queue::Ctx;
use crate::tuple::{FactVec, TupleId};

use scoreflow_core::Score;

pub(crate) mod concat;
pub(crate) mod exists;
pub(crate) mod filter;
pub(crate) mod flatten;
pub(crate) mod group;
pub(crate) mod join;
pub(crate) mod map;
pub(crate) mod scorer;
pub(crate) mod source;

pub(crate) use concat::ConcatNode;
pub(crate) use exists::IfExistsNode;
pub(crate) use filter::FilterNode;
pub(crate) use flatten::FlattenNode;
pub(crate) use group::GroupNode;
pub(crate) use join::JoinNode;
pub(crate) use map::MapNode;
pub(crate) use scorer::ScorerNode;
pub(crate) use source::SourceNode;

/// Position of a node in the network's dependency-ordered node list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct NodeId(pub(crate) u32);

impl NodeId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Which input of a consumer a tuple arrives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Side {
    /// The sole input of a unary node.
    Only,
    Left,
    Right,
}

/// Address of a consumer input: node plus side.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Target {
    pub node: NodeId,
    pub side: Side,
}

impl Target {
    pub fn only(node: NodeId) -> Self {
        Target { node, side: Side::Only }
    }
}

/// Maps an input fact array to the output fact array, same or lower arity.
pub type MapFn = Rc<dyn Fn(&[Fact]) -> FactVec>;
/// Keeps or drops a tuple.
pub type Predicate = Rc<dyn Fn(&[Fact]) -> bool>;
/// Residual test over a (primary, secondary) fact-array pair.
pub type PairPredicate = Rc<dyn Fn(&[Fact], &[Fact]) -> bool>;
/// Extracts the index or group key of a tuple.
pub type KeyFn = Rc<dyn Fn(&[Fact]) -> IndexKey>;
/// Expands the last fact of a tuple into zero or more facts.
pub type ExpandFn = Rc<dyn Fn(&[Fact]) -> Vec<Fact>>;
/// Computes the match weight a scorer multiplies into its constraint weight.
pub type WeightFn<Sc> = Rc<dyn Fn(&[Fact]) -> Sc>;

pub(crate) struct Node<Sc: Score> {
    pub label: String,
    pub kind: NodeKind<Sc>,
}

pub(crate) enum NodeKind<Sc: Score> {
    Source(SourceNode),
    Map(MapNode),
    Filter(FilterNode),
    Flatten(FlattenNode),
    Concat(ConcatNode),
    Join(JoinNode),
    IfExists(IfExistsNode),
    Group(GroupNode),
    Scorer(ScorerNode<Sc>),
}

impl<Sc: Score> NodeKind<Sc> {
    pub fn on_insert(
        &mut self,
        ctx: &mut Ctx<'_, Sc>,
        side: Side,
        id: TupleId,
    ) -> Result<(), PropagationError> {
        match self {
            NodeKind::Map(node) => node.insert(ctx, id),
            NodeKind::Filter(node) => node.insert(ctx, id),
            NodeKind::Flatten(node) => node.insert(ctx, id),
            NodeKind::Concat(node) => node.insert(ctx, side, id),
            NodeKind::Join(node) => node.insert(ctx, side, id),
            NodeKind::IfExists(node) => node.insert(ctx, side, id),
            NodeKind::Group(node) => node.insert(ctx, id),
            NodeKind::Scorer(node) => node.insert(ctx, id),
            NodeKind::Source(_) => Err(ctx.internal("source node received a propagation event")),
        }
    }

    pub fn on_update(
        &mut self,
        ctx: &mut Ctx<'_, Sc>,
        side: Side,
        id: TupleId,
    ) -> Result<(), PropagationError> {
        match self {
            NodeKind::Map(node) => node.update(ctx, id),
            NodeKind::Filter(node) => node.update(ctx, id),
            NodeKind::Flatten(node) => node.update(ctx, id),
            NodeKind::Concat(node) => node.update(ctx, side, id),
            NodeKind::Join(node) => node.update(ctx, side, id),
            NodeKind::IfExists(node) => node.update(ctx, side, id),
            NodeKind::Group(node) => node.update(ctx, id),
            NodeKind::Scorer(node) => node.update(ctx, id),
            NodeKind::Source(_) => Err(ctx.internal("source node received a propagation event")),
        }
    }

    pub fn on_retract(
        &mut self,
        ctx: &mut Ctx<'_, Sc>,
        side: Side,
        id: TupleId,
    ) -> Result<(), PropagationError> {
        match self {
            NodeKind::Map(node) => node.retract(ctx, id),
            NodeKind::Filter(node) => node.retract(ctx, id),
            NodeKind::Flatten(node) => node.retract(ctx, id),
            NodeKind::Concat(node) => node.retract(ctx, side, id),
            NodeKind::Join(node) => node.retract(ctx, side, id),
            NodeKind::IfExists(node) => node.retract(ctx, side, id),
            NodeKind::Group(node) => node.retract(ctx, id),
            NodeKind::Scorer(node) => node.retract(ctx, id),
            NodeKind::Source(_) => Err(ctx.internal("source node received a propagation event")),
        }
    }
}
