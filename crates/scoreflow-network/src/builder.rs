//! Declarative network construction.
//!
//! A [`NetworkBuilder`] records stream operations as a flat list of proto
//! nodes; [`NetworkBuilder::build`] validates the graph shape and
//! materializes the runtime [`Network`]. Builder methods are infallible and
//! return [`StreamId`] handles; all shape errors surface together at build
//! time.

use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use tracing::debug;

use crate::collector::CollectorSpec;
use crate::error::BuildError;
use crate::fact::Fact;
use crate::key::IndexKey;
use crate::network::Network;
use crate::node::{
    ConcatNode, ExpandFn, FilterNode, FlattenNode, GroupNode, IfExistsNode, JoinNode, KeyFn,
    MapFn, MapNode, Node, NodeId, NodeKind, PairPredicate, Predicate, ScorerNode, Side,
    SourceNode, Target, WeightFn,
};
use crate::tuple::FactVec;

use scoreflow_core::{ConstraintRef, ImpactType, Score};

/// Handle to a stream under construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamId(usize);

/// How a join or existence node pairs its two inputs: a key extractor per
/// side plus an optional residual predicate for conditions that key
/// equality cannot express.
pub struct JoinSpec {
    left_key: KeyFn,
    right_key: KeyFn,
    residual: Option<PairPredicate>,
}

impl JoinSpec {
    /// Pairs tuples whose extracted keys are equal.
    pub fn on(
        left_key: impl Fn(&[Fact]) -> IndexKey + 'static,
        right_key: impl Fn(&[Fact]) -> IndexKey + 'static,
    ) -> Self {
        JoinSpec {
            left_key: Rc::new(left_key),
            right_key: Rc::new(right_key),
            residual: None,
        }
    }

    /// Pairs every left tuple with every right tuple: both sides share the
    /// unit key, so the index degenerates to a single bucket.
    pub fn cross() -> Self {
        JoinSpec {
            left_key: Rc::new(|_| IndexKey::Unit),
            right_key: Rc::new(|_| IndexKey::Unit),
            residual: None,
        }
    }

    /// Adds a per-pair predicate evaluated after the key match. Use this
    /// for ordering or range conditions; equality conditions belong in the
    /// keys, where they index.
    pub fn filtering(
        mut self,
        residual: impl Fn(&[Fact], &[Fact]) -> bool + 'static,
    ) -> Self {
        self.residual = Some(Rc::new(residual));
        self
    }
}

struct ProtoNode<Sc: Score> {
    label: String,
    arity: usize,
    kind: ProtoKind<Sc>,
    /// How many nodes consume this stream; exactly one is legal for
    /// non-terminal nodes.
    consumers: usize,
    /// The consuming edge, first consumer wins.
    consumer: Option<(usize, Side)>,
}

enum ProtoKind<Sc: Score> {
    Source {
        fact_type: TypeId,
        type_name: &'static str,
    },
    Map {
        parent: usize,
        map_fn: MapFn,
    },
    Filter {
        parent: usize,
        predicate: Predicate,
    },
    Flatten {
        parent: usize,
        expand: ExpandFn,
    },
    Concat {
        left: usize,
        right: usize,
    },
    Join {
        left: usize,
        right: usize,
        spec: JoinSpec,
    },
    IfExists {
        primary: usize,
        secondary: usize,
        should_exist: bool,
        spec: JoinSpec,
    },
    Group {
        parent: usize,
        key_fn: Option<KeyFn>,
        collectors: Vec<CollectorSpec>,
    },
    Scorer {
        parent: usize,
        constraint: ConstraintRef,
        impact: ImpactType,
        weight_fn: WeightFn<Sc>,
    },
}

impl<Sc: Score> ProtoKind<Sc> {
    fn op_name(&self) -> &'static str {
        match self {
            ProtoKind::Source { .. } => "for_each",
            ProtoKind::Map { .. } => "map",
            ProtoKind::Filter { .. } => "filter",
            ProtoKind::Flatten { .. } => "flatten_last",
            ProtoKind::Concat { .. } => "concat",
            ProtoKind::Join { .. } => "join",
            ProtoKind::IfExists { should_exist: true, .. } => "if_exists",
            ProtoKind::IfExists { should_exist: false, .. } => "if_not_exists",
            ProtoKind::Group { .. } => "group_by",
            ProtoKind::Scorer { .. } => "scorer",
        }
    }
}

/// Builds a propagation network out of stream operations.
pub struct NetworkBuilder<Sc: Score> {
    protos: Vec<ProtoNode<Sc>>,
}

impl<Sc: Score> Default for NetworkBuilder<Sc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Sc: Score> NetworkBuilder<Sc> {
    pub fn new() -> Self {
        NetworkBuilder { protos: Vec::new() }
    }

    /// Declares an entry stream of one fact type. Each call creates its own
    /// source; inserting a fact of the type feeds every source declared for
    /// it.
    pub fn for_each<T: std::any::Any>(&mut self) -> StreamId {
        let type_name = std::any::type_name::<T>();
        let label = format!("for_each<{type_name}>#{}", self.protos.len());
        self.push(
            label,
            1,
            ProtoKind::Source { fact_type: TypeId::of::<T>(), type_name },
        )
    }

    /// Keeps only tuples satisfying the predicate.
    pub fn filter(
        &mut self,
        parent: StreamId,
        predicate: impl Fn(&[Fact]) -> bool + 'static,
    ) -> StreamId {
        let arity = self.arity(parent);
        let id = self.push_labeled(
            arity,
            ProtoKind::Filter { parent: parent.0, predicate: Rc::new(predicate) },
        );
        self.connect(parent, id, Side::Only);
        id
    }

    /// Rewrites each tuple's facts; `out_arity` declares the shape the
    /// mapping function produces.
    pub fn map(
        &mut self,
        parent: StreamId,
        out_arity: usize,
        map_fn: impl Fn(&[Fact]) -> FactVec + 'static,
    ) -> StreamId {
        let id = self.push_labeled(
            out_arity,
            ProtoKind::Map { parent: parent.0, map_fn: Rc::new(map_fn) },
        );
        self.connect(parent, id, Side::Only);
        id
    }

    /// Expands the last fact of each tuple into zero or more facts, one
    /// output tuple per element.
    pub fn flatten_last(
        &mut self,
        parent: StreamId,
        expand: impl Fn(&[Fact]) -> Vec<Fact> + 'static,
    ) -> StreamId {
        let arity = self.arity(parent);
        let id = self.push_labeled(
            arity,
            ProtoKind::Flatten { parent: parent.0, expand: Rc::new(expand) },
        );
        self.connect(parent, id, Side::Only);
        id
    }

    /// Merges two same-arity streams.
    pub fn concat(&mut self, left: StreamId, right: StreamId) -> StreamId {
        let arity = self.arity(left);
        let id = self.push_labeled(arity, ProtoKind::Concat { left: left.0, right: right.0 });
        self.connect(left, id, Side::Left);
        self.connect(right, id, Side::Right);
        id
    }

    /// Pairs two streams on the join specification; the output arity is the
    /// sum of the input arities.
    pub fn join(&mut self, left: StreamId, right: StreamId, spec: JoinSpec) -> StreamId {
        let arity = self.arity(left) + self.arity(right);
        let id = self.push_labeled(
            arity,
            ProtoKind::Join { left: left.0, right: right.0, spec },
        );
        self.connect(left, id, Side::Left);
        self.connect(right, id, Side::Right);
        id
    }

    /// Forwards primary tuples that have at least one match in the
    /// secondary stream. Secondary facts gate but never appear downstream.
    pub fn if_exists(
        &mut self,
        primary: StreamId,
        secondary: StreamId,
        spec: JoinSpec,
    ) -> StreamId {
        self.exists(primary, secondary, spec, true)
    }

    /// Forwards primary tuples that have no match in the secondary stream.
    pub fn if_not_exists(
        &mut self,
        primary: StreamId,
        secondary: StreamId,
        spec: JoinSpec,
    ) -> StreamId {
        self.exists(primary, secondary, spec, false)
    }

    fn exists(
        &mut self,
        primary: StreamId,
        secondary: StreamId,
        spec: JoinSpec,
        should_exist: bool,
    ) -> StreamId {
        let arity = self.arity(primary);
        let id = self.push_labeled(
            arity,
            ProtoKind::IfExists {
                primary: primary.0,
                secondary: secondary.0,
                should_exist,
                spec,
            },
        );
        self.connect(primary, id, Side::Left);
        self.connect(secondary, id, Side::Right);
        id
    }

    /// Buckets tuples by key and aggregates with the collectors. The output
    /// carries the key as an [`IndexKey`] fact followed by one result fact
    /// per collector; with no collectors this is a distinct-keys stream.
    pub fn group_by(
        &mut self,
        parent: StreamId,
        key_fn: impl Fn(&[Fact]) -> IndexKey + 'static,
        collectors: Vec<CollectorSpec>,
    ) -> StreamId {
        let arity = 1 + collectors.len();
        let id = self.push_labeled(
            arity,
            ProtoKind::Group {
                parent: parent.0,
                key_fn: Some(Rc::new(key_fn)),
                collectors,
            },
        );
        self.connect(parent, id, Side::Only);
        id
    }

    /// Aggregates the whole stream into one bucket, no key fact in the
    /// output. The output tuple exists exactly while the stream is
    /// non-empty.
    pub fn group(&mut self, parent: StreamId, collectors: Vec<CollectorSpec>) -> StreamId {
        let arity = collectors.len();
        let id = self.push_labeled(
            arity,
            ProtoKind::Group { parent: parent.0, key_fn: None, collectors },
        );
        self.connect(parent, id, Side::Only);
        id
    }

    /// Terminates a stream: every tuple subtracts `weight` from the score.
    pub fn penalize(&mut self, parent: StreamId, constraint: ConstraintRef, weight: Sc) {
        self.score(parent, constraint, ImpactType::Penalty, Rc::new(move |_| weight));
    }

    /// Terminates a stream: every tuple subtracts a per-match weight.
    pub fn penalize_by(
        &mut self,
        parent: StreamId,
        constraint: ConstraintRef,
        weight_fn: impl Fn(&[Fact]) -> Sc + 'static,
    ) {
        self.score(parent, constraint, ImpactType::Penalty, Rc::new(weight_fn));
    }

    /// Terminates a stream: every tuple adds `weight` to the score.
    pub fn reward(&mut self, parent: StreamId, constraint: ConstraintRef, weight: Sc) {
        self.score(parent, constraint, ImpactType::Reward, Rc::new(move |_| weight));
    }

    /// Terminates a stream: every tuple adds a per-match weight.
    pub fn reward_by(
        &mut self,
        parent: StreamId,
        constraint: ConstraintRef,
        weight_fn: impl Fn(&[Fact]) -> Sc + 'static,
    ) {
        self.score(parent, constraint, ImpactType::Reward, Rc::new(weight_fn));
    }

    fn score(
        &mut self,
        parent: StreamId,
        constraint: ConstraintRef,
        impact: ImpactType,
        weight_fn: WeightFn<Sc>,
    ) {
        let arity = self.arity(parent);
        let id = self.push_labeled(
            arity,
            ProtoKind::Scorer { parent: parent.0, constraint, impact, weight_fn },
        );
        self.connect(parent, id, Side::Only);
    }

    fn push_labeled(&mut self, arity: usize, kind: ProtoKind<Sc>) -> StreamId {
        let label = format!("{}#{}", kind.op_name(), self.protos.len());
        self.push(label, arity, kind)
    }

    fn push(&mut self, label: String, arity: usize, kind: ProtoKind<Sc>) -> StreamId {
        self.protos.push(ProtoNode {
            label,
            arity,
            kind,
            consumers: 0,
            consumer: None,
        });
        StreamId(self.protos.len() - 1)
    }

    fn connect(&mut self, parent: StreamId, consumer: StreamId, side: Side) {
        let proto = &mut self.protos[parent.0];
        proto.consumers += 1;
        if proto.consumer.is_none() {
            proto.consumer = Some((consumer.0, side));
        }
    }

    fn arity(&self, stream: StreamId) -> usize {
        self.protos[stream.0].arity
    }

    /// Validates the recorded graph and materializes the runtime network.
    pub fn build(self) -> Result<Network<Sc>, BuildError> {
        self.validate()?;

        // Resolve every producer's outgoing edge: consumer target plus the
        // store slots that consumer reserves per input tuple.
        let edges: Vec<Option<(Target, usize)>> = self
            .protos
            .iter()
            .map(|proto| {
                proto.consumer.map(|(consumer, side)| {
                    let target = Target { node: NodeId(consumer as u32), side };
                    (target, Self::slots_of(&self.protos[consumer].kind, side))
                })
            })
            .collect();

        let mut sources: HashMap<TypeId, Vec<usize>> = HashMap::new();
        let mut constraints: Vec<ConstraintRef> = Vec::new();
        let mut nodes: Vec<Node<Sc>> = Vec::with_capacity(self.protos.len());
        for (index, proto) in self.protos.into_iter().enumerate() {
            let edge = |index: usize| -> (Target, usize) {
                // Validation guarantees every non-terminal node has an edge.
                edges[index].unwrap_or((Target::only(NodeId(index as u32)), 0))
            };
            let (target, out_slots) = edge(index);
            let kind = match proto.kind {
                ProtoKind::Source { fact_type, type_name } => {
                    sources.entry(fact_type).or_default().push(index);
                    NodeKind::Source(SourceNode::new(fact_type, type_name, target, out_slots))
                }
                ProtoKind::Map { map_fn, .. } => {
                    NodeKind::Map(MapNode { map_fn, downstream: target, out_slots })
                }
                ProtoKind::Filter { predicate, .. } => {
                    NodeKind::Filter(FilterNode { predicate, downstream: target, out_slots })
                }
                ProtoKind::Flatten { expand, .. } => {
                    NodeKind::Flatten(FlattenNode { expand, downstream: target, out_slots })
                }
                ProtoKind::Concat { .. } => {
                    NodeKind::Concat(ConcatNode { downstream: target, out_slots })
                }
                ProtoKind::Join { spec, .. } => NodeKind::Join(JoinNode::new(
                    spec.left_key,
                    spec.right_key,
                    spec.residual,
                    target,
                    out_slots,
                )),
                ProtoKind::IfExists { should_exist, spec, .. } => {
                    NodeKind::IfExists(IfExistsNode::new(
                        should_exist,
                        spec.left_key,
                        spec.right_key,
                        spec.residual,
                        target,
                        out_slots,
                    ))
                }
                ProtoKind::Group { key_fn, collectors, .. } => {
                    NodeKind::Group(GroupNode::new(key_fn, collectors, target, out_slots))
                }
                ProtoKind::Scorer { constraint, impact, weight_fn, .. } => {
                    let constraint_id = constraints.len();
                    constraints.push(constraint);
                    NodeKind::Scorer(ScorerNode::new(constraint_id, impact, weight_fn))
                }
            };
            nodes.push(Node { label: proto.label, kind });
        }

        debug!(
            nodes = nodes.len(),
            constraints = constraints.len(),
            "network built"
        );
        Ok(Network::from_parts(nodes, sources, constraints))
    }

    fn validate(&self) -> Result<(), BuildError> {
        let mut scorer_seen = false;
        let mut names = HashSet::new();
        for (index, proto) in self.protos.iter().enumerate() {
            let terminal = matches!(proto.kind, ProtoKind::Scorer { .. });
            if terminal {
                scorer_seen = true;
                if proto.consumers > 0 {
                    return Err(BuildError::StreamReused {
                        node: proto.label.clone(),
                        count: proto.consumers,
                    });
                }
                if let ProtoKind::Scorer { constraint, .. } = &proto.kind {
                    if !names.insert(constraint.full_name()) {
                        return Err(BuildError::DuplicateConstraint(constraint.full_name()));
                    }
                }
            } else {
                match proto.consumers {
                    0 => {
                        return Err(BuildError::DanglingStream { node: proto.label.clone() })
                    }
                    1 => {}
                    count => {
                        return Err(BuildError::StreamReused {
                            node: proto.label.clone(),
                            count,
                        })
                    }
                }
                if !(1..=4).contains(&proto.arity) {
                    return Err(BuildError::ArityOutOfRange {
                        node: proto.label.clone(),
                        arity: proto.arity,
                    });
                }
            }
            if let ProtoKind::Concat { left, right } = &proto.kind {
                let (left, right) = (self.protos[*left].arity, self.protos[*right].arity);
                if left != right {
                    return Err(BuildError::ConcatArityMismatch { left, right });
                }
            }
            if let Some((consumer, _)) = proto.consumer {
                if consumer <= index {
                    return Err(BuildError::DependencyOrderViolation {
                        node: proto.label.clone(),
                        downstream: self.protos[consumer].label.clone(),
                    });
                }
            }
        }
        if !scorer_seen {
            return Err(BuildError::NoConstraints);
        }
        Ok(())
    }

    fn slots_of(kind: &ProtoKind<Sc>, side: Side) -> usize {
        match kind {
            ProtoKind::Source { .. } => 0,
            ProtoKind::Map { .. } => MapNode::SLOTS,
            ProtoKind::Filter { .. } => FilterNode::SLOTS,
            ProtoKind::Flatten { .. } => FlattenNode::SLOTS,
            ProtoKind::Concat { .. } => ConcatNode::SLOTS,
            ProtoKind::Join { .. } => JoinNode::SLOTS,
            ProtoKind::IfExists { .. } => match side {
                Side::Right => IfExistsNode::SECONDARY_SLOTS,
                _ => IfExistsNode::PRIMARY_SLOTS,
            },
            ProtoKind::Group { .. } => GroupNode::SLOTS,
            ProtoKind::Scorer { .. } => 0,
        }
    }
}
