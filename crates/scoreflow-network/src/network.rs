//! The runtime network: fact entry points and the settle loop.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::{debug, trace};

use crate::error::PropagationError;
use crate::fact::Fact;
use crate::node::scorer::{ConstraintMatch, ScoreLedger};
use crate::node::{Node, NodeKind};
use crate::queue::{Ctx, PropagationQueue};
use crate::tuple::{TupleId, TupleState, TuplePool};

use scoreflow_core::{ConstraintRef, Score};

enum FeedOp {
    Insert,
    Update,
    Retract,
}

/// A built propagation network.
///
/// Fact changes are buffered by [`insert`](Network::insert),
/// [`update`](Network::update) and [`retract`](Network::retract); nothing is
/// evaluated until [`settle`](Network::settle) drains the queues in
/// dependency order and returns the new total score.
///
/// Any propagation error poisons the network: every later call short-
/// circuits with [`PropagationError::Poisoned`], since half-drained queues
/// cannot be resumed consistently.
pub struct Network<Sc: Score> {
    nodes: Vec<Node<Sc>>,
    queues: Vec<PropagationQueue>,
    pool: TuplePool,
    ledger: ScoreLedger<Sc>,
    sources: HashMap<TypeId, Vec<usize>>,
    poisoned: bool,
}

impl<Sc: Score> Network<Sc> {
    pub(crate) fn from_parts(
        nodes: Vec<Node<Sc>>,
        sources: HashMap<TypeId, Vec<usize>>,
        constraints: Vec<ConstraintRef>,
    ) -> Self {
        let queues = nodes.iter().map(|_| PropagationQueue::default()).collect();
        Network {
            queues,
            pool: TuplePool::new(),
            ledger: ScoreLedger::new(constraints),
            sources,
            nodes,
            poisoned: false,
        }
    }

    /// Announces a new working fact. Takes effect at the next settle.
    pub fn insert(&mut self, fact: &Fact) -> Result<(), PropagationError> {
        self.feed(fact, FeedOp::Insert)
    }

    /// Announces that a working fact was mutated in place.
    pub fn update(&mut self, fact: &Fact) -> Result<(), PropagationError> {
        self.feed(fact, FeedOp::Update)
    }

    /// Announces removal of a working fact.
    pub fn retract(&mut self, fact: &Fact) -> Result<(), PropagationError> {
        self.feed(fact, FeedOp::Retract)
    }

    fn feed(&mut self, fact: &Fact, op: FeedOp) -> Result<(), PropagationError> {
        self.guard()?;
        let result = self.feed_inner(fact, op);
        if result.is_err() {
            self.poisoned = true;
        }
        result
    }

    fn feed_inner(&mut self, fact: &Fact, op: FeedOp) -> Result<(), PropagationError> {
        let indices = self
            .sources
            .get(&fact.fact_type())
            .ok_or(PropagationError::UnregisteredFactType(fact.type_name()))?
            .clone();
        for index in indices {
            let Node { label, kind } = &mut self.nodes[index];
            let NodeKind::Source(source) = kind else {
                return Err(PropagationError::Internal {
                    node: label.clone(),
                    message: "fact routed to a non-source node".to_string(),
                });
            };
            let mut ctx = Ctx {
                pool: &mut self.pool,
                queues: &mut self.queues,
                ledger: &mut self.ledger,
                node: label.as_str(),
            };
            match op {
                FeedOp::Insert => source.insert(&mut ctx, fact)?,
                FeedOp::Update => source.update(&mut ctx, fact)?,
                FeedOp::Retract => source.retract(&mut ctx, fact)?,
            }
        }
        Ok(())
    }

    /// Drains all pending events in dependency order and returns the total
    /// score afterwards.
    pub fn settle(&mut self) -> Result<Sc, PropagationError> {
        self.guard()?;
        let result = self.settle_inner();
        if result.is_err() {
            self.poisoned = true;
        }
        result
    }

    fn settle_inner(&mut self) -> Result<Sc, PropagationError> {
        // Nodes are stored producers-first, so one pass suffices: a node's
        // drain only ever enqueues into strictly later queues.
        for index in 0..self.nodes.len() {
            let entries = self.queues[index].take_entries();
            if entries.is_empty() {
                continue;
            }
            let Node { label, kind } = &mut self.nodes[index];
            trace!(node = label.as_str(), pending = entries.len(), "draining");
            let mut ctx = Ctx {
                pool: &mut self.pool,
                queues: &mut self.queues,
                ledger: &mut self.ledger,
                node: label.as_str(),
            };
            for entry in entries {
                let id = entry.tuple;
                match ctx.pool.state(id) {
                    TupleState::Creating => {
                        Self::dispatch(&mut ctx, id, |ctx| kind.on_insert(ctx, entry.side, id))?;
                        ctx.pool.set_state(id, TupleState::Ok);
                    }
                    TupleState::Updating => {
                        Self::dispatch(&mut ctx, id, |ctx| kind.on_update(ctx, entry.side, id))?;
                        ctx.pool.set_state(id, TupleState::Ok);
                    }
                    TupleState::Dying => {
                        Self::dispatch(&mut ctx, id, |ctx| kind.on_retract(ctx, entry.side, id))?;
                        ctx.pool.set_state(id, TupleState::Dead);
                        ctx.pool.free(id);
                    }
                    // Inserted and retracted within one cycle; nothing ever
                    // propagated, so nothing is told.
                    TupleState::Aborting => {
                        ctx.pool.set_state(id, TupleState::Dead);
                        ctx.pool.free(id);
                    }
                    state => return Err(ctx.impossible_state(id, state)),
                }
            }
        }
        let score = self.ledger.total();
        debug!(score = %score, "settled");
        Ok(score)
    }

    /// Runs one node handler, converting a panic in a user-supplied closure
    /// (predicate, mapper, key extractor, collector, weigher) into a
    /// propagation error naming the node and the tuple being handled. The
    /// error then poisons the network like any other propagation failure.
    fn dispatch<'a>(
        ctx: &mut Ctx<'a, Sc>,
        id: TupleId,
        call: impl FnOnce(&mut Ctx<'a, Sc>) -> Result<(), PropagationError>,
    ) -> Result<(), PropagationError> {
        match catch_unwind(AssertUnwindSafe(|| call(&mut *ctx))) {
            Ok(result) => result,
            Err(payload) => Err(PropagationError::UserFunctionPanic {
                node: ctx.node.to_string(),
                tuple: ctx.pool.describe(id),
                message: panic_message(payload.as_ref()),
            }),
        }
    }

    /// The score as of the last settle; pending events are not reflected.
    pub fn score(&self) -> Sc {
        self.ledger.total()
    }

    /// Per-constraint totals as of the last settle.
    pub fn constraint_totals(&self) -> impl Iterator<Item = (&ConstraintRef, Sc)> {
        self.ledger
            .constraints()
            .iter()
            .zip(self.ledger.totals().iter().copied())
    }

    /// Every live constraint match, for score explanation. Order is
    /// unspecified.
    pub fn constraint_matches(&self) -> Vec<ConstraintMatch<Sc>> {
        let mut matches = Vec::new();
        for node in &self.nodes {
            if let NodeKind::Scorer(scorer) = &node.kind {
                let constraint = &self.ledger.constraints()[scorer.constraint_id];
                matches.extend(scorer.matches(constraint));
            }
        }
        matches
    }

    /// Whether an earlier propagation failure disabled this network.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Number of live tuples across all nodes; a freshly settled empty
    /// network reports zero. Useful for leak assertions.
    pub fn live_tuple_count(&self) -> usize {
        self.pool.live_count()
    }

    fn guard(&self) -> Result<(), PropagationError> {
        if self.poisoned {
            Err(PropagationError::Poisoned)
        } else {
            Ok(())
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
