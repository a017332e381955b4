//! Scorer nodes: the terminal sinks that turn matched tuples into score
//! impacts, plus the ledger those impacts land in.

use std::collections::HashMap;

use crate::error::PropagationError;
use crate::fact::Fact;
use crate::node::WeightFn;
use crate::queue::Ctx;
use crate::tuple::TupleId;

use scoreflow_core::{ConstraintRef, ImpactType, Score};

/// One constraint's contribution of one live match, kept for explanation.
#[derive(Debug, Clone)]
pub struct ConstraintMatch<Sc: Score> {
    pub constraint: ConstraintRef,
    /// The matched tuple's facts at the time of the last (re)score.
    pub facts: Vec<Fact>,
    /// Signed impact already folded into the constraint total.
    pub score: Sc,
}

/// Running per-constraint totals.
///
/// Scorers only ever move the totals by deltas (apply on match, the exact
/// negation on unmatch), so the ledger is incremental by construction and
/// never rescans matches.
pub(crate) struct ScoreLedger<Sc: Score> {
    constraints: Vec<ConstraintRef>,
    totals: Vec<Sc>,
}

impl<Sc: Score> ScoreLedger<Sc> {
    pub fn new(constraints: Vec<ConstraintRef>) -> Self {
        let totals = vec![Sc::zero(); constraints.len()];
        ScoreLedger { constraints, totals }
    }

    pub fn apply(&mut self, constraint_id: usize, delta: Sc) {
        self.totals[constraint_id] = self.totals[constraint_id] + delta;
    }

    /// Sum of all constraint totals.
    pub fn total(&self) -> Sc {
        self.totals
            .iter()
            .fold(Sc::zero(), |total, part| total + *part)
    }

    pub fn constraints(&self) -> &[ConstraintRef] {
        &self.constraints
    }

    pub fn totals(&self) -> &[Sc] {
        &self.totals
    }
}

struct AppliedMatch<Sc: Score> {
    score: Sc,
    facts: Vec<Fact>,
}

/// Terminal node of one constraint. Every arriving tuple is a match; the
/// weight function computes its signed magnitude and the impact type picks
/// the sign.
pub(crate) struct ScorerNode<Sc: Score> {
    pub constraint_id: usize,
    pub impact: ImpactType,
    pub weight_fn: WeightFn<Sc>,
    applied: HashMap<TupleId, AppliedMatch<Sc>>,
}

impl<Sc: Score> ScorerNode<Sc> {
    pub fn new(constraint_id: usize, impact: ImpactType, weight_fn: WeightFn<Sc>) -> Self {
        ScorerNode {
            constraint_id,
            impact,
            weight_fn,
            applied: HashMap::new(),
        }
    }

    pub fn insert(
        &mut self,
        ctx: &mut Ctx<'_, Sc>,
        id: TupleId,
    ) -> Result<(), PropagationError> {
        let score = self.impact_of(ctx, id);
        ctx.ledger.apply(self.constraint_id, score);
        self.applied.insert(
            id,
            AppliedMatch { score, facts: ctx.pool.facts(id).to_vec() },
        );
        Ok(())
    }

    pub fn update(
        &mut self,
        ctx: &mut Ctx<'_, Sc>,
        id: TupleId,
    ) -> Result<(), PropagationError> {
        let score = self.impact_of(ctx, id);
        let entry = self
            .applied
            .get_mut(&id)
            .ok_or_else(|| PropagationError::Internal {
                node: ctx.node.to_string(),
                message: format!("update for unscored tuple {id}"),
            })?;
        let delta = score - entry.score;
        entry.score = score;
        entry.facts = ctx.pool.facts(id).to_vec();
        if delta != Sc::zero() {
            ctx.ledger.apply(self.constraint_id, delta);
        }
        Ok(())
    }

    pub fn retract(
        &mut self,
        ctx: &mut Ctx<'_, Sc>,
        id: TupleId,
    ) -> Result<(), PropagationError> {
        let entry = self
            .applied
            .remove(&id)
            .ok_or_else(|| PropagationError::Internal {
                node: ctx.node.to_string(),
                message: format!("retract for unscored tuple {id}"),
            })?;
        ctx.ledger.apply(self.constraint_id, -entry.score);
        Ok(())
    }

    fn impact_of(&self, ctx: &Ctx<'_, Sc>, id: TupleId) -> Sc {
        let weight = (self.weight_fn)(ctx.pool.facts(id));
        match self.impact {
            ImpactType::Penalty => -weight,
            ImpactType::Reward => weight,
        }
    }

    /// Snapshot of the live matches, for score explanation.
    pub fn matches(&self, constraint: &ConstraintRef) -> Vec<ConstraintMatch<Sc>> {
        self.applied
            .values()
            .map(|entry| ConstraintMatch {
                constraint: constraint.clone(),
                facts: entry.facts.clone(),
                score: entry.score,
            })
            .collect()
    }
}
