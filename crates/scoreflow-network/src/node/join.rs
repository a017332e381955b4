//! Join nodes: pair two streams on equal extracted keys.

use std::collections::HashMap;

use crate::error::PropagationError;
use crate::index::Indexer;
use crate::key::IndexKey;
use crate::node::{KeyFn, PairPredicate, Side, Target};
use crate::queue::Ctx;
use crate::tuple::{FactVec, Slot, TupleId};

use scoreflow_core::Score;

/// Emits one output tuple per (left, right) pair sharing a key and passing
/// the residual predicate, with the concatenated fact arrays.
///
/// Each side caches its put key in a store slot so an update can detect a
/// key change; the pair map is the single owner of the output tuples, so a
/// retract on either side finds and kills exactly the pairs it spans.
pub(crate) struct JoinNode {
    pub left_key: KeyFn,
    pub right_key: KeyFn,
    /// Extra per-pair test for conditions that do not reduce to key
    /// equality, such as ordering or range overlap.
    pub residual: Option<PairPredicate>,
    pub downstream: Target,
    pub out_slots: usize,
    left_indexer: Indexer,
    right_indexer: Indexer,
    pairs: HashMap<(TupleId, TupleId), TupleId>,
}

impl JoinNode {
    const SLOT_KEY: usize = 0;
    pub(crate) const SLOTS: usize = 1;

    pub fn new(
        left_key: KeyFn,
        right_key: KeyFn,
        residual: Option<PairPredicate>,
        downstream: Target,
        out_slots: usize,
    ) -> Self {
        JoinNode {
            left_key,
            right_key,
            residual,
            downstream,
            out_slots,
            left_indexer: Indexer::new(),
            right_indexer: Indexer::new(),
            pairs: HashMap::new(),
        }
    }

    pub fn insert<Sc: Score>(
        &mut self,
        ctx: &mut Ctx<'_, Sc>,
        side: Side,
        id: TupleId,
    ) -> Result<(), PropagationError> {
        let key = self.extract_key(ctx, side, id)?;
        ctx.pool.set_slot(id, Self::SLOT_KEY, Slot::Key(key.clone()));
        self.own_indexer(side).put(key.clone(), id);
        self.match_bucket(ctx, side, id, &key)
    }

    pub fn update<Sc: Score>(
        &mut self,
        ctx: &mut Ctx<'_, Sc>,
        side: Side,
        id: TupleId,
    ) -> Result<(), PropagationError> {
        let old_key = ctx.expect_key(id, Self::SLOT_KEY)?;
        let new_key = self.extract_key(ctx, side, id)?;
        if new_key == old_key {
            // Same bucket: re-evaluate every candidate pair, since the
            // residual verdict or the pair facts may have changed.
            let candidates = Ctx::<Sc>::snapshot(self.opposite_indexer(side).bucket(&new_key));
            for candidate in candidates {
                let (left, right) = Self::ordered(side, id, candidate);
                let existing = self.pairs.get(&(left, right)).copied();
                let passes = self.residual_passes(ctx, left, right);
                match (existing, passes) {
                    (Some(out), true) => {
                        let facts = Self::pair_facts(ctx, left, right);
                        ctx.pool.set_facts(out, facts);
                        ctx.update_out(self.downstream, out)?;
                    }
                    (Some(out), false) => {
                        self.pairs.remove(&(left, right));
                        ctx.retract_out(self.downstream, out)?;
                    }
                    (None, true) => self.create_pair(ctx, left, right),
                    (None, false) => {}
                }
            }
            Ok(())
        } else {
            self.unlink(ctx, side, id, &old_key)?;
            ctx.pool.set_slot(id, Self::SLOT_KEY, Slot::Key(new_key.clone()));
            self.own_indexer(side).put(new_key.clone(), id);
            self.match_bucket(ctx, side, id, &new_key)
        }
    }

    pub fn retract<Sc: Score>(
        &mut self,
        ctx: &mut Ctx<'_, Sc>,
        side: Side,
        id: TupleId,
    ) -> Result<(), PropagationError> {
        let key = ctx.take_key(id, Self::SLOT_KEY)?;
        self.unlink(ctx, side, id, &key)
    }

    /// Removes a tuple from its side's bucket and retracts every pair it
    /// currently spans.
    fn unlink<Sc: Score>(
        &mut self,
        ctx: &mut Ctx<'_, Sc>,
        side: Side,
        id: TupleId,
        key: &IndexKey,
    ) -> Result<(), PropagationError> {
        if !self.own_indexer(side).remove(key, id) {
            return Err(ctx.missing_index_entry(id, key));
        }
        let candidates = Ctx::<Sc>::snapshot(self.opposite_indexer(side).bucket(key));
        for candidate in candidates {
            let (left, right) = Self::ordered(side, id, candidate);
            if let Some(out) = self.pairs.remove(&(left, right)) {
                ctx.retract_out(self.downstream, out)?;
            }
        }
        Ok(())
    }

    /// Pairs a freshly bucketed tuple against the opposite bucket.
    fn match_bucket<Sc: Score>(
        &mut self,
        ctx: &mut Ctx<'_, Sc>,
        side: Side,
        id: TupleId,
        key: &IndexKey,
    ) -> Result<(), PropagationError> {
        let candidates = Ctx::<Sc>::snapshot(self.opposite_indexer(side).bucket(key));
        for candidate in candidates {
            let (left, right) = Self::ordered(side, id, candidate);
            if self.residual_passes(ctx, left, right) {
                self.create_pair(ctx, left, right);
            }
        }
        Ok(())
    }

    fn create_pair<Sc: Score>(&mut self, ctx: &mut Ctx<'_, Sc>, left: TupleId, right: TupleId) {
        let facts = Self::pair_facts(ctx, left, right);
        let out = ctx.create_out(self.downstream, facts, self.out_slots);
        self.pairs.insert((left, right), out);
    }

    fn pair_facts<Sc: Score>(ctx: &Ctx<'_, Sc>, left: TupleId, right: TupleId) -> FactVec {
        let mut facts = ctx.pool.facts_vec(left);
        facts.extend(ctx.pool.facts(right).iter().cloned());
        facts
    }

    fn residual_passes<Sc: Score>(&self, ctx: &Ctx<'_, Sc>, left: TupleId, right: TupleId) -> bool {
        match &self.residual {
            Some(predicate) => predicate(ctx.pool.facts(left), ctx.pool.facts(right)),
            None => true,
        }
    }

    fn extract_key<Sc: Score>(
        &self,
        ctx: &Ctx<'_, Sc>,
        side: Side,
        id: TupleId,
    ) -> Result<IndexKey, PropagationError> {
        match side {
            Side::Left => Ok((self.left_key)(ctx.pool.facts(id))),
            Side::Right => Ok((self.right_key)(ctx.pool.facts(id))),
            Side::Only => Err(ctx.internal("join received a one-sided event")),
        }
    }

    fn own_indexer(&mut self, side: Side) -> &mut Indexer {
        match side {
            Side::Right => &mut self.right_indexer,
            _ => &mut self.left_indexer,
        }
    }

    fn opposite_indexer(&self, side: Side) -> &Indexer {
        match side {
            Side::Right => &self.left_indexer,
            _ => &self.right_indexer,
        }
    }

    fn ordered(side: Side, id: TupleId, candidate: TupleId) -> (TupleId, TupleId) {
        match side {
            Side::Right => (candidate, id),
            _ => (id, candidate),
        }
    }
}
