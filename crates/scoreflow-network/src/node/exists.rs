//! Existence nodes: gate a primary stream on matching secondary tuples.

use std::collections::HashSet;

use crate::error::PropagationError;
use crate::index::Indexer;
use crate::key::IndexKey;
use crate::node::{KeyFn, PairPredicate, Side, Target};
use crate::queue::Ctx;
use crate::tuple::{ExistsCounter, Slot, TupleId};

use scoreflow_core::Score;

/// Forwards each primary tuple while its match count satisfies the
/// threshold rule: `count > 0` for if-exists, `count == 0` for
/// if-not-exists. The output tuple carries only the primary facts.
///
/// Secondary tuples never propagate; their only effect is nudging the
/// counters of the primary tuples in their bucket, so a downstream event
/// fires exactly when a counter crosses the threshold.
pub(crate) struct IfExistsNode {
    pub should_exist: bool,
    pub primary_key: KeyFn,
    pub secondary_key: KeyFn,
    pub residual: Option<PairPredicate>,
    pub downstream: Target,
    pub out_slots: usize,
    primary_indexer: Indexer,
    secondary_indexer: Indexer,
    /// (primary, secondary) pairs currently passing the residual; this is
    /// what lets a secondary update flip individual pairs without
    /// rescanning every counter.
    matches: HashSet<(TupleId, TupleId)>,
}

impl IfExistsNode {
    const SLOT_KEY: usize = 0;
    const SLOT_COUNTER: usize = 1;
    pub(crate) const PRIMARY_SLOTS: usize = 2;
    pub(crate) const SECONDARY_SLOTS: usize = 1;

    pub fn new(
        should_exist: bool,
        primary_key: KeyFn,
        secondary_key: KeyFn,
        residual: Option<PairPredicate>,
        downstream: Target,
        out_slots: usize,
    ) -> Self {
        IfExistsNode {
            should_exist,
            primary_key,
            secondary_key,
            residual,
            downstream,
            out_slots,
            primary_indexer: Indexer::new(),
            secondary_indexer: Indexer::new(),
            matches: HashSet::new(),
        }
    }

    pub fn insert<Sc: Score>(
        &mut self,
        ctx: &mut Ctx<'_, Sc>,
        side: Side,
        id: TupleId,
    ) -> Result<(), PropagationError> {
        match side {
            Side::Left => self.insert_primary(ctx, id),
            Side::Right => self.insert_secondary(ctx, id),
            Side::Only => Err(ctx.internal("existence node received a one-sided event")),
        }
    }

    pub fn update<Sc: Score>(
        &mut self,
        ctx: &mut Ctx<'_, Sc>,
        side: Side,
        id: TupleId,
    ) -> Result<(), PropagationError> {
        match side {
            Side::Left => self.update_primary(ctx, id),
            Side::Right => self.update_secondary(ctx, id),
            Side::Only => Err(ctx.internal("existence node received a one-sided event")),
        }
    }

    pub fn retract<Sc: Score>(
        &mut self,
        ctx: &mut Ctx<'_, Sc>,
        side: Side,
        id: TupleId,
    ) -> Result<(), PropagationError> {
        match side {
            Side::Left => self.retract_primary(ctx, id),
            Side::Right => self.retract_secondary(ctx, id),
            Side::Only => Err(ctx.internal("existence node received a one-sided event")),
        }
    }

    fn insert_primary<Sc: Score>(
        &mut self,
        ctx: &mut Ctx<'_, Sc>,
        id: TupleId,
    ) -> Result<(), PropagationError> {
        let key = (self.primary_key)(ctx.pool.facts(id));
        ctx.pool.set_slot(id, Self::SLOT_KEY, Slot::Key(key.clone()));
        self.primary_indexer.put(key.clone(), id);
        let count = self.count_matches(ctx, id, &key);
        let mut counter = ExistsCounter { count, out: None };
        if self.visible(count) {
            counter.out = Some(self.emit(ctx, id));
        }
        ctx.pool.set_slot(id, Self::SLOT_COUNTER, Slot::ExistsCounter(counter));
        Ok(())
    }

    fn update_primary<Sc: Score>(
        &mut self,
        ctx: &mut Ctx<'_, Sc>,
        id: TupleId,
    ) -> Result<(), PropagationError> {
        let old_key = ctx.expect_key(id, Self::SLOT_KEY)?;
        let new_key = (self.primary_key)(ctx.pool.facts(id));
        if new_key != old_key {
            if !self.primary_indexer.remove(&old_key, id) {
                return Err(ctx.missing_index_entry(id, &old_key));
            }
            ctx.pool.set_slot(id, Self::SLOT_KEY, Slot::Key(new_key.clone()));
            self.primary_indexer.put(new_key.clone(), id);
        }
        // Re-derive the matches from scratch: the primary facts feed the
        // residual, so any pair may have flipped.
        self.matches.retain(|(primary, _)| *primary != id);
        let count = self.count_matches(ctx, id, &new_key);
        let mut counter = ctx.expect_counter(id, Self::SLOT_COUNTER)?;
        counter.count = count;
        match (counter.out, self.visible(count)) {
            (Some(out), true) => {
                let facts = ctx.facts_vec(id);
                ctx.pool.set_facts(out, facts);
                ctx.update_out(self.downstream, out)?;
            }
            (Some(out), false) => {
                counter.out = None;
                ctx.retract_out(self.downstream, out)?;
            }
            (None, true) => counter.out = Some(self.emit(ctx, id)),
            (None, false) => {}
        }
        ctx.pool.set_slot(id, Self::SLOT_COUNTER, Slot::ExistsCounter(counter));
        Ok(())
    }

    fn retract_primary<Sc: Score>(
        &mut self,
        ctx: &mut Ctx<'_, Sc>,
        id: TupleId,
    ) -> Result<(), PropagationError> {
        let key = ctx.take_key(id, Self::SLOT_KEY)?;
        if !self.primary_indexer.remove(&key, id) {
            return Err(ctx.missing_index_entry(id, &key));
        }
        self.matches.retain(|(primary, _)| *primary != id);
        let counter = ctx.expect_counter(id, Self::SLOT_COUNTER)?;
        ctx.pool.set_slot(id, Self::SLOT_COUNTER, Slot::Vacant);
        if let Some(out) = counter.out {
            ctx.retract_out(self.downstream, out)?;
        }
        Ok(())
    }

    fn insert_secondary<Sc: Score>(
        &mut self,
        ctx: &mut Ctx<'_, Sc>,
        id: TupleId,
    ) -> Result<(), PropagationError> {
        let key = (self.secondary_key)(ctx.pool.facts(id));
        ctx.pool.set_slot(id, Self::SLOT_KEY, Slot::Key(key.clone()));
        self.secondary_indexer.put(key.clone(), id);
        self.attach_to_bucket(ctx, id, &key)
    }

    fn update_secondary<Sc: Score>(
        &mut self,
        ctx: &mut Ctx<'_, Sc>,
        id: TupleId,
    ) -> Result<(), PropagationError> {
        let old_key = ctx.expect_key(id, Self::SLOT_KEY)?;
        let new_key = (self.secondary_key)(ctx.pool.facts(id));
        if new_key == old_key {
            let primaries = Ctx::<Sc>::snapshot(self.primary_indexer.bucket(&new_key));
            for primary in primaries {
                let had = self.matches.contains(&(primary, id));
                let passes = self.residual_passes(ctx, primary, id);
                match (had, passes) {
                    (true, false) => {
                        self.matches.remove(&(primary, id));
                        self.bump(ctx, primary, false)?;
                    }
                    (false, true) => {
                        self.matches.insert((primary, id));
                        self.bump(ctx, primary, true)?;
                    }
                    // The output carries only primary facts, so a still-
                    // matching pair needs no downstream event.
                    _ => {}
                }
            }
            Ok(())
        } else {
            self.detach_from_bucket(ctx, id, &old_key)?;
            ctx.pool.set_slot(id, Self::SLOT_KEY, Slot::Key(new_key.clone()));
            self.secondary_indexer.put(new_key.clone(), id);
            self.attach_to_bucket(ctx, id, &new_key)
        }
    }

    fn retract_secondary<Sc: Score>(
        &mut self,
        ctx: &mut Ctx<'_, Sc>,
        id: TupleId,
    ) -> Result<(), PropagationError> {
        let key = ctx.take_key(id, Self::SLOT_KEY)?;
        self.detach_from_bucket(ctx, id, &key)
    }

    /// Registers a bucketed secondary against every matching primary.
    fn attach_to_bucket<Sc: Score>(
        &mut self,
        ctx: &mut Ctx<'_, Sc>,
        id: TupleId,
        key: &IndexKey,
    ) -> Result<(), PropagationError> {
        let primaries = Ctx::<Sc>::snapshot(self.primary_indexer.bucket(key));
        for primary in primaries {
            if self.residual_passes(ctx, primary, id) {
                self.matches.insert((primary, id));
                self.bump(ctx, primary, true)?;
            }
        }
        Ok(())
    }

    fn detach_from_bucket<Sc: Score>(
        &mut self,
        ctx: &mut Ctx<'_, Sc>,
        id: TupleId,
        key: &IndexKey,
    ) -> Result<(), PropagationError> {
        if !self.secondary_indexer.remove(key, id) {
            return Err(ctx.missing_index_entry(id, key));
        }
        let primaries = Ctx::<Sc>::snapshot(self.primary_indexer.bucket(key));
        for primary in primaries {
            if self.matches.remove(&(primary, id)) {
                self.bump(ctx, primary, false)?;
            }
        }
        Ok(())
    }

    /// Adjusts one primary counter and propagates on threshold crossings.
    fn bump<Sc: Score>(
        &mut self,
        ctx: &mut Ctx<'_, Sc>,
        primary: TupleId,
        added: bool,
    ) -> Result<(), PropagationError> {
        let mut counter = ctx.expect_counter(primary, Self::SLOT_COUNTER)?;
        counter.count = if added {
            counter.count + 1
        } else {
            counter
                .count
                .checked_sub(1)
                .ok_or_else(|| PropagationError::CountUnderflow {
                    node: ctx.node.to_string(),
                    tuple: ctx.pool.describe(primary),
                    counter: "exists match count",
                })?
        };
        match (counter.out, self.visible(counter.count)) {
            (Some(out), false) => {
                counter.out = None;
                ctx.retract_out(self.downstream, out)?;
            }
            (None, true) => counter.out = Some(self.emit(ctx, primary)),
            _ => {}
        }
        ctx.pool.set_slot(primary, Self::SLOT_COUNTER, Slot::ExistsCounter(counter));
        Ok(())
    }

    /// Recomputes matches for a primary and returns the resulting count.
    fn count_matches<Sc: Score>(
        &mut self,
        ctx: &Ctx<'_, Sc>,
        id: TupleId,
        key: &IndexKey,
    ) -> u32 {
        let secondaries = Ctx::<Sc>::snapshot(self.secondary_indexer.bucket(key));
        let mut count = 0;
        for secondary in secondaries {
            if self.residual_passes(ctx, id, secondary) {
                self.matches.insert((id, secondary));
                count += 1;
            }
        }
        count
    }

    fn emit<Sc: Score>(&self, ctx: &mut Ctx<'_, Sc>, primary: TupleId) -> TupleId {
        let facts = ctx.facts_vec(primary);
        ctx.create_out(self.downstream, facts, self.out_slots)
    }

    fn visible(&self, count: u32) -> bool {
        (count > 0) == self.should_exist
    }

    fn residual_passes<Sc: Score>(
        &self,
        ctx: &Ctx<'_, Sc>,
        primary: TupleId,
        secondary: TupleId,
    ) -> bool {
        match &self.residual {
            Some(predicate) => predicate(ctx.pool.facts(primary), ctx.pool.facts(secondary)),
            None => true,
        }
    }
}
