//! Filter nodes: pass or suppress tuples on a predicate.

use crate::error::PropagationError;
use crate::node::{Predicate, Target};
use crate::queue::Ctx;
use crate::tuple::{Slot, TupleId};

use scoreflow_core::Score;

/// Forwards tuples whose facts satisfy the predicate.
///
/// The store slot doubles as the pass/suppress flag: an update that flips
/// the predicate verdict turns into a downstream insert or retract rather
/// than an update.
pub(crate) struct FilterNode {
    pub predicate: Predicate,
    pub downstream: Target,
    pub out_slots: usize,
}

impl FilterNode {
    const SLOT_OUT: usize = 0;
    pub(crate) const SLOTS: usize = 1;

    pub fn insert<Sc: Score>(
        &mut self,
        ctx: &mut Ctx<'_, Sc>,
        id: TupleId,
    ) -> Result<(), PropagationError> {
        if (self.predicate)(ctx.pool.facts(id)) {
            self.emit(ctx, id);
        }
        Ok(())
    }

    pub fn update<Sc: Score>(
        &mut self,
        ctx: &mut Ctx<'_, Sc>,
        id: TupleId,
    ) -> Result<(), PropagationError> {
        let passes = (self.predicate)(ctx.pool.facts(id));
        let previous = match ctx.pool.slot(id, Self::SLOT_OUT) {
            Slot::OutTuple(out) => Some(*out),
            _ => None,
        };
        match (previous, passes) {
            (Some(out), true) => {
                let facts = ctx.facts_vec(id);
                ctx.pool.set_facts(out, facts);
                ctx.update_out(self.downstream, out)
            }
            (Some(out), false) => {
                ctx.pool.set_slot(id, Self::SLOT_OUT, Slot::Vacant);
                ctx.retract_out(self.downstream, out)
            }
            (None, true) => {
                self.emit(ctx, id);
                Ok(())
            }
            (None, false) => Ok(()),
        }
    }

    pub fn retract<Sc: Score>(
        &mut self,
        ctx: &mut Ctx<'_, Sc>,
        id: TupleId,
    ) -> Result<(), PropagationError> {
        if let Slot::OutTuple(out) = *ctx.pool.slot(id, Self::SLOT_OUT) {
            ctx.pool.set_slot(id, Self::SLOT_OUT, Slot::Vacant);
            ctx.retract_out(self.downstream, out)?;
        }
        Ok(())
    }

    fn emit<Sc: Score>(&self, ctx: &mut Ctx<'_, Sc>, id: TupleId) {
        let facts = ctx.facts_vec(id);
        let out = ctx.create_out(self.downstream, facts, self.out_slots);
        ctx.pool.set_slot(id, Self::SLOT_OUT, Slot::OutTuple(out));
    }
}
