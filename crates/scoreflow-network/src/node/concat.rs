//! Concat nodes: merge two same-arity streams into one.

use crate::error::PropagationError;
use crate::node::{Side, Target};
use crate::queue::Ctx;
use crate::tuple::{Slot, TupleId};

use scoreflow_core::Score;

/// Forwards tuples from either parent unchanged. A fact reaching the node
/// through both parents yields two independent output tuples; concat does
/// not deduplicate.
pub(crate) struct ConcatNode {
    pub downstream: Target,
    pub out_slots: usize,
}

impl ConcatNode {
    const SLOT_OUT: usize = 0;
    pub(crate) const SLOTS: usize = 1;

    pub fn insert<Sc: Score>(
        &mut self,
        ctx: &mut Ctx<'_, Sc>,
        _side: Side,
        id: TupleId,
    ) -> Result<(), PropagationError> {
        let facts = ctx.facts_vec(id);
        let out = ctx.create_out(self.downstream, facts, self.out_slots);
        ctx.pool.set_slot(id, Self::SLOT_OUT, Slot::OutTuple(out));
        Ok(())
    }

    pub fn update<Sc: Score>(
        &mut self,
        ctx: &mut Ctx<'_, Sc>,
        _side: Side,
        id: TupleId,
    ) -> Result<(), PropagationError> {
        let out = ctx.expect_out(id, Self::SLOT_OUT)?;
        let facts = ctx.facts_vec(id);
        ctx.pool.set_facts(out, facts);
        ctx.update_out(self.downstream, out)
    }

    pub fn retract<Sc: Score>(
        &mut self,
        ctx: &mut Ctx<'_, Sc>,
        _side: Side,
        id: TupleId,
    ) -> Result<(), PropagationError> {
        let out = ctx.expect_out(id, Self::SLOT_OUT)?;
        ctx.pool.set_slot(id, Self::SLOT_OUT, Slot::Vacant);
        ctx.retract_out(self.downstream, out)
    }
}
