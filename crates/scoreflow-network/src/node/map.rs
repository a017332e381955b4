//! Map nodes: rewrite the fact array of every tuple flowing through.

use crate::error::PropagationError;
use crate::node::{MapFn, Target};
use crate::queue::Ctx;
use crate::tuple::{Slot, TupleId};

use scoreflow_core::Score;

/// Applies a mapping function, one output tuple per input tuple.
///
/// Updates whose mapped facts are element-wise equal to the previous output
/// are suppressed, so a noisy upstream update of irrelevant fields stops
/// here instead of rippling through the whole network.
pub(crate) struct MapNode {
    pub map_fn: MapFn,
    pub downstream: Target,
    pub out_slots: usize,
}

impl MapNode {
    const SLOT_OUT: usize = 0;
    pub(crate) const SLOTS: usize = 1;

    pub fn insert<Sc: Score>(
        &mut self,
        ctx: &mut Ctx<'_, Sc>,
        id: TupleId,
    ) -> Result<(), PropagationError> {
        let facts = (self.map_fn)(ctx.pool.facts(id));
        let out = ctx.create_out(self.downstream, facts, self.out_slots);
        ctx.pool.set_slot(id, Self::SLOT_OUT, Slot::OutTuple(out));
        Ok(())
    }

    pub fn update<Sc: Score>(
        &mut self,
        ctx: &mut Ctx<'_, Sc>,
        id: TupleId,
    ) -> Result<(), PropagationError> {
        let out = ctx.expect_out(id, Self::SLOT_OUT)?;
        let facts = (self.map_fn)(ctx.pool.facts(id));
        if Ctx::<Sc>::facts_equal(&facts, ctx.pool.facts(out)) {
            return Ok(());
        }
        ctx.pool.set_facts(out, facts);
        ctx.update_out(self.downstream, out)
    }

    pub fn retract<Sc: Score>(
        &mut self,
        ctx: &mut Ctx<'_, Sc>,
        id: TupleId,
    ) -> Result<(), PropagationError> {
        let out = ctx.expect_out(id, Self::SLOT_OUT)?;
        ctx.pool.set_slot(id, Self::SLOT_OUT, Slot::Vacant);
        ctx.retract_out(self.downstream, out)
    }
}
