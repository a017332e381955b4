//! Flatten nodes: expand the last fact of a tuple into zero or more facts.

use smallvec::SmallVec;

use crate::error::PropagationError;
use crate::node::{ExpandFn, Target};
use crate::queue::Ctx;
use crate::tuple::{FactVec, Slot, TupleId};

use scoreflow_core::Score;

/// Emits one output tuple per element the expansion function yields, each
/// sharing the input prefix and differing in the last position.
///
/// On update the new elements are matched against the current children by
/// fact equality: matched children survive (and are suppressed outright
/// when their prefix is unchanged too), unmatched children are retracted
/// and leftover elements become fresh inserts. Duplicate elements each get
/// their own child.
pub(crate) struct FlattenNode {
    pub expand: ExpandFn,
    pub downstream: Target,
    pub out_slots: usize,
}

impl FlattenNode {
    const SLOT_OUT_LIST: usize = 0;
    pub(crate) const SLOTS: usize = 1;

    pub fn insert<Sc: Score>(
        &mut self,
        ctx: &mut Ctx<'_, Sc>,
        id: TupleId,
    ) -> Result<(), PropagationError> {
        let elements = (self.expand)(ctx.pool.facts(id));
        let mut children = Vec::with_capacity(elements.len());
        for element in elements {
            let mut facts = ctx.facts_vec(id);
            *facts.last_mut().ok_or_else(|| ctx.internal("flatten input of arity zero"))? = element;
            children.push(ctx.create_out(self.downstream, facts, self.out_slots));
        }
        ctx.pool.set_slot(id, Self::SLOT_OUT_LIST, Slot::OutTupleList(children));
        Ok(())
    }

    pub fn update<Sc: Score>(
        &mut self,
        ctx: &mut Ctx<'_, Sc>,
        id: TupleId,
    ) -> Result<(), PropagationError> {
        let mut survivors = match ctx.pool.take_slot(id, Self::SLOT_OUT_LIST) {
            Slot::OutTupleList(children) => children,
            other => {
                ctx.pool.set_slot(id, Self::SLOT_OUT_LIST, other);
                return Err(ctx.internal("flatten slot lost its child list"));
            }
        };
        let elements = (self.expand)(ctx.pool.facts(id));
        let mut children = Vec::with_capacity(elements.len());
        for element in elements {
            let mut facts: FactVec = ctx.facts_vec(id);
            *facts.last_mut().ok_or_else(|| ctx.internal("flatten input of arity zero"))? = element;
            let matched = survivors
                .iter()
                .position(|child| ctx.pool.facts(*child).last() == facts.last());
            match matched {
                Some(position) => {
                    let child = survivors.remove(position);
                    if !Ctx::<Sc>::facts_equal(&facts, ctx.pool.facts(child)) {
                        ctx.pool.set_facts(child, facts);
                        ctx.update_out(self.downstream, child)?;
                    }
                    children.push(child);
                }
                None => children.push(ctx.create_out(self.downstream, facts, self.out_slots)),
            }
        }
        for child in survivors {
            ctx.retract_out(self.downstream, child)?;
        }
        ctx.pool.set_slot(id, Self::SLOT_OUT_LIST, Slot::OutTupleList(children));
        Ok(())
    }

    pub fn retract<Sc: Score>(
        &mut self,
        ctx: &mut Ctx<'_, Sc>,
        id: TupleId,
    ) -> Result<(), PropagationError> {
        let children: SmallVec<[TupleId; 4]> = match ctx.pool.take_slot(id, Self::SLOT_OUT_LIST) {
            Slot::OutTupleList(children) => children.into_iter().collect(),
            _ => return Err(ctx.internal("flatten slot lost its child list")),
        };
        for child in children {
            ctx.retract_out(self.downstream, child)?;
        }
        Ok(())
    }
}
