//! Source nodes: the entry point of one fact type into the network.
//!
//! A source owns one unary output tuple per working fact, keyed by fact
//! identity. External insert/update/retract calls land here and are
//! translated into downstream propagation; nothing is evaluated until the
//! next settle.

use std::any::TypeId;
use std::collections::HashMap;

use smallvec::smallvec;

use crate::error::PropagationError;
use crate::fact::Fact;
use crate::node::Target;
use crate::queue::Ctx;
use crate::tuple::TupleId;

use scoreflow_core::Score;

pub(crate) struct SourceNode {
    pub fact_type: TypeId,
    pub type_name: &'static str,
    pub downstream: Target,
    pub out_slots: usize,
    /// Fact identity to the tuple carrying it.
    tuples: HashMap<usize, TupleId>,
}

impl SourceNode {
    pub fn new(fact_type: TypeId, type_name: &'static str, downstream: Target, out_slots: usize) -> Self {
        SourceNode {
            fact_type,
            type_name,
            downstream,
            out_slots,
            tuples: HashMap::new(),
        }
    }

    pub fn insert<Sc: Score>(
        &mut self,
        ctx: &mut Ctx<'_, Sc>,
        fact: &Fact,
    ) -> Result<(), PropagationError> {
        let identity = fact.identity();
        if self.tuples.contains_key(&identity) {
            return Err(PropagationError::DuplicateFact {
                node: ctx.node.to_string(),
                type_name: self.type_name,
            });
        }
        let out = ctx.create_out(self.downstream, smallvec![fact.clone()], self.out_slots);
        self.tuples.insert(identity, out);
        Ok(())
    }

    pub fn update<Sc: Score>(
        &mut self,
        ctx: &mut Ctx<'_, Sc>,
        fact: &Fact,
    ) -> Result<(), PropagationError> {
        let out = self.lookup(ctx, fact)?;
        ctx.update_out(self.downstream, out)
    }

    pub fn retract<Sc: Score>(
        &mut self,
        ctx: &mut Ctx<'_, Sc>,
        fact: &Fact,
    ) -> Result<(), PropagationError> {
        let out = self.lookup(ctx, fact)?;
        self.tuples.remove(&fact.identity());
        ctx.retract_out(self.downstream, out)
    }

    fn lookup<Sc: Score>(
        &self,
        ctx: &Ctx<'_, Sc>,
        fact: &Fact,
    ) -> Result<TupleId, PropagationError> {
        self.tuples
            .get(&fact.identity())
            .copied()
            .ok_or_else(|| PropagationError::UnknownFact {
                node: ctx.node.to_string(),
                type_name: self.type_name,
            })
    }
}
