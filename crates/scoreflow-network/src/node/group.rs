//! Group nodes: bucket tuples by key and maintain collector aggregates.

use std::collections::HashMap;

use crate::collector::{AccumulatorState, CollectorSpec};
use crate::error::PropagationError;
use crate::fact::Fact;
use crate::key::IndexKey;
use crate::node::{KeyFn, Target};
use crate::queue::Ctx;
use crate::tuple::{FactVec, Slot, TupleId};

use scoreflow_core::Score;

/// One output tuple per occupied bucket, carrying the group key as an
/// [`IndexKey`] fact (for keyed groups) followed by one result fact per
/// collector.
///
/// A bucket exists exactly while `parent_count > 0`. Contributions are
/// removed by replaying the undo commands cached in the contributing
/// tuple's store, never by recomputing the bucket, so an update is always
/// undo-old-then-accumulate-new. A keyless group is the same machinery with
/// the single [`IndexKey::Unit`] bucket and no key fact in the output.
pub(crate) struct GroupNode {
    pub key_fn: Option<KeyFn>,
    pub collectors: Vec<CollectorSpec>,
    pub downstream: Target,
    pub out_slots: usize,
    groups: HashMap<IndexKey, GroupBucket>,
}

struct GroupBucket {
    parent_count: usize,
    accumulators: Vec<AccumulatorState>,
    out: TupleId,
}

fn missing_bucket(node: &str, key: &IndexKey) -> PropagationError {
    PropagationError::Internal {
        node: node.to_string(),
        message: format!("no bucket for key {key:?}"),
    }
}

impl GroupNode {
    const SLOT_KEY: usize = 0;
    const SLOT_UNDO: usize = 1;
    pub(crate) const SLOTS: usize = 2;

    pub fn new(
        key_fn: Option<KeyFn>,
        collectors: Vec<CollectorSpec>,
        downstream: Target,
        out_slots: usize,
    ) -> Self {
        GroupNode {
            key_fn,
            collectors,
            downstream,
            out_slots,
            groups: HashMap::new(),
        }
    }

    pub fn insert<Sc: Score>(
        &mut self,
        ctx: &mut Ctx<'_, Sc>,
        id: TupleId,
    ) -> Result<(), PropagationError> {
        let key = self.bucket_key(ctx, id);
        ctx.pool.set_slot(id, Self::SLOT_KEY, Slot::Key(key.clone()));
        self.accumulate(ctx, id, key)
    }

    pub fn update<Sc: Score>(
        &mut self,
        ctx: &mut Ctx<'_, Sc>,
        id: TupleId,
    ) -> Result<(), PropagationError> {
        let old_key = ctx.expect_key(id, Self::SLOT_KEY)?;
        let new_key = self.bucket_key(ctx, id);
        self.undo(ctx, id, &old_key)?;
        if new_key != old_key {
            self.release_parent(ctx, &old_key)?;
            ctx.pool.set_slot(id, Self::SLOT_KEY, Slot::Key(new_key.clone()));
            self.accumulate(ctx, id, new_key)
        } else {
            // Same bucket: fold the updated facts back in and refresh the
            // aggregate without touching the parent count.
            let bucket = self
                .groups
                .get_mut(&new_key)
                .ok_or_else(|| missing_bucket(ctx.node, &new_key))?;
            let facts = ctx.pool.facts(id);
            let mut undos = Vec::with_capacity(self.collectors.len());
            for (spec, acc) in self.collectors.iter().zip(bucket.accumulators.iter_mut()) {
                undos.push(spec.accumulate(ctx.node, acc, facts)?);
            }
            ctx.pool.set_slot(id, Self::SLOT_UNDO, Slot::Undo(undos));
            self.refresh_out(ctx, &new_key)
        }
    }

    pub fn retract<Sc: Score>(
        &mut self,
        ctx: &mut Ctx<'_, Sc>,
        id: TupleId,
    ) -> Result<(), PropagationError> {
        let key = ctx.take_key(id, Self::SLOT_KEY)?;
        self.undo(ctx, id, &key)?;
        self.release_parent(ctx, &key)
    }

    fn bucket_key<Sc: Score>(&self, ctx: &Ctx<'_, Sc>, id: TupleId) -> IndexKey {
        match &self.key_fn {
            Some(key_fn) => key_fn(ctx.pool.facts(id)),
            None => IndexKey::Unit,
        }
    }

    /// Folds a tuple into its bucket, creating the bucket (and its output
    /// tuple) on first contribution.
    fn accumulate<Sc: Score>(
        &mut self,
        ctx: &mut Ctx<'_, Sc>,
        id: TupleId,
        key: IndexKey,
    ) -> Result<(), PropagationError> {
        let fresh = !self.groups.contains_key(&key);
        if fresh {
            let accumulators = self.collectors.iter().map(CollectorSpec::init).collect();
            // The out id is a placeholder until the first facts exist below.
            self.groups.insert(
                key.clone(),
                GroupBucket { parent_count: 0, accumulators, out: id },
            );
        }
        let bucket = self
            .groups
            .get_mut(&key)
            .ok_or_else(|| missing_bucket(ctx.node, &key))?;
        bucket.parent_count += 1;
        let facts = ctx.pool.facts(id);
        let mut undos = Vec::with_capacity(self.collectors.len());
        for (spec, acc) in self.collectors.iter().zip(bucket.accumulators.iter_mut()) {
            undos.push(spec.accumulate(ctx.node, acc, facts)?);
        }
        let out_facts = Self::out_facts(
            self.key_fn.is_some(),
            &self.collectors,
            ctx.node,
            &key,
            &bucket.accumulators,
        )?;
        ctx.pool.set_slot(id, Self::SLOT_UNDO, Slot::Undo(undos));
        if fresh {
            let out = ctx.create_out(self.downstream, out_facts, self.out_slots);
            self.groups
                .get_mut(&key)
                .ok_or_else(|| missing_bucket(ctx.node, &key))?
                .out = out;
            Ok(())
        } else {
            self.push_out(ctx, &key, out_facts)
        }
    }

    /// Replays the undo commands a tuple stored on its last accumulate.
    fn undo<Sc: Score>(
        &mut self,
        ctx: &mut Ctx<'_, Sc>,
        id: TupleId,
        key: &IndexKey,
    ) -> Result<(), PropagationError> {
        let undos = ctx.take_undo(id, Self::SLOT_UNDO)?;
        let bucket = self
            .groups
            .get_mut(key)
            .ok_or_else(|| missing_bucket(ctx.node, key))?;
        for (undo, acc) in undos.into_iter().zip(bucket.accumulators.iter_mut()) {
            undo.apply(ctx.node, acc)?;
        }
        Ok(())
    }

    /// Drops one contributor; kills the bucket when it was the last one,
    /// otherwise refreshes the aggregate downstream.
    fn release_parent<Sc: Score>(
        &mut self,
        ctx: &mut Ctx<'_, Sc>,
        key: &IndexKey,
    ) -> Result<(), PropagationError> {
        let bucket = self
            .groups
            .get_mut(key)
            .ok_or_else(|| missing_bucket(ctx.node, key))?;
        bucket.parent_count -= 1;
        if bucket.parent_count == 0 {
            let out = bucket.out;
            self.groups.remove(key);
            ctx.retract_out(self.downstream, out)
        } else {
            self.refresh_out(ctx, key)
        }
    }

    /// Recomputes the bucket's output facts and propagates an update.
    fn refresh_out<Sc: Score>(
        &mut self,
        ctx: &mut Ctx<'_, Sc>,
        key: &IndexKey,
    ) -> Result<(), PropagationError> {
        let bucket = self
            .groups
            .get(key)
            .ok_or_else(|| missing_bucket(ctx.node, key))?;
        let facts = Self::out_facts(
            self.key_fn.is_some(),
            &self.collectors,
            ctx.node,
            key,
            &bucket.accumulators,
        )?;
        self.push_out(ctx, key, facts)
    }

    /// Rewrites the output tuple unless the facts are unchanged, in which
    /// case the event is suppressed.
    fn push_out<Sc: Score>(
        &mut self,
        ctx: &mut Ctx<'_, Sc>,
        key: &IndexKey,
        facts: FactVec,
    ) -> Result<(), PropagationError> {
        let out = self
            .groups
            .get(key)
            .ok_or_else(|| missing_bucket(ctx.node, key))?
            .out;
        if Ctx::<Sc>::facts_equal(&facts, ctx.pool.facts(out)) {
            return Ok(());
        }
        ctx.pool.set_facts(out, facts);
        ctx.update_out(self.downstream, out)
    }

    fn out_facts(
        keyed: bool,
        collectors: &[CollectorSpec],
        node: &str,
        key: &IndexKey,
        accumulators: &[AccumulatorState],
    ) -> Result<FactVec, PropagationError> {
        let mut facts = FactVec::new();
        if keyed {
            facts.push(Fact::new(key.clone()));
        }
        for (spec, acc) in collectors.iter().zip(accumulators) {
            facts.push(spec.finish(node, acc)?);
        }
        Ok(facts)
    }
}
