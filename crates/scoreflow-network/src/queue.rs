//! Per-node propagation worklists and the dispatch context handed to node
//! handlers.
//!
//! Every node owns one FIFO queue of dirty input tuples. Enqueueing never
//! runs the consumer; it only records the tuple and advances its state
//! machine. A tuple therefore sits in a queue at most once per settle
//! cycle: a second event before the drain merely rewrites the state in
//! place (insert-then-retract collapses to ABORTING, update-then-retract
//! to DYING, and so on), which is how a fact touched three times in one
//! move is scored as one net change.

use smallvec::SmallVec;

use crate::error::PropagationError;
use crate::fact::Fact;
use crate::key::IndexKey;
use crate::node::scorer::ScoreLedger;
use crate::node::{Side, Target};
use crate::tuple::{ExistsCounter, FactVec, Slot, TupleId, TuplePool, TupleState};
use crate::collector::UndoCommand;

use scoreflow_core::Score;

/// One pending event: which input side of the consumer, and which tuple.
#[derive(Debug, Clone, Copy)]
pub(crate) struct QueueEntry {
    pub side: Side,
    pub tuple: TupleId,
}

/// FIFO worklist of one node's dirty input tuples.
#[derive(Debug, Default)]
pub(crate) struct PropagationQueue {
    entries: Vec<QueueEntry>,
}

impl PropagationQueue {
    pub fn push(&mut self, side: Side, tuple: TupleId) {
        self.entries.push(QueueEntry { side, tuple });
    }

    /// Takes all pending entries, leaving the queue empty for the next
    /// cycle.
    pub fn take_entries(&mut self) -> Vec<QueueEntry> {
        std::mem::take(&mut self.entries)
    }
}

/// Mutable network surroundings a node handler works against: the tuple
/// pool, every downstream queue and the score ledger. The node's own state
/// is borrowed separately, so handlers can index and enqueue freely.
pub(crate) struct Ctx<'a, Sc: Score> {
    pub pool: &'a mut TuplePool,
    pub queues: &'a mut [PropagationQueue],
    pub ledger: &'a mut ScoreLedger<Sc>,
    /// Label of the node currently handling an event, for diagnostics.
    pub node: &'a str,
}

impl<'a, Sc: Score> Ctx<'a, Sc> {
    /// Creates a fresh output tuple and announces it downstream.
    pub fn create_out(&mut self, target: Target, facts: FactVec, slots: usize) -> TupleId {
        let out = self.pool.create(facts, slots);
        self.queues[target.node.index()].push(target.side, out);
        out
    }

    /// Announces an update of an output tuple downstream.
    ///
    /// CREATING and UPDATING tuples are already queued and stay as they
    /// are; an OK tuple transitions to UPDATING and is enqueued. Dying or
    /// dead tuples must not linger in any index, so seeing one here is an
    /// invariant violation.
    pub fn update_out(&mut self, target: Target, out: TupleId) -> Result<(), PropagationError> {
        match self.pool.state(out) {
            TupleState::Creating | TupleState::Updating => Ok(()),
            TupleState::Ok => {
                self.pool.set_state(out, TupleState::Updating);
                self.queues[target.node.index()].push(target.side, out);
                Ok(())
            }
            state => Err(self.impossible_state(out, state)),
        }
    }

    /// Announces a retract of an output tuple downstream.
    ///
    /// A CREATING tuple is killed before it ever propagates (ABORTING); an
    /// UPDATING tuple keeps its queue entry but will die instead; an OK
    /// tuple transitions to DYING and is enqueued.
    pub fn retract_out(&mut self, target: Target, out: TupleId) -> Result<(), PropagationError> {
        match self.pool.state(out) {
            TupleState::Creating => {
                self.pool.set_state(out, TupleState::Aborting);
                Ok(())
            }
            TupleState::Updating => {
                self.pool.set_state(out, TupleState::Dying);
                Ok(())
            }
            TupleState::Ok => {
                self.pool.set_state(out, TupleState::Dying);
                self.queues[target.node.index()].push(target.side, out);
                Ok(())
            }
            state => Err(self.impossible_state(out, state)),
        }
    }

    /// Snapshot of an indexer bucket, so handlers can mutate their node
    /// state while walking the candidates.
    pub fn snapshot(bucket: &[TupleId]) -> SmallVec<[TupleId; 8]> {
        bucket.iter().copied().collect()
    }

    pub fn impossible_state(&self, tuple: TupleId, state: TupleState) -> PropagationError {
        PropagationError::ImpossibleState {
            node: self.node.to_string(),
            tuple: self.pool.describe(tuple),
            state,
        }
    }

    pub fn internal(&self, message: impl Into<String>) -> PropagationError {
        PropagationError::Internal {
            node: self.node.to_string(),
            message: message.into(),
        }
    }

    fn slot_mismatch(
        &self,
        tuple: TupleId,
        slot: usize,
        expected: &'static str,
    ) -> PropagationError {
        PropagationError::SlotMismatch {
            node: self.node.to_string(),
            tuple: self.pool.describe(tuple),
            slot,
            expected,
            found: self.pool.slot(tuple, slot).kind(),
        }
    }

    /// Reads the key a tuple was indexed or grouped under.
    pub fn expect_key(&self, tuple: TupleId, slot: usize) -> Result<IndexKey, PropagationError> {
        match self.pool.slot(tuple, slot) {
            Slot::Key(key) => Ok(key.clone()),
            _ => Err(self.slot_mismatch(tuple, slot, "Key")),
        }
    }

    /// Takes the key slot, vacating it for a retract.
    pub fn take_key(&mut self, tuple: TupleId, slot: usize) -> Result<IndexKey, PropagationError> {
        match self.pool.take_slot(tuple, slot) {
            Slot::Key(key) => Ok(key),
            other => {
                self.pool.set_slot(tuple, slot, other);
                Err(self.slot_mismatch(tuple, slot, "Key"))
            }
        }
    }

    /// Reads the existence counter of a primary tuple.
    pub fn expect_counter(
        &self,
        tuple: TupleId,
        slot: usize,
    ) -> Result<ExistsCounter, PropagationError> {
        match self.pool.slot(tuple, slot) {
            Slot::ExistsCounter(counter) => Ok(*counter),
            _ => Err(self.slot_mismatch(tuple, slot, "ExistsCounter")),
        }
    }

    /// Reads the consumer's single output tuple for this input tuple.
    pub fn expect_out(&self, tuple: TupleId, slot: usize) -> Result<TupleId, PropagationError> {
        match self.pool.slot(tuple, slot) {
            Slot::OutTuple(out) => Ok(*out),
            _ => Err(self.slot_mismatch(tuple, slot, "OutTuple")),
        }
    }

    /// Takes the pending undo commands stored for this input tuple.
    pub fn take_undo(
        &mut self,
        tuple: TupleId,
        slot: usize,
    ) -> Result<Vec<UndoCommand>, PropagationError> {
        match self.pool.take_slot(tuple, slot) {
            Slot::Undo(commands) => Ok(commands),
            Slot::Vacant => Err(PropagationError::DoubleUndo {
                node: self.node.to_string(),
                tuple: self.pool.describe(tuple),
            }),
            other => {
                self.pool.set_slot(tuple, slot, other);
                Err(self.slot_mismatch(tuple, slot, "Undo"))
            }
        }
    }

    /// Wraps [`Indexer::remove`] failure into the invariant error.
    pub fn missing_index_entry(&self, tuple: TupleId, key: &IndexKey) -> PropagationError {
        PropagationError::MissingIndexEntry {
            node: self.node.to_string(),
            tuple: self.pool.describe(tuple),
            key: format!("{key:?}"),
        }
    }

    /// Clones the facts of an input tuple for a derived output tuple.
    pub fn facts_vec(&self, tuple: TupleId) -> FactVec {
        self.pool.facts_vec(tuple)
    }

    /// Compares two fact arrays by per-fact equality, the suppression test
    /// of map and flatten nodes.
    pub fn facts_equal(a: &[Fact], b: &[Fact]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x == y)
    }
}
