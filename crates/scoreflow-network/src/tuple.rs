//! Tuples, their lifecycle state machine and the pooled store slots.
//!
//! A tuple is a fixed-arity (1..=4) ordered grouping of facts owned by the
//! node that created it. Its **store** is a fixed array of slots reserved,
//! at network build time, for the tuple's one immediate consumer; slot
//! indices are static per edge, which is what keeps node-local per-tuple
//! state O(1). Tuples live in a slab pool addressed by [`TupleId`] so nodes
//! can reference each other's tuples without aliasing.

use smallvec::SmallVec;

use crate::collector::UndoCommand;
use crate::fact::Fact;
use crate::key::IndexKey;

/// Fact array of one tuple; arity never exceeds 4.
pub type FactVec = SmallVec<[Fact; 4]>;

/// Lifecycle state of a tuple within one settle cycle.
///
/// ```text
/// CREATING -> OK                    first downstream insert propagated
/// OK -> UPDATING -> OK              fact mutated, update propagated
/// OK -> DYING -> DEAD               retract propagated, tuple discarded
/// CREATING -> ABORTING -> DEAD      inserted and retracted in one cycle;
///                                   collapses to a pure no-op downstream
/// ```
///
/// Any event arriving for a DEAD tuple is a fatal invariant violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TupleState {
    Creating,
    Ok,
    Updating,
    Dying,
    Aborting,
    Dead,
}

/// Handle to a pooled tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TupleId(u32);

impl TupleId {
    /// Index into the pool slab.
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for TupleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// One store slot, written and read only by the tuple's consuming node.
pub enum Slot {
    /// Nothing cached; also the state of a filter slot while suppressed.
    Vacant,
    /// The consumer's output tuple spawned from this input tuple.
    OutTuple(TupleId),
    /// All output tuples spawned from this input tuple (flatten children).
    OutTupleList(Vec<TupleId>),
    /// The index/group key this tuple is currently bucketed under.
    Key(IndexKey),
    /// Existence bookkeeping of a primary tuple.
    ExistsCounter(ExistsCounter),
    /// Pending undo commands, one per collector of the consuming group node.
    Undo(Vec<UndoCommand>),
}

impl Slot {
    /// Variant name for slot-mismatch diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Slot::Vacant => "Vacant",
            Slot::OutTuple(_) => "OutTuple",
            Slot::OutTupleList(_) => "OutTupleList",
            Slot::Key(_) => "Key",
            Slot::ExistsCounter(_) => "ExistsCounter",
            Slot::Undo(_) => "Undo",
        }
    }
}

impl std::fmt::Debug for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Slot::OutTuple(id) => write!(f, "OutTuple({id})"),
            Slot::OutTupleList(ids) => write!(f, "OutTupleList(len {})", ids.len()),
            Slot::Key(key) => write!(f, "Key({key:?})"),
            Slot::ExistsCounter(c) => write!(f, "{c:?}"),
            Slot::Undo(cmds) => write!(f, "Undo(len {})", cmds.len()),
            Slot::Vacant => write!(f, "Vacant"),
        }
    }
}

/// Matching-count state of a primary tuple in an existence node.
#[derive(Debug, Clone, Copy)]
pub struct ExistsCounter {
    /// Number of secondary tuples currently matching this primary tuple.
    pub count: u32,
    /// The downstream tuple, present exactly while the threshold rule holds.
    pub out: Option<TupleId>,
}

struct Tuple {
    facts: FactVec,
    state: TupleState,
    store: SmallVec<[Slot; 2]>,
}

/// Slab of live tuples with id reuse.
///
/// Freed ids are recycled; a [`TupleId`] must not be dereferenced after the
/// drain loop freed it. Nodes uphold that by clearing every reference to a
/// tuple while handling its retract.
#[derive(Default)]
pub struct TuplePool {
    entries: Vec<Option<Tuple>>,
    free: Vec<u32>,
}

impl TuplePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a tuple in state CREATING with `slots` vacant store slots.
    pub fn create(&mut self, facts: FactVec, slots: usize) -> TupleId {
        let tuple = Tuple {
            facts,
            state: TupleState::Creating,
            store: std::iter::repeat_with(|| Slot::Vacant).take(slots).collect(),
        };
        match self.free.pop() {
            Some(index) => {
                self.entries[index as usize] = Some(tuple);
                TupleId(index)
            }
            None => {
                self.entries.push(Some(tuple));
                TupleId((self.entries.len() - 1) as u32)
            }
        }
    }

    fn entry(&self, id: TupleId) -> &Tuple {
        self.entries[id.index()]
            .as_ref()
            .unwrap_or_else(|| unreachable!("tuple {id} used after free"))
    }

    fn entry_mut(&mut self, id: TupleId) -> &mut Tuple {
        self.entries[id.index()]
            .as_mut()
            .unwrap_or_else(|| unreachable!("tuple {id} used after free"))
    }

    pub fn state(&self, id: TupleId) -> TupleState {
        self.entry(id).state
    }

    pub fn set_state(&mut self, id: TupleId, state: TupleState) {
        self.entry_mut(id).state = state;
    }

    pub fn facts(&self, id: TupleId) -> &[Fact] {
        &self.entry(id).facts
    }

    /// Clones the fact array, for building a derived tuple.
    pub fn facts_vec(&self, id: TupleId) -> FactVec {
        self.entry(id).facts.clone()
    }

    /// Replaces the fact array in place (updates flowing through transform
    /// nodes rewrite derived facts).
    pub fn set_facts(&mut self, id: TupleId, facts: FactVec) {
        self.entry_mut(id).facts = facts;
    }

    pub fn arity(&self, id: TupleId) -> usize {
        self.entry(id).facts.len()
    }

    pub fn slot(&self, id: TupleId, index: usize) -> &Slot {
        &self.entry(id).store[index]
    }

    pub fn slot_mut(&mut self, id: TupleId, index: usize) -> &mut Slot {
        &mut self.entry_mut(id).store[index]
    }

    pub fn set_slot(&mut self, id: TupleId, index: usize, slot: Slot) {
        self.entry_mut(id).store[index] = slot;
    }

    /// Takes a slot out, leaving it vacant.
    pub fn take_slot(&mut self, id: TupleId, index: usize) -> Slot {
        std::mem::replace(&mut self.entry_mut(id).store[index], Slot::Vacant)
    }

    /// Discards a tuple. Only the drain loop frees tuples, after DEAD.
    pub fn free(&mut self, id: TupleId) {
        debug_assert_eq!(self.state(id), TupleState::Dead);
        self.entries[id.index()] = None;
        self.free.push(id.index() as u32);
    }

    /// Number of live tuples; drives leak assertions in tests.
    pub fn live_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    /// Debug rendering of a tuple for invariant-violation reports.
    pub fn describe(&self, id: TupleId) -> String {
        let tuple = self.entry(id);
        let names: Vec<&str> = tuple.facts.iter().map(|f| f.type_name()).collect();
        format!("{id}[{}]", names.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    #[test]
    fn test_create_starts_creating_with_vacant_slots() {
        let mut pool = TuplePool::new();
        let id = pool.create(smallvec![Fact::new(1i64)], 2);
        assert_eq!(pool.state(id), TupleState::Creating);
        assert_eq!(pool.arity(id), 1);
        assert!(matches!(pool.slot(id, 0), Slot::Vacant));
        assert!(matches!(pool.slot(id, 1), Slot::Vacant));
    }

    #[test]
    fn test_slot_take_leaves_vacant() {
        let mut pool = TuplePool::new();
        let id = pool.create(smallvec![Fact::new(1i64)], 1);
        pool.set_slot(id, 0, Slot::Key(IndexKey::Int(9)));
        let taken = pool.take_slot(id, 0);
        assert!(matches!(taken, Slot::Key(IndexKey::Int(9))));
        assert!(matches!(pool.slot(id, 0), Slot::Vacant));
    }

    #[test]
    fn test_free_recycles_ids() {
        let mut pool = TuplePool::new();
        let a = pool.create(smallvec![Fact::new(1i64)], 0);
        pool.set_state(a, TupleState::Dead);
        pool.free(a);
        assert_eq!(pool.live_count(), 0);
        let b = pool.create(smallvec![Fact::new(2i64)], 0);
        assert_eq!(a, b);
        assert_eq!(pool.live_count(), 1);
    }
}
