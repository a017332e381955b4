//! Hash indexer: key-grouped tuple buckets for joins and existence checks.
//!
//! Invariant: a tuple sits in exactly one bucket per indexer it
//! participates in, and is removed before its key may change. The nodes
//! enforce that by caching the put key in a store slot and removing under
//! the cached key.

use std::collections::HashMap;

use crate::key::IndexKey;
use crate::tuple::TupleId;

/// Buckets of tuples sharing an extracted key.
#[derive(Default)]
pub struct Indexer {
    buckets: HashMap<IndexKey, Vec<TupleId>>,
}

impl Indexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a tuple to the bucket for `key`, creating the bucket on demand.
    pub fn put(&mut self, key: IndexKey, id: TupleId) {
        self.buckets.entry(key).or_default().push(id);
    }

    /// Removes a tuple from the bucket for `key`; empty buckets are dropped
    /// so bucket existence mirrors occupancy. Returns false when the tuple
    /// was not there, which callers surface as an invariant violation.
    #[must_use]
    pub fn remove(&mut self, key: &IndexKey, id: TupleId) -> bool {
        let Some(bucket) = self.buckets.get_mut(key) else {
            return false;
        };
        let Some(position) = bucket.iter().position(|t| *t == id) else {
            return false;
        };
        bucket.swap_remove(position);
        if bucket.is_empty() {
            self.buckets.remove(key);
        }
        true
    }

    /// The tuples currently sharing `key`; empty when no bucket exists.
    pub fn bucket(&self, key: &IndexKey) -> &[TupleId] {
        self.buckets.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of tuples under `key`.
    pub fn count(&self, key: &IndexKey) -> usize {
        self.bucket(key).len()
    }

    /// Number of non-empty buckets.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fact::Fact;
    use crate::tuple::TuplePool;
    use smallvec::smallvec;

    fn tuple(pool: &mut TuplePool) -> TupleId {
        pool.create(smallvec![Fact::new(0i64)], 0)
    }

    #[test]
    fn test_put_and_bucket_lookup() {
        let mut pool = TuplePool::new();
        let mut indexer = Indexer::new();
        let a = tuple(&mut pool);
        let b = tuple(&mut pool);
        let c = tuple(&mut pool);
        indexer.put(IndexKey::Int(1), a);
        indexer.put(IndexKey::Int(1), b);
        indexer.put(IndexKey::Int(2), c);

        assert_eq!(indexer.bucket(&IndexKey::Int(1)), &[a, b]);
        assert_eq!(indexer.count(&IndexKey::Int(2)), 1);
        assert_eq!(indexer.count(&IndexKey::Int(3)), 0);
        assert_eq!(indexer.bucket_count(), 2);
    }

    #[test]
    fn test_remove_drops_empty_bucket() {
        let mut pool = TuplePool::new();
        let mut indexer = Indexer::new();
        let a = tuple(&mut pool);
        indexer.put(IndexKey::Unit, a);
        assert!(indexer.remove(&IndexKey::Unit, a));
        assert!(indexer.is_empty());
        assert_eq!(indexer.bucket_count(), 0);
    }

    #[test]
    fn test_remove_missing_reports_false() {
        let mut pool = TuplePool::new();
        let mut indexer = Indexer::new();
        let a = tuple(&mut pool);
        let b = tuple(&mut pool);
        indexer.put(IndexKey::Int(1), a);
        assert!(!indexer.remove(&IndexKey::Int(1), b));
        assert!(!indexer.remove(&IndexKey::Int(2), a));
    }
}
