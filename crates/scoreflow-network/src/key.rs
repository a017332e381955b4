//! Index keys for joins, existence checks and grouping.
//!
//! Key extractors are user closures, but the keys they produce are a closed
//! enum so indexers and group maps can hash them without knowing the domain
//! types. [`IndexKey::Unit`] doubles as the unindexed mode of joins and
//! existence checks (everything lands in one bucket) and as the bucket key
//! of a keyless group.

use std::rc::Rc;

use crate::fact::Fact;

/// A hashable key extracted from a tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IndexKey {
    /// The single shared bucket; every tuple maps to it.
    Unit,
    Bool(bool),
    Int(i64),
    Text(Rc<str>),
    /// Pointer identity of a fact; joins on "the same object".
    FactIdentity(usize),
    /// Composite of two keys; nest for wider composites.
    Pair(Box<(IndexKey, IndexKey)>),
}

impl IndexKey {
    /// Builds a composite key out of two parts.
    pub fn pair(first: IndexKey, second: IndexKey) -> Self {
        IndexKey::Pair(Box::new((first, second)))
    }

    /// Keys on the identity of a fact itself.
    pub fn of_fact(fact: &Fact) -> Self {
        IndexKey::FactIdentity(fact.identity())
    }
}

impl From<i64> for IndexKey {
    fn from(value: i64) -> Self {
        IndexKey::Int(value)
    }
}

impl From<u32> for IndexKey {
    fn from(value: u32) -> Self {
        IndexKey::Int(value as i64)
    }
}

impl From<usize> for IndexKey {
    fn from(value: usize) -> Self {
        IndexKey::Int(value as i64)
    }
}

impl From<bool> for IndexKey {
    fn from(value: bool) -> Self {
        IndexKey::Bool(value)
    }
}

impl From<&str> for IndexKey {
    fn from(value: &str) -> Self {
        IndexKey::Text(Rc::from(value))
    }
}

impl From<String> for IndexKey {
    fn from(value: String) -> Self {
        IndexKey::Text(Rc::from(value.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_keys_hash_and_compare_by_value() {
        let mut map = HashMap::new();
        map.insert(IndexKey::from("alice"), 1);
        map.insert(IndexKey::pair(IndexKey::from(3i64), IndexKey::from(true)), 2);

        assert_eq!(map.get(&IndexKey::from("alice")), Some(&1));
        assert_eq!(
            map.get(&IndexKey::pair(IndexKey::from(3i64), IndexKey::from(true))),
            Some(&2)
        );
        assert_eq!(map.get(&IndexKey::from("bob")), None);
    }

    #[test]
    fn test_fact_identity_key() {
        let fact = Fact::new(5i64);
        let alias = fact.clone();
        let other = Fact::new(5i64);
        assert_eq!(IndexKey::of_fact(&fact), IndexKey::of_fact(&alias));
        assert_ne!(IndexKey::of_fact(&fact), IndexKey::of_fact(&other));
    }
}
