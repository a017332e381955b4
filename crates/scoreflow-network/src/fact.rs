//! Opaque, identity-compared domain facts.
//!
//! The network never looks inside a fact; it only moves facts around,
//! extracts keys from them through user-supplied closures and hands them
//! back out in constraint matches. A [`Fact`] is therefore a cheap clone of
//! a reference-counted payload. Identity (pointer) comparison is what the
//! fact sources use; value comparison is opt-in per fact and powers the
//! map-output suppression and flatten diffing of the transform nodes.
//!
//! A fact that must change over its lifetime (a planning variable being
//! re-assigned) keeps interior mutability inside the user type (`Cell`,
//! `RefCell`); the external collaborator then reports the change through
//! `Network::update`.

use std::any::{Any, TypeId};
use std::fmt;
use std::rc::Rc;

/// An opaque domain object flowing through the network.
#[derive(Clone)]
pub struct Fact {
    payload: Rc<dyn Any>,
    type_name: &'static str,
    eq_fn: fn(&Fact, &Fact) -> bool,
}

fn value_eq<T: Any + PartialEq>(a: &Fact, b: &Fact) -> bool {
    match (a.downcast_ref::<T>(), b.downcast_ref::<T>()) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

fn identity_eq(a: &Fact, b: &Fact) -> bool {
    a.identity() == b.identity()
}

impl Fact {
    /// Wraps a value with value-equality semantics.
    ///
    /// Equality of two facts of the same type compares the payloads with
    /// `PartialEq`. This is the constructor to use for facts that pass
    /// through map or flatten nodes, so unchanged outputs can be detected
    /// and suppressed.
    pub fn new<T: Any + PartialEq>(value: T) -> Self {
        Fact {
            payload: Rc::new(value),
            type_name: std::any::type_name::<T>(),
            eq_fn: value_eq::<T>,
        }
    }

    /// Wraps a value with identity-equality semantics.
    ///
    /// For domain types without a meaningful `PartialEq`; two facts are
    /// equal only when they share the same payload allocation.
    pub fn by_identity<T: Any>(value: T) -> Self {
        Fact {
            payload: Rc::new(value),
            type_name: std::any::type_name::<T>(),
            eq_fn: identity_eq,
        }
    }

    /// The `TypeId` of the wrapped value, used to route facts to sources.
    pub fn fact_type(&self) -> TypeId {
        self.payload.as_ref().type_id()
    }

    /// Human-readable name of the wrapped type, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Pointer identity of the payload allocation.
    pub fn identity(&self) -> usize {
        Rc::as_ptr(&self.payload) as *const () as usize
    }

    /// Borrows the payload as `T`, if it is one.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }

    /// Returns true when the payload is a `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.payload.is::<T>()
    }

    /// Returns true when both facts share one payload allocation.
    pub fn same_identity(&self, other: &Fact) -> bool {
        Rc::ptr_eq(&self.payload, &other.payload)
    }
}

impl PartialEq for Fact {
    fn eq(&self, other: &Self) -> bool {
        if self.fact_type() != other.fact_type() {
            return false;
        }
        (self.eq_fn)(self, other)
    }
}

impl fmt::Debug for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fact<{}>@{:x}", self.type_name, self.identity())
    }
}

/// Typed access into the fact array of a tuple.
///
/// User closures receive tuples as `&[Fact]`; this helper does the downcast
/// dance for them. A wrong index or type is a bug in the closure, so it
/// panics with a descriptive message rather than returning an error.
///
/// # Example
///
/// ```
/// use scoreflow_network::{Fact, FactAccess};
///
/// #[derive(PartialEq)]
/// struct Shift { day: u32 }
///
/// let facts = vec![Fact::new(Shift { day: 3 })];
/// assert_eq!(facts.get_as::<Shift>(0).day, 3);
/// ```
pub trait FactAccess {
    /// Borrows fact `index` as a `T`.
    ///
    /// # Panics
    /// Panics when the index is out of range or the fact is not a `T`.
    fn get_as<T: Any>(&self, index: usize) -> &T;
}

impl FactAccess for [Fact] {
    fn get_as<T: Any>(&self, index: usize) -> &T {
        let fact = self.get(index).unwrap_or_else(|| {
            panic!(
                "fact index {index} out of range for tuple of arity {}",
                self.len()
            )
        });
        fact.downcast_ref::<T>().unwrap_or_else(|| {
            panic!(
                "fact {index} is a {}, not a {}",
                fact.type_name(),
                std::any::type_name::<T>()
            )
        })
    }
}
