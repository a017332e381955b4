//! Collectors: declarative aggregates with exactly reversible accumulation.
//!
//! A group node carries zero or more collectors. Each collector contributes
//! one accumulator per bucket and, per contributing tuple, one undo command
//! that is the exact inverse of the accumulate call that produced it.
//! Built-in collectors use small tagged commands ("subtract this i64",
//! "remove this element") so exactness is auditable; user-supplied
//! collectors fall back to a boxed closure.
//!
//! Numeric semantics follow the declared type's own arithmetic: an `f64`
//! sum undoes by subtracting the exact value previously added, never by
//! recomputing the bucket.

use std::any::Any;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::error::PropagationError;
use crate::fact::Fact;

/// Closure extracting a numeric value from a tuple's facts.
pub type ValueFn<T> = Rc<dyn Fn(&[Fact]) -> T>;

/// A user-supplied collector, boxed because its accumulator shape is opaque
/// to the network.
pub trait CustomCollector {
    /// Produces an empty accumulator.
    fn init(&self) -> Box<dyn Any>;
    /// Folds one tuple in; returns the closure that exactly reverses it.
    fn accumulate(&self, acc: &mut dyn Any, facts: &[Fact]) -> Box<dyn FnOnce(&mut dyn Any)>;
    /// Reads the current result out of the accumulator.
    fn finish(&self, acc: &dyn Any) -> Fact;
}

/// A collector choice, fixed at network build time.
#[derive(Clone)]
pub enum CollectorSpec {
    /// Counts contributing tuples.
    Count,
    /// Sums an `i64` per tuple.
    SumI64(ValueFn<i64>),
    /// Sums an `f64` per tuple.
    SumF64(ValueFn<f64>),
    /// Arithmetic mean of an `f64` per tuple.
    Average(ValueFn<f64>),
    /// Minimum of an `i64` per tuple.
    MinI64(ValueFn<i64>),
    /// Maximum of an `i64` per tuple.
    MaxI64(ValueFn<i64>),
    /// User-supplied collector.
    Custom(Rc<dyn CustomCollector>),
}

/// Counts contributing tuples; result fact is an `i64`.
pub fn count() -> CollectorSpec {
    CollectorSpec::Count
}

/// Sums an `i64` extracted per tuple; result fact is an `i64`.
pub fn sum_i64(f: impl Fn(&[Fact]) -> i64 + 'static) -> CollectorSpec {
    CollectorSpec::SumI64(Rc::new(f))
}

/// Sums an `f64` extracted per tuple; result fact is an `f64`.
pub fn sum_f64(f: impl Fn(&[Fact]) -> f64 + 'static) -> CollectorSpec {
    CollectorSpec::SumF64(Rc::new(f))
}

/// Averages an `f64` extracted per tuple; result fact is an `f64`.
pub fn average(f: impl Fn(&[Fact]) -> f64 + 'static) -> CollectorSpec {
    CollectorSpec::Average(Rc::new(f))
}

/// Minimum of an `i64` extracted per tuple; result fact is an `i64`.
pub fn min_i64(f: impl Fn(&[Fact]) -> i64 + 'static) -> CollectorSpec {
    CollectorSpec::MinI64(Rc::new(f))
}

/// Maximum of an `i64` extracted per tuple; result fact is an `i64`.
pub fn max_i64(f: impl Fn(&[Fact]) -> i64 + 'static) -> CollectorSpec {
    CollectorSpec::MaxI64(Rc::new(f))
}

/// Wraps a user-supplied collector.
pub fn custom(collector: impl CustomCollector + 'static) -> CollectorSpec {
    CollectorSpec::Custom(Rc::new(collector))
}

impl std::fmt::Debug for CollectorSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CollectorSpec::Count => "count",
            CollectorSpec::SumI64(_) => "sum_i64",
            CollectorSpec::SumF64(_) => "sum_f64",
            CollectorSpec::Average(_) => "average",
            CollectorSpec::MinI64(_) => "min_i64",
            CollectorSpec::MaxI64(_) => "max_i64",
            CollectorSpec::Custom(_) => "custom",
        };
        f.write_str(name)
    }
}

/// Per-bucket running state of one collector.
pub enum AccumulatorState {
    Count(i64),
    SumI64(i64),
    SumF64(f64),
    Average { sum: f64, count: i64 },
    /// Value multiset shared by min and max; finish picks an end.
    OrderedI64(BTreeMap<i64, u32>),
    Custom(Box<dyn Any>),
}

impl std::fmt::Debug for AccumulatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccumulatorState::Count(n) => write!(f, "Count({n})"),
            AccumulatorState::SumI64(n) => write!(f, "SumI64({n})"),
            AccumulatorState::SumF64(n) => write!(f, "SumF64({n})"),
            AccumulatorState::Average { sum, count } => write!(f, "Average({sum}/{count})"),
            AccumulatorState::OrderedI64(m) => write!(f, "OrderedI64({} distinct)", m.len()),
            AccumulatorState::Custom(_) => write!(f, "Custom"),
        }
    }
}

/// The exact inverse of one accumulate call.
pub enum UndoCommand {
    DecCount,
    SubI64(i64),
    SubF64(f64),
    SubAverage(f64),
    RemoveI64(i64),
    Boxed(Box<dyn FnOnce(&mut dyn Any)>),
}

impl std::fmt::Debug for UndoCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UndoCommand::DecCount => write!(f, "DecCount"),
            UndoCommand::SubI64(v) => write!(f, "SubI64({v})"),
            UndoCommand::SubF64(v) => write!(f, "SubF64({v})"),
            UndoCommand::SubAverage(v) => write!(f, "SubAverage({v})"),
            UndoCommand::RemoveI64(v) => write!(f, "RemoveI64({v})"),
            UndoCommand::Boxed(_) => write!(f, "Boxed"),
        }
    }
}

fn state_mismatch(node: &str, expected: &'static str) -> PropagationError {
    PropagationError::Internal {
        node: node.to_string(),
        message: format!("accumulator is not a {expected}"),
    }
}

impl CollectorSpec {
    /// Produces the empty accumulator for this collector.
    pub fn init(&self) -> AccumulatorState {
        match self {
            CollectorSpec::Count => AccumulatorState::Count(0),
            CollectorSpec::SumI64(_) => AccumulatorState::SumI64(0),
            CollectorSpec::SumF64(_) => AccumulatorState::SumF64(0.0),
            CollectorSpec::Average(_) => AccumulatorState::Average { sum: 0.0, count: 0 },
            CollectorSpec::MinI64(_) | CollectorSpec::MaxI64(_) => {
                AccumulatorState::OrderedI64(BTreeMap::new())
            }
            CollectorSpec::Custom(c) => AccumulatorState::Custom(c.init()),
        }
    }

    /// Folds one tuple into the accumulator; the returned command exactly
    /// reverses this call.
    pub fn accumulate(
        &self,
        node: &str,
        acc: &mut AccumulatorState,
        facts: &[Fact],
    ) -> Result<UndoCommand, PropagationError> {
        match (self, acc) {
            (CollectorSpec::Count, AccumulatorState::Count(n)) => {
                *n += 1;
                Ok(UndoCommand::DecCount)
            }
            (CollectorSpec::SumI64(f), AccumulatorState::SumI64(sum)) => {
                let value = f(facts);
                *sum += value;
                Ok(UndoCommand::SubI64(value))
            }
            (CollectorSpec::SumF64(f), AccumulatorState::SumF64(sum)) => {
                let value = f(facts);
                *sum += value;
                Ok(UndoCommand::SubF64(value))
            }
            (CollectorSpec::Average(f), AccumulatorState::Average { sum, count }) => {
                let value = f(facts);
                *sum += value;
                *count += 1;
                Ok(UndoCommand::SubAverage(value))
            }
            (CollectorSpec::MinI64(f) | CollectorSpec::MaxI64(f), AccumulatorState::OrderedI64(values)) => {
                let value = f(facts);
                *values.entry(value).or_insert(0) += 1;
                Ok(UndoCommand::RemoveI64(value))
            }
            (CollectorSpec::Custom(c), AccumulatorState::Custom(acc)) => {
                Ok(UndoCommand::Boxed(c.accumulate(acc.as_mut(), facts)))
            }
            _ => Err(state_mismatch(node, "matching accumulator kind")),
        }
    }

    /// Reads the current result as a fact.
    ///
    /// Only called while the bucket has contributors, so ordered collectors
    /// are never asked to finish an empty multiset.
    pub fn finish(
        &self,
        node: &str,
        acc: &AccumulatorState,
    ) -> Result<Fact, PropagationError> {
        match (self, acc) {
            (CollectorSpec::Count, AccumulatorState::Count(n)) => Ok(Fact::new(*n)),
            (CollectorSpec::SumI64(_), AccumulatorState::SumI64(sum)) => Ok(Fact::new(*sum)),
            (CollectorSpec::SumF64(_), AccumulatorState::SumF64(sum)) => Ok(Fact::new(*sum)),
            (CollectorSpec::Average(_), AccumulatorState::Average { sum, count }) => {
                if *count == 0 {
                    return Err(state_mismatch(node, "non-empty average"));
                }
                Ok(Fact::new(*sum / *count as f64))
            }
            (CollectorSpec::MinI64(_), AccumulatorState::OrderedI64(values)) => values
                .keys()
                .next()
                .map(|v| Fact::new(*v))
                .ok_or_else(|| state_mismatch(node, "non-empty minimum")),
            (CollectorSpec::MaxI64(_), AccumulatorState::OrderedI64(values)) => values
                .keys()
                .next_back()
                .map(|v| Fact::new(*v))
                .ok_or_else(|| state_mismatch(node, "non-empty maximum")),
            (CollectorSpec::Custom(c), AccumulatorState::Custom(acc)) => {
                Ok(c.finish(acc.as_ref()))
            }
            _ => Err(state_mismatch(node, "matching accumulator kind")),
        }
    }
}

impl UndoCommand {
    /// Applies the inverse to the accumulator. Consumes the command: each
    /// undo runs exactly once.
    pub fn apply(
        self,
        node: &str,
        acc: &mut AccumulatorState,
    ) -> Result<(), PropagationError> {
        match (self, acc) {
            (UndoCommand::DecCount, AccumulatorState::Count(n)) => {
                *n -= 1;
                Ok(())
            }
            (UndoCommand::SubI64(value), AccumulatorState::SumI64(sum)) => {
                *sum -= value;
                Ok(())
            }
            (UndoCommand::SubF64(value), AccumulatorState::SumF64(sum)) => {
                *sum -= value;
                Ok(())
            }
            (UndoCommand::SubAverage(value), AccumulatorState::Average { sum, count }) => {
                *sum -= value;
                *count -= 1;
                Ok(())
            }
            (UndoCommand::RemoveI64(value), AccumulatorState::OrderedI64(values)) => {
                match values.get_mut(&value) {
                    Some(n) if *n > 1 => {
                        *n -= 1;
                        Ok(())
                    }
                    Some(_) => {
                        values.remove(&value);
                        Ok(())
                    }
                    None => Err(state_mismatch(node, "present multiset element")),
                }
            }
            (UndoCommand::Boxed(f), AccumulatorState::Custom(acc)) => {
                f(acc.as_mut());
                Ok(())
            }
            _ => Err(state_mismatch(node, "matching undo kind")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts_of(value: i64) -> Vec<Fact> {
        vec![Fact::new(value)]
    }

    fn as_i64(fact: &Fact) -> i64 {
        *fact.downcast_ref::<i64>().unwrap()
    }

    fn as_f64(fact: &Fact) -> f64 {
        *fact.downcast_ref::<f64>().unwrap()
    }

    #[test]
    fn test_count_accumulate_and_undo() {
        let spec = count();
        let mut acc = spec.init();
        let undo_a = spec.accumulate("n", &mut acc, &facts_of(1)).unwrap();
        let _undo_b = spec.accumulate("n", &mut acc, &facts_of(2)).unwrap();
        assert_eq!(as_i64(&spec.finish("n", &acc).unwrap()), 2);
        undo_a.apply("n", &mut acc).unwrap();
        assert_eq!(as_i64(&spec.finish("n", &acc).unwrap()), 1);
    }

    #[test]
    fn test_sum_undo_is_exact_inverse() {
        let spec = sum_i64(|facts| *facts[0].downcast_ref::<i64>().unwrap());
        let mut acc = spec.init();
        let undo = spec.accumulate("n", &mut acc, &facts_of(41)).unwrap();
        undo.apply("n", &mut acc).unwrap();
        assert_eq!(as_i64(&spec.finish("n", &acc).unwrap()), 0);
    }

    #[test]
    fn test_f64_sum_undoes_by_subtracting_the_added_value() {
        let spec = sum_f64(|facts| *facts[0].downcast_ref::<f64>().unwrap());
        let mut acc = spec.init();
        let base = spec
            .accumulate("n", &mut acc, &[Fact::new(0.5f64)])
            .unwrap();
        let extra = spec
            .accumulate("n", &mut acc, &[Fact::new(0.25f64)])
            .unwrap();
        extra.apply("n", &mut acc).unwrap();
        // Dyadic values, so the additions round-trip bit for bit.
        assert_eq!(as_f64(&spec.finish("n", &acc).unwrap()), 0.5);
        base.apply("n", &mut acc).unwrap();
        assert_eq!(as_f64(&spec.finish("n", &acc).unwrap()), 0.0);
    }

    #[test]
    fn test_average() {
        let spec = average(|facts| *facts[0].downcast_ref::<i64>().unwrap() as f64);
        let mut acc = spec.init();
        let _u1 = spec.accumulate("n", &mut acc, &facts_of(2)).unwrap();
        let u2 = spec.accumulate("n", &mut acc, &facts_of(4)).unwrap();
        assert_eq!(as_f64(&spec.finish("n", &acc).unwrap()), 3.0);
        u2.apply("n", &mut acc).unwrap();
        assert_eq!(as_f64(&spec.finish("n", &acc).unwrap()), 2.0);
    }

    #[test]
    fn test_min_max_track_duplicates() {
        let min = min_i64(|facts| *facts[0].downcast_ref::<i64>().unwrap());
        let max = max_i64(|facts| *facts[0].downcast_ref::<i64>().unwrap());
        let mut acc = min.init();
        let u3a = min.accumulate("n", &mut acc, &facts_of(3)).unwrap();
        let _u3b = min.accumulate("n", &mut acc, &facts_of(3)).unwrap();
        let _u9 = min.accumulate("n", &mut acc, &facts_of(9)).unwrap();
        assert_eq!(as_i64(&min.finish("n", &acc).unwrap()), 3);
        assert_eq!(as_i64(&max.finish("n", &acc).unwrap()), 9);
        // Removing one of two 3s keeps the minimum at 3.
        u3a.apply("n", &mut acc).unwrap();
        assert_eq!(as_i64(&min.finish("n", &acc).unwrap()), 3);
    }

    #[test]
    fn test_removing_absent_element_is_an_error() {
        let spec = min_i64(|facts| *facts[0].downcast_ref::<i64>().unwrap());
        let mut acc = spec.init();
        let err = UndoCommand::RemoveI64(5).apply("n", &mut acc);
        assert!(err.is_err());
    }

    #[test]
    fn test_custom_collector_round_trip() {
        struct Concat;
        impl CustomCollector for Concat {
            fn init(&self) -> Box<dyn Any> {
                Box::new(String::new())
            }
            fn accumulate(
                &self,
                acc: &mut dyn Any,
                facts: &[Fact],
            ) -> Box<dyn FnOnce(&mut dyn Any)> {
                let piece = facts[0].downcast_ref::<String>().unwrap().clone();
                let buffer = acc.downcast_mut::<String>().unwrap();
                buffer.push_str(&piece);
                Box::new(move |acc| {
                    let buffer = acc.downcast_mut::<String>().unwrap();
                    let keep = buffer.len() - piece.len();
                    buffer.truncate(keep);
                })
            }
            fn finish(&self, acc: &dyn Any) -> Fact {
                Fact::new(acc.downcast_ref::<String>().unwrap().clone())
            }
        }

        let spec = custom(Concat);
        let mut acc = spec.init();
        let _ua = spec
            .accumulate("n", &mut acc, &[Fact::new("ab".to_string())])
            .unwrap();
        let ub = spec
            .accumulate("n", &mut acc, &[Fact::new("cd".to_string())])
            .unwrap();
        assert_eq!(
            spec.finish("n", &acc)
                .unwrap()
                .downcast_ref::<String>()
                .unwrap(),
            "abcd"
        );
        ub.apply("n", &mut acc).unwrap();
        assert_eq!(
            spec.finish("n", &acc)
                .unwrap()
                .downcast_ref::<String>()
                .unwrap(),
            "ab"
        );
    }
}
