//! Randomized equivalence tests: drive a network with random fact churn and
//! check, after every settle, that the incremental score equals the score a
//! from-scratch evaluation of the current facts produces.

use std::cell::Cell;
use std::collections::HashMap;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use scoreflow_core::{ConstraintRef, SimpleScore};

use crate::builder::{JoinSpec, NetworkBuilder};
use crate::collector::sum_i64;
use crate::fact::{Fact, FactAccess};
use crate::key::IndexKey;
use crate::network::Network;

#[derive(Debug, PartialEq)]
struct Shift {
    employee: Cell<i64>,
    hours: Cell<i64>,
}

fn shift(employee: i64, hours: i64) -> Fact {
    Fact::new(Shift {
        employee: Cell::new(employee),
        hours: Cell::new(hours),
    })
}

fn shift_of(fact: &Fact) -> &Shift {
    fact.downcast_ref::<Shift>().unwrap()
}

const OVERTIME_LIMIT: i64 = 10;

/// Three constraints exercising grouping, joining with a residual, and
/// distinct-key rewards, all over one fact type.
fn build_network() -> Network<SimpleScore> {
    let mut builder = NetworkBuilder::<SimpleScore>::new();
    let employee_key = |facts: &[Fact]| IndexKey::Int(facts.get_as::<Shift>(0).employee.get());

    let for_overtime = builder.for_each::<Shift>();
    let per_employee = builder.group_by(
        for_overtime,
        employee_key,
        vec![sum_i64(|facts| facts.get_as::<Shift>(0).hours.get())],
    );
    let overloaded = builder.filter(per_employee, |facts| {
        *facts.get_as::<i64>(1) > OVERTIME_LIMIT
    });
    builder.penalize_by(
        overloaded,
        ConstraintRef::new("fuzz", "Overtime"),
        |facts| SimpleScore::of(*facts.get_as::<i64>(1) - OVERTIME_LIMIT),
    );

    let join_left = builder.for_each::<Shift>();
    let join_right = builder.for_each::<Shift>();
    let stacked = builder.join(
        join_left,
        join_right,
        JoinSpec::on(employee_key, employee_key).filtering(|left, right| {
            left.get_as::<Shift>(0).hours.get() < right.get_as::<Shift>(0).hours.get()
        }),
    );
    builder.penalize(
        stacked,
        ConstraintRef::new("fuzz", "Stacked shifts"),
        SimpleScore::ONE,
    );

    let for_staffing = builder.for_each::<Shift>();
    let staffed = builder.group_by(for_staffing, employee_key, vec![]);
    builder.reward(
        staffed,
        ConstraintRef::new("fuzz", "Staffed employee"),
        SimpleScore::ONE,
    );

    builder.build().unwrap()
}

/// The same three constraints evaluated naively over the full fact list.
fn reference_score(shifts: &[Fact]) -> SimpleScore {
    let mut total = 0i64;

    let mut hours_per_employee: HashMap<i64, i64> = HashMap::new();
    for fact in shifts {
        let shift = shift_of(fact);
        *hours_per_employee.entry(shift.employee.get()).or_insert(0) += shift.hours.get();
    }
    for hours in hours_per_employee.values() {
        if *hours > OVERTIME_LIMIT {
            total -= hours - OVERTIME_LIMIT;
        }
    }

    for left in shifts {
        for right in shifts {
            let (l, r) = (shift_of(left), shift_of(right));
            if l.employee.get() == r.employee.get() && l.hours.get() < r.hours.get() {
                total -= 1;
            }
        }
    }

    total += hours_per_employee.len() as i64;
    SimpleScore::of(total)
}

fn run_fuzz(seed: u64, steps: usize) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut network = build_network();
    let mut live: Vec<Fact> = Vec::new();

    for step in 0..steps {
        match rng.random_range(0..4u8) {
            // Insert a fresh shift.
            0 => {
                let fact = shift(rng.random_range(0..5), rng.random_range(1..9));
                network.insert(&fact).unwrap();
                live.push(fact);
            }
            // Move a shift to another employee.
            1 if !live.is_empty() => {
                let fact = &live[rng.random_range(0..live.len())];
                shift_of(fact).employee.set(rng.random_range(0..5));
                network.update(fact).unwrap();
            }
            // Change a shift's hours.
            2 if !live.is_empty() => {
                let fact = &live[rng.random_range(0..live.len())];
                shift_of(fact).hours.set(rng.random_range(1..9));
                network.update(fact).unwrap();
            }
            // Retract a shift.
            3 if !live.is_empty() => {
                let fact = live.swap_remove(rng.random_range(0..live.len()));
                network.retract(&fact).unwrap();
            }
            _ => continue,
        }
        let incremental = network.settle().unwrap();
        let expected = reference_score(&live);
        assert_eq!(
            incremental, expected,
            "diverged at step {step} with {} live facts",
            live.len()
        );
    }

    // A rebuilt network over the surviving facts agrees as well.
    let mut rebuilt = build_network();
    for fact in &live {
        rebuilt.insert(fact).unwrap();
    }
    assert_eq!(rebuilt.settle().unwrap(), network.score());

    // Draining the network leaves nothing behind.
    for fact in live.drain(..) {
        network.retract(&fact).unwrap();
    }
    assert_eq!(network.settle().unwrap(), SimpleScore::ZERO);
    assert_eq!(network.live_tuple_count(), 0);
}

#[test]
fn test_incremental_score_matches_reference_seed_1() {
    run_fuzz(1, 300);
}

#[test]
fn test_incremental_score_matches_reference_seed_42() {
    run_fuzz(42, 300);
}

#[test]
fn test_batched_changes_settle_to_the_reference_score() {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let mut network = build_network();
    let mut live: Vec<Fact> = Vec::new();

    // Several changes per settle, including churn on the same fact.
    for _ in 0..50 {
        for _ in 0..rng.random_range(1..6usize) {
            if live.is_empty() || rng.random_range(0..3u8) == 0 {
                let fact = shift(rng.random_range(0..4), rng.random_range(1..9));
                network.insert(&fact).unwrap();
                live.push(fact);
            } else if rng.random_range(0..2u8) == 0 {
                let fact = &live[rng.random_range(0..live.len())];
                shift_of(fact).employee.set(rng.random_range(0..4));
                shift_of(fact).hours.set(rng.random_range(1..9));
                network.update(fact).unwrap();
            } else {
                let fact = live.swap_remove(rng.random_range(0..live.len()));
                network.retract(&fact).unwrap();
            }
        }
        assert_eq!(network.settle().unwrap(), reference_score(&live));
    }
}
