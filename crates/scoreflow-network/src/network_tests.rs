//! End-to-end network tests: build a constraint graph, churn facts through
//! insert/update/retract cycles and check the settled score after each one.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use smallvec::smallvec;

use scoreflow_core::{ConstraintRef, HardSoftScore, Score, SimpleScore};

use crate::builder::{JoinSpec, NetworkBuilder};
use crate::collector::{count, sum_i64};
use crate::error::{BuildError, PropagationError};
use crate::fact::{Fact, FactAccess};
use crate::key::IndexKey;

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

#[derive(Debug, PartialEq)]
struct Employee {
    id: i64,
}

fn employee(id: i64) -> Fact {
    Fact::new(Employee { id })
}

fn cref(name: &str) -> ConstraintRef {
    ConstraintRef::new("test", name)
}

#[test]
fn test_filter_follows_fact_mutations() {
    let mut builder = NetworkBuilder::<SimpleScore>::new();
    let shifts = builder.for_each::<Shift>();
    let long = builder.filter(shifts, |facts| facts.get_as::<Shift>(0).hours.get() > 8);
    builder.penalize(long, cref("Long shift"), SimpleScore::ONE);
    let mut network = builder.build().unwrap();

    let a = shift(1, 9);
    let b = shift(1, 6);
    network.insert(&a).unwrap();
    network.insert(&b).unwrap();
    assert_eq!(network.settle().unwrap(), SimpleScore::of(-1));

    // b crosses the threshold, a falls back under it.
    shift_of(&b).hours.set(10);
    network.update(&b).unwrap();
    assert_eq!(network.settle().unwrap(), SimpleScore::of(-2));

    shift_of(&a).hours.set(8);
    network.update(&a).unwrap();
    assert_eq!(network.settle().unwrap(), SimpleScore::of(-1));

    network.retract(&a).unwrap();
    assert_eq!(network.settle().unwrap(), SimpleScore::of(-1));
    network.retract(&b).unwrap();
    assert_eq!(network.settle().unwrap(), SimpleScore::ZERO);
    assert_eq!(network.live_tuple_count(), 0);
}

#[test]
fn test_map_suppresses_unchanged_output() {
    let evaluations = Rc::new(Cell::new(0u32));
    let probe = evaluations.clone();

    let mut builder = NetworkBuilder::<SimpleScore>::new();
    let shifts = builder.for_each::<Shift>();
    let employees = builder.map(shifts, 1, |facts| {
        smallvec![Fact::new(facts.get_as::<Shift>(0).employee.get())]
    });
    builder.penalize_by(employees, cref("Per shift"), move |_| {
        probe.set(probe.get() + 1);
        SimpleScore::ONE
    });
    let mut network = builder.build().unwrap();

    let a = shift(7, 6);
    network.insert(&a).unwrap();
    assert_eq!(network.settle().unwrap(), SimpleScore::of(-1));
    assert_eq!(evaluations.get(), 1);

    // Hours feed nothing downstream of the map, so the update dies there.
    shift_of(&a).hours.set(9);
    network.update(&a).unwrap();
    assert_eq!(network.settle().unwrap(), SimpleScore::of(-1));
    assert_eq!(evaluations.get(), 1);

    shift_of(&a).employee.set(8);
    network.update(&a).unwrap();
    assert_eq!(network.settle().unwrap(), SimpleScore::of(-1));
    assert_eq!(evaluations.get(), 2);
}

#[test]
fn test_join_pairs_on_key() {
    let mut builder = NetworkBuilder::<SimpleScore>::new();
    let employees = builder.for_each::<Employee>();
    let shifts = builder.for_each::<Shift>();
    let assigned = builder.join(
        employees,
        shifts,
        JoinSpec::on(
            |facts| IndexKey::Int(facts.get_as::<Employee>(0).id),
            |facts| IndexKey::Int(facts.get_as::<Shift>(0).employee.get()),
        ),
    );
    builder.penalize(assigned, cref("Assignment"), SimpleScore::ONE);
    let mut network = builder.build().unwrap();

    let e1 = employee(1);
    let e2 = employee(2);
    let s1 = shift(1, 8);
    let s2 = shift(1, 8);
    let s3 = shift(2, 8);
    for fact in [&e1, &e2] {
        network.insert(fact).unwrap();
    }
    for fact in [&s1, &s2, &s3] {
        network.insert(fact).unwrap();
    }
    assert_eq!(network.settle().unwrap(), SimpleScore::of(-3));

    // Moving a shift between employees keeps the pair count stable.
    shift_of(&s1).employee.set(2);
    network.update(&s1).unwrap();
    assert_eq!(network.settle().unwrap(), SimpleScore::of(-3));

    network.retract(&e2).unwrap();
    assert_eq!(network.settle().unwrap(), SimpleScore::of(-1));
}

#[derive(Debug, PartialEq)]
struct Meeting {
    room: Cell<i64>,
    start: Cell<i64>,
    end: Cell<i64>,
}

fn meeting(room: i64, start: i64, end: i64) -> Fact {
    Fact::new(Meeting {
        room: Cell::new(room),
        start: Cell::new(start),
        end: Cell::new(end),
    })
}

#[test]
fn test_join_residual_re_evaluates_on_update() {
    let mut builder = NetworkBuilder::<SimpleScore>::new();
    let left = builder.for_each::<Meeting>();
    let right = builder.for_each::<Meeting>();
    let overlapping = builder.join(
        left,
        right,
        JoinSpec::on(
            |facts| IndexKey::Int(facts.get_as::<Meeting>(0).room.get()),
            |facts| IndexKey::Int(facts.get_as::<Meeting>(0).room.get()),
        )
        .filtering(|left, right| {
            let (l, r) = (left.get_as::<Meeting>(0), right.get_as::<Meeting>(0));
            l.start.get() < r.start.get() && r.start.get() < l.end.get()
        }),
    );
    builder.penalize(overlapping, cref("Room conflict"), SimpleScore::ONE);
    let mut network = builder.build().unwrap();

    let m1 = meeting(1, 0, 4);
    let m2 = meeting(1, 2, 6);
    network.insert(&m1).unwrap();
    network.insert(&m2).unwrap();
    assert_eq!(network.settle().unwrap(), SimpleScore::of(-1));

    // Same room, no overlap: the residual now rejects the pair.
    let m = m2.downcast_ref::<Meeting>().unwrap();
    m.start.set(5);
    m.end.set(9);
    network.update(&m2).unwrap();
    assert_eq!(network.settle().unwrap(), SimpleScore::ZERO);

    m.start.set(1);
    network.update(&m2).unwrap();
    assert_eq!(network.settle().unwrap(), SimpleScore::of(-1));

    // Key change path: the pair dissolves although times still overlap.
    m.room.set(2);
    network.update(&m2).unwrap();
    assert_eq!(network.settle().unwrap(), SimpleScore::ZERO);
}

#[test]
fn test_group_sum_follows_updates() {
    let mut builder = NetworkBuilder::<SimpleScore>::new();
    let shifts = builder.for_each::<Shift>();
    let per_employee = builder.group_by(
        shifts,
        |facts| IndexKey::Int(facts.get_as::<Shift>(0).employee.get()),
        vec![sum_i64(|facts| facts.get_as::<Shift>(0).hours.get())],
    );
    let overloaded = builder.filter(per_employee, |facts| *facts.get_as::<i64>(1) > 10);
    builder.penalize_by(overloaded, cref("Overtime"), |facts| {
        SimpleScore::of(*facts.get_as::<i64>(1) - 10)
    });
    let mut network = builder.build().unwrap();

    let a = shift(1, 6);
    let b = shift(1, 5);
    network.insert(&a).unwrap();
    network.insert(&b).unwrap();
    assert_eq!(network.settle().unwrap(), SimpleScore::of(-1));

    shift_of(&b).hours.set(4);
    network.update(&b).unwrap();
    assert_eq!(network.settle().unwrap(), SimpleScore::ZERO);

    shift_of(&b).hours.set(8);
    network.update(&b).unwrap();
    assert_eq!(network.settle().unwrap(), SimpleScore::of(-4));

    network.retract(&a).unwrap();
    assert_eq!(network.settle().unwrap(), SimpleScore::ZERO);
    network.retract(&b).unwrap();
    assert_eq!(network.settle().unwrap(), SimpleScore::ZERO);
    assert_eq!(network.live_tuple_count(), 0);
}

#[test]
fn test_group_key_move_rebuckets() {
    let mut builder = NetworkBuilder::<SimpleScore>::new();
    let shifts = builder.for_each::<Shift>();
    // No collectors: one output tuple per distinct employee.
    let staffed = builder.group_by(
        shifts,
        |facts| IndexKey::Int(facts.get_as::<Shift>(0).employee.get()),
        vec![],
    );
    builder.penalize(staffed, cref("Distinct employee"), SimpleScore::ONE);
    let mut network = builder.build().unwrap();

    let a = shift(1, 8);
    let b = shift(1, 8);
    let c = shift(2, 8);
    for fact in [&a, &b, &c] {
        network.insert(fact).unwrap();
    }
    assert_eq!(network.settle().unwrap(), SimpleScore::of(-2));

    shift_of(&a).employee.set(2);
    network.update(&a).unwrap();
    assert_eq!(network.settle().unwrap(), SimpleScore::of(-2));

    // The last member leaves bucket 1, which dies.
    shift_of(&b).employee.set(2);
    network.update(&b).unwrap();
    assert_eq!(network.settle().unwrap(), SimpleScore::of(-1));
}

#[test]
fn test_keyless_sum_tracks_retracts_and_updates() {
    let mut builder = NetworkBuilder::<SimpleScore>::new();
    let readings = builder.for_each::<Shift>();
    let total = builder.group(readings, vec![sum_i64(|facts| {
        facts.get_as::<Shift>(0).hours.get()
    })]);
    builder.reward_by(total, cref("Hours worked"), |facts| {
        SimpleScore::of(*facts.get_as::<i64>(0))
    });
    let mut network = builder.build().unwrap();

    let a = shift(1, 1);
    let b = shift(1, 2);
    let c = shift(1, 3);
    for fact in [&a, &b, &c] {
        network.insert(fact).unwrap();
    }
    assert_eq!(network.settle().unwrap(), SimpleScore::of(6));

    network.retract(&b).unwrap();
    assert_eq!(network.settle().unwrap(), SimpleScore::of(4));

    shift_of(&a).hours.set(5);
    network.update(&a).unwrap();
    assert_eq!(network.settle().unwrap(), SimpleScore::of(8));
}

#[test]
fn test_keyless_group_lives_while_stream_is_nonempty() {
    let mut builder = NetworkBuilder::<SimpleScore>::new();
    let shifts = builder.for_each::<Shift>();
    let total = builder.group(shifts, vec![count()]);
    builder.penalize_by(total, cref("Shift count"), |facts| {
        SimpleScore::of(*facts.get_as::<i64>(0))
    });
    let mut network = builder.build().unwrap();

    assert_eq!(network.settle().unwrap(), SimpleScore::ZERO);

    let a = shift(1, 8);
    let b = shift(2, 8);
    network.insert(&a).unwrap();
    network.insert(&b).unwrap();
    assert_eq!(network.settle().unwrap(), SimpleScore::of(-2));

    network.retract(&a).unwrap();
    assert_eq!(network.settle().unwrap(), SimpleScore::of(-1));
    network.retract(&b).unwrap();
    assert_eq!(network.settle().unwrap(), SimpleScore::ZERO);
    assert_eq!(network.live_tuple_count(), 0);
}

#[test]
fn test_if_exists_fires_only_on_threshold_crossings() {
    let mut builder = NetworkBuilder::<SimpleScore>::new();
    let employees = builder.for_each::<Employee>();
    let shifts = builder.for_each::<Shift>();
    let working = builder.if_exists(
        employees,
        shifts,
        JoinSpec::on(
            |facts| IndexKey::Int(facts.get_as::<Employee>(0).id),
            |facts| IndexKey::Int(facts.get_as::<Shift>(0).employee.get()),
        ),
    );
    builder.reward(working, cref("Employee staffed"), SimpleScore::ONE);
    let mut network = builder.build().unwrap();

    let e1 = employee(1);
    let e2 = employee(2);
    network.insert(&e1).unwrap();
    network.insert(&e2).unwrap();
    assert_eq!(network.settle().unwrap(), SimpleScore::ZERO);

    let s1 = shift(1, 8);
    let s2 = shift(1, 8);
    network.insert(&s1).unwrap();
    assert_eq!(network.settle().unwrap(), SimpleScore::of(1));

    // Second match moves the counter 1 -> 2, no downstream event.
    network.insert(&s2).unwrap();
    assert_eq!(network.settle().unwrap(), SimpleScore::of(1));

    network.retract(&s1).unwrap();
    assert_eq!(network.settle().unwrap(), SimpleScore::of(1));
    network.retract(&s2).unwrap();
    assert_eq!(network.settle().unwrap(), SimpleScore::ZERO);
}

#[test]
fn test_if_not_exists_inverts_the_gate() {
    let mut builder = NetworkBuilder::<SimpleScore>::new();
    let employees = builder.for_each::<Employee>();
    let shifts = builder.for_each::<Shift>();
    let idle = builder.if_not_exists(
        employees,
        shifts,
        JoinSpec::on(
            |facts| IndexKey::Int(facts.get_as::<Employee>(0).id),
            |facts| IndexKey::Int(facts.get_as::<Shift>(0).employee.get()),
        ),
    );
    builder.penalize(idle, cref("Idle employee"), SimpleScore::ONE);
    let mut network = builder.build().unwrap();

    let e1 = employee(1);
    let e2 = employee(2);
    network.insert(&e1).unwrap();
    network.insert(&e2).unwrap();
    assert_eq!(network.settle().unwrap(), SimpleScore::of(-2));

    let s = shift(1, 8);
    network.insert(&s).unwrap();
    assert_eq!(network.settle().unwrap(), SimpleScore::of(-1));

    // The shift moves, so the penalty moves with it.
    shift_of(&s).employee.set(2);
    network.update(&s).unwrap();
    assert_eq!(network.settle().unwrap(), SimpleScore::of(-1));

    network.retract(&s).unwrap();
    assert_eq!(network.settle().unwrap(), SimpleScore::of(-2));
}

#[derive(Debug, PartialEq)]
struct Roster {
    skills: RefCell<Vec<String>>,
}

fn roster(skills: &[&str]) -> Fact {
    Fact::new(Roster {
        skills: RefCell::new(skills.iter().map(|s| s.to_string()).collect()),
    })
}

#[test]
fn test_flatten_diffs_children_by_equality() {
    let evaluations = Rc::new(Cell::new(0u32));
    let probe = evaluations.clone();

    let mut builder = NetworkBuilder::<SimpleScore>::new();
    let rosters = builder.for_each::<Roster>();
    let skills = builder.flatten_last(rosters, |facts| {
        facts
            .get_as::<Roster>(0)
            .skills
            .borrow()
            .iter()
            .map(|skill| Fact::new(skill.clone()))
            .collect()
    });
    builder.penalize_by(skills, cref("Skill"), move |_| {
        probe.set(probe.get() + 1);
        SimpleScore::ONE
    });
    let mut network = builder.build().unwrap();

    let r = roster(&["forklift", "welding"]);
    network.insert(&r).unwrap();
    assert_eq!(network.settle().unwrap(), SimpleScore::of(-2));
    assert_eq!(evaluations.get(), 2);

    // Surviving children are diffed out; only the new skill propagates.
    r.downcast_ref::<Roster>()
        .unwrap()
        .skills
        .borrow_mut()
        .push("crane".to_string());
    network.update(&r).unwrap();
    assert_eq!(network.settle().unwrap(), SimpleScore::of(-3));
    assert_eq!(evaluations.get(), 3);

    // Removal retracts one child; the others stay silent downstream.
    r.downcast_ref::<Roster>()
        .unwrap()
        .skills
        .borrow_mut()
        .retain(|skill| skill != "forklift");
    network.update(&r).unwrap();
    assert_eq!(network.settle().unwrap(), SimpleScore::of(-2));
    assert_eq!(evaluations.get(), 3);

    network.retract(&r).unwrap();
    assert_eq!(network.settle().unwrap(), SimpleScore::ZERO);
    assert_eq!(network.live_tuple_count(), 0);
}

#[test]
fn test_concat_merges_two_streams() {
    let mut builder = NetworkBuilder::<SimpleScore>::new();
    let for_short = builder.for_each::<Shift>();
    let for_long = builder.for_each::<Shift>();
    let short = builder.filter(for_short, |facts| facts.get_as::<Shift>(0).hours.get() < 4);
    let long = builder.filter(for_long, |facts| facts.get_as::<Shift>(0).hours.get() > 8);
    let extreme = builder.concat(short, long);
    builder.penalize(extreme, cref("Extreme shift"), SimpleScore::ONE);
    let mut network = builder.build().unwrap();

    let a = shift(1, 2);
    let b = shift(1, 9);
    let c = shift(1, 5);
    for fact in [&a, &b, &c] {
        network.insert(fact).unwrap();
    }
    assert_eq!(network.settle().unwrap(), SimpleScore::of(-2));

    shift_of(&c).hours.set(10);
    network.update(&c).unwrap();
    assert_eq!(network.settle().unwrap(), SimpleScore::of(-3));

    network.retract(&b).unwrap();
    assert_eq!(network.settle().unwrap(), SimpleScore::of(-2));
}

#[test]
fn test_insert_then_retract_in_one_cycle_is_a_no_op() {
    let mut builder = NetworkBuilder::<SimpleScore>::new();
    let shifts = builder.for_each::<Shift>();
    builder.penalize(shifts, cref("Any shift"), SimpleScore::ONE);
    let mut network = builder.build().unwrap();

    let a = shift(1, 8);
    network.insert(&a).unwrap();
    network.retract(&a).unwrap();
    assert_eq!(network.settle().unwrap(), SimpleScore::ZERO);
    assert_eq!(network.live_tuple_count(), 0);
}

#[test]
fn test_duplicate_insert_poisons_the_network() {
    let mut builder = NetworkBuilder::<SimpleScore>::new();
    let shifts = builder.for_each::<Shift>();
    builder.penalize(shifts, cref("Any shift"), SimpleScore::ONE);
    let mut network = builder.build().unwrap();

    let a = shift(1, 8);
    network.insert(&a).unwrap();
    let err = network.insert(&a).unwrap_err();
    assert!(matches!(err, PropagationError::DuplicateFact { .. }));
    assert!(network.is_poisoned());
    assert!(matches!(
        network.settle().unwrap_err(),
        PropagationError::Poisoned
    ));
}

#[test]
fn test_user_closure_panic_poisons_the_network() {
    let mut builder = NetworkBuilder::<SimpleScore>::new();
    let shifts = builder.for_each::<Shift>();
    builder.penalize_by(shifts, cref("Fussy weight"), |facts| {
        let shift = facts.get_as::<Shift>(0);
        if shift.hours.get() > 8 {
            panic!("unweighable shift");
        }
        SimpleScore::ONE
    });
    let mut network = builder.build().unwrap();

    network.insert(&shift(1, 6)).unwrap();
    network.insert(&shift(1, 9)).unwrap();
    let err = network.settle().unwrap_err();
    assert!(matches!(err, PropagationError::UserFunctionPanic { .. }));
    assert!(err.to_string().contains("unweighable shift"));

    // The half-drained state must never be resumed.
    assert!(network.is_poisoned());
    assert!(matches!(
        network.settle().unwrap_err(),
        PropagationError::Poisoned
    ));
    let survivor = shift(1, 2);
    assert!(matches!(
        network.insert(&survivor).unwrap_err(),
        PropagationError::Poisoned
    ));
}

#[test]
fn test_unregistered_fact_type_is_rejected() {
    let mut builder = NetworkBuilder::<SimpleScore>::new();
    let shifts = builder.for_each::<Shift>();
    builder.penalize(shifts, cref("Any shift"), SimpleScore::ONE);
    let mut network = builder.build().unwrap();

    let err = network.insert(&Fact::new(5i64)).unwrap_err();
    assert!(matches!(err, PropagationError::UnregisteredFactType(_)));
}

#[test]
fn test_constraint_totals_and_matches() {
    let mut builder = NetworkBuilder::<HardSoftScore>::new();
    let for_hard = builder.for_each::<Shift>();
    let for_soft = builder.for_each::<Shift>();
    let long = builder.filter(for_hard, |facts| facts.get_as::<Shift>(0).hours.get() > 8);
    builder.penalize(long, cref("Long shift"), HardSoftScore::of_hard(1));
    builder.penalize_by(for_soft, cref("Shift cost"), |facts| {
        HardSoftScore::of_soft(facts.get_as::<Shift>(0).hours.get())
    });
    let mut network = builder.build().unwrap();

    let a = shift(1, 9);
    let b = shift(2, 4);
    network.insert(&a).unwrap();
    network.insert(&b).unwrap();
    assert_eq!(network.settle().unwrap(), HardSoftScore::of(-1, -13));
    assert!(!network.settle().unwrap().is_feasible());

    let totals: Vec<_> = network
        .constraint_totals()
        .map(|(constraint, total)| (constraint.name.clone(), total))
        .collect();
    assert!(totals.contains(&("Long shift".to_string(), HardSoftScore::of_hard(-1))));
    assert!(totals.contains(&("Shift cost".to_string(), HardSoftScore::of_soft(-13))));

    let matches = network.constraint_matches();
    assert_eq!(matches.len(), 3);
    let long_matches: Vec<_> = matches
        .iter()
        .filter(|m| m.constraint.name == "Long shift")
        .collect();
    assert_eq!(long_matches.len(), 1);
    assert_eq!(long_matches[0].score, HardSoftScore::of_hard(-1));
    assert!(long_matches[0].facts[0].downcast_ref::<Shift>().is_some());
}

#[test]
fn test_build_rejects_empty_graph() {
    let builder = NetworkBuilder::<SimpleScore>::new();
    assert!(matches!(builder.build(), Err(BuildError::NoConstraints)));
}

#[test]
fn test_build_rejects_dangling_stream() {
    let mut builder = NetworkBuilder::<SimpleScore>::new();
    let shifts = builder.for_each::<Shift>();
    builder.filter(shifts, |_| true);
    assert!(matches!(
        builder.build(),
        Err(BuildError::DanglingStream { .. })
    ));
}

#[test]
fn test_build_rejects_stream_reuse() {
    let mut builder = NetworkBuilder::<SimpleScore>::new();
    let shifts = builder.for_each::<Shift>();
    let a = builder.filter(shifts, |_| true);
    let b = builder.filter(shifts, |_| true);
    builder.penalize(a, cref("A"), SimpleScore::ONE);
    builder.penalize(b, cref("B"), SimpleScore::ONE);
    assert!(matches!(
        builder.build(),
        Err(BuildError::StreamReused { count: 2, .. })
    ));
}

#[test]
fn test_build_rejects_concat_arity_mismatch() {
    let mut builder = NetworkBuilder::<SimpleScore>::new();
    let employees = builder.for_each::<Employee>();
    let shifts = builder.for_each::<Shift>();
    let singles = builder.for_each::<Employee>();
    let pairs = builder.join(employees, shifts, JoinSpec::cross());
    let merged = builder.concat(pairs, singles);
    builder.penalize(merged, cref("Merged"), SimpleScore::ONE);
    assert!(matches!(
        builder.build(),
        Err(BuildError::ConcatArityMismatch { left: 2, right: 1 })
    ));
}

#[test]
fn test_build_rejects_arity_out_of_range() {
    let mut builder = NetworkBuilder::<SimpleScore>::new();
    let shifts = builder.for_each::<Shift>();
    let widened = builder.map(shifts, 5, |facts| facts.iter().cloned().collect());
    builder.penalize(widened, cref("Wide"), SimpleScore::ONE);
    assert!(matches!(
        builder.build(),
        Err(BuildError::ArityOutOfRange { arity: 5, .. })
    ));
}

#[test]
fn test_build_rejects_duplicate_constraint_names() {
    let mut builder = NetworkBuilder::<SimpleScore>::new();
    let a = builder.for_each::<Shift>();
    let b = builder.for_each::<Shift>();
    builder.penalize(a, cref("Same"), SimpleScore::ONE);
    builder.penalize(b, cref("Same"), SimpleScore::ONE);
    assert!(matches!(
        builder.build(),
        Err(BuildError::DuplicateConstraint(_))
    ));
}
