//! Property-based tests that MUST pass for every OT system
//!
//! These tests verify the algebraic laws the engine relies on:
//!  - Invert: squash(L ++ invert(L)) is empty
//!  - Squash idempotence: squash(squash(L)) = squash(L)
//!  - Squash associativity: squash(squash(L1) ++ L2) = squash(L1 ++ L2)
//!  - Transform convergence: L · right' = R · left'

use otsync_core::ops::counter::{counter_system, Counter, CounterOp};
use otsync_core::ops::register::{register_system, Register, RegisterOp};
use otsync_core::{Merged, MergedSystem, OTState, OTSystem};
use proptest::prelude::*;

/// Generate strategies for prop-testing

/// Counter ops whose `Set` variants carry the correct previous value when
/// applied from `start`.
fn counter_ops_from(start: i64) -> impl Strategy<Value = Vec<CounterOp>> {
    prop::collection::vec((any::<bool>(), -20i64..20), 0..8).prop_map(move |specs| {
        let mut value = start;
        specs
            .into_iter()
            .map(|(is_add, x)| {
                if is_add {
                    value += x;
                    CounterOp::Add(x)
                } else {
                    let op = CounterOp::set(value, x);
                    value = x;
                    op
                }
            })
            .collect()
    })
}

fn register_ops_from(start: &'static str) -> impl Strategy<Value = Vec<RegisterOp>> {
    prop::collection::vec("[a-d]{1,2}", 0..5).prop_map(move |names| {
        let mut current = start.to_string();
        names
            .into_iter()
            .map(|name| {
                let op = RegisterOp::rename(current.clone(), name.clone());
                current = name;
                op
            })
            .collect()
    })
}

fn merged_ops() -> impl Strategy<Value = Vec<Merged<CounterOp, RegisterOp>>> {
    (counter_ops_from(0), register_ops_from("")).prop_map(|(counters, renames)| {
        let mut diffs: Vec<Merged<CounterOp, RegisterOp>> =
            counters.into_iter().map(|op| (vec![op], vec![])).collect();
        diffs.extend(renames.into_iter().map(|op| (vec![], vec![op])));
        diffs
    })
}

fn counter_value(start: i64, lists: &[&[CounterOp]]) -> i64 {
    let mut counter = Counter { value: start };
    for list in lists {
        counter.apply_all(list);
    }
    counter.value
}

#[derive(Debug, Default, PartialEq, Eq)]
struct Pair {
    counter: Counter,
    register: Register,
}

impl OTState<Merged<CounterOp, RegisterOp>> for Pair {
    fn init(&mut self) {
        self.counter.init();
        self.register.init();
    }

    fn apply(&mut self, diff: &Merged<CounterOp, RegisterOp>) {
        self.counter.apply_all(&diff.0);
        self.register.apply_all(&diff.1);
    }
}

// ============================================================================
// Counter Property Tests
// ============================================================================

proptest! {
    #[test]
    fn counter_invert_cancels(diffs in counter_ops_from(0)) {
        let system = counter_system();
        let mut roundtrip = diffs.clone();
        roundtrip.extend(system.invert(&diffs));
        prop_assert!(system.is_empty_list(&roundtrip));
    }

    #[test]
    fn counter_invert_restores_state(diffs in counter_ops_from(3)) {
        let system = counter_system();
        let inverted = system.invert(&diffs);
        prop_assert_eq!(counter_value(3, &[&diffs, &inverted]), 3);
    }

    #[test]
    fn counter_squash_is_idempotent(diffs in counter_ops_from(0)) {
        let system = counter_system();
        let once = system.squash(&diffs);
        prop_assert_eq!(system.squash(&once), once);
    }

    #[test]
    fn counter_squash_is_associative(first in counter_ops_from(0), second in counter_ops_from(0)) {
        let system = counter_system();
        let mut staged = system.squash(&first);
        staged.extend(second.iter().cloned());
        let mut whole = first.clone();
        whole.extend(second.iter().cloned());
        prop_assert_eq!(system.squash(&staged), system.squash(&whole));
    }

    #[test]
    fn counter_squash_preserves_state(diffs in counter_ops_from(0)) {
        let system = counter_system();
        let squashed = system.squash(&diffs);
        prop_assert_eq!(counter_value(0, &[&diffs]), counter_value(0, &[&squashed]));
    }

    #[test]
    fn counter_transform_converges(left in counter_ops_from(5), right in counter_ops_from(5)) {
        let system = counter_system();
        let result = system.transform(&left, &right).unwrap();
        prop_assert_eq!(
            counter_value(5, &[&left, &result.right]),
            counter_value(5, &[&right, &result.left])
        );
    }
}

// ============================================================================
// Register Property Tests
// ============================================================================

proptest! {
    #[test]
    fn register_invert_cancels(diffs in register_ops_from("x")) {
        let system = register_system();
        let mut roundtrip = diffs.clone();
        roundtrip.extend(system.invert(&diffs));
        prop_assert!(system.is_empty_list(&roundtrip));
    }

    #[test]
    fn register_transform_converges(left in register_ops_from("x"), right in register_ops_from("x")) {
        let system = register_system();
        let result = system.transform(&left, &right).unwrap();

        let mut via_left = Register { name: "x".to_string() };
        via_left.apply_all(&left);
        via_left.apply_all(&result.right);

        let mut via_right = Register { name: "x".to_string() };
        via_right.apply_all(&right);
        via_right.apply_all(&result.left);

        prop_assert_eq!(via_left, via_right);
    }
}

// ============================================================================
// Merged System Property Tests
// ============================================================================

proptest! {
    #[test]
    fn merged_invert_cancels(diffs in merged_ops()) {
        let system = MergedSystem::new(counter_system(), register_system());
        let mut roundtrip = diffs.clone();
        roundtrip.extend(system.invert(&diffs));
        prop_assert!(system.is_empty_list(&roundtrip));
    }

    #[test]
    fn merged_squash_is_idempotent(diffs in merged_ops()) {
        let system = MergedSystem::new(counter_system(), register_system());
        let once = system.squash(&diffs);
        prop_assert!(once.len() <= 1);
        prop_assert_eq!(system.squash(&once), once);
    }

    #[test]
    fn merged_transform_converges(left in merged_ops(), right in merged_ops()) {
        let system = MergedSystem::new(counter_system(), register_system());
        let result = system.transform(&left, &right).unwrap();

        let mut via_left = Pair::default();
        via_left.apply_all(&left);
        via_left.apply_all(&result.right);

        let mut via_right = Pair::default();
        via_right.apply_all(&right);
        via_right.apply_all(&result.left);

        prop_assert_eq!(via_left, via_right);
    }
}
