//! Integer counter with relative and absolute updates.
//!
//! `Add` commutes with `Add`; `Set` overrides concurrent `Add`s; concurrent
//! `Set`s to different values are resolved in favour of the larger value.

use crate::algebra::{DiffAlgebra, ListSystem, PairTransform};
use crate::state::OTState;
use crate::system::{ConflictResolution, TransformResult};
use serde::{Deserialize, Serialize};

/// A counter operation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CounterOp {
    /// Add a signed delta.
    Add(i64),
    /// Replace `prev` with `next`.
    Set { prev: i64, next: i64 },
}

impl CounterOp {
    pub fn set(prev: i64, next: i64) -> Self {
        CounterOp::Set { prev, next }
    }
}

/// Pairwise algebra for [`CounterOp`].
#[derive(Clone, Copy, Debug, Default)]
pub struct CounterAlgebra;

impl DiffAlgebra for CounterAlgebra {
    type Diff = CounterOp;

    fn is_empty(&self, diff: &CounterOp) -> bool {
        match diff {
            CounterOp::Add(delta) => *delta == 0,
            CounterOp::Set { prev, next } => prev == next,
        }
    }

    fn invert_one(&self, diff: &CounterOp) -> CounterOp {
        match diff {
            CounterOp::Add(delta) => CounterOp::Add(delta.wrapping_neg()),
            CounterOp::Set { prev, next } => CounterOp::set(*next, *prev),
        }
    }

    fn squash_pair(&self, first: &CounterOp, second: &CounterOp) -> Option<CounterOp> {
        let squashed = match (first, second) {
            (CounterOp::Add(a), CounterOp::Add(b)) => CounterOp::Add(a.wrapping_add(*b)),
            (CounterOp::Set { prev, next }, CounterOp::Add(delta)) => {
                CounterOp::set(*prev, next.wrapping_add(*delta))
            }
            (CounterOp::Add(delta), CounterOp::Set { prev, next }) => {
                CounterOp::set(prev.wrapping_sub(*delta), *next)
            }
            (CounterOp::Set { prev, .. }, CounterOp::Set { next, .. }) => CounterOp::set(*prev, *next),
        };
        Some(squashed)
    }

    fn transform_pair(&self, left: &CounterOp, right: &CounterOp) -> PairTransform<CounterOp> {
        match (left, right) {
            (CounterOp::Add(_), CounterOp::Add(_)) => {
                PairTransform::Transformed(TransformResult::new(vec![left.clone()], vec![right.clone()]))
            }
            (CounterOp::Add(delta), CounterOp::Set { prev, next }) => PairTransform::Transformed(
                TransformResult::apply_right(vec![CounterOp::set(prev.wrapping_add(*delta), *next)]),
            ),
            (CounterOp::Set { prev, next }, CounterOp::Add(delta)) => PairTransform::Transformed(
                TransformResult::apply_left(vec![CounterOp::set(prev.wrapping_add(*delta), *next)]),
            ),
            (CounterOp::Set { next: left_next, .. }, CounterOp::Set { next: right_next, .. }) => {
                if left_next == right_next {
                    PairTransform::Transformed(TransformResult::empty())
                } else if left_next > right_next {
                    PairTransform::Conflict(Some(ConflictResolution::Left))
                } else {
                    PairTransform::Conflict(Some(ConflictResolution::Right))
                }
            }
        }
    }
}

/// The list-level OT system for counters.
pub fn counter_system() -> ListSystem<CounterAlgebra> {
    ListSystem::new(CounterAlgebra)
}

/// Counter state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    pub value: i64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OTState<CounterOp> for Counter {
    fn init(&mut self) {
        self.value = 0;
    }

    fn apply(&mut self, diff: &CounterOp) {
        match diff {
            CounterOp::Add(delta) => self.value = self.value.wrapping_add(*delta),
            CounterOp::Set { next, .. } => self.value = *next,
        }
    }
}
