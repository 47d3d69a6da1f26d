//! A named register changed by renames.

use crate::algebra::{DiffAlgebra, ListSystem, PairTransform};
use crate::state::OTState;
use crate::system::{ConflictResolution, TransformResult};
use serde::{Deserialize, Serialize};

/// Rename the register from `prev` to `next`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegisterOp {
    pub prev: String,
    pub next: String,
}

impl RegisterOp {
    pub fn rename(prev: impl Into<String>, next: impl Into<String>) -> Self {
        RegisterOp {
            prev: prev.into(),
            next: next.into(),
        }
    }
}

/// Pairwise algebra for [`RegisterOp`].
///
/// Concurrent renames to different names are a conflict. A lenient algebra
/// lets the lexicographically greater name win; a strict one refuses to pick.
#[derive(Clone, Copy, Debug, Default)]
pub struct RegisterAlgebra {
    strict: bool,
}

impl RegisterAlgebra {
    pub fn lenient() -> Self {
        RegisterAlgebra { strict: false }
    }

    pub fn strict() -> Self {
        RegisterAlgebra { strict: true }
    }
}

impl DiffAlgebra for RegisterAlgebra {
    type Diff = RegisterOp;

    fn is_empty(&self, diff: &RegisterOp) -> bool {
        diff.prev == diff.next
    }

    fn invert_one(&self, diff: &RegisterOp) -> RegisterOp {
        RegisterOp::rename(diff.next.clone(), diff.prev.clone())
    }

    fn squash_pair(&self, first: &RegisterOp, second: &RegisterOp) -> Option<RegisterOp> {
        Some(RegisterOp::rename(first.prev.clone(), second.next.clone()))
    }

    fn transform_pair(&self, left: &RegisterOp, right: &RegisterOp) -> PairTransform<RegisterOp> {
        if left.next == right.next {
            return PairTransform::Transformed(TransformResult::empty());
        }
        if self.strict {
            return PairTransform::Conflict(None);
        }
        if left.next > right.next {
            PairTransform::Conflict(Some(ConflictResolution::Left))
        } else {
            PairTransform::Conflict(Some(ConflictResolution::Right))
        }
    }
}

/// Register system resolving concurrent renames by name order.
pub fn register_system() -> ListSystem<RegisterAlgebra> {
    ListSystem::new(RegisterAlgebra::lenient())
}

/// Register system surfacing concurrent renames as conflicts.
pub fn strict_register_system() -> ListSystem<RegisterAlgebra> {
    ListSystem::new(RegisterAlgebra::strict())
}

/// Register state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Register {
    pub name: String,
}

impl OTState<RegisterOp> for Register {
    fn init(&mut self) {
        self.name.clear();
    }

    fn apply(&mut self, diff: &RegisterOp) {
        self.name = diff.next.clone();
    }
}
