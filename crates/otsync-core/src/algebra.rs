//! Pairwise diff algebras and their lifting to diff lists.
//!
//! Application op types are closed enums. Describing how two single diffs
//! interact is usually an exhaustive `match`; [`ListSystem`] turns such a
//! pairwise description into a full [`OTSystem`] over diff lists.

use crate::error::{OtError, Result};
use crate::system::{ConflictResolution, OTSystem, TransformResult};

/// Outcome of transforming one left diff against one right diff.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PairTransform<D> {
    /// Both diffs survive in rewritten form.
    Transformed(TransformResult<D>),
    /// The diffs are incompatible. `Some` names the side that wins for the
    /// whole lists being transformed, `None` means nobody may win.
    Conflict(Option<ConflictResolution>),
}

/// Single-diff operations for a closed op type.
pub trait DiffAlgebra: Send + Sync {
    type Diff: Clone;

    fn is_empty(&self, diff: &Self::Diff) -> bool;

    fn invert_one(&self, diff: &Self::Diff) -> Self::Diff;

    /// Combine `first` followed by `second` into one diff, if possible.
    fn squash_pair(&self, first: &Self::Diff, second: &Self::Diff) -> Option<Self::Diff>;

    fn transform_pair(&self, left: &Self::Diff, right: &Self::Diff) -> PairTransform<Self::Diff>;
}

/// An [`OTSystem`] over lists of `A::Diff` built from a pairwise algebra.
#[derive(Clone, Debug, Default)]
pub struct ListSystem<A> {
    algebra: A,
}

impl<A: DiffAlgebra> ListSystem<A> {
    pub fn new(algebra: A) -> Self {
        ListSystem { algebra }
    }

    pub fn algebra(&self) -> &A {
        &self.algebra
    }

    /// Push `diff` onto an already squashed list, collapsing it backwards
    /// until no adjacent pair can be combined.
    fn push_squashed(&self, out: &mut Vec<A::Diff>, diff: A::Diff) {
        let mut incoming = diff;
        loop {
            if self.algebra.is_empty(&incoming) {
                return;
            }
            let combined = match out.last() {
                Some(last) => self.algebra.squash_pair(last, &incoming),
                None => None,
            };
            match combined {
                Some(diff) => {
                    out.pop();
                    incoming = diff;
                }
                None => {
                    out.push(incoming);
                    return;
                }
            }
        }
    }

    fn transform_lists(
        &self,
        left: &[A::Diff],
        right: &[A::Diff],
    ) -> std::result::Result<TransformResult<A::Diff>, Option<ConflictResolution>> {
        if left.is_empty() {
            return Ok(TransformResult::apply_right(right.to_vec()));
        }
        if right.is_empty() {
            return Ok(TransformResult::apply_left(left.to_vec()));
        }

        if left.len() == 1 {
            let first = match self.algebra.transform_pair(&left[0], &right[0]) {
                PairTransform::Transformed(result) => result,
                PairTransform::Conflict(resolution) => return Err(resolution),
            };
            let rest = self.transform_lists(&first.left, &right[1..])?;
            let mut transformed_right = first.right;
            transformed_right.extend(rest.right);
            return Ok(TransformResult::new(rest.left, transformed_right));
        }

        let first = self.transform_lists(&left[..1], right)?;
        let rest = self.transform_lists(&left[1..], &first.right)?;
        let mut transformed_left = first.left;
        transformed_left.extend(rest.left);
        Ok(TransformResult::new(transformed_left, rest.right))
    }
}

impl<A: DiffAlgebra> OTSystem<A::Diff> for ListSystem<A> {
    fn is_empty(&self, diff: &A::Diff) -> bool {
        self.algebra.is_empty(diff)
    }

    fn invert(&self, diffs: &[A::Diff]) -> Vec<A::Diff> {
        diffs
            .iter()
            .rev()
            .map(|diff| self.algebra.invert_one(diff))
            .collect()
    }

    fn squash(&self, diffs: &[A::Diff]) -> Vec<A::Diff> {
        let mut out = Vec::with_capacity(diffs.len());
        for diff in diffs {
            self.push_squashed(&mut out, diff.clone());
        }
        out
    }

    fn transform(&self, left: &[A::Diff], right: &[A::Diff]) -> Result<TransformResult<A::Diff>> {
        match self.transform_lists(left, right) {
            Ok(result) => Ok(result),
            // The losing side is rolled back before the winner is replayed.
            Err(Some(ConflictResolution::Left)) => {
                let mut undo_right = self.invert(right);
                undo_right.extend_from_slice(left);
                Ok(TransformResult::apply_left(self.squash(&undo_right)))
            }
            Err(Some(ConflictResolution::Right)) => {
                let mut undo_left = self.invert(left);
                undo_left.extend_from_slice(right);
                Ok(TransformResult::apply_right(self.squash(&undo_left)))
            }
            Err(None) => Err(OtError::TransformConflict(format!(
                "cannot reconcile {} left diffs with {} right diffs",
                left.len(),
                right.len()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Integer offsets: every pair commutes, zero is empty.
    #[derive(Clone, Debug, Default)]
    struct Offsets;

    impl DiffAlgebra for Offsets {
        type Diff = i64;

        fn is_empty(&self, diff: &i64) -> bool {
            *diff == 0
        }

        fn invert_one(&self, diff: &i64) -> i64 {
            -diff
        }

        fn squash_pair(&self, first: &i64, second: &i64) -> Option<i64> {
            Some(first + second)
        }

        fn transform_pair(&self, left: &i64, right: &i64) -> PairTransform<i64> {
            PairTransform::Transformed(TransformResult::new(vec![*left], vec![*right]))
        }
    }

    #[test]
    fn test_squash_collapses_and_drops_empty() {
        let system = ListSystem::new(Offsets);
        assert_eq!(system.squash(&[1, 2, 3]), vec![6]);
        assert_eq!(system.squash(&[1, -1]), Vec::<i64>::new());
        assert!(system.squash(&[]).is_empty());
    }

    #[test]
    fn test_invert_reverses() {
        let system = ListSystem::new(Offsets);
        assert_eq!(system.invert(&[1, 2, 3]), vec![-3, -2, -1]);
    }

    #[test]
    fn test_transform_with_empty_side() {
        let system = ListSystem::new(Offsets);
        let result = system.transform(&[], &[4, 5]).unwrap();
        assert!(result.left.is_empty());
        assert_eq!(result.right, vec![4, 5]);

        let result = system.transform(&[4, 5], &[]).unwrap();
        assert_eq!(result.left, vec![4, 5]);
        assert!(result.right.is_empty());
    }

    #[test]
    fn test_transform_lists_keep_order() {
        let system = ListSystem::new(Offsets);
        let result = system.transform(&[1, 2], &[10, 20, 30]).unwrap();
        assert_eq!(result.left, vec![1, 2]);
        assert_eq!(result.right, vec![10, 20, 30]);
    }
}
