//! The OT system contract - the algebra every diff type must provide.
//!
//! An OT system over a diff type `D` provides four operations on diff lists:
//!  - `squash`: reduce a list to an equivalent, usually shorter, list
//!  - `invert`: the list that undoes a list when applied after it
//!  - `transform`: reconcile two lists derived from the same state
//!  - `is_empty`: whether a single diff is a no-op
//!
//!  The engine never inspects diffs except through these operations.

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// The result of transforming two concurrent diff lists.
///
/// Given `left` and `right` derived from the same state, applying the
/// original left list followed by `right` yields the same state as applying
/// the original right list followed by `left`:
///
/// ```text
///            base
///       L  /      \  R
///         /        \
///   base·L          base·R
///         \        /
///  right'  \      /  left'
///           final
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformResult<D> {
    /// The left diffs rewritten to apply on top of the right branch.
    pub left: Vec<D>,
    /// The right diffs rewritten to apply on top of the left branch.
    pub right: Vec<D>,
}

impl<D> TransformResult<D> {
    pub fn new(left: Vec<D>, right: Vec<D>) -> Self {
        TransformResult { left, right }
    }

    /// Both sides already agree, nothing to apply on either branch.
    pub fn empty() -> Self {
        TransformResult {
            left: Vec::new(),
            right: Vec::new(),
        }
    }

    /// Only the left branch needs `diffs` to catch up.
    pub fn apply_right(diffs: Vec<D>) -> Self {
        TransformResult {
            left: Vec::new(),
            right: diffs,
        }
    }

    /// Only the right branch needs `diffs` to catch up.
    pub fn apply_left(diffs: Vec<D>) -> Self {
        TransformResult {
            left: diffs,
            right: Vec::new(),
        }
    }

    /// Swap the roles of the two sides.
    pub fn swap(self) -> Self {
        TransformResult {
            left: self.right,
            right: self.left,
        }
    }
}

/// Which side wins when two diffs cannot both be kept.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConflictResolution {
    /// The final state is the one reached through the left branch.
    Left,
    /// The final state is the one reached through the right branch.
    Right,
}

/// The operational-transformation algebra over diff type `D`.
///
/// Implementations must guarantee that `squash(L ++ invert(L))` contains only
/// empty diffs, that `squash` is idempotent and associative, and that
/// `transform` satisfies the convergence property documented on
/// [`TransformResult`].
pub trait OTSystem<D>: Send + Sync {
    /// Whether a single diff has no effect.
    fn is_empty(&self, diff: &D) -> bool;

    /// Produce the list that undoes `diffs` when applied after them.
    fn invert(&self, diffs: &[D]) -> Vec<D>;

    /// Reduce `diffs` to an equivalent list.
    fn squash(&self, diffs: &[D]) -> Vec<D>;

    /// Reconcile two lists that start from the same state.
    ///
    /// Fails with [`crate::OtError::TransformConflict`] when the lists cannot
    /// be reconciled and neither side is allowed to win.
    fn transform(&self, left: &[D], right: &[D]) -> Result<TransformResult<D>>;

    /// Whether the list as a whole has no effect.
    fn is_empty_list(&self, diffs: &[D]) -> bool {
        self.squash(diffs).iter().all(|diff| self.is_empty(diff))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swap() {
        let result = TransformResult::new(vec![1], vec![2, 3]).swap();
        assert_eq!(result.left, vec![2, 3]);
        assert_eq!(result.right, vec![1]);
    }

    #[test]
    fn test_one_sided_constructors() {
        let right_only: TransformResult<i32> = TransformResult::apply_right(vec![5]);
        assert!(right_only.left.is_empty());
        assert_eq!(right_only.right, vec![5]);

        let left_only: TransformResult<i32> = TransformResult::apply_left(vec![7]);
        assert_eq!(left_only.left, vec![7]);
        assert!(left_only.right.is_empty());

        assert_eq!(TransformResult::<i32>::empty(), TransformResult::default());
    }
}
