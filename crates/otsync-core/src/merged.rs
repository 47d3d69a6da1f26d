//! Composition of independent OT systems.
//!
//! A [`MergedSystem`] synchronizes two unrelated op types in one history.
//! Its diff is a pair of component lists; every operation splits incoming
//! lists by component, runs each component system on its slice and zips the
//! results back into at most one composite diff. Nest merged systems for more
//! than two components.

use crate::error::Result;
use crate::system::{OTSystem, TransformResult};

/// One composite diff of a merged system.
pub type Merged<D1, D2> = (Vec<D1>, Vec<D2>);

/// Product of two OT systems.
#[derive(Clone, Debug, Default)]
pub struct MergedSystem<S1, S2> {
    first: S1,
    second: S2,
}

impl<S1, S2> MergedSystem<S1, S2> {
    pub fn new(first: S1, second: S2) -> Self {
        MergedSystem { first, second }
    }

    pub fn first(&self) -> &S1 {
        &self.first
    }

    pub fn second(&self) -> &S2 {
        &self.second
    }
}

fn split<D1: Clone, D2: Clone>(diffs: &[Merged<D1, D2>]) -> (Vec<D1>, Vec<D2>) {
    let mut first = Vec::new();
    let mut second = Vec::new();
    for (a, b) in diffs {
        first.extend_from_slice(a);
        second.extend_from_slice(b);
    }
    (first, second)
}

fn zip<D1, D2>(first: Vec<D1>, second: Vec<D2>) -> Vec<Merged<D1, D2>> {
    if first.is_empty() && second.is_empty() {
        Vec::new()
    } else {
        vec![(first, second)]
    }
}

impl<D1, D2, S1, S2> OTSystem<Merged<D1, D2>> for MergedSystem<S1, S2>
where
    D1: Clone,
    D2: Clone,
    S1: OTSystem<D1>,
    S2: OTSystem<D2>,
{
    fn is_empty(&self, diff: &Merged<D1, D2>) -> bool {
        diff.0.iter().all(|d| self.first.is_empty(d)) && diff.1.iter().all(|d| self.second.is_empty(d))
    }

    fn invert(&self, diffs: &[Merged<D1, D2>]) -> Vec<Merged<D1, D2>> {
        let (first, second) = split(diffs);
        zip(self.first.invert(&first), self.second.invert(&second))
    }

    fn squash(&self, diffs: &[Merged<D1, D2>]) -> Vec<Merged<D1, D2>> {
        let (first, second) = split(diffs);
        zip(self.first.squash(&first), self.second.squash(&second))
    }

    fn transform(
        &self,
        left: &[Merged<D1, D2>],
        right: &[Merged<D1, D2>],
    ) -> Result<TransformResult<Merged<D1, D2>>> {
        let (left_first, left_second) = split(left);
        let (right_first, right_second) = split(right);

        let first = self.first.transform(&left_first, &right_first)?;
        let second = self.second.transform(&left_second, &right_second)?;

        Ok(TransformResult::new(
            zip(first.left, second.left),
            zip(first.right, second.right),
        ))
    }
}
