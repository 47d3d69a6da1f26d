//! Application state driven by diffs.

/// A mutable accumulator the engine applies diffs to.
///
/// The engine treats the state as opaque: it only ever resets it and feeds it
/// diffs in order.
pub trait OTState<D> {
    /// Reset to the state of an empty history.
    fn init(&mut self);

    /// Apply one diff.
    fn apply(&mut self, diff: &D);

    /// Apply a list of diffs in order.
    fn apply_all(&mut self, diffs: &[D]) {
        for diff in diffs {
            self.apply(diff);
        }
    }
}

/// A state that just records every diff it was given.
///
/// Useful for asserting the exact sequence of diffs an engine component
/// applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordingState<D> {
    applied: Vec<D>,
}

impl<D> Default for RecordingState<D> {
    fn default() -> Self {
        RecordingState { applied: Vec::new() }
    }
}

impl<D> RecordingState<D> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn applied(&self) -> &[D] {
        &self.applied
    }
}

impl<D: Clone> OTState<D> for RecordingState<D> {
    fn init(&mut self) {
        self.applied.clear();
    }

    fn apply(&mut self, diff: &D) {
        self.applied.push(diff.clone());
    }
}
