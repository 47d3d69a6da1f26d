//! Error types shared by every layer of the OT engine.

use thiserror::Error;

/// Errors that can occur in OT operations.
///
/// The enum is `Clone` so a single failure can be handed to every caller
/// sharing one in-flight synchronization.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OtError {
    /// A walk over the commit graph ran out of known history before reaching
    /// a required ancestor or snapshot.
    #[error("Graph exhausted: {0}")]
    GraphExhausted(String),

    /// Two diff lists could not be reconciled.
    #[error("Transform conflict: {0}")]
    TransformConflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Transient storage or network failure.
    #[error("Repository failure: {0}")]
    Repository(String),

    /// A diff-type implementation or commit broke an engine invariant.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("State manager is not checked out")]
    NotCheckedOut,
}

impl OtError {
    /// Whether retrying the same operation from the current state is safe and
    /// may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, OtError::Repository(_))
    }

    /// Whether the error indicates corrupted or incompletely replicated
    /// history rather than a transient condition.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            OtError::GraphExhausted(_) | OtError::InvariantViolation(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, OtError>;
