//! The uplink seam between a client and its remote history.

use async_trait::async_trait;
use otsync_core::Result;
use otsync_graph::CommitId;
use serde::{Deserialize, Serialize};

/// A remote position and the diffs that lead to it.
///
/// What the diffs start from depends on the call: the empty state for
/// `checkout`, the given commit for `fetch` and `poll`, the pushed commit for
/// `push`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchData<K, D> {
    pub commit_id: K,
    pub level: i64,
    pub diffs: Vec<D>,
}

impl<K, D> FetchData<K, D> {
    pub fn new(commit_id: K, level: i64, diffs: Vec<D>) -> Self {
        FetchData {
            commit_id,
            level,
            diffs,
        }
    }
}

/// Remote side of a [`crate::StateManager`].
#[async_trait]
pub trait Uplink: Send + Sync {
    type CommitId: CommitId;
    type Diff: Clone + Send + Sync + 'static;
    /// A commit prepared locally but not pushed yet. It keeps its identity
    /// across clones, so pushing it again after a lost reply is a no-op.
    type ProtoCommit: Clone + Send + 'static;

    /// Full state at the current remote head.
    async fn checkout(&self) -> Result<FetchData<Self::CommitId, Self::Diff>>;

    /// Diffs from `current` to the current remote head.
    async fn fetch(&self, current: &Self::CommitId) -> Result<FetchData<Self::CommitId, Self::Diff>>;

    /// Like `fetch`, but waits a while for the head to move away from
    /// `current`.
    async fn poll(&self, current: &Self::CommitId) -> Result<FetchData<Self::CommitId, Self::Diff>>;

    async fn create_proto_commit(
        &self,
        parent: Self::CommitId,
        diffs: Vec<Self::Diff>,
        parent_level: i64,
    ) -> Result<Self::ProtoCommit>;

    /// Push a proto commit. The result leads from the pushed commit to the
    /// remote head after the push.
    ///
    /// Pushing a commit that already landed must succeed without creating
    /// another one.
    async fn push(&self, commit: Self::ProtoCommit) -> Result<FetchData<Self::CommitId, Self::Diff>>;
}
