//! The repository seam.
//!
//! Commit persistence, head tracking and snapshot storage live outside the
//! engine. Everything in this crate is written against the [`Repository`]
//! trait only.

use crate::commit::{Commit, CommitId};
use async_trait::async_trait;
use otsync_core::Result;
use std::collections::BTreeSet;

/// Asynchronous commit storage.
///
/// `push` must be atomic: either every commit in the batch becomes visible
/// and heads are updated, or the call fails and nothing changed.
#[async_trait]
pub trait Repository<K, D>: Send + Sync
where
    K: CommitId,
    D: Clone + Send + Sync + 'static,
{
    /// Allocate a fresh commit id.
    async fn create_commit_id(&self) -> Result<K>;

    /// Store commits, parents first.
    async fn push(&self, commits: Vec<Commit<K, D>>) -> Result<()>;

    /// Commits with no children.
    async fn get_heads(&self) -> Result<BTreeSet<K>>;

    /// Load a commit. Fails with [`otsync_core::OtError::NotFound`] if absent.
    async fn load_commit(&self, id: &K) -> Result<Commit<K, D>>;

    /// Parent ids of a commit.
    async fn get_parents(&self, id: &K) -> Result<BTreeSet<K>> {
        let commit = self.load_commit(id).await?;
        Ok(commit.parents.into_keys().collect())
    }

    /// Store the full-state diff list at a commit.
    async fn save_snapshot(&self, id: &K, diffs: Vec<D>) -> Result<()>;

    async fn load_snapshot(&self, id: &K) -> Result<Option<Vec<D>>>;
}
