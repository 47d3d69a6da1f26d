//! An [`Uplink`] talking directly to a [`Repository`].

use crate::config::UplinkConfig;
use crate::uplink::{FetchData, Uplink};
use async_trait::async_trait;
use otsync_core::{OTSystem, Result};
use otsync_graph::{Commit, CommitId, OTAlgorithms, Repository};
use std::sync::Arc;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

/// Uplink over a repository and the graph algorithms on top of it.
///
/// Divergent heads are merged into a merge commit whenever the uplink needs
/// a single head to move to.
pub struct RepositoryUplink<K, D, R: ?Sized, S: ?Sized> {
    algorithms: OTAlgorithms<K, D, R, S>,
    config: UplinkConfig,
}

impl<K, D, R, S> RepositoryUplink<K, D, R, S>
where
    K: CommitId,
    D: Clone + Send + Sync + 'static,
    R: Repository<K, D> + ?Sized,
    S: OTSystem<D> + ?Sized,
{
    pub fn new(repository: Arc<R>, system: Arc<S>) -> Self {
        Self::with_config(repository, system, UplinkConfig::default())
    }

    pub fn with_config(repository: Arc<R>, system: Arc<S>, config: UplinkConfig) -> Self {
        RepositoryUplink {
            algorithms: OTAlgorithms::new(repository, system),
            config,
        }
    }

    pub fn algorithms(&self) -> &OTAlgorithms<K, D, R, S> {
        &self.algorithms
    }

    pub fn config(&self) -> &UplinkConfig {
        &self.config
    }

    /// The single head to move to, or `None` if heads diverge and merging is
    /// disabled.
    async fn resolve_head(&self) -> Result<Option<K>> {
        if self.config.merge_on_fetch {
            return self.algorithms.merge_and_update_heads().await.map(Some);
        }
        let heads = self.algorithms.repository().get_heads().await?;
        if heads.len() == 1 {
            Ok(heads.into_iter().next())
        } else {
            debug!(heads = heads.len(), "heads diverge, not merging");
            Ok(None)
        }
    }

    async fn fetch_from(&self, current: &K) -> Result<FetchData<K, D>> {
        let head = match self.resolve_head().await? {
            Some(head) => head,
            None => current.clone(),
        };
        let diffs = self.algorithms.diff(current, &head).await?;
        let level = self.algorithms.load_level(&head).await?;
        Ok(FetchData::new(head, level, diffs))
    }
}

#[async_trait]
impl<K, D, R, S> Uplink for RepositoryUplink<K, D, R, S>
where
    K: CommitId,
    D: Clone + Send + Sync + 'static,
    R: Repository<K, D> + ?Sized + 'static,
    S: OTSystem<D> + ?Sized + 'static,
{
    type CommitId = K;
    type Diff = D;
    type ProtoCommit = Commit<K, D>;

    async fn checkout(&self) -> Result<FetchData<K, D>> {
        let head = self.algorithms.merge_and_update_heads().await?;
        let (diffs, level) = self.algorithms.checkout(&head).await?;
        debug!(commit = ?head, level, "checked out");
        Ok(FetchData::new(head, level, diffs))
    }

    async fn fetch(&self, current: &K) -> Result<FetchData<K, D>> {
        let data = self.fetch_from(current).await?;
        debug!(from = ?current, to = ?data.commit_id, diffs = data.diffs.len(), "fetched");
        Ok(data)
    }

    async fn poll(&self, current: &K) -> Result<FetchData<K, D>> {
        let deadline = Instant::now() + self.config.poll_timeout();
        loop {
            let data = self.fetch_from(current).await?;
            if data.commit_id != *current || Instant::now() >= deadline {
                return Ok(data);
            }
            sleep(self.config.poll_interval()).await;
        }
    }

    async fn create_proto_commit(&self, parent: K, diffs: Vec<D>, parent_level: i64) -> Result<Commit<K, D>> {
        let id = self.algorithms.repository().create_commit_id().await?;
        Ok(Commit::child(id, parent, diffs, parent_level))
    }

    async fn push(&self, commit: Commit<K, D>) -> Result<FetchData<K, D>> {
        let id = commit.id.clone();
        let diffs = commit.parents.values().map(Vec::len).sum::<usize>();
        self.algorithms.repository().push(vec![commit]).await?;
        info!(commit = ?id, diffs, "pushed commit");

        self.fetch_from(&id).await
    }
}
