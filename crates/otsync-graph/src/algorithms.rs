//! Graph algorithms over a [`Repository`].
//!
//! Every walk visits commits in descending level order. Since a child's level
//! is always greater than its parents', a node is only popped after every
//! reachable child of it has been processed.

use crate::commit::{Commit, CommitId};
use crate::graph::LoadedGraph;
use crate::repository::Repository;
use otsync_core::{OTSystem, OtError, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, info};

/// Folds the diffs met on a backward walk into a value.
pub trait DiffsReducer<D>: Send + Sync {
    type Value: Clone + Send + Sync;

    /// Value at the commit the walk starts from.
    fn initial(&self) -> Self::Value;

    /// Extend `accumulated`, computed for a child, with the diffs of the
    /// edge leading into that child from one of its parents.
    fn accumulate(&self, edge: &[D], accumulated: &Self::Value) -> Self::Value;
}

/// Collects the diffs from a parent to the starting commit.
#[derive(Clone, Copy, Debug, Default)]
pub struct ToList;

impl<D: Clone + Send + Sync> DiffsReducer<D> for ToList {
    type Value = Vec<D>;

    fn initial(&self) -> Vec<D> {
        Vec::new()
    }

    fn accumulate(&self, edge: &[D], accumulated: &Vec<D>) -> Vec<D> {
        let mut diffs = edge.to_vec();
        diffs.extend_from_slice(accumulated);
        diffs
    }
}

/// Reachability only.
#[derive(Clone, Copy, Debug, Default)]
pub struct ToVoid;

impl<D> DiffsReducer<D> for ToVoid {
    type Value = ();

    fn initial(&self) {}

    fn accumulate(&self, _edge: &[D], _accumulated: &()) {}
}

/// Result of [`OTAlgorithms::find_parent`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FindResult<K: Ord, D, A> {
    /// The matching commit.
    pub commit: Commit<K, D>,
    /// The head the match was reached from.
    pub child: K,
    /// Reducer value from `commit` to `child`.
    pub value: A,
}

/// Backward walk state: a level-ordered queue of loaded commits together with
/// the head each node was reached from and the value accumulated so far.
struct Walker<K: Ord, D, A> {
    queue: BTreeSet<(i64, K)>,
    commits: HashMap<K, Commit<K, D>>,
    values: HashMap<K, (K, A)>,
}

impl<K: CommitId, D, A: Clone> Walker<K, D, A> {
    fn new() -> Self {
        Walker {
            queue: BTreeSet::new(),
            commits: HashMap::new(),
            values: HashMap::new(),
        }
    }

    fn is_visited(&self, id: &K) -> bool {
        self.values.contains_key(id)
    }

    fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn push(&mut self, commit: Commit<K, D>, origin: K, value: A) {
        if self.is_visited(&commit.id) {
            return;
        }
        self.queue.insert((commit.level, commit.id.clone()));
        self.values.insert(commit.id.clone(), (origin, value));
        self.commits.insert(commit.id.clone(), commit);
    }

    /// Pop the queued commit with the highest level.
    fn pop(&mut self) -> Option<(Commit<K, D>, K, A)> {
        let (_, id) = self.queue.pop_last()?;
        let commit = self.commits.remove(&id)?;
        let (origin, value) = self.values.get(&id)?.clone();
        Some((commit, origin, value))
    }
}

/// Algorithms over the commit history of one repository.
pub struct OTAlgorithms<K, D, R: ?Sized, S: ?Sized> {
    repository: Arc<R>,
    system: Arc<S>,
    _types: PhantomData<fn() -> (K, D)>,
}

impl<K, D, R: ?Sized, S: ?Sized> Clone for OTAlgorithms<K, D, R, S> {
    fn clone(&self) -> Self {
        OTAlgorithms {
            repository: Arc::clone(&self.repository),
            system: Arc::clone(&self.system),
            _types: PhantomData,
        }
    }
}

impl<K, D, R, S> OTAlgorithms<K, D, R, S>
where
    K: CommitId,
    D: Clone + Send + Sync + 'static,
    R: Repository<K, D> + ?Sized,
    S: OTSystem<D> + ?Sized,
{
    pub fn new(repository: Arc<R>, system: Arc<S>) -> Self {
        OTAlgorithms {
            repository,
            system,
            _types: PhantomData,
        }
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    pub fn system(&self) -> &Arc<S> {
        &self.system
    }

    /// Load a commit the history claims exists.
    async fn load_reachable(&self, id: &K) -> Result<Commit<K, D>> {
        match self.repository.load_commit(id).await {
            Err(OtError::NotFound(what)) => Err(OtError::GraphExhausted(format!(
                "history references missing {}",
                what
            ))),
            other => other,
        }
    }

    pub async fn load_level(&self, id: &K) -> Result<i64> {
        Ok(self.load_reachable(id).await?.level)
    }

    /// Full state at `head` as a squashed diff list, plus the head's level.
    ///
    /// Replays from the nearest ancestor with a snapshot, the one with the
    /// highest level. Roots count as empty snapshots. Parents are checked for
    /// a snapshot before they are loaded, and a snapshot's own commit is only
    /// loaded when another branch could still hold a nearer one.
    pub async fn checkout(&self, head: &K) -> Result<(Vec<D>, i64)> {
        debug!(commit = ?head, "checkout");
        let head_commit = self.load_reachable(head).await?;
        let level = head_commit.level;

        if let Some(snapshot) = self.repository.load_snapshot(head).await? {
            return Ok((self.system.squash(&snapshot), level));
        }

        let mut walker: Walker<K, D, Vec<D>> = Walker::new();
        walker.push(head_commit, head.clone(), Vec::new());
        let mut snapshotted: BTreeSet<K> = BTreeSet::new();
        // Nearest snapshot found so far: (level, id, full diffs)
        let mut nearest: Option<(i64, K, Vec<D>)> = None;

        while let Some((commit, _, diffs)) = walker.pop() {
            if let Some((found, _, _)) = &nearest {
                // Everything still queued only reaches snapshots below this commit
                if commit.level <= found + 1 {
                    break;
                }
            }
            if commit.is_root() {
                debug!(commit = ?head, root = ?commit.id, "checkout reached root");
                return Ok((self.system.squash(&diffs), level));
            }

            let mut hits = Vec::new();
            for (parent, edge) in &commit.parents {
                if walker.is_visited(parent) || snapshotted.contains(parent) {
                    continue;
                }
                let mut through_parent = edge.clone();
                through_parent.extend(diffs.iter().cloned());

                if let Some(mut snapshot) = self.repository.load_snapshot(parent).await? {
                    snapshot.extend(through_parent);
                    snapshotted.insert(parent.clone());
                    hits.push((parent.clone(), snapshot));
                    continue;
                }

                let parent_commit = self.load_reachable(parent).await?;
                walker.push(parent_commit, head.clone(), through_parent);
            }

            if nearest.is_none() && hits.len() == 1 && walker.is_empty() {
                let (parent, snapshot) = hits.remove(0);
                debug!(commit = ?head, snapshot = ?parent, "checkout found snapshot");
                return Ok((self.system.squash(&snapshot), level));
            }
            for (parent, snapshot) in hits {
                let found = self.load_level(&parent).await?;
                if nearest.as_ref().map_or(true, |(best, _, _)| found > *best) {
                    nearest = Some((found, parent, snapshot));
                }
            }
        }

        match nearest {
            Some((_, parent, snapshot)) => {
                debug!(commit = ?head, snapshot = ?parent, "checkout found snapshot");
                Ok((self.system.squash(&snapshot), level))
            }
            None => Err(OtError::GraphExhausted(format!(
                "no root or snapshot reachable from {:?}",
                head
            ))),
        }
    }

    /// Diffs turning the state at `from` into the state at `to`.
    pub async fn diff(&self, from: &K, to: &K) -> Result<Vec<D>> {
        if from == to {
            return Ok(Vec::new());
        }
        let (from_state, _) = self.checkout(from).await?;
        let (to_state, _) = self.checkout(to).await?;

        let mut diffs = self.system.invert(&from_state);
        diffs.extend(to_state);
        Ok(self.system.squash(&diffs))
    }

    /// For each head, the reduced diffs from `parent` to that head.
    pub async fn reduce_edges<Rd>(
        &self,
        heads: &BTreeSet<K>,
        parent: &K,
        reducer: &Rd,
    ) -> Result<BTreeMap<K, Rd::Value>>
    where
        Rd: DiffsReducer<D>,
    {
        let parent_commit = self.load_reachable(parent).await?;
        let floor = parent_commit.level;
        let mut result = BTreeMap::new();

        // Commits are shared by the walks of all heads, each loaded at most once
        let mut loaded: HashMap<K, Commit<K, D>> = HashMap::new();
        loaded.insert(parent.clone(), parent_commit);

        for head in heads {
            let head_commit = match loaded.get(head) {
                Some(commit) => commit.clone(),
                None => self.load_reachable(head).await?,
            };
            loaded.insert(head.clone(), head_commit.clone());

            let mut walker = Walker::new();
            walker.push(head_commit, head.clone(), reducer.initial());

            let mut found = None;
            while let Some((commit, _, value)) = walker.pop() {
                if commit.id == *parent {
                    found = Some(value);
                    break;
                }
                // Parents of a commit at the floor are all below it
                if commit.level <= floor {
                    continue;
                }
                for (id, edge) in &commit.parents {
                    if walker.is_visited(id) {
                        continue;
                    }
                    let next = match loaded.get(id) {
                        Some(commit) => commit.clone(),
                        None => {
                            let commit = self.load_reachable(id).await?;
                            loaded.insert(id.clone(), commit.clone());
                            commit
                        }
                    };
                    if next.level < floor {
                        continue;
                    }
                    walker.push(next, head.clone(), reducer.accumulate(edge, &value));
                }
            }

            let value = found.ok_or_else(|| {
                OtError::GraphExhausted(format!("{:?} is not an ancestor of {:?}", parent, head))
            })?;
            result.insert(head.clone(), value);
        }
        Ok(result)
    }

    /// Nearest ancestor-or-self of any head that matches `predicate`.
    pub async fn find_parent<Rd, P>(
        &self,
        heads: &BTreeSet<K>,
        reducer: &Rd,
        predicate: P,
    ) -> Result<FindResult<K, D, Rd::Value>>
    where
        Rd: DiffsReducer<D>,
        P: Fn(&Commit<K, D>) -> bool + Send + Sync,
    {
        let mut walker = Walker::new();
        for head in heads {
            walker.push(self.load_reachable(head).await?, head.clone(), reducer.initial());
        }

        while let Some((commit, child, value)) = walker.pop() {
            if predicate(&commit) {
                debug!(commit = ?commit.id, child = ?child, "found parent");
                return Ok(FindResult {
                    commit,
                    child,
                    value,
                });
            }
            for (id, edge) in &commit.parents {
                if walker.is_visited(id) {
                    continue;
                }
                let parent_commit = self.load_reachable(id).await?;
                walker.push(parent_commit, child.clone(), reducer.accumulate(edge, &value));
            }
        }

        Err(OtError::GraphExhausted(format!(
            "no matching parent for {} heads",
            heads.len()
        )))
    }

    /// Nearest common ancestors of all heads.
    pub async fn find_all_common_parents(&self, heads: &BTreeSet<K>) -> Result<BTreeSet<K>> {
        let mut result = BTreeSet::new();
        if heads.len() <= 1 {
            result.extend(heads.iter().cloned());
            return Ok(result);
        }

        let mut queue: BTreeSet<(i64, K)> = BTreeSet::new();
        let mut commits: HashMap<K, Commit<K, D>> = HashMap::new();
        // node -> (heads reaching it, below another common ancestor)
        let mut reach: HashMap<K, (BTreeSet<K>, bool)> = HashMap::new();

        for head in heads {
            let commit = self.load_reachable(head).await?;
            queue.insert((commit.level, head.clone()));
            reach.insert(head.clone(), (BTreeSet::from([head.clone()]), false));
            commits.insert(head.clone(), commit);
        }

        while queue.iter().any(|(_, id)| reach.get(id).map_or(false, |(_, below)| !below)) {
            let Some((_, id)) = queue.pop_last() else {
                break;
            };
            let Some(commit) = commits.remove(&id) else {
                continue;
            };
            let (reached_from, below) = reach.get(&id).cloned().unwrap_or_default();

            let is_common = reached_from.len() == heads.len();
            if is_common && !below {
                result.insert(id.clone());
            }
            let parents_below = below || is_common;

            for parent in commit.parent_ids() {
                if let Some((parent_reach, parent_below)) = reach.get_mut(parent) {
                    parent_reach.extend(reached_from.iter().cloned());
                    *parent_below |= parents_below;
                    continue;
                }
                let parent_commit = self.load_reachable(parent).await?;
                queue.insert((parent_commit.level, parent.clone()));
                reach.insert(parent.clone(), (reached_from.clone(), parents_below));
                commits.insert(parent.clone(), parent_commit);
            }
        }

        Ok(result)
    }

    /// First frontier, walking back from the heads by level, that satisfies
    /// `predicate`. Every head is reachable from some commit of a frontier.
    pub async fn find_cut<P>(&self, heads: &BTreeSet<K>, predicate: P) -> Result<Vec<Commit<K, D>>>
    where
        P: Fn(&[Commit<K, D>]) -> bool + Send + Sync,
    {
        let mut frontier: BTreeMap<(i64, K), Commit<K, D>> = BTreeMap::new();
        for head in heads {
            let commit = self.load_reachable(head).await?;
            frontier.insert((commit.level, head.clone()), commit);
        }

        loop {
            let cut: Vec<Commit<K, D>> = frontier.values().cloned().collect();
            if predicate(&cut) {
                return Ok(cut);
            }

            let Some((_, commit)) = frontier.pop_last() else {
                break;
            };
            if commit.is_root() {
                break;
            }
            for parent in commit.parent_ids() {
                if frontier.values().any(|c| c.id == *parent) {
                    continue;
                }
                let parent_commit = self.load_reachable(parent).await?;
                frontier.insert((parent_commit.level, parent.clone()), parent_commit);
            }
        }

        Err(OtError::GraphExhausted(format!(
            "no cut satisfies the predicate for {} heads",
            heads.len()
        )))
    }

    /// Load every commit reachable from `heads` into `graph`.
    pub async fn load_graph(&self, heads: &BTreeSet<K>, graph: LoadedGraph<K, D>) -> Result<LoadedGraph<K, D>> {
        self.load_graph_until(heads, graph, |_| false).await
    }

    /// Like [`OTAlgorithms::load_graph`], but commits matching `stop` are
    /// added without loading their parents. Nodes already in `graph` are
    /// never fetched again.
    pub async fn load_graph_until<P>(
        &self,
        heads: &BTreeSet<K>,
        mut graph: LoadedGraph<K, D>,
        stop: P,
    ) -> Result<LoadedGraph<K, D>>
    where
        P: Fn(&Commit<K, D>) -> bool + Send + Sync,
    {
        let before = graph.len();
        let mut queue: VecDeque<K> = heads.iter().filter(|h| !graph.contains(h)).cloned().collect();
        let mut queued: BTreeSet<K> = queue.iter().cloned().collect();

        while let Some(id) = queue.pop_front() {
            let commit = self.load_reachable(&id).await?;
            graph.add_commit(&commit);
            if stop(&commit) {
                continue;
            }
            for parent in commit.parent_ids() {
                if !graph.contains(parent) && queued.insert(parent.clone()) {
                    queue.push_back(parent.clone());
                }
            }
        }

        debug!(heads = heads.len(), loaded = graph.len() - before, total = graph.len(), "loaded graph");
        Ok(graph)
    }

    async fn merge_graph(&self, heads: &BTreeSet<K>) -> Result<(BTreeMap<K, Vec<D>>, LoadedGraph<K, D>)> {
        let common = self.find_all_common_parents(heads).await?;
        // Nothing below the lowest common parent can be a nearer ancestor
        let graph = if common.is_empty() {
            self.load_graph(heads, LoadedGraph::new()).await?
        } else {
            let mut floor = i64::MAX;
            for id in &common {
                floor = floor.min(self.load_level(id).await?);
            }
            self.load_graph_until(heads, LoadedGraph::new(), |c| c.level <= floor)
                .await?
        };
        let merged = graph.merge(heads, &*self.system)?;
        Ok((merged, graph))
    }

    /// For every head, the diffs that bring it to the merged state.
    pub async fn merge(&self, heads: &BTreeSet<K>) -> Result<BTreeMap<K, Vec<D>>> {
        if heads.len() <= 1 {
            return Ok(heads.iter().map(|h| (h.clone(), Vec::new())).collect());
        }
        Ok(self.merge_graph(heads).await?.0)
    }

    /// Merge the repository's heads into one commit and return the single
    /// resulting head.
    pub async fn merge_and_update_heads(&self) -> Result<K> {
        let heads = self.repository.get_heads().await?;
        let mut iter = heads.iter();
        match (iter.next(), iter.next()) {
            (None, _) => return Err(OtError::GraphExhausted("repository has no heads".to_string())),
            (Some(head), None) => return Ok(head.clone()),
            _ => {}
        }

        let (merged, graph) = self.merge_graph(&heads).await?;
        let max_level = heads
            .iter()
            .filter_map(|head| graph.level(head))
            .max()
            .unwrap_or_default();

        let id = self.repository.create_commit_id().await?;
        let commit = Commit::merge(id.clone(), merged, max_level);
        self.repository.push(vec![commit]).await?;

        info!(commit = ?id, heads = heads.len(), level = max_level + 1, "pushed merge commit");
        Ok(id)
    }

    /// Store the full state at `id` as a snapshot.
    pub async fn save_snapshot(&self, id: &K) -> Result<()> {
        let (diffs, _) = self.checkout(id).await?;
        self.repository.save_snapshot(id, diffs).await?;
        debug!(commit = ?id, "saved snapshot");
        Ok(())
    }
}
