//! In-memory repository and a builder for declaring commit graphs.
//!
//! The [`MemoryRepository`] tracks heads (commits without children)
//! automatically, keeps a reverse children index, counts calls per method and
//! can be told to fail pushes, which makes it the reference store for tests
//! and simulations.

use crate::commit::{Commit, CommitId, ROOT_LEVEL};
use crate::repository::Repository;
use async_trait::async_trait;
use otsync_core::{OtError, Result};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

/// Number of calls made to each repository method.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub create_commit_id: usize,
    pub push: usize,
    pub get_heads: usize,
    pub load_commit: usize,
    pub save_snapshot: usize,
    pub load_snapshot: usize,
}

#[derive(Debug)]
struct Inner<K: Ord, D> {
    /// All commits indexed by id.
    commits: HashMap<K, Commit<K, D>>,

    /// Current heads (commits without children).
    heads: BTreeSet<K>,

    /// Reverse index: parent -> children.
    children_index: HashMap<K, BTreeSet<K>>,

    snapshots: HashMap<K, Vec<D>>,

    next_id: u64,

    /// Number of upcoming pushes that fail without touching the store.
    failing_pushes: usize,

    calls: CallCounts,

    /// Ids passed to `load_commit`, in call order.
    load_log: Vec<K>,
}

/// In-memory implementation of [`Repository`].
#[derive(Debug)]
pub struct MemoryRepository<K: Ord, D> {
    inner: RwLock<Inner<K, D>>,
}

impl<K: CommitId, D: Clone> Default for MemoryRepository<K, D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: CommitId, D: Clone> MemoryRepository<K, D> {
    /// Create a new empty repository.
    pub fn new() -> Self {
        MemoryRepository {
            inner: RwLock::new(Inner {
                commits: HashMap::new(),
                heads: BTreeSet::new(),
                children_index: HashMap::new(),
                snapshots: HashMap::new(),
                next_id: 1,
                failing_pushes: 0,
                calls: CallCounts::default(),
                load_log: Vec::new(),
            }),
        }
    }

    /// Create a repository containing a single root commit.
    pub fn with_root(root: K) -> Self {
        let repository = Self::new();
        {
            let mut inner = repository.inner.write();
            inner.heads.insert(root.clone());
            inner.commits.insert(root.clone(), Commit::root(root));
        }
        repository
    }

    /// Make the next `count` pushes fail with a transient error.
    pub fn fail_next_pushes(&self, count: usize) {
        self.inner.write().failing_pushes = count;
    }

    pub fn calls(&self) -> CallCounts {
        self.inner.read().calls.clone()
    }

    /// Ids passed to `load_commit` so far, in order.
    pub fn load_log(&self) -> Vec<K> {
        self.inner.read().load_log.clone()
    }

    /// Forget call statistics.
    pub fn reset_calls(&self) {
        let mut inner = self.inner.write();
        inner.calls = CallCounts::default();
        inner.load_log.clear();
    }

    pub fn contains(&self, id: &K) -> bool {
        self.inner.read().commits.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().commits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Immediate children of a commit.
    pub fn children(&self, id: &K) -> BTreeSet<K> {
        self.inner
            .read()
            .children_index
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    /// A stored commit, without counting the access.
    pub fn commit(&self, id: &K) -> Option<Commit<K, D>> {
        self.inner.read().commits.get(id).cloned()
    }

    /// All commits in topological order (parents before children).
    pub fn topological_order(&self) -> Vec<K> {
        let inner = self.inner.read();
        let mut in_degree: BTreeMap<K, usize> = BTreeMap::new();
        let mut queue = VecDeque::new();

        for (id, commit) in &inner.commits {
            let degree = commit
                .parent_ids()
                .filter(|p| inner.commits.contains_key(*p))
                .count();
            in_degree.insert(id.clone(), degree);
        }
        for (id, degree) in &in_degree {
            if *degree == 0 {
                queue.push_back(id.clone());
            }
        }

        let mut result = Vec::with_capacity(in_degree.len());
        while let Some(id) = queue.pop_front() {
            if let Some(children) = inner.children_index.get(&id) {
                for child in children {
                    if let Some(degree) = in_degree.get_mut(child) {
                        *degree = degree.saturating_sub(1);
                        if *degree == 0 {
                            queue.push_back(child.clone());
                        }
                    }
                }
            }
            result.push(id);
        }
        result
    }

    pub fn has_snapshot(&self, id: &K) -> bool {
        self.inner.read().snapshots.contains_key(id)
    }

    pub fn delete_snapshot(&self, id: &K) -> bool {
        self.inner.write().snapshots.remove(id).is_some()
    }
}

impl<K: CommitId, D> Inner<K, D> {
    /// Validate a batch against the store without modifying anything.
    fn validate(&self, commits: &[Commit<K, D>]) -> Result<()> {
        let mut batch_levels: HashMap<&K, i64> = HashMap::new();

        for commit in commits {
            if self.commits.contains_key(&commit.id) {
                continue;
            }

            let mut max_parent_level = None;
            for parent in commit.parent_ids() {
                let level = self
                    .commits
                    .get(parent)
                    .map(|c| c.level)
                    .or_else(|| batch_levels.get(parent).copied())
                    .ok_or_else(|| {
                        OtError::InvariantViolation(format!(
                            "commit {:?} references missing parent {:?}",
                            commit.id, parent
                        ))
                    })?;
                max_parent_level = max_parent_level.max(Some(level));
            }

            let min_level = max_parent_level.map_or(ROOT_LEVEL, |level| level + 1);
            if commit.level < min_level {
                return Err(OtError::InvariantViolation(format!(
                    "commit {:?} has level {} but its parents require at least {}",
                    commit.id, commit.level, min_level
                )));
            }

            batch_levels.insert(&commit.id, commit.level);
        }
        Ok(())
    }

    fn insert(&mut self, commit: Commit<K, D>) {
        if self.commits.contains_key(&commit.id) {
            return;
        }

        // The new commit is a head unless a child already references it
        if !self.children_index.contains_key(&commit.id) {
            self.heads.insert(commit.id.clone());
        }
        for parent in commit.parent_ids() {
            self.heads.remove(parent);
            self.children_index
                .entry(parent.clone())
                .or_default()
                .insert(commit.id.clone());
        }

        self.commits.insert(commit.id.clone(), commit);
    }
}

#[async_trait]
impl<K, D> Repository<K, D> for MemoryRepository<K, D>
where
    K: CommitId + From<u64>,
    D: Clone + Send + Sync + 'static,
{
    async fn create_commit_id(&self) -> Result<K> {
        let mut inner = self.inner.write();
        inner.calls.create_commit_id += 1;
        loop {
            let id = K::from(inner.next_id);
            inner.next_id += 1;
            if !inner.commits.contains_key(&id) {
                return Ok(id);
            }
        }
    }

    async fn push(&self, commits: Vec<Commit<K, D>>) -> Result<()> {
        let mut inner = self.inner.write();
        inner.calls.push += 1;

        if inner.failing_pushes > 0 {
            inner.failing_pushes -= 1;
            return Err(OtError::Repository("push rejected by storage".to_string()));
        }

        inner.validate(&commits)?;
        for commit in commits {
            inner.insert(commit);
        }
        Ok(())
    }

    async fn get_heads(&self) -> Result<BTreeSet<K>> {
        let mut inner = self.inner.write();
        inner.calls.get_heads += 1;
        Ok(inner.heads.clone())
    }

    async fn load_commit(&self, id: &K) -> Result<Commit<K, D>> {
        let mut inner = self.inner.write();
        inner.calls.load_commit += 1;
        inner.load_log.push(id.clone());
        inner
            .commits
            .get(id)
            .cloned()
            .ok_or_else(|| OtError::NotFound(format!("commit {:?}", id)))
    }

    async fn save_snapshot(&self, id: &K, diffs: Vec<D>) -> Result<()> {
        let mut inner = self.inner.write();
        inner.calls.save_snapshot += 1;
        if !inner.commits.contains_key(id) {
            return Err(OtError::NotFound(format!("commit {:?}", id)));
        }
        inner.snapshots.insert(id.clone(), diffs);
        Ok(())
    }

    async fn load_snapshot(&self, id: &K) -> Result<Option<Vec<D>>> {
        let mut inner = self.inner.write();
        inner.calls.load_snapshot += 1;
        Ok(inner.snapshots.get(id).cloned())
    }
}

/// Declares a commit graph edge by edge and computes levels.
///
/// ```rust
/// use otsync_graph::GraphBuilder;
///
/// let commits = GraphBuilder::<u64, i32>::new()
///     .edge(1, 2, vec![10])
///     .edge(1, 3, vec![20])
///     .edge(2, 4, vec![1])
///     .edge(3, 4, vec![-9])
///     .build()
///     .unwrap();
///
/// assert_eq!(commits.len(), 4);
/// assert_eq!(commits.last().unwrap().level, 3);
/// ```
#[derive(Clone, Debug)]
pub struct GraphBuilder<K, D> {
    nodes: BTreeSet<K>,
    edges: BTreeMap<K, BTreeMap<K, Vec<D>>>,
}

impl<K: CommitId, D: Clone> Default for GraphBuilder<K, D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: CommitId, D: Clone> GraphBuilder<K, D> {
    pub fn new() -> Self {
        GraphBuilder {
            nodes: BTreeSet::new(),
            edges: BTreeMap::new(),
        }
    }

    /// Declare a commit with no parents.
    pub fn root(mut self, id: K) -> Self {
        self.nodes.insert(id);
        self
    }

    /// Declare `child` as having `parent`, reached by `diffs`.
    pub fn edge(mut self, parent: K, child: K, diffs: Vec<D>) -> Self {
        self.nodes.insert(parent.clone());
        self.nodes.insert(child.clone());
        self.edges.entry(child).or_default().insert(parent, diffs);
        self
    }

    /// Build commits in topological order with computed levels.
    ///
    /// Fails if the declared edges contain a cycle.
    pub fn build(self) -> Result<Vec<Commit<K, D>>> {
        let mut children: BTreeMap<&K, Vec<&K>> = BTreeMap::new();
        let mut in_degree: BTreeMap<&K, usize> = BTreeMap::new();
        for node in &self.nodes {
            let parents = self.edges.get(node).map_or(0, |p| p.len());
            in_degree.insert(node, parents);
            if let Some(parents) = self.edges.get(node) {
                for parent in parents.keys() {
                    children.entry(parent).or_default().push(node);
                }
            }
        }

        let mut queue: VecDeque<&K> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(node, _)| *node)
            .collect();
        let mut levels: BTreeMap<&K, i64> = BTreeMap::new();
        let mut commits = Vec::with_capacity(self.nodes.len());

        while let Some(node) = queue.pop_front() {
            let parents = self.edges.get(node).cloned().unwrap_or_default();
            let level = parents
                .keys()
                .filter_map(|p| levels.get(p))
                .max()
                .map_or(ROOT_LEVEL, |level| level + 1);
            levels.insert(node, level);

            commits.push(Commit {
                id: node.clone(),
                parents,
                level,
                timestamp: 0,
            });

            for child in children.get(node).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(child) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(*child);
                    }
                }
            }
        }

        if commits.len() != self.nodes.len() {
            return Err(OtError::InvariantViolation(
                "declared commit graph contains a cycle".to_string(),
            ));
        }
        Ok(commits)
    }
}
