//! Client-local view of part of the commit history.
//!
//! A [`LoadedGraph`] holds the commits a client has fetched so far as plain
//! id-keyed maps: child -> (parent -> diffs), parent -> children and
//! id -> level. It only grows through [`LoadedGraph::add_commit`] and
//! friends, and shrinks only through [`LoadedGraph::prune_below`].
//!
//! The merge algorithm folds any number of heads into one converged state by
//! repeatedly transforming the two lowest heads against their nearest common
//! ancestor and replacing them with a synthetic merge node.

use crate::commit::{Commit, CommitId};
use otsync_core::{OTSystem, OtError, Result};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::debug;

/// Partial commit DAG loaded from a repository.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadedGraph<K: Ord, D> {
    /// child -> (parent -> diffs along that edge)
    parents: BTreeMap<K, BTreeMap<K, Vec<D>>>,

    /// parent -> children
    children: BTreeMap<K, BTreeSet<K>>,

    /// Levels of loaded nodes. A node is loaded iff it has a level.
    levels: BTreeMap<K, i64>,
}

impl<K: Ord, D> Default for LoadedGraph<K, D> {
    fn default() -> Self {
        LoadedGraph {
            parents: BTreeMap::new(),
            children: BTreeMap::new(),
            levels: BTreeMap::new(),
        }
    }
}

impl<K: CommitId, D: Clone> LoadedGraph<K, D> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a loaded node. An already loaded node keeps its level.
    pub fn add_node(&mut self, id: K, level: i64) {
        self.parents.entry(id.clone()).or_default();
        self.levels.entry(id).or_insert(level);
    }

    /// Record an edge. An existing edge keeps its original diffs.
    pub fn add_edge(&mut self, parent: K, child: K, diffs: Vec<D>) {
        self.children
            .entry(parent.clone())
            .or_default()
            .insert(child.clone());
        self.parents
            .entry(child)
            .or_default()
            .entry(parent)
            .or_insert(diffs);
    }

    /// Record a commit and all of its parent edges.
    pub fn add_commit(&mut self, commit: &Commit<K, D>) {
        self.add_node(commit.id.clone(), commit.level);
        for (parent, diffs) in &commit.parents {
            self.add_edge(parent.clone(), commit.id.clone(), diffs.clone());
        }
    }

    pub fn contains(&self, id: &K) -> bool {
        self.levels.contains_key(id)
    }

    pub fn level(&self, id: &K) -> Option<i64> {
        self.levels.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Loaded node ids in ascending order.
    pub fn nodes(&self) -> impl Iterator<Item = &K> {
        self.levels.keys()
    }

    /// Parent edges of a node.
    pub fn parents(&self, id: &K) -> Option<&BTreeMap<K, Vec<D>>> {
        self.parents.get(id)
    }

    pub fn children(&self, id: &K) -> BTreeSet<K> {
        self.children.get(id).cloned().unwrap_or_default()
    }

    /// Diffs along the edge `parent -> child`.
    pub fn edge(&self, parent: &K, child: &K) -> Option<&[D]> {
        self.parents
            .get(child)
            .and_then(|edges| edges.get(parent))
            .map(Vec::as_slice)
    }

    /// Loaded nodes without loaded children.
    pub fn tips(&self) -> BTreeSet<K> {
        self.levels
            .keys()
            .filter(|id| {
                self.children
                    .get(*id)
                    .map_or(true, |children| !children.iter().any(|c| self.contains(c)))
            })
            .cloned()
            .collect()
    }

    /// Loaded nodes without loaded parents.
    pub fn roots(&self) -> BTreeSet<K> {
        self.levels
            .keys()
            .filter(|id| {
                self.parents
                    .get(*id)
                    .map_or(true, |edges| !edges.keys().any(|p| self.contains(p)))
            })
            .cloned()
            .collect()
    }

    /// Whether `ancestor` is reachable from `descendant` by parent edges.
    /// A node is its own ancestor.
    pub fn is_ancestor(&self, ancestor: &K, descendant: &K) -> bool {
        let overlay = Overlay::new(self);
        overlay
            .ancestors(&MergeNode::Commit(descendant.clone()))
            .contains(&MergeNode::Commit(ancestor.clone()))
    }

    /// Nearest common ancestor-or-self of two nodes: the highest level, ties
    /// broken by the lowest id.
    pub fn common_ancestor(&self, a: &K, b: &K) -> Option<K> {
        let overlay = Overlay::new(self);
        match overlay.common_ancestor(&MergeNode::Commit(a.clone()), &MergeNode::Commit(b.clone())) {
            Some(MergeNode::Commit(id)) => Some(id),
            _ => None,
        }
    }

    /// Concatenated diffs along a path from `from` to its descendant `to`.
    pub fn path_diffs(&self, from: &K, to: &K) -> Option<Vec<D>> {
        Overlay::new(self).path_diffs(&MergeNode::Commit(from.clone()), &MergeNode::Commit(to.clone()))
    }

    /// Drop every node below `min_level` together with its edges. Nodes on
    /// the boundary become roots of the loaded graph.
    pub fn prune_below(&mut self, min_level: i64) -> usize {
        let pruned: BTreeSet<K> = self
            .levels
            .iter()
            .filter(|(_, level)| **level < min_level)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &pruned {
            self.levels.remove(id);
            self.parents.remove(id);
            self.children.remove(id);
        }
        for edges in self.parents.values_mut() {
            edges.retain(|parent, _| !pruned.contains(parent));
        }
        for children in self.children.values_mut() {
            children.retain(|child| !pruned.contains(child));
        }
        pruned.len()
    }

    /// Compute, for every head, the diffs that bring it to one common state.
    ///
    /// Fails with [`OtError::GraphExhausted`] if a head is not loaded or two
    /// heads share no loaded ancestor, and with whatever `transform` returns
    /// on a conflict.
    pub fn merge<S>(&self, heads: &BTreeSet<K>, system: &S) -> Result<BTreeMap<K, Vec<D>>>
    where
        S: OTSystem<D> + ?Sized,
    {
        let mut frontier = BTreeSet::new();
        for head in heads {
            let level = self
                .level(head)
                .ok_or_else(|| OtError::GraphExhausted(format!("head {:?} is not loaded", head)))?;
            frontier.insert((level, MergeNode::Commit(head.clone())));
        }

        let mut overlay = Overlay::new(self);
        let mut forward: BTreeMap<MergeNode<K>, (MergeNode<K>, Vec<D>)> = BTreeMap::new();

        while frontier.len() > 1 {
            let (Some((level_a, a)), Some((level_b, b))) = (frontier.pop_first(), frontier.pop_first())
            else {
                break;
            };

            let ancestor = overlay.common_ancestor(&a, &b).ok_or_else(|| {
                OtError::GraphExhausted(format!("no common ancestor for {:?} and {:?}", a, b))
            })?;
            debug!(left = ?a, right = ?b, ancestor = ?ancestor, "merging pair");

            let diff_a = overlay.path_diffs(&ancestor, &a).ok_or_else(|| {
                OtError::GraphExhausted(format!("no path from {:?} to {:?}", ancestor, a))
            })?;
            let diff_b = overlay.path_diffs(&ancestor, &b).ok_or_else(|| {
                OtError::GraphExhausted(format!("no path from {:?} to {:?}", ancestor, b))
            })?;
            let transformed = system.transform(&system.squash(&diff_a), &system.squash(&diff_b))?;

            let merged = MergeNode::Synthetic(overlay.synthetic.len());
            let level = level_a.max(level_b) + 1;

            let mut edges = BTreeMap::new();
            edges.insert(a.clone(), transformed.right.clone());
            edges.insert(b.clone(), transformed.left.clone());
            overlay.synthetic.push((level, edges));

            forward.insert(a, (merged.clone(), transformed.right));
            forward.insert(b, (merged.clone(), transformed.left));
            frontier.insert((level, merged));
        }

        let mut result = BTreeMap::new();
        for head in heads {
            let mut diffs = Vec::new();
            let mut node = MergeNode::Commit(head.clone());
            while let Some((next, edge)) = forward.get(&node) {
                diffs.extend_from_slice(edge);
                node = next.clone();
            }
            result.insert(head.clone(), system.squash(&diffs));
        }
        Ok(result)
    }
}

/// A node of the graph being merged. Synthetic nodes order after commits of
/// the same level, then by creation order.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum MergeNode<K> {
    Commit(K),
    Synthetic(usize),
}

/// A loaded graph extended with the synthetic nodes created during a merge.
struct Overlay<'a, K: Ord, D> {
    graph: &'a LoadedGraph<K, D>,
    synthetic: Vec<(i64, BTreeMap<MergeNode<K>, Vec<D>>)>,
}

impl<'a, K: CommitId, D: Clone> Overlay<'a, K, D> {
    fn new(graph: &'a LoadedGraph<K, D>) -> Self {
        Overlay {
            graph,
            synthetic: Vec::new(),
        }
    }

    fn level(&self, node: &MergeNode<K>) -> Option<i64> {
        match node {
            MergeNode::Commit(id) => self.graph.level(id),
            MergeNode::Synthetic(index) => self.synthetic.get(*index).map(|(level, _)| *level),
        }
    }

    /// Loaded parents of a node with the diffs along each edge.
    fn parent_edges(&self, node: &MergeNode<K>) -> Vec<(MergeNode<K>, &[D])> {
        match node {
            MergeNode::Commit(id) => self
                .graph
                .parents
                .get(id)
                .map(|edges| {
                    edges
                        .iter()
                        .filter(|(parent, _)| self.graph.contains(parent))
                        .map(|(parent, diffs)| (MergeNode::Commit(parent.clone()), diffs.as_slice()))
                        .collect()
                })
                .unwrap_or_default(),
            MergeNode::Synthetic(index) => self
                .synthetic
                .get(*index)
                .map(|(_, edges)| {
                    edges
                        .iter()
                        .map(|(parent, diffs)| (parent.clone(), diffs.as_slice()))
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    fn edge(&self, parent: &MergeNode<K>, child: &MergeNode<K>) -> Option<&[D]> {
        self.parent_edges(child)
            .into_iter()
            .find(|(candidate, _)| candidate == parent)
            .map(|(_, diffs)| diffs)
    }

    /// Ancestors of a node, including the node itself.
    fn ancestors(&self, node: &MergeNode<K>) -> BTreeSet<MergeNode<K>> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::new();
        seen.insert(node.clone());
        queue.push_back(node.clone());

        while let Some(current) = queue.pop_front() {
            for (parent, _) in self.parent_edges(&current) {
                if seen.insert(parent.clone()) {
                    queue.push_back(parent);
                }
            }
        }
        seen
    }

    fn common_ancestor(&self, a: &MergeNode<K>, b: &MergeNode<K>) -> Option<MergeNode<K>> {
        let left = self.ancestors(a);
        let right = self.ancestors(b);
        left.intersection(&right)
            .filter_map(|node| self.level(node).map(|level| (level, node)))
            .max_by(|(level_a, a), (level_b, b)| level_a.cmp(level_b).then_with(|| b.cmp(a)))
            .map(|(_, node)| node.clone())
    }

    fn path_diffs(&self, from: &MergeNode<K>, to: &MergeNode<K>) -> Option<Vec<D>> {
        let floor = self.level(from)?;

        // next[n] is the node one step closer to `to`
        let mut next: BTreeMap<MergeNode<K>, MergeNode<K>> = BTreeMap::new();
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::new();
        seen.insert(to.clone());
        queue.push_back(to.clone());

        while let Some(current) = queue.pop_front() {
            if current == *from {
                break;
            }
            for (parent, _) in self.parent_edges(&current) {
                if self.level(&parent).map_or(true, |level| level < floor) {
                    continue;
                }
                if seen.insert(parent.clone()) {
                    next.insert(parent.clone(), current.clone());
                    queue.push_back(parent);
                }
            }
        }
        if !seen.contains(from) {
            return None;
        }

        let mut diffs = Vec::new();
        let mut current = from.clone();
        while current != *to {
            let child = next.get(&current)?.clone();
            diffs.extend_from_slice(self.edge(&current, &child)?);
            current = child;
        }
        Some(diffs)
    }
}
