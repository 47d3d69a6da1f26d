//! Commit definition.
//!
//! Each commit in the history DAG contains:
//! - An identifier assigned by the repository
//! - One diff list per parent edge (parent state -> this commit's state)
//! - A level: the longest path length from a root
//! - A creation timestamp

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::time::{SystemTime, UNIX_EPOCH};

/// Requirements on commit identifiers.
pub trait CommitId: Clone + Ord + Hash + Debug + Send + Sync + 'static {}

impl<T> CommitId for T where T: Clone + Ord + Hash + Debug + Send + Sync + 'static {}

/// Level of every root commit.
pub const ROOT_LEVEL: i64 = 1;

/// An immutable node in the history DAG.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit<K: Ord, D> {
    pub id: K,

    /// Diffs along each parent edge. Empty for roots, one entry for an
    /// ordinary commit, several for a merge commit.
    pub parents: BTreeMap<K, Vec<D>>,

    /// Longest path length from a root. Always greater than every parent's.
    pub level: i64,

    /// Creation time in milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl<K: Ord + Clone, D> Commit<K, D> {
    /// Create a root commit.
    pub fn root(id: K) -> Self {
        Commit {
            id,
            parents: BTreeMap::new(),
            level: ROOT_LEVEL,
            timestamp: now_millis(),
        }
    }

    /// Create a commit with a single parent.
    pub fn child(id: K, parent: K, diffs: Vec<D>, parent_level: i64) -> Self {
        let mut parents = BTreeMap::new();
        parents.insert(parent, diffs);
        Commit {
            id,
            parents,
            level: parent_level + 1,
            timestamp: now_millis(),
        }
    }

    /// Create a merge commit. `max_parent_level` is the highest level among
    /// the parents.
    pub fn merge(id: K, parents: BTreeMap<K, Vec<D>>, max_parent_level: i64) -> Self {
        Commit {
            id,
            parents,
            level: max_parent_level + 1,
            timestamp: now_millis(),
        }
    }

    /// Override the creation timestamp.
    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }

    pub fn parent_ids(&self) -> impl Iterator<Item = &K> {
        self.parents.keys()
    }

    pub fn has_parent(&self, id: &K) -> bool {
        self.parents.contains_key(id)
    }

    /// Diffs leading from `parent` to this commit.
    pub fn diffs_from(&self, parent: &K) -> Option<&[D]> {
        self.parents.get(parent).map(Vec::as_slice)
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
