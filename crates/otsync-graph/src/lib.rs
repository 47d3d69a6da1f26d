//! # otsync-graph
//!
//! Commit history for the otsync operational-transformation engine.
//!
//! This crate provides:
//! - [`Commit`]: immutable DAG nodes carrying one diff list per parent edge
//! - The [`Repository`] seam and an in-memory [`MemoryRepository`]
//! - [`LoadedGraph`]: a client-local partial DAG with the multi-head merge
//! - [`OTAlgorithms`]: checkout, diff, merge and ancestor searches
//!
//! ## Levels
//!
//! Every commit has a level, the longest path length from a root. Walks pop
//! commits in descending level order, so a commit is only visited after all
//! of its reachable descendants.
//!
//! ## Example
//!
//! ```rust
//! use otsync_core::ops::counter::{counter_system, CounterOp};
//! use otsync_graph::{GraphBuilder, MemoryRepository, OTAlgorithms, Repository};
//! use std::sync::Arc;
//!
//! # tokio_test();
//! # fn tokio_test() {
//! # let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
//! # runtime.block_on(async {
//! let repository = Arc::new(MemoryRepository::new());
//! let commits = GraphBuilder::new()
//!     .edge(1u64, 2, vec![CounterOp::Add(2)])
//!     .edge(1, 3, vec![CounterOp::Add(5)])
//!     .build()
//!     .unwrap();
//! repository.push(commits).await.unwrap();
//!
//! let algorithms = OTAlgorithms::new(repository.clone(), Arc::new(counter_system()));
//! let head = algorithms.merge_and_update_heads().await.unwrap();
//!
//! let (state, _level) = algorithms.checkout(&head).await.unwrap();
//! assert_eq!(state, vec![CounterOp::Add(7)]);
//! # });
//! # }
//! ```

mod algorithms;
mod commit;
mod graph;
mod memory;
mod repository;

pub use algorithms::{DiffsReducer, FindResult, OTAlgorithms, ToList, ToVoid};
pub use commit::{Commit, CommitId, ROOT_LEVEL};
pub use graph::LoadedGraph;
pub use memory::{CallCounts, GraphBuilder, MemoryRepository};
pub use repository::Repository;
