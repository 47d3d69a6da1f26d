//! # otsync-uplink
//!
//! Client side of the otsync engine.
//!
//! This crate provides:
//! - The [`Uplink`] seam a client uses to reach its remote history
//! - [`RepositoryUplink`]: an uplink working directly on a repository
//! - [`StateManager`]: local edits, coalesced sync, polling and rebase
//! - Configuration with builders
//!
//! ## Example
//!
//! ```rust
//! use otsync_core::ops::counter::{counter_system, Counter, CounterOp};
//! use otsync_graph::MemoryRepository;
//! use otsync_uplink::{RepositoryUplink, StateManager};
//! use std::sync::Arc;
//!
//! tokio_test::block_on(async {
//!     let repository = Arc::new(MemoryRepository::<u64, CounterOp>::with_root(1));
//!     let system = Arc::new(counter_system());
//!
//!     let uplink = RepositoryUplink::<u64, CounterOp, _, _>::new(repository.clone(), system.clone());
//!     let manager = StateManager::new(uplink, system, Counter::new());
//!
//!     manager.checkout().await.unwrap();
//!     manager.add(CounterOp::Add(5)).unwrap();
//!     manager.sync().await.unwrap();
//!
//!     assert_eq!(manager.with_state(|c| c.value), 5);
//!     assert_eq!(manager.level(), Some(2));
//! });
//! ```

mod config;
mod repository_uplink;
mod state_manager;
mod uplink;

pub use config::{StateManagerConfig, StateManagerConfigBuilder, UplinkConfig, UplinkConfigBuilder};
pub use repository_uplink::RepositoryUplink;
pub use state_manager::{StateManager, SyncStatus};
pub use uplink::{FetchData, Uplink};
