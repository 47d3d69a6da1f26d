//! # otsync-core
//!
//! The algebra at the bottom of the otsync operational-transformation engine.
//!
//! This crate provides:
//! - The [`OTSystem`] contract: transform, squash, invert, emptiness
//! - [`DiffAlgebra`] and [`ListSystem`] for building systems from closed op enums
//! - [`MergedSystem`] for composing unrelated op types into one history
//! - The [`OTState`] seam applications implement
//! - The [`OtError`] taxonomy shared by every layer
//!
//! ## Example
//!
//! ```rust
//! use otsync_core::ops::counter::{counter_system, Counter, CounterOp};
//! use otsync_core::{OTState, OTSystem};
//!
//! let system = counter_system();
//! let left = vec![CounterOp::Add(2)];
//! let right = vec![CounterOp::Add(5)];
//!
//! let transformed = system.transform(&left, &right).unwrap();
//!
//! let mut a = Counter::new();
//! a.apply_all(&left);
//! a.apply_all(&transformed.right);
//!
//! let mut b = Counter::new();
//! b.apply_all(&right);
//! b.apply_all(&transformed.left);
//!
//! assert_eq!(a, b);
//! assert_eq!(a.value, 7);
//! ```

pub mod algebra;
pub mod error;
pub mod merged;
pub mod ops;
pub mod state;
pub mod system;

pub use algebra::{DiffAlgebra, ListSystem, PairTransform};
pub use error::{OtError, Result};
pub use merged::{Merged, MergedSystem};
pub use state::{OTState, RecordingState};
pub use system::{ConflictResolution, OTSystem, TransformResult};
