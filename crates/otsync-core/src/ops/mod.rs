//! Sample op types.
//!
//! These are small, complete diff types used by tests and the simulation
//! binary. Real applications define their own enums the same way.

pub mod counter;
pub mod register;
