//! Workspace root crate.
//!
//! Re-exports the safety, controller and simulation crates so integration tests can
//! depend on a single crate.

pub use controller::*;
pub use safety::*;
pub use sim::*;
