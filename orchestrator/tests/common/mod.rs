//! Shared setup for launcher integration tests
//!
//! Every test launches the `dbstub` binary built alongside the orchestrator
//! as its database program, rooted in its own temporary data directory and
//! port range so tests can run in parallel.

pub mod fixtures;
pub mod helpers;

pub use fixtures::TestFixtures;
pub use helpers::TestHarness;
