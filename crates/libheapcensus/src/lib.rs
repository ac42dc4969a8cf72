//! Core library for the heapcensus analyzer.
//! Attaches a debugger to live processes, runs an object census inside
//! them and diffs the results against earlier snapshots.

pub mod census;
pub mod channel;
pub mod config;
pub mod diff;
pub mod errors;
pub mod pipeline;
pub mod process;
pub mod script;
pub mod session;
pub mod snapshot;
pub mod supervisor;

pub use census::{Census, CensusRow};
pub use errors::{CensusError, CensusResult};

/// Exposes the crate version for CLI reporting.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
