//! Error taxonomy for the analyzer core.

use nix::errno;
use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;

/// Unified result type across the analyzer core.
pub type CensusResult<T> = Result<T, CensusError>;

/// Error cases
#[derive(Debug, Error)]
pub enum CensusError {
    #[error("invalid process ID {0}")]
    InvalidPid(i32),

    #[error("permission denied for process {0}, try running as root")]
    PermissionDenied(i32),

    /// The debugger exited without delivering anything and reported failure.
    #[error("debugger could not attach to process {target} ({status})")]
    AttachFailure { target: i32, status: ExitStatus },

    #[error("failed to launch debugger `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// Bytes arrived on the channel but do not form a payload.
    #[error("error retrieving data from process: {0}")]
    TransportCorrupt(#[source] serde_json::Error),

    /// The injected routine caught an exception and forwarded it.
    #[error("{kind} occurred during analysis: {message}")]
    Application { kind: String, message: String },

    /// The target closed the channel without writing anything.
    #[error("no data returned")]
    NoData,

    #[error("failed to read snapshot {}: {source}", .path.display())]
    SnapshotParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no results to report")]
    NoResults,

    #[error("system call failed: {0}")]
    SysCall(#[from] errno::Errno),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
