//! Tunables shared by every debugger session of a run.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_DEBUGGER: &str = "gdb";
pub const DEFAULT_PIPE_DIR: &str = "/tmp";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_EXIT_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// Debugger program, looked up on `PATH` when relative.
    pub debugger: PathBuf,
    /// Directory holding the per-target pipes.
    pub pipe_dir: PathBuf,
    /// Upper bound on each wait for pipe data.
    pub poll_interval: Duration,
    /// How long a debugger may take to exit before it is killed.
    pub exit_grace: Duration,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            debugger: PathBuf::from(DEFAULT_DEBUGGER),
            pipe_dir: PathBuf::from(DEFAULT_PIPE_DIR),
            poll_interval: DEFAULT_POLL_INTERVAL,
            exit_grace: DEFAULT_EXIT_GRACE,
        }
    }
}
