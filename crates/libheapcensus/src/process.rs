//! Process management for the external debugger and the analyzed targets.

use std::process::{Child, Command, ExitStatus};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::{Pid, Uid};

use crate::errors::{CensusError, CensusResult};

const REAP_INTERVAL: Duration = Duration::from_millis(50);

/// Check that `pid` names a live process we are allowed to analyze.
pub fn ensure_target_alive(pid: i32) -> CensusResult<()> {
    if pid <= 0 {
        return Err(CensusError::InvalidPid(pid));
    }
    match signal::kill(Pid::from_raw(pid), None) {
        Ok(()) => Ok(()),
        Err(Errno::EPERM) if !Uid::effective().is_root() => {
            Err(CensusError::PermissionDenied(pid))
        }
        Err(_) => Err(CensusError::InvalidPid(pid)),
    }
}

/// Represents a spawned debugger process under the analyzer's control.
///
/// The exit status is cached once observed so that every reaping path is
/// idempotent. Dropping a handle whose process is still running kills it.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Pid,
    child: Child,
    status: Option<ExitStatus>,
}

impl ProcessHandle {
    /// Launch a new debugger process.
    pub fn launch(mut command: Command) -> CensusResult<Self> {
        let program = command.get_program().to_string_lossy().into_owned();
        let child = command
            .spawn()
            .map_err(|source| CensusError::Spawn { program, source })?;
        let pid = Pid::from_raw(child.id() as i32);
        debug!("launched debugger with pid {pid}");
        Ok(Self {
            pid,
            child,
            status: None,
        })
    }

    /// Access the underlying PID for logging or signalling.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Exit status, if the process has been reaped.
    pub fn status(&self) -> Option<ExitStatus> {
        self.status
    }

    /// Non-blocking check for process exit.
    pub fn has_exited(&mut self) -> CensusResult<bool> {
        Ok(self.poll_status()?.is_some())
    }

    fn poll_status(&mut self) -> CensusResult<Option<ExitStatus>> {
        if self.status.is_none() {
            self.status = self.child.try_wait()?;
        }
        Ok(self.status)
    }

    /// Wait up to `grace` for a clean exit, then kill the process.
    pub fn terminate(&mut self, grace: Duration) -> CensusResult<ExitStatus> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if let Some(status) = self.poll_status()? {
                return Ok(status);
            }
            thread::sleep(REAP_INTERVAL);
        }
        warn!("debugger {} still running after {grace:?}, killing it", self.pid);
        match signal::kill(self.pid, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(err) => return Err(err.into()),
        }
        let status = self.child.wait()?;
        self.status = Some(status);
        Ok(status)
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if self.status.is_none() {
            if let Err(err) = self.terminate(Duration::ZERO) {
                warn!("failed to reap debugger {}: {err}", self.pid);
            }
        }
    }
}
