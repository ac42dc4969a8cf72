//! One-shot named pipe carrying a single payload out of the target.
//!
//! Opening a FIFO for reading blocks until a writer shows up, and a writer
//! may never show up if the debugger or the injected routine crashes. The
//! channel therefore opens its end with `O_NONBLOCK` and polls in bounded
//! steps while watching the debugger process, so draining always ends once
//! the debugger is gone.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read};
use std::os::fd::AsFd;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use log::{debug, error, warn};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::libc;
use nix::poll::{self, PollFd, PollFlags, PollTimeout};
use nix::sys::stat::Mode;
use nix::unistd;
use serde::{Deserialize, Serialize};

use crate::census::CensusRow;
use crate::errors::{CensusError, CensusResult};
use crate::process::ProcessHandle;

const PIPE_PREFIX: &str = "heapcensus-pipe";

/// Live channels per FIFO path. Sessions for a repeated target id share one
/// FIFO, which must outlive every one of them.
static HOLDERS: LazyLock<Mutex<HashMap<PathBuf, usize>>> = LazyLock::new(Default::default);

fn pipe_holders() -> MutexGuard<'static, HashMap<PathBuf, usize>> {
    HOLDERS.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Payload written by the injected routine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    Rows(Vec<CensusRow>),
    /// An exception caught inside the target, forwarded as-is.
    Error { kind: String, message: String },
}

/// Location of the pipe for `target_id` inside `dir`.
pub fn pipe_path(dir: &Path, target_id: i32) -> PathBuf {
    dir.join(format!("{PIPE_PREFIX}-{target_id}"))
}

/// Decode the bytes drained from a channel.
///
/// Nothing at all means the target never wrote: `NoData`. Anything that is
/// not exactly one payload document is a transport failure.
pub fn decode(raw: &[u8]) -> CensusResult<Vec<CensusRow>> {
    if raw.is_empty() {
        return Err(CensusError::NoData);
    }
    match serde_json::from_slice(raw).map_err(CensusError::TransportCorrupt)? {
        Payload::Rows(rows) => Ok(rows),
        Payload::Error { kind, message } => Err(CensusError::Application { kind, message }),
    }
}

enum ReadOutcome {
    Data(usize),
    Idle,
    /// Every writer has closed its end.
    HungUp,
}

/// The reading end of a per-target named pipe.
///
/// The FIFO is unlinked when the last channel for its path is dropped.
#[derive(Debug)]
pub struct IpcChannel {
    target_id: i32,
    path: PathBuf,
}

impl IpcChannel {
    /// Create the world-writable FIFO for `target_id`, reusing a stale one.
    pub fn create(dir: &Path, target_id: i32) -> CensusResult<Self> {
        let path = pipe_path(dir, target_id);
        let mut holders = pipe_holders();
        match unistd::mkfifo(path.as_path(), Mode::from_bits_truncate(0o666)) {
            Ok(()) => debug!("created pipe {}", path.display()),
            Err(Errno::EEXIST) => debug!("reusing existing pipe {}", path.display()),
            Err(err) => return Err(err.into()),
        }
        // mkfifo honours the umask; the target may run as another user.
        fs::set_permissions(&path, fs::Permissions::from_mode(0o666))?;
        *holders.entry(path.clone()).or_insert(0) += 1;
        Ok(Self { target_id, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Collect everything written to the pipe while `process` runs.
    ///
    /// On failure the process is given `grace` to exit and is then killed
    /// before the error is returned.
    pub fn drain(
        &self,
        process: &mut ProcessHandle,
        poll_interval: Duration,
        grace: Duration,
    ) -> CensusResult<Vec<u8>> {
        match self.drain_while_running(process, poll_interval) {
            Ok(bytes) => {
                debug!("drained {} bytes from target {}", bytes.len(), self.target_id);
                Ok(bytes)
            }
            Err(err) => {
                error!("draining pipe for target {} failed: {err}", self.target_id);
                if let Err(reap_err) = process.terminate(grace) {
                    warn!("failed to stop debugger {}: {reap_err}", process.pid());
                }
                Err(err)
            }
        }
    }

    fn drain_while_running(
        &self,
        process: &mut ProcessHandle,
        poll_interval: Duration,
    ) -> CensusResult<Vec<u8>> {
        let pipe = OpenOptions::new()
            .read(true)
            .custom_flags(OFlag::O_NONBLOCK.bits())
            .open(&self.path)?;
        let millis = u16::try_from(poll_interval.as_millis()).unwrap_or(u16::MAX);
        let timeout = PollTimeout::from(millis);
        let mut buffer = Vec::new();
        let mut chunk = [0u8; libc::PIPE_BUF];

        loop {
            // Sampled before reading so bytes written right before exit are kept.
            let exited = process.has_exited()?;
            match read_available(&pipe, &mut chunk, timeout)? {
                ReadOutcome::Data(n) => buffer.extend_from_slice(&chunk[..n]),
                _ if exited => break,
                // The writer is done but the debugger is still detaching.
                ReadOutcome::HungUp => thread::sleep(poll_interval),
                ReadOutcome::Idle => {}
            }
        }
        Ok(buffer)
    }
}

fn read_available(
    mut pipe: &File,
    chunk: &mut [u8],
    timeout: PollTimeout,
) -> CensusResult<ReadOutcome> {
    let ready = {
        let mut fds = [PollFd::new(pipe.as_fd(), PollFlags::POLLIN)];
        match poll::poll(&mut fds, timeout) {
            Ok(n) => n > 0,
            Err(Errno::EINTR) => false,
            Err(err) => return Err(err.into()),
        }
    };
    if !ready {
        return Ok(ReadOutcome::Idle);
    }
    match pipe.read(chunk) {
        Ok(0) => Ok(ReadOutcome::HungUp),
        Ok(n) => Ok(ReadOutcome::Data(n)),
        Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
            Ok(ReadOutcome::Idle)
        }
        Err(err) => Err(err.into()),
    }
}

impl Drop for IpcChannel {
    fn drop(&mut self) {
        let mut holders = pipe_holders();
        if let Some(count) = holders.get_mut(&self.path) {
            *count -= 1;
            if *count > 0 {
                debug!("pipe {} still in use", self.path.display());
                return;
            }
            holders.remove(&self.path);
        }
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != ErrorKind::NotFound {
                warn!("failed to remove pipe {}: {err}", self.path.display());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_read_is_no_data() {
        assert!(matches!(decode(b""), Err(CensusError::NoData)));
    }

    #[test]
    fn rows_payload_decodes() {
        let rows = decode(br#"{"rows": [["TypeA", 10, 1024]]}"#).unwrap();
        assert_eq!(rows, vec![CensusRow::basic("TypeA", 10, 1024)]);
    }

    #[test]
    fn empty_rows_payload_is_not_no_data() {
        assert_eq!(decode(br#"{"rows": []}"#).unwrap(), Vec::new());
    }

    #[test]
    fn forwarded_exception_keeps_its_cause() {
        let err = decode(br#"{"error": {"kind": "MemoryError", "message": "out of memory"}}"#)
            .unwrap_err();
        match err {
            CensusError::Application { kind, message } => {
                assert_eq!(kind, "MemoryError");
                assert_eq!(message, "out of memory");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn truncated_stream_is_transport_failure() {
        assert!(matches!(
            decode(br#"{"rows": [["TypeA", 10"#),
            Err(CensusError::TransportCorrupt(_))
        ));
        assert!(matches!(
            decode(br#"{"rows": []}{"rows": []}"#),
            Err(CensusError::TransportCorrupt(_))
        ));
    }

    #[test]
    fn shared_pipe_outlives_all_but_last_holder() {
        let dir = tempfile::tempdir().unwrap();
        let first = IpcChannel::create(dir.path(), 55).unwrap();
        let second = IpcChannel::create(dir.path(), 55).unwrap();
        let path = first.path().to_path_buf();
        drop(first);
        assert!(path.exists());
        drop(second);
        assert!(!path.exists());
    }

    #[test]
    fn pipe_is_namespaced_by_target() {
        let dir = Path::new("/tmp");
        assert_ne!(pipe_path(dir, 1), pipe_path(dir, 2));
        assert_eq!(pipe_path(dir, 7), Path::new("/tmp/heapcensus-pipe-7"));
    }
}
