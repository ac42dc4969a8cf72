//! Draining real FIFOs against real child processes.

use std::path::Path;
use std::process::Command;
use std::thread;
use std::time::{Duration, Instant};

use libheapcensus::channel::{self, IpcChannel};
use libheapcensus::process::ProcessHandle;
use libheapcensus::{CensusError, CensusRow};
use nix::sys::signal::{self, Signal};

const POLL: Duration = Duration::from_millis(100);
const GRACE: Duration = Duration::from_secs(5);

fn shell(script: &str) -> ProcessHandle {
    let mut command = Command::new("sh");
    command.arg("-c").arg(script);
    ProcessHandle::launch(command).unwrap()
}

fn write_to(pipe: &Path, payload: &str) -> ProcessHandle {
    shell(&format!("printf '%s' '{payload}' > '{}'", pipe.display()))
}

#[test]
fn payload_written_by_child_is_drained() {
    let dir = tempfile::tempdir().unwrap();
    let chan = IpcChannel::create(dir.path(), 101).unwrap();
    let mut child = write_to(chan.path(), r#"{"rows":[["TypeA",10,1024]]}"#);
    let raw = chan.drain(&mut child, POLL, GRACE).unwrap();
    assert_eq!(
        channel::decode(&raw).unwrap(),
        vec![CensusRow::basic("TypeA", 10, 1024)]
    );
}

#[test]
fn silent_child_yields_no_data_without_hanging() {
    let dir = tempfile::tempdir().unwrap();
    let chan = IpcChannel::create(dir.path(), 102).unwrap();
    let mut child = shell("sleep 0.3");
    let started = Instant::now();
    let raw = chan.drain(&mut child, POLL, GRACE).unwrap();
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(raw.is_empty());
    assert!(matches!(channel::decode(&raw), Err(CensusError::NoData)));
}

#[test]
fn externally_killed_child_ends_drain() {
    let dir = tempfile::tempdir().unwrap();
    let chan = IpcChannel::create(dir.path(), 103).unwrap();
    let pipe = chan.path().to_path_buf();
    let mut child = shell("sleep 30");
    let pid = child.pid();
    let killer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        signal::kill(pid, Signal::SIGKILL).unwrap();
    });
    let started = Instant::now();
    let raw = chan.drain(&mut child, POLL, GRACE).unwrap();
    killer.join().unwrap();
    assert!(raw.is_empty());
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(!child.status().unwrap().success());
    drop(chan);
    assert!(!pipe.exists());
}

#[test]
fn payload_larger_than_pipe_buffer_arrives_whole() {
    let dir = tempfile::tempdir().unwrap();
    let chan = IpcChannel::create(dir.path(), 104).unwrap();
    let script = format!(
        concat!(
            r#"{{ printf '{{"rows":[["'; head -c 200000 /dev/zero | tr '\0' a; "#,
            r#"printf '",1,2]]}}'; }} > '{}'"#,
        ),
        chan.path().display()
    );
    let mut child = shell(&script);
    let raw = chan.drain(&mut child, POLL, GRACE).unwrap();
    let rows = channel::decode(&raw).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].type_name().len(), 200_000);
    assert_eq!((rows[0].count(), rows[0].bytes()), (1, 2));
}

#[test]
fn stale_pipe_is_reused() {
    let dir = tempfile::tempdir().unwrap();
    let stale = channel::pipe_path(dir.path(), 105);
    nix::unistd::mkfifo(stale.as_path(), nix::sys::stat::Mode::from_bits_truncate(0o600)).unwrap();
    let chan = IpcChannel::create(dir.path(), 105).unwrap();
    assert_eq!(chan.path(), stale);
    let mut child = write_to(chan.path(), r#"{"rows":[]}"#);
    let raw = chan.drain(&mut child, POLL, GRACE).unwrap();
    assert!(channel::decode(&raw).unwrap().is_empty());
}

#[test]
fn pipe_is_world_writable() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let chan = IpcChannel::create(dir.path(), 106).unwrap();
    let mode = std::fs::metadata(chan.path()).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o666);
}

#[test]
fn failed_drain_stops_the_debugger() {
    let dir = tempfile::tempdir().unwrap();
    let chan = IpcChannel::create(dir.path(), 107).unwrap();
    std::fs::remove_file(chan.path()).unwrap();
    let mut child = shell("sleep 30");
    let grace = Duration::from_millis(200);
    let started = Instant::now();
    let err = chan.drain(&mut child, POLL, grace).unwrap_err();
    assert!(matches!(err, CensusError::Io(_)));
    assert!(started.elapsed() < grace + Duration::from_secs(1));
    assert!(!child.status().unwrap().success());
}
