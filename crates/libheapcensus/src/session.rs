//! One attach/run/detach cycle of the external debugger against a target.

use std::ffi::OsString;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use log::{debug, error, info, warn};

use crate::census::Census;
use crate::channel::{self, IpcChannel};
use crate::config::AnalyzerConfig;
use crate::errors::{CensusError, CensusResult};
use crate::process::ProcessHandle;
use crate::script::{self, ReferenceOptions, ScriptParameters, ScriptRenderer};
use crate::supervisor::Analyzer;

/// Input to one debugger session.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub target_id: i32,
    /// Executable the target runs, so the debugger can load its symbols.
    pub executable: PathBuf,
    pub references: ReferenceOptions,
    pub debug: bool,
    /// Rendered analysis script for this target.
    pub script_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    PipeReady,
    DebuggerSpawned,
    Draining,
    Completed,
    Failed,
    Detached,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::PipeReady => "pipe ready",
            Self::DebuggerSpawned => "debugger spawned",
            Self::Draining => "draining",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Detached => "detached",
        };
        f.write_str(name)
    }
}

/// Drives the debugger for a single target.
#[derive(Debug)]
pub struct DebuggerSession<'a> {
    request: AnalysisRequest,
    config: &'a AnalyzerConfig,
    state: SessionState,
    debugger: Option<ProcessHandle>,
}

impl<'a> DebuggerSession<'a> {
    pub fn new(request: AnalysisRequest, config: &'a AnalyzerConfig) -> Self {
        Self {
            request,
            config,
            state: SessionState::Created,
            debugger: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Attach, run the analysis, detach. The debugger is always reaped
    /// before this returns, whatever the outcome.
    pub fn run(&mut self) -> CensusResult<Census> {
        let target = self.request.target_id;
        let outcome = self.collect();
        match &outcome {
            Ok(census) => {
                info!("target {target}: received {} rows", census.rows().len());
                self.advance(SessionState::Completed);
            }
            Err(CensusError::NoData) => self.advance(SessionState::Completed),
            Err(err) => {
                error!("target {target} failed while {}: {err}", self.state);
                self.advance(SessionState::Failed);
            }
        }
        self.detach();
        outcome
    }

    fn collect(&mut self) -> CensusResult<Census> {
        let target = self.request.target_id;
        let channel = IpcChannel::create(&self.config.pipe_dir, target)?;
        self.advance(SessionState::PipeReady);

        let driver = script::write_driver(&self.request.script_path, target)?;
        info!("setting up debugger for pid {target}");
        let handle = ProcessHandle::launch(self.command(&driver))?;
        let debugger = self.debugger.insert(handle);
        self.state = SessionState::DebuggerSpawned;
        debug!("target {target}: {}", self.state);

        self.state = SessionState::Draining;
        debug!("target {target}: {}", self.state);
        let raw = channel.drain(debugger, self.config.poll_interval, self.config.exit_grace)?;
        match channel::decode(&raw) {
            Ok(rows) => Ok(Census::analysis(target, rows)),
            // Silence from a debugger that failed means it never got in.
            Err(CensusError::NoData) => match debugger.status() {
                Some(status) if !status.success() => {
                    Err(CensusError::AttachFailure { target, status })
                }
                _ => Err(CensusError::NoData),
            },
            Err(err) => Err(err),
        }
    }

    fn detach(&mut self) {
        if let Some(mut debugger) = self.debugger.take() {
            match debugger.terminate(self.config.exit_grace) {
                Ok(status) => {
                    debug!("debugger for target {} exited: {status}", self.request.target_id)
                }
                Err(err) => warn!("failed to reap debugger {}: {err}", debugger.pid()),
            }
        }
        self.advance(SessionState::Detached);
    }

    fn advance(&mut self, next: SessionState) {
        debug!("target {}: {} -> {next}", self.request.target_id, self.state);
        self.state = next;
    }

    /// Argument vector handed to the debugger.
    pub fn debugger_args(&self, driver: &Path) -> Vec<OsString> {
        let dir = driver.parent().unwrap_or(Path::new(".")).display().to_string();
        let batch = if self.request.debug { "-batch" } else { "-batch-silent" };
        vec![
            "-q".into(),
            self.request.executable.clone().into_os_string(),
            "-p".into(),
            self.request.target_id.to_string().into(),
            "-ex".into(),
            "set trace-commands on".into(),
            batch.into(),
            "-ex".into(),
            format!("set directories {dir}").into(),
            "-ex".into(),
            format!("py sys.path.append(\"{dir}\")").into(),
            "-x".into(),
            driver.as_os_str().to_owned(),
        ]
    }

    fn command(&self, driver: &Path) -> Command {
        let mut command = Command::new(&self.config.debugger);
        command.args(self.debugger_args(driver)).stdin(Stdio::null());
        if self.request.debug {
            command.stdout(io::stderr()).stderr(io::stderr());
        } else {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }
        command
    }
}

/// Settings applied to every target of a run.
#[derive(Debug, Clone)]
pub struct RequestTemplate {
    pub executable: PathBuf,
    pub references: ReferenceOptions,
    pub debug: bool,
    /// Where reference artifacts are written.
    pub output_dir: PathBuf,
}

/// Renders the analysis script for a target and runs a session on it.
pub struct DebuggerAnalyzer {
    config: AnalyzerConfig,
    template: RequestTemplate,
    renderer: Box<dyn ScriptRenderer>,
}

impl DebuggerAnalyzer {
    pub fn new(
        config: AnalyzerConfig,
        template: RequestTemplate,
        renderer: Box<dyn ScriptRenderer>,
    ) -> Self {
        Self {
            config,
            template,
            renderer,
        }
    }
}

impl Analyzer for DebuggerAnalyzer {
    fn analyze(&self, target_id: i32) -> CensusResult<Census> {
        info!("analyzing pid {target_id}");
        let params = ScriptParameters {
            target_id,
            references: self.template.references.clone(),
            pipe_path: channel::pipe_path(&self.config.pipe_dir, target_id),
            output_dir: self.template.output_dir.clone(),
        };
        let script_path = self.renderer.render(&params)?;
        let request = AnalysisRequest {
            target_id,
            executable: self.template.executable.clone(),
            references: self.template.references.clone(),
            debug: self.template.debug,
            script_path,
        };
        DebuggerSession::new(request, &self.config).run()
    }
}
