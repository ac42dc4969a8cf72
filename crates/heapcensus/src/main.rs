//! Command-line interface for the heapcensus analyzer.

mod render;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use libheapcensus::config::{self, AnalyzerConfig};
use libheapcensus::pipeline::{self, RunOptions};
use libheapcensus::process;
use libheapcensus::script::{DEFAULT_ANALYSIS_TEMPLATE, ReferenceOptions, TemplateRenderer};
use libheapcensus::session::{DebuggerAnalyzer, RequestTemplate};
use libheapcensus::snapshot;
use libheapcensus::supervisor::Supervisor;
use log::info;

const DEFAULT_OUTPUT_DIR: &str = "heapcensus_out";

/// Top-level argument parser describing the analyzer interface.
#[derive(Parser, Debug)]
#[command(
    name = "heapcensus",
    version,
    about = "Object census of running processes",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

/// Subcommands exposed by the analyzer frontend.
#[derive(Subcommand, Debug)]
enum Command {
    /// Analyze the memory of one or more running processes.
    Run(RunArgs),
    /// Print the censuses stored in a snapshot file.
    View { filename: PathBuf },
    /// Display version information for diagnostics.
    Version,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Pids of the processes to analyze.
    #[arg(required = true)]
    pids: Vec<i32>,
    /// Show the references of the N most common types. Costly, keep N small.
    #[arg(short = 's', long = "show-references", value_name = "N", default_value_t = 0)]
    num_refs: u32,
    /// Show the references of TYPE. May be repeated.
    #[arg(long = "show-specific-references", value_name = "TYPE")]
    specific_refs: Vec<String>,
    /// Snapshot file of a previous run to compare against.
    #[arg(long)]
    snapshot: Option<PathBuf>,
    /// Don't print the results after the run.
    #[arg(short, long)]
    quiet: bool,
    /// Show debugger output, for debugging the analyzer.
    #[arg(short, long)]
    debug: bool,
    /// File to write results to.
    #[arg(short = 'f', long)]
    output_file: Option<PathBuf>,
    /// Executable of the target processes, with debug symbols.
    #[arg(short = 'e', long = "exec", default_value = "python3-dbg")]
    executable: PathBuf,
    #[arg(long, default_value = config::DEFAULT_DEBUGGER)]
    debugger: PathBuf,
    /// Analysis script template. Defaults to the bundled CPython census.
    #[arg(long)]
    template: Option<PathBuf>,
    /// Directory for the per-target pipes.
    #[arg(long, default_value = config::DEFAULT_PIPE_DIR)]
    pipe_dir: PathBuf,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    match cli.cmd {
        Command::Run(args) => run_analysis(args),
        Command::View { filename } => view_snapshot(&filename),
        Command::Version => {
            println!("heapcensus {}", libheapcensus::version());
            Ok(())
        }
    }
}

fn run_analysis(args: RunArgs) -> Result<()> {
    for &pid in &args.pids {
        process::ensure_target_alive(pid)?;
    }

    let output_file = args.output_file.unwrap_or_else(default_output_file);
    let output_dir = artifact_dir(&output_file)?;
    let scripts = tempfile::Builder::new()
        .prefix("heapcensus-")
        .tempdir()
        .context("creating script directory")?;
    let renderer = match &args.template {
        Some(path) => TemplateRenderer::from_file(path, scripts.path())
            .with_context(|| format!("reading template {}", path.display()))?,
        None => TemplateRenderer::new(DEFAULT_ANALYSIS_TEMPLATE, scripts.path()),
    };

    let config = AnalyzerConfig {
        debugger: args.debugger,
        pipe_dir: args.pipe_dir,
        ..Default::default()
    };
    let template = RequestTemplate {
        executable: args.executable,
        references: ReferenceOptions {
            max_top_n_with_refs: args.num_refs,
            specific_type_names: args.specific_refs.into_iter().collect(),
        },
        debug: args.debug,
        output_dir,
    };
    let supervisor = Supervisor::new(DebuggerAnalyzer::new(config, template, Box::new(renderer)));
    let options = RunOptions {
        snapshot: args.snapshot,
        output_file,
    };
    let censuses = pipeline::run(&supervisor, &args.pids, &options)?;

    if !args.quiet {
        render::print_censuses(&censuses);
    }
    Ok(())
}

fn view_snapshot(filename: &Path) -> Result<()> {
    info!("reading {}", filename.display());
    let censuses = snapshot::read_snapshot(filename)?;
    render::print_censuses(&censuses);
    Ok(())
}

fn default_output_file() -> PathBuf {
    let runtime = Local::now().format("%Y%m%d%H%M%S");
    Path::new(DEFAULT_OUTPUT_DIR).join(format!("heapcensus_snapshot-{runtime}"))
}

/// Absolute directory for reference artifacts, next to the output file.
/// The target resolves it from its own working directory.
fn artifact_dir(output_file: &Path) -> Result<PathBuf> {
    let dir = match output_file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    Ok(fs::canonicalize(dir)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_arguments_parse() {
        let cli = Cli::try_parse_from([
            "heapcensus",
            "run",
            "12",
            "34",
            "-s",
            "3",
            "--show-specific-references",
            "dict",
            "--show-specific-references",
            "list",
            "-q",
        ])
        .unwrap();
        let Command::Run(args) = cli.cmd else {
            panic!("expected run");
        };
        assert_eq!(args.pids, vec![12, 34]);
        assert_eq!(args.num_refs, 3);
        assert_eq!(args.specific_refs, vec!["dict", "list"]);
        assert!(args.quiet);
        assert!(!args.debug);
        assert_eq!(args.debugger, PathBuf::from("gdb"));
        assert_eq!(args.executable, PathBuf::from("python3-dbg"));
    }

    #[test]
    fn run_requires_a_pid() {
        assert!(Cli::try_parse_from(["heapcensus", "run"]).is_err());
    }

    #[test]
    fn negative_reference_count_is_rejected() {
        assert!(Cli::try_parse_from(["heapcensus", "run", "12", "-s", "-1"]).is_err());
    }

    #[test]
    fn default_output_lands_in_output_dir() {
        let path = default_output_file();
        assert!(path.starts_with(DEFAULT_OUTPUT_DIR));
        assert!(
            path.file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("heapcensus_snapshot-")
        );
    }
}
