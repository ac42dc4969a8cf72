//! Materialization of the scripts the debugger loads.
//!
//! Two files exist per target. The analysis script is the routine that runs
//! inside the target; it is produced by a [`ScriptRenderer`]. The driver
//! script is what the debugger itself executes: it takes the target
//! runtime's execution lock, runs the analysis script and releases the lock.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::debug;

use crate::errors::{CensusError, CensusResult};

const DRIVER_TEMPLATE: &str = include_str!("../assets/gdb_driver.py");

/// Analysis template for CPython targets, used when none is supplied.
pub const DEFAULT_ANALYSIS_TEMPLATE: &str = include_str!("../assets/analysis.py.tmpl");

/// Which types get reference artifacts next to their census row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceOptions {
    pub max_top_n_with_refs: u32,
    pub specific_type_names: BTreeSet<String>,
}

impl ReferenceOptions {
    pub fn enabled(&self) -> bool {
        self.max_top_n_with_refs > 0 || !self.specific_type_names.is_empty()
    }
}

/// Everything the analysis script needs to know, passed explicitly.
#[derive(Debug, Clone)]
pub struct ScriptParameters {
    pub target_id: i32,
    pub references: ReferenceOptions,
    /// Where the routine writes its payload.
    pub pipe_path: PathBuf,
    /// Where reference artifacts are written.
    pub output_dir: PathBuf,
}

/// Produces the analysis script for one target.
pub trait ScriptRenderer: Send + Sync {
    /// Write the script for `params` and return its path. The path must be
    /// stable for a given target id.
    fn render(&self, params: &ScriptParameters) -> CensusResult<PathBuf>;
}

/// Renders a text template with `{{placeholder}}` substitution.
///
/// Values are substituted as JSON literals, which the default template
/// reads as Python literals.
#[derive(Debug, Clone)]
pub struct TemplateRenderer {
    template: String,
    out_dir: PathBuf,
}

impl TemplateRenderer {
    pub fn new(template: impl Into<String>, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            template: template.into(),
            out_dir: out_dir.into(),
        }
    }

    pub fn from_file(template: &Path, out_dir: impl Into<PathBuf>) -> CensusResult<Self> {
        Ok(Self::new(fs::read_to_string(template)?, out_dir))
    }

    pub fn script_path(&self, target_id: i32) -> PathBuf {
        self.out_dir.join(format!("analysis-{target_id}.py"))
    }

    fn fill(&self, params: &ScriptParameters) -> CensusResult<String> {
        let json = |value: serde_json::Value| value.to_string();
        let substitutions = [
            ("{{target_id}}", params.target_id.to_string()),
            (
                "{{max_top_n_with_refs}}",
                params.references.max_top_n_with_refs.to_string(),
            ),
            (
                "{{specific_type_names}}",
                json(serde_json::Value::from(
                    params
                        .references
                        .specific_type_names
                        .iter()
                        .cloned()
                        .collect::<Vec<_>>(),
                )),
            ),
            ("{{pipe_path}}", json(path_value(&params.pipe_path)?)),
            ("{{output_dir}}", json(path_value(&params.output_dir)?)),
        ];
        Ok(substitutions
            .iter()
            .fold(self.template.clone(), |text, (key, value)| text.replace(key, value)))
    }
}

impl ScriptRenderer for TemplateRenderer {
    fn render(&self, params: &ScriptParameters) -> CensusResult<PathBuf> {
        let path = self.script_path(params.target_id);
        fs::write(&path, self.fill(params)?)?;
        debug!("rendered analysis script {}", path.display());
        Ok(path)
    }
}

fn path_value(path: &Path) -> CensusResult<serde_json::Value> {
    path.to_str()
        .map(serde_json::Value::from)
        .ok_or_else(|| invalid_path(path))
}

fn invalid_path(path: &Path) -> CensusError {
    CensusError::Io(io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("unusable script path {}", path.display()),
    ))
}

/// Path of the driver script that accompanies `analysis_script`.
pub fn driver_path(analysis_script: &Path, target_id: i32) -> PathBuf {
    analysis_script.with_file_name(format!("driver-{target_id}.py"))
}

/// Write the driver script for `target_id` next to its analysis script.
pub fn write_driver(analysis_script: &Path, target_id: i32) -> CensusResult<PathBuf> {
    let embedded = analysis_script
        .to_str()
        .filter(|s| !s.contains(['"', '\'', '\\', '\n']))
        .ok_or_else(|| invalid_path(analysis_script))?;
    let path = driver_path(analysis_script, target_id);
    fs::write(&path, DRIVER_TEMPLATE.replace("@ANALYSIS_SCRIPT@", embedded))?;
    Ok(path)
}
