pub mod matrix;
pub mod run;
pub mod validate;

use std::path::{Path, PathBuf};

use color_eyre::eyre::WrapErr;
use color_eyre::Result;

use gridci_service::utils::resolve_source_dir;
use gridci_service::{Workflow, WorkflowParser};

/// Workflow used when none is given on the command line
pub const DEFAULT_WORKFLOW: &str = ".github/workflows/ci.yml";

/// The workflow path from the command line, or the default under the
/// repository root
pub fn workflow_path(arg: Option<PathBuf>) -> PathBuf {
    arg.unwrap_or_else(|| resolve_source_dir().join(DEFAULT_WORKFLOW))
}

/// Parse and validate a workflow; returns it with its display name
pub fn load_workflow(path: &Path) -> Result<(Workflow, String)> {
    if !path.exists() {
        color_eyre::eyre::bail!("Workflow file not found: {}", path.display());
    }

    let workflow = WorkflowParser::from_file(path)
        .wrap_err_with(|| format!("Failed to load {}", path.display()))?;
    WorkflowParser::validate(&workflow)
        .wrap_err_with(|| format!("Invalid workflow {}", path.display()))?;

    let stem = path
        .file_stem()
        .and_then(|n| n.to_str())
        .unwrap_or("workflow");
    let name = workflow.display_name(stem).to_string();
    Ok((workflow, name))
}
