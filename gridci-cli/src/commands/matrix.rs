use crate::commands::{load_workflow, workflow_path};
use crate::output;

use std::path::PathBuf;

use clap::Args;
use color_eyre::eyre::bail;
use color_eyre::Result;

use gridci_service::{ExpressionContext, JobCell, MatrixExpander};

/// Print the cells a workflow expands to, without running anything
#[derive(Args, Debug)]
pub struct MatrixArgs {
    /// Path to the workflow file (default: .github/workflows/ci.yml)
    pub workflow: Option<PathBuf>,

    /// Only expand this job
    #[arg(long, value_name = "JOB")]
    pub job: Option<String>,

    /// Print cells as a JSON array
    #[arg(long)]
    pub json: bool,
}

pub fn execute(args: MatrixArgs) -> Result<()> {
    let path = workflow_path(args.workflow);
    let (workflow, name) = load_workflow(&path)?;

    if let Some(job) = &args.job {
        if !workflow.jobs.contains_key(job) {
            bail!("Job '{}' not found in {}", job, path.display());
        }
    }

    let base = ExpressionContext::default();
    let mut cells: Vec<JobCell> = Vec::new();
    for (job_id, job) in &workflow.jobs {
        if args.job.as_ref().is_some_and(|only| only != job_id) {
            continue;
        }
        cells.extend(MatrixExpander::cells(job_id, job, &base)?);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&cells)?);
        return Ok(());
    }

    output::header(&format!("Workflow '{}' ({} cells)", name, cells.len()));
    for cell in &cells {
        let mut detail = Vec::new();
        if let Some(channel) = &cell.channel {
            detail.push(format!("toolchain {}", channel));
        }
        if let Some(target) = &cell.target {
            detail.push(format!("target {}", target));
        }
        if cell.experimental {
            detail.push("experimental".to_string());
        }
        println!("  {:<32} {}", cell.name, detail.join(", "));
    }

    Ok(())
}
