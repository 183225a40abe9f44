use crate::commands::workflow_path;
use crate::output;

use std::path::PathBuf;

use clap::Args;
use color_eyre::Result;

use gridci_service::runners::BuiltinAction;
use gridci_service::{ExpressionContext, MatrixExpander, WorkflowParser};

/// Validate a workflow file
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Path to the workflow file (default: .github/workflows/ci.yml)
    pub workflow: Option<PathBuf>,
}

pub fn execute(args: ValidateArgs) -> Result<()> {
    let path = workflow_path(args.workflow);

    if !path.exists() {
        color_eyre::eyre::bail!("Workflow file not found: {}", path.display());
    }

    output::status("Validating", &format!("{}", path.display()));

    // Step 1: YAML syntax and shape
    let workflow = match WorkflowParser::from_file(&path) {
        Ok(w) => w,
        Err(e) => {
            output::error(&format!("Parse error: {}", e));
            std::process::exit(1);
        }
    };
    output::check("YAML syntax valid");

    // Step 2: Semantic validation
    if let Err(e) = WorkflowParser::validate(&workflow) {
        output::error(&e.to_string());
        std::process::exit(1);
    }
    let steps: usize = workflow.jobs.values().map(|j| j.steps.len()).sum();
    output::check(&format!(
        "Structure: {} jobs, {} steps",
        workflow.jobs.len(),
        steps
    ));

    let events = workflow.on.event_names();
    if events.is_empty() {
        output::warning("Workflow has no triggers; no event will run it");
    } else {
        output::check(&format!("Triggers: {}", events.join(", ")));
    }

    // Step 3: Matrix expansion and actions
    let mut failed = false;
    let base = ExpressionContext::default();
    for (job_id, job) in &workflow.jobs {
        match MatrixExpander::cells(job_id, job, &base) {
            Ok(cells) => output::check(&format!("Job '{}': {} cell(s)", job_id, cells.len())),
            Err(e) => {
                output::error(&format!("Job '{}': {}", job_id, e));
                failed = true;
            }
        }

        for step in job.steps.iter().filter(|s| s.is_uses()) {
            let uses = step.uses.as_deref().unwrap_or_default();
            if BuiltinAction::parse(uses).is_none() {
                output::warning(&format!(
                    "Job '{}': action '{}' is not supported and will fail its cells",
                    job_id, uses
                ));
            }
        }
    }

    if failed {
        std::process::exit(1);
    }

    println!();
    output::success("Workflow is valid");

    Ok(())
}
