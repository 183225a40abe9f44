use crate::commands::{load_workflow, workflow_path};
use crate::output;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Args;
use color_eyre::eyre::{bail, WrapErr};
use color_eyre::Result;

use gridci_service::execution::events::LogLevel;
use gridci_service::execution::StepStatus;
use gridci_service::utils::{current_ref, find_repo_root, head_revision, resolve_source_dir};
use gridci_service::{
    progress_channel, CellStatus, ExecutionEvent, ExecutorConfig, GitRef, RunOutcome, RunStatus,
    RunnerRegistry, RustupInstaller, TriggerEvent, WorkflowExecutor,
};

/// Run a workflow locally, one isolated workspace per matrix cell
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the workflow file (default: .github/workflows/ci.yml)
    pub workflow: Option<PathBuf>,

    /// Event that triggers the run: push, pull_request, or any other event name
    #[arg(long, default_value = "push", env = "GRIDCI_EVENT")]
    pub event: String,

    /// Branch pushed, or the head branch of a pull request (default: current branch)
    #[arg(long = "ref", value_name = "BRANCH", env = "GRIDCI_REF")]
    pub branch: Option<String>,

    /// Tag pushed
    #[arg(long, value_name = "TAG", conflicts_with = "branch")]
    pub tag: Option<String>,

    /// Branch a pull request targets (default: current branch)
    #[arg(long, value_name = "BRANCH")]
    pub base: Option<String>,

    /// Revision checked out in every cell (default: HEAD of the source)
    #[arg(long, value_name = "SHA", env = "GRIDCI_SHA")]
    pub sha: Option<String>,

    /// Run only a specific job, ignoring its dependencies
    #[arg(long, value_name = "JOB")]
    pub job: Option<String>,

    /// Maximum cells running at once (0 = unlimited)
    #[arg(long, short = 'j', value_name = "N", default_value_t = 0, env = "GRIDCI_JOBS")]
    pub jobs: usize,

    /// Repository to check out (default: repository containing the workflow)
    #[arg(long, value_name = "DIR", env = "GRIDCI_SOURCE")]
    pub source: Option<PathBuf>,

    /// Leave cell workspaces on disk
    #[arg(long, env = "GRIDCI_KEEP_WORKSPACES")]
    pub keep_workspaces: bool,

    /// Write the run outcome as JSON
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,
}

pub async fn execute(args: RunArgs) -> Result<()> {
    let path = workflow_path(args.workflow.clone());
    output::status("Loading", &format!("{}", path.display()));
    let (workflow, name) = load_workflow(&path)?;

    let source = match &args.source {
        Some(dir) => dir.clone(),
        None => path
            .parent()
            .and_then(find_repo_root)
            .unwrap_or_else(resolve_source_dir),
    };
    let event = trigger_event(&args, &source)?;
    let revision = args.sha.clone().or_else(|| head_revision(&source));

    let installer = match RustupInstaller::locate() {
        Ok(installer) => installer,
        Err(e) => {
            // Toolchain steps will fail their cells; plain scripts still run
            tracing::warn!(error = %e, "rustup not found");
            output::warning("rustup not found on PATH; toolchain steps will fail");
            RustupInstaller::new(PathBuf::from("rustup"))
        }
    };
    let runners = RunnerRegistry::new(Arc::new(installer));

    let config = ExecutorConfig {
        source_dir: source,
        revision,
        max_parallel_cells: args.jobs,
        keep_workspaces: args.keep_workspaces,
        job_filter: args.job.clone(),
    };

    let (tx, mut rx) = progress_channel();
    let executor = WorkflowExecutor::new(workflow, name, runners)
        .with_config(config)
        .with_progress(tx);

    let exec_handle = tokio::spawn(async move { executor.execute(&event).await });

    while let Some(event) = rx.recv().await {
        print_event(&event);
    }

    let Some(outcome) = exec_handle.await?? else {
        return Ok(());
    };

    print_summary(&outcome);

    if let Some(report) = &args.report {
        let json = serde_json::to_string_pretty(&outcome)?;
        std::fs::write(report, json)
            .wrap_err_with(|| format!("Failed to write report {}", report.display()))?;
        output::info(&format!("Report written to {}", report.display()));
    }

    if outcome.status == RunStatus::Fail {
        std::process::exit(1);
    }

    Ok(())
}

/// Build the trigger event from flags, filling gaps from the source checkout
fn trigger_event(args: &RunArgs, source: &Path) -> Result<TriggerEvent> {
    let current = || current_ref(source);

    let event = match args.event.as_str() {
        "push" => match (&args.tag, &args.branch) {
            (Some(tag), _) => TriggerEvent::push_tag(tag),
            (None, Some(branch)) => TriggerEvent::push_branch(branch),
            (None, None) => match current() {
                Some(git_ref) => TriggerEvent::Push { git_ref },
                None => bail!(
                    "Cannot tell which branch was pushed in {}; pass --ref or --tag",
                    source.display()
                ),
            },
        },
        "pull_request" => {
            let base = match &args.base {
                Some(base) => base.clone(),
                None => match current() {
                    Some(GitRef::Branch(branch)) => branch,
                    _ => bail!("Cannot tell which branch the pull request targets; pass --base"),
                },
            };
            TriggerEvent::pull_request(base, args.branch.clone())
        }
        other => TriggerEvent::Other {
            name: other.to_string(),
        },
    };

    Ok(event)
}

fn print_event(event: &ExecutionEvent) {
    match event {
        ExecutionEvent::RunStarted {
            workflow,
            trigger,
            total_cells,
        } => {
            println!();
            output::header(&format!(
                "Workflow '{}' on {} ({} cells)",
                workflow, trigger, total_cells
            ));
        }

        ExecutionEvent::RunSkipped { workflow, trigger } => {
            output::warning(&format!(
                "Workflow '{}' is not triggered by {}; nothing to run",
                workflow, trigger
            ));
        }

        ExecutionEvent::RunCompleted { .. } => {}

        ExecutionEvent::CellStarted {
            cell,
            channel,
            experimental,
            total_steps,
        } => {
            let mut label = format!("started ({} steps", total_steps);
            if let Some(channel) = channel {
                label.push_str(&format!(", toolchain {}", channel));
            }
            if *experimental {
                label.push_str(", experimental");
            }
            label.push(')');
            output::cell_line(cell, &label);
        }

        ExecutionEvent::CellCompleted {
            cell,
            status,
            experimental,
            duration,
        } => {
            let secs = duration.as_secs_f64();
            match status {
                CellStatus::Succeeded => output::cell_success(cell, &format!("OK ({:.2}s)", secs)),
                CellStatus::Failed if *experimental => output::cell_failure(
                    cell,
                    &format!("FAIL ({:.2}s), tolerated: experimental", secs),
                ),
                CellStatus::Failed => output::cell_failure(cell, &format!("FAIL ({:.2}s)", secs)),
                CellStatus::Skipped => output::cell_line(cell, "SKIP"),
            }
        }

        ExecutionEvent::CellSkipped { cell, reason } => {
            output::cell_line(cell, &format!("skipped: {}", reason));
        }

        ExecutionEvent::StepStarted {
            cell,
            step_index,
            display_name,
        } => {
            output::cell_line(cell, &format!("[Step {}] {}", step_index + 1, display_name));
        }

        ExecutionEvent::StepOutput {
            cell,
            output,
            is_error,
            ..
        } => {
            for line in output.lines() {
                if *is_error {
                    output::step_error(cell, line);
                } else {
                    output::step_output(cell, line);
                }
            }
        }

        ExecutionEvent::StepCompleted {
            cell,
            step_index,
            status,
            duration,
            exit_code,
        } => {
            let exit_info = match exit_code {
                Some(code) if *code != 0 => format!(" (exit code: {})", code),
                _ => String::new(),
            };
            let message = format!(
                "[Step {}] {} ({:.2}s){}",
                step_index + 1,
                match status {
                    StepStatus::Succeeded => "OK",
                    StepStatus::Failed => "FAIL",
                    StepStatus::Skipped => "SKIP",
                },
                duration.as_secs_f64(),
                exit_info
            );
            match status {
                StepStatus::Succeeded => output::cell_success(cell, &message),
                StepStatus::Failed => output::cell_failure(cell, &message),
                StepStatus::Skipped => output::cell_line(cell, &message),
            }
        }

        ExecutionEvent::StepSkipped {
            cell,
            step_index,
            display_name,
            reason,
        } => {
            output::cell_line(
                cell,
                &format!("[Step {}] {} skipped: {}", step_index + 1, display_name, reason),
            );
        }

        ExecutionEvent::Log {
            level,
            message,
            cell,
        } => {
            let message = match cell {
                Some(cell) => format!("[{}] {}", cell, message),
                None => message.clone(),
            };
            match level {
                LogLevel::Error => output::error(&message),
                LogLevel::Warning => output::warning(&message),
                LogLevel::Info => output::dim(&message),
            }
        }
    }
}

fn print_summary(outcome: &RunOutcome) {
    println!();
    output::header("Cells");
    for result in &outcome.cells {
        let cell = &result.cell;
        let mut detail = cell.channel.clone().unwrap_or_else(|| "-".to_string());
        if cell.experimental {
            detail.push_str(", experimental");
        }
        let line = format!("{} [{}]", cell.name, detail);
        match result.status {
            CellStatus::Succeeded => output::check(&line),
            CellStatus::Failed if result.is_tolerated() => {
                output::warning(&format!("{}: failed, tolerated", line))
            }
            CellStatus::Failed => output::failure(&format!(
                "{}: {}",
                line,
                result.error.as_deref().unwrap_or("failed")
            )),
            CellStatus::Skipped => output::dim(&format!("  - {}: skipped", line)),
        }
    }

    println!();
    let secs = outcome.duration.as_secs_f64();
    match outcome.status {
        RunStatus::Pass => output::success(&format!(
            "Run passed in {:.2}s ({} tolerated failure(s))",
            secs,
            outcome.tolerated_failures().count()
        )),
        RunStatus::Fail => output::failure(&format!(
            "Run failed after {:.2}s ({} failing cell(s))",
            secs,
            outcome.fatal_failures().count()
        )),
    }
}
