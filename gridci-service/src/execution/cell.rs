// Cell Runner
// Runs the steps of one matrix cell inside its own workspace

use crate::error::{ServiceError, ServiceResult};
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::matrix::JobCell;
use crate::execution::outcome::{CellResult, CellStatus, StepResult, StepStatus};
use crate::expression::{contains_expression, ExpressionContext, ExpressionEngine, ValueExt};
use crate::runners::actions::{resolve_inputs, BuiltinAction, ToolchainRequest};
use crate::runners::file_commands::FileCommands;
use crate::runners::shell::{Shell, ShellConfig};
use crate::runners::workspace::CellWorkspace;
use crate::runners::RunnerRegistry;
use crate::workflow::{ContinueOnError, EnvMap, Job, Step, TriggerEvent, Workflow};

use serde_json::{json, Map, Value};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Run-wide settings shared by every cell
#[derive(Debug, Clone)]
pub struct RunContext {
    pub workflow_name: String,
    pub event: TriggerEvent,
    /// Repository checked out by `actions/checkout`
    pub source_dir: PathBuf,
    /// Revision checked out; HEAD of `source_dir` when `None`
    pub revision: Option<String>,
    pub keep_workspaces: bool,
    /// github and workflow env contexts
    pub expressions: ExpressionContext,
}

/// Executes single cells
#[derive(Clone)]
pub struct CellRunner {
    runners: RunnerRegistry,
    context: Arc<RunContext>,
    event_tx: Option<ProgressSender>,
}

/// Mutable state threaded through the steps of one cell
struct CellState {
    env: HashMap<String, String>,
    path_prefix: Vec<String>,
    engine: ExpressionEngine,
    failed: bool,
    error: Option<String>,
}

/// What running one step produced
struct StepRun {
    succeeded: bool,
    exit_code: Option<i32>,
    error: Option<String>,
    outputs: Map<String, Value>,
}

impl StepRun {
    fn succeeded() -> Self {
        Self {
            succeeded: true,
            exit_code: None,
            error: None,
            outputs: Map::new(),
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            exit_code: None,
            error: Some(error.into()),
            outputs: Map::new(),
        }
    }
}

impl CellRunner {
    pub fn new(runners: RunnerRegistry, context: Arc<RunContext>) -> Self {
        Self {
            runners,
            context,
            event_tx: None,
        }
    }

    /// Set progress event sender
    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Run one cell to completion.
    ///
    /// Never returns an error: anything that goes wrong, including a failed
    /// workspace or toolchain setup, is a failure of this cell only.
    pub async fn run_cell(&self, workflow: &Workflow, job: &Job, cell: &JobCell) -> CellResult {
        let start = Instant::now();
        self.event_tx.send_event(ExecutionEvent::cell_started(
            &cell.name,
            cell.channel.clone(),
            cell.experimental,
            job.steps.len(),
        ));
        tracing::info!(cell = %cell.name, channel = ?cell.channel, experimental = cell.experimental, "cell started");

        let (steps, error) = match self.prepare(workflow, job, cell) {
            Ok((workspace, mut state)) => {
                let steps = self.run_steps(workflow, job, cell, &workspace, &mut state).await;
                if workspace.is_kept() {
                    self.event_tx.send_event(ExecutionEvent::info(
                        format!("Workspace kept at {}", workspace.root().display()),
                        Some(cell.name.clone()),
                    ));
                }
                let error = if state.failed { state.error } else { None };
                (steps, error)
            }
            Err(e) => {
                self.event_tx
                    .send_event(ExecutionEvent::error(e.to_string(), Some(cell.name.clone())));
                (Vec::new(), Some(e.to_string()))
            }
        };

        let status = if error.is_some() {
            CellStatus::Failed
        } else {
            CellStatus::Succeeded
        };
        let duration = start.elapsed();

        self.event_tx.send_event(ExecutionEvent::cell_completed(
            &cell.name,
            status,
            cell.experimental,
            duration,
        ));
        tracing::info!(cell = %cell.name, ?status, ?duration, "cell completed");

        CellResult {
            cell: cell.clone(),
            status,
            steps,
            duration,
            error,
        }
    }

    /// Create the workspace and the cell's environment and expression context
    fn prepare(
        &self,
        workflow: &Workflow,
        job: &Job,
        cell: &JobCell,
    ) -> ServiceResult<(CellWorkspace, CellState)> {
        let workspace = CellWorkspace::create(&cell.name, self.context.keep_workspaces)?;
        let workspace_dir = workspace.workspace().display().to_string();
        let temp_dir = workspace.temp_dir().display().to_string();

        let mut context = self
            .context
            .expressions
            .clone()
            .with_matrix(cell.values.clone());
        context
            .github
            .insert("workspace".to_string(), json!(workspace_dir));
        context.github.insert("job".to_string(), json!(cell.job_id));
        context.runner.insert("os".to_string(), json!(runner_os()));
        context
            .runner
            .insert("arch".to_string(), json!(std::env::consts::ARCH));
        context.runner.insert("temp".to_string(), json!(temp_dir));

        let mut env = HashMap::new();
        env.insert("CI".to_string(), "true".to_string());
        env.insert("GITHUB_WORKSPACE".to_string(), workspace_dir);
        env.insert("GITHUB_JOB".to_string(), cell.job_id.clone());
        env.insert(
            "GITHUB_WORKFLOW".to_string(),
            self.context.workflow_name.clone(),
        );
        env.insert(
            "GITHUB_EVENT_NAME".to_string(),
            self.context.event.event_name().to_string(),
        );
        if let Some(git_ref) = self.context.event.qualified_ref() {
            env.insert("GITHUB_REF".to_string(), git_ref);
        }
        if let Some(name) = context.github.get("ref_name").and_then(Value::as_str) {
            env.insert("GITHUB_REF_NAME".to_string(), name.to_string());
        }
        if let Some(sha) = &self.context.revision {
            env.insert("GITHUB_SHA".to_string(), sha.clone());
        }
        env.insert("RUNNER_OS".to_string(), runner_os().to_string());
        env.insert("RUNNER_TEMP".to_string(), temp_dir);
        env.insert("GRIDCI_CELL".to_string(), cell.name.clone());

        let mut state = CellState {
            env,
            path_prefix: Vec::new(),
            engine: ExpressionEngine::new(context),
            failed: false,
            error: None,
        };

        for scope in [&workflow.env, &job.env] {
            let resolved = interpolate_env(&state.engine, scope)?;
            state.env.extend(resolved);
            state.sync_env_context();
        }

        Ok((workspace, state))
    }

    async fn run_steps(
        &self,
        workflow: &Workflow,
        job: &Job,
        cell: &JobCell,
        workspace: &CellWorkspace,
        state: &mut CellState,
    ) -> Vec<StepResult> {
        let deadline = job
            .timeout_minutes
            .map(|m| Instant::now() + minutes(m));
        let mut results = Vec::with_capacity(job.steps.len());

        for (index, step) in job.steps.iter().enumerate() {
            state.engine.context_mut().status.failed = state.failed;

            let name = step_name(&state.engine, step);
            let start = Instant::now();
            let should_run = match &step.if_condition {
                Some(condition) => state.engine.evaluate_condition(condition),
                None => Ok(!state.failed),
            };

            let run = match should_run {
                Ok(false) => {
                    let reason = match &step.if_condition {
                        Some(condition) => format!("Condition '{}' evaluated to false", condition),
                        None => "A previous step failed".to_string(),
                    };
                    self.event_tx.send_event(ExecutionEvent::step_skipped(
                        &cell.name, index, &name, reason,
                    ));
                    state.record_step(step, "skipped", "skipped", Map::new());
                    results.push(StepResult::skipped(index, name));
                    continue;
                }
                Err(e) => {
                    self.event_tx.send_event(ExecutionEvent::step_started(&cell.name, index, &name));
                    StepRun::failed(format!("Condition evaluation failed: {}", e))
                }
                Ok(true) => {
                    self.event_tx.send_event(ExecutionEvent::step_started(&cell.name, index, &name));
                    match step_timeout(step, deadline) {
                        Some(timeout) if timeout.is_zero() => {
                            StepRun::failed("Job exceeded its timeout-minutes")
                        }
                        timeout => {
                            let run = self
                                .execute_step(workflow, job, cell, workspace, state, step, index, timeout)
                                .await;
                            tracing::debug!(cell = %cell.name, step = index, elapsed = ?start.elapsed(), "step finished");
                            run.unwrap_or_else(|e| StepRun::failed(e.to_string()))
                        }
                    }
                }
            };

            results.push(self.finish_step(cell, state, step, index, name, run, start.elapsed()));
        }

        results
    }

    /// Record a finished step and fold its result into the cell state
    #[allow(clippy::too_many_arguments)]
    fn finish_step(
        &self,
        cell: &JobCell,
        state: &mut CellState,
        step: &Step,
        index: usize,
        name: String,
        run: StepRun,
        duration: Duration,
    ) -> StepResult {
        let continued = !run.succeeded && continue_on_error(&state.engine, &step.continue_on_error);

        if let Some(error) = &run.error {
            self.event_tx.send_event(ExecutionEvent::step_output(&cell.name, index, error, true));
        }
        if !run.succeeded {
            if continued {
                self.event_tx.send_event(ExecutionEvent::warning(
                    format!("Step '{}' failed; continuing", name),
                    Some(cell.name.clone()),
                ));
            } else {
                state.failed = true;
                if state.error.is_none() {
                    state.error = Some(match (&run.error, run.exit_code) {
                        (Some(error), _) => format!("{}: {}", name, error),
                        (None, Some(code)) => format!("{}: exit code {}", name, code),
                        (None, None) => format!("{}: failed", name),
                    });
                }
            }
        }

        let status = if run.succeeded {
            StepStatus::Succeeded
        } else {
            StepStatus::Failed
        };
        let outcome = if run.succeeded { "success" } else { "failure" };
        let conclusion = if run.succeeded || continued {
            "success"
        } else {
            "failure"
        };
        state.record_step(step, outcome, conclusion, run.outputs);

        self.event_tx.send_event(ExecutionEvent::step_completed(
            &cell.name,
            index,
            status,
            duration,
            run.exit_code,
        ));

        StepResult {
            index,
            name,
            status,
            exit_code: run.exit_code,
            duration,
            error: run.error,
            continued_on_error: continued,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_step(
        &self,
        workflow: &Workflow,
        job: &Job,
        cell: &JobCell,
        workspace: &CellWorkspace,
        state: &mut CellState,
        step: &Step,
        index: usize,
        timeout: Option<Duration>,
    ) -> ServiceResult<StepRun> {
        if let Some(script) = &step.run {
            self.run_script(workflow, job, cell, workspace, state, step, script, index, timeout)
                .await
        } else if let Some(uses) = &step.uses {
            self.run_action(cell, workspace, state, uses, step, index, timeout)
                .await
        } else {
            Err(ServiceError::InvalidWorkflow(
                "step has neither 'run' nor 'uses'".to_string(),
            ))
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_script(
        &self,
        workflow: &Workflow,
        job: &Job,
        cell: &JobCell,
        workspace: &CellWorkspace,
        state: &mut CellState,
        step: &Step,
        script: &str,
        index: usize,
        timeout: Option<Duration>,
    ) -> ServiceResult<StepRun> {
        let mut env = state.step_env();
        env.extend(interpolate_env(&state.engine, &step.env)?);
        state.set_env_context(&env);
        let script = state.engine.interpolate(script);
        state.sync_env_context();
        let script = script?;

        let shell = match step.shell.as_deref().or_else(|| default_shell(workflow, job)) {
            Some(name) => Some(Shell::parse(name).ok_or_else(|| {
                ServiceError::InvalidWorkflow(format!("unsupported shell '{}'", name))
            })?),
            None => None,
        };

        let working_dir = match step
            .working_directory
            .as_deref()
            .or_else(|| default_working_directory(workflow, job))
        {
            Some(dir) => workspace.workspace().join(state.engine.interpolate(dir)?),
            None => workspace.workspace().to_path_buf(),
        };

        let commands = FileCommands::create(&workspace.temp_dir().join("commands"), index)?;
        env.extend(commands.env_vars());

        let config = ShellConfig {
            working_dir: Some(working_dir),
            timeout,
        };
        let tx = self.event_tx.clone();
        let cell_name = cell.name.clone();
        let output = self
            .runners
            .shell()
            .run_streaming(
                shell,
                &script,
                &env,
                workspace.workspace(),
                &config,
                Box::new(move |line, is_error| {
                    tx.send_event(ExecutionEvent::step_output(
                        cell_name.clone(),
                        index,
                        line,
                        is_error,
                    ))
                }),
            )
            .await;

        let commands = commands.collect()?;
        state.env.extend(commands.env);
        for path in commands.paths.into_iter().rev() {
            state.path_prefix.insert(0, path);
        }
        state.sync_env_context();

        let error = if output.timed_out {
            Some("Step timed out".to_string())
        } else if output.exit_code.is_none() {
            Some(output.stderr.clone())
        } else {
            None
        };

        Ok(StepRun {
            succeeded: output.succeeded(),
            exit_code: output.exit_code,
            error,
            outputs: commands.outputs,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_action(
        &self,
        cell: &JobCell,
        workspace: &CellWorkspace,
        state: &mut CellState,
        uses: &str,
        step: &Step,
        index: usize,
        timeout: Option<Duration>,
    ) -> ServiceResult<StepRun> {
        let action = BuiltinAction::parse(uses)
            .ok_or_else(|| ServiceError::NotFound(format!("no runner for action '{}'", uses)))?;
        let inputs = resolve_inputs(&state.engine, &step.with)?;
        let emit = |line: &str| {
            self.event_tx
                .send_event(ExecutionEvent::step_output(&cell.name, index, line, false))
        };

        match action {
            BuiltinAction::Checkout => {
                let input_ref = inputs
                    .get("ref")
                    .map(|v| v.to_display_string())
                    .filter(|r| !r.is_empty());
                let revision = input_ref.or_else(|| self.context.revision.clone());
                let path = inputs
                    .get("path")
                    .map(|v| v.to_display_string())
                    .filter(|p| !p.is_empty());

                let message = with_timeout(
                    timeout,
                    workspace.checkout(&self.context.source_dir, revision.as_deref(), path.as_deref()),
                )
                .await?;
                emit(&message);
                Ok(StepRun::succeeded())
            }
            _ => {
                let request = ToolchainRequest::from_inputs(&action, &inputs)?;
                emit(&format!(
                    "Installing toolchain {} (targets: {})",
                    request.channel,
                    if request.targets.is_empty() {
                        "host".to_string()
                    } else {
                        request.targets.join(", ")
                    }
                ));

                let log = with_timeout(timeout, self.runners.installer().install(&request)).await?;
                for line in log.lines().filter(|l| !l.trim().is_empty()) {
                    emit(line);
                }

                if request.pin {
                    state
                        .env
                        .insert("RUSTUP_TOOLCHAIN".to_string(), request.channel.clone());
                    state.sync_env_context();
                    emit(&format!("Cell pinned to toolchain {}", request.channel));
                }

                let mut run = StepRun::succeeded();
                run.outputs
                    .insert("name".to_string(), Value::String(request.channel));
                Ok(run)
            }
        }
    }
}

impl CellState {
    /// Environment for a step: the cell env with PATH additions applied
    fn step_env(&self) -> HashMap<String, String> {
        let mut env = self.env.clone();
        if !self.path_prefix.is_empty() {
            let mut paths: Vec<PathBuf> = self.path_prefix.iter().map(PathBuf::from).collect();
            if let Some(path) = std::env::var_os("PATH") {
                paths.extend(std::env::split_paths(&path));
            }
            if let Ok(joined) = std::env::join_paths(paths) {
                env.insert("PATH".to_string(), joined.to_string_lossy().into_owned());
            }
        }
        env
    }

    /// Make the `env` context reflect the cell environment
    fn sync_env_context(&mut self) {
        let env = self.env.clone();
        self.set_env_context(&env);
    }

    fn set_env_context(&mut self, env: &HashMap<String, String>) {
        self.engine.context_mut().env = env
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
    }

    /// Expose a step under `steps.<id>` for later expressions
    fn record_step(&mut self, step: &Step, outcome: &str, conclusion: &str, outputs: Map<String, Value>) {
        if let Some(id) = &step.id {
            self.engine.context_mut().steps.insert(
                id.clone(),
                json!({
                    "outcome": outcome,
                    "conclusion": conclusion,
                    "outputs": Value::Object(outputs),
                }),
            );
        }
    }
}

fn step_name(engine: &ExpressionEngine, step: &Step) -> String {
    let name = step.display_name();
    if contains_expression(&name) {
        engine.interpolate(&name).unwrap_or(name)
    } else {
        name
    }
}

fn continue_on_error(engine: &ExpressionEngine, setting: &ContinueOnError) -> bool {
    match setting {
        ContinueOnError::Bool(flag) => *flag,
        ContinueOnError::Expression(expr) => engine
            .evaluate_value(expr)
            .map(|v| v.is_truthy())
            .unwrap_or(false),
    }
}

fn interpolate_env(engine: &ExpressionEngine, env: &EnvMap) -> ServiceResult<HashMap<String, String>> {
    let mut resolved = HashMap::new();
    for (key, value) in env {
        let value = match value {
            Value::String(text) => engine.interpolate(text)?,
            other => other.to_display_string(),
        };
        resolved.insert(key.clone(), value);
    }
    Ok(resolved)
}

fn default_shell<'a>(workflow: &'a Workflow, job: &'a Job) -> Option<&'a str> {
    [job.defaults.as_ref(), workflow.defaults.as_ref()]
        .into_iter()
        .flatten()
        .filter_map(|d| d.run.as_ref())
        .find_map(|run| run.shell.as_deref())
}

fn default_working_directory<'a>(workflow: &'a Workflow, job: &'a Job) -> Option<&'a str> {
    [job.defaults.as_ref(), workflow.defaults.as_ref()]
        .into_iter()
        .flatten()
        .filter_map(|d| d.run.as_ref())
        .find_map(|run| run.working_directory.as_deref())
}

/// The tighter of the step timeout and what is left of the job timeout
fn step_timeout(step: &Step, deadline: Option<Instant>) -> Option<Duration> {
    let step_limit = step.timeout_minutes.map(minutes);
    let job_limit = deadline.map(|d| d.saturating_duration_since(Instant::now()));
    match (step_limit, job_limit) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

async fn with_timeout<T>(
    timeout: Option<Duration>,
    future: impl std::future::Future<Output = ServiceResult<T>>,
) -> ServiceResult<T> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, future)
            .await
            .map_err(|_| ServiceError::Provisioning(format!("timed out after {:?}", limit)))?,
        None => future.await,
    }
}

fn minutes(m: u32) -> Duration {
    Duration::from_secs(u64::from(m) * 60)
}

fn runner_os() -> &'static str {
    match std::env::consts::OS {
        "linux" => "Linux",
        "macos" => "macOS",
        "windows" => "Windows",
        other => other,
    }
}
