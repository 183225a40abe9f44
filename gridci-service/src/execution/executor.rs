// Workflow Executor
// Plans a run from a trigger event and executes its cells concurrently

use crate::error::{ServiceError, ServiceResult};
use crate::execution::cell::{CellRunner, RunContext};
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::matrix::{JobCell, MatrixExpander};
use crate::execution::outcome::{CellResult, CellStatus, RunOutcome};
use crate::expression::{ExpressionContext, ExpressionEngine, StatusContext};
use crate::runners::RunnerRegistry;
use crate::workflow::{Job, TriggerEvent, Workflow};

use serde::Serialize;
use serde_json::{json, Map, Value};

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Configuration for a run
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Repository the cells check out
    pub source_dir: PathBuf,
    /// Revision the cells check out (`github.sha`)
    pub revision: Option<String>,
    /// Maximum cells running at once across the run (0 = unlimited)
    pub max_parallel_cells: usize,
    /// Leave cell workspaces on disk after the run
    pub keep_workspaces: bool,
    /// Run only this job, ignoring its dependencies
    pub job_filter: Option<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("."),
            revision: None,
            max_parallel_cells: 0,
            keep_workspaces: false,
            job_filter: None,
        }
    }
}

/// The cells of one job
#[derive(Debug, Clone, Serialize)]
pub struct PlannedJob {
    pub job_id: String,
    pub cells: Vec<JobCell>,
}

/// Jobs grouped into levels; a level only depends on earlier levels
#[derive(Debug, Clone, Serialize)]
pub struct RunPlan {
    pub workflow: String,
    pub event: TriggerEvent,
    pub levels: Vec<Vec<PlannedJob>>,
}

impl RunPlan {
    pub fn total_cells(&self) -> usize {
        self.cells().count()
    }

    /// Every cell in execution order
    pub fn cells(&self) -> impl Iterator<Item = &JobCell> {
        self.levels
            .iter()
            .flatten()
            .flat_map(|job| job.cells.iter())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobState {
    Succeeded,
    Failed,
    Skipped,
}

/// Workflow executor
pub struct WorkflowExecutor {
    workflow: Arc<Workflow>,
    name: String,
    config: ExecutorConfig,
    runners: RunnerRegistry,
    event_tx: Option<ProgressSender>,
}

impl WorkflowExecutor {
    /// Create an executor; `name` is the workflow display name
    pub fn new(workflow: Workflow, name: impl Into<String>, runners: RunnerRegistry) -> Self {
        Self {
            workflow: Arc::new(workflow),
            name: name.into(),
            config: ExecutorConfig::default(),
            runners,
            event_tx: None,
        }
    }

    /// Set executor configuration
    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Set progress event sender
    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    /// Decide whether `event` schedules a run and, if so, expand every job
    /// into its cells.
    ///
    /// Returns `Ok(None)` when the trigger does not match.
    pub fn plan(&self, event: &TriggerEvent) -> ServiceResult<Option<RunPlan>> {
        if !self.workflow.on.matches(event) {
            return Ok(None);
        }

        let base = self.base_context(event);
        let mut levels = Vec::new();
        for level in self.job_levels()? {
            let mut jobs = Vec::with_capacity(level.len());
            for job_id in level {
                let job = self.job(&job_id)?;
                let cells = MatrixExpander::cells(&job_id, job, &base)?;
                jobs.push(PlannedJob { job_id, cells });
            }
            levels.push(jobs);
        }

        Ok(Some(RunPlan {
            workflow: self.name.clone(),
            event: event.clone(),
            levels,
        }))
    }

    /// Run every cell the event schedules and aggregate the results.
    ///
    /// Returns `Ok(None)` when the trigger does not match. Cell failures never
    /// surface as errors; only planning problems do.
    pub async fn execute(&self, event: &TriggerEvent) -> ServiceResult<Option<RunOutcome>> {
        let Some(plan) = self.plan(event)? else {
            tracing::info!(workflow = %self.name, %event, "trigger did not match");
            self.event_tx
                .send_event(ExecutionEvent::run_skipped(&self.name, event.to_string()));
            return Ok(None);
        };

        let start = Instant::now();
        let total_cells = plan.total_cells();
        tracing::info!(workflow = %self.name, %event, cells = total_cells, "run started");
        self.event_tx.send_event(ExecutionEvent::run_started(
            &self.name,
            event.to_string(),
            total_cells,
        ));

        let base = self.base_context(event);
        let context = RunContext {
            workflow_name: self.name.clone(),
            event: event.clone(),
            source_dir: self.config.source_dir.clone(),
            revision: self.config.revision.clone(),
            keep_workspaces: self.config.keep_workspaces,
            expressions: base.clone(),
        };
        let mut runner = CellRunner::new(self.runners.clone(), Arc::new(context));
        if let Some(tx) = &self.event_tx {
            runner = runner.with_progress(tx.clone());
        }

        let limit = match self.config.max_parallel_cells {
            0 => total_cells.max(1),
            n => n,
        };
        let global = Arc::new(Semaphore::new(limit));

        let mut job_states: HashMap<String, JobState> = HashMap::new();
        let mut results = Vec::with_capacity(total_cells);

        for level in &plan.levels {
            let level_results = self
                .execute_level(level, &base, &runner, &global, &job_states)
                .await;

            for (job, cells) in level.iter().zip(level_results) {
                job_states.insert(job.job_id.clone(), job_state(&cells));
                results.extend(cells);
            }
        }

        let outcome = RunOutcome::new(&self.name, event.clone(), results, start.elapsed());

        tracing::info!(
            workflow = %self.name,
            status = %outcome.status,
            tolerated = outcome.tolerated_failures().count(),
            "run completed"
        );
        self.event_tx.send_event(ExecutionEvent::run_completed(
            &self.name,
            outcome.status,
            outcome.duration,
        ));

        Ok(Some(outcome))
    }

    /// Execute all jobs of one level concurrently; results keep plan order
    async fn execute_level(
        &self,
        level: &[PlannedJob],
        base: &ExpressionContext,
        runner: &CellRunner,
        global: &Arc<Semaphore>,
        job_states: &HashMap<String, JobState>,
    ) -> Vec<Vec<CellResult>> {
        let mut slots: Vec<Vec<Option<CellResult>>> = Vec::with_capacity(level.len());
        let mut tasks = JoinSet::new();

        for (job_index, planned) in level.iter().enumerate() {
            let mut job_slots: Vec<Option<CellResult>> = vec![None; planned.cells.len()];

            let Ok(job) = self.job(&planned.job_id) else {
                slots.push(job_slots);
                continue;
            };

            match self.should_run(&planned.job_id, job, base, job_states) {
                Ok(None) => {
                    let per_job = job
                        .strategy
                        .as_ref()
                        .and_then(|s| s.max_parallel)
                        .map(|m| (m as usize).max(1))
                        .unwrap_or(planned.cells.len().max(1));
                    let job_limit = Arc::new(Semaphore::new(per_job));
                    let job = Arc::new(job.clone());

                    for (cell_index, cell) in planned.cells.iter().enumerate() {
                        let runner = runner.clone();
                        let workflow = self.workflow.clone();
                        let job = job.clone();
                        let cell = cell.clone();
                        let global = global.clone();
                        let job_limit = job_limit.clone();

                        tasks.spawn(async move {
                            let _job_permit = job_limit.acquire_owned().await.ok();
                            let _permit = global.acquire_owned().await.ok();
                            let result = runner.run_cell(&workflow, &job, &cell).await;
                            (job_index, cell_index, result)
                        });
                    }
                }
                Ok(Some(reason)) => {
                    for (slot, cell) in job_slots.iter_mut().zip(&planned.cells) {
                        self.event_tx
                            .send_event(ExecutionEvent::cell_skipped(&cell.name, &reason));
                        *slot = Some(CellResult::skipped(cell.clone(), reason.clone()));
                    }
                }
                Err(e) => {
                    for (slot, cell) in job_slots.iter_mut().zip(&planned.cells) {
                        *slot = Some(failed_cell(cell, e.to_string()));
                    }
                }
            }

            slots.push(job_slots);
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((job_index, cell_index, result)) => {
                    slots[job_index][cell_index] = Some(result);
                }
                Err(e) => tracing::error!(error = %e, "cell task did not complete"),
            }
        }

        level
            .iter()
            .zip(slots)
            .map(|(planned, job_slots)| {
                planned
                    .cells
                    .iter()
                    .zip(job_slots)
                    .map(|(cell, slot)| {
                        slot.unwrap_or_else(|| failed_cell(cell, "cell task did not complete"))
                    })
                    .collect()
            })
            .collect()
    }

    /// `Ok(None)` to run, `Ok(Some(reason))` to skip
    fn should_run(
        &self,
        job_id: &str,
        job: &Job,
        base: &ExpressionContext,
        job_states: &HashMap<String, JobState>,
    ) -> ServiceResult<Option<String>> {
        let unmet: Vec<String> = if self.config.job_filter.is_some() {
            Vec::new()
        } else {
            job.needs
                .to_vec()
                .into_iter()
                .filter(|need| job_states.get(need) != Some(&JobState::Succeeded))
                .collect()
        };

        let mut context = base.clone();
        context.github.insert("job".to_string(), json!(job_id));
        context.status = StatusContext {
            failed: !unmet.is_empty(),
            cancelled: false,
        };
        let engine = ExpressionEngine::new(context);

        match &job.if_condition {
            Some(condition) => {
                if engine.evaluate_condition(condition)? {
                    Ok(None)
                } else {
                    Ok(Some(format!("Condition '{}' evaluated to false", condition)))
                }
            }
            None if unmet.is_empty() => Ok(None),
            None => Ok(Some(format!("Needed jobs did not succeed: {}", unmet.join(", ")))),
        }
    }

    fn job(&self, job_id: &str) -> ServiceResult<&Job> {
        self.workflow
            .jobs
            .get(job_id)
            .ok_or_else(|| ServiceError::NotFound(format!("job '{}'", job_id)))
    }

    /// Group jobs so that every job comes after the jobs it needs
    fn job_levels(&self) -> ServiceResult<Vec<Vec<String>>> {
        if let Some(only) = &self.config.job_filter {
            self.job(only)?;
            return Ok(vec![vec![only.clone()]]);
        }

        let mut remaining: BTreeMap<&str, Vec<String>> = self
            .workflow
            .jobs
            .iter()
            .map(|(id, job)| (id.as_str(), job.needs.to_vec()))
            .collect();
        let mut done: Vec<String> = Vec::new();
        let mut levels = Vec::new();

        while !remaining.is_empty() {
            let ready: Vec<String> = remaining
                .iter()
                .filter(|(_, needs)| needs.iter().all(|n| done.contains(n)))
                .map(|(id, _)| id.to_string())
                .collect();

            if ready.is_empty() {
                return Err(ServiceError::InvalidWorkflow(
                    "circular job dependencies".to_string(),
                ));
            }
            for id in &ready {
                remaining.remove(id.as_str());
            }
            done.extend(ready.iter().cloned());
            levels.push(ready);
        }

        Ok(levels)
    }

    /// The github context for `event`
    fn base_context(&self, event: &TriggerEvent) -> ExpressionContext {
        let mut github = Map::new();
        github.insert("event_name".to_string(), json!(event.event_name()));
        github.insert("workflow".to_string(), json!(self.name));
        github.insert(
            "sha".to_string(),
            json!(self.config.revision.clone().unwrap_or_default()),
        );
        if let Some(git_ref) = event.qualified_ref() {
            github.insert("ref".to_string(), json!(git_ref));
        }
        if let Some(repository) = self.config.source_dir.file_name() {
            github.insert(
                "repository".to_string(),
                json!(repository.to_string_lossy()),
            );
        }

        let (ref_name, payload) = match event {
            TriggerEvent::Push { git_ref } => (Some(git_ref.short_name().to_string()), json!({})),
            TriggerEvent::PullRequest { base, head } => {
                github.insert("base_ref".to_string(), json!(base));
                github.insert("head_ref".to_string(), json!(head.clone().unwrap_or_default()));
                (
                    head.clone().or_else(|| Some(base.clone())),
                    json!({ "pull_request": { "base": { "ref": base }, "head": { "ref": head } } }),
                )
            }
            TriggerEvent::Other { .. } => (None, json!({})),
        };
        if let Some(ref_name) = ref_name {
            github.insert("ref_name".to_string(), Value::String(ref_name));
        }
        github.insert("event".to_string(), payload);

        ExpressionContext::default().with_github(github)
    }
}

fn job_state(cells: &[CellResult]) -> JobState {
    if cells.iter().any(CellResult::is_fatal) {
        JobState::Failed
    } else if !cells.is_empty() && cells.iter().all(|c| c.status == CellStatus::Skipped) {
        JobState::Skipped
    } else {
        JobState::Succeeded
    }
}

fn failed_cell(cell: &JobCell, error: impl Into<String>) -> CellResult {
    CellResult {
        cell: cell.clone(),
        status: CellStatus::Failed,
        steps: Vec::new(),
        duration: Duration::ZERO,
        error: Some(error.into()),
    }
}
