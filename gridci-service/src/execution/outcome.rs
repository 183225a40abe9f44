// Run Outcome
// Per-cell results and the aggregate pass/fail of a run

use crate::execution::matrix::JobCell;
use crate::workflow::TriggerEvent;

use serde::{Serialize, Serializer};

use std::fmt;
use std::time::Duration;

/// Status of a single step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed,
    Skipped,
}

/// Status of a matrix cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CellStatus {
    Succeeded,
    Failed,
    /// Not executed: job condition false or a needed job failed
    Skipped,
}

/// Aggregate result of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pass,
    Fail,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Pass => write!(f, "pass"),
            RunStatus::Fail => write!(f, "fail"),
        }
    }
}

/// Result of one step inside a cell
#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub index: usize,
    pub name: String,
    pub status: StepStatus,
    pub exit_code: Option<i32>,
    #[serde(serialize_with = "duration_secs")]
    pub duration: Duration,
    pub error: Option<String>,
    /// Failed, but `continue-on-error` kept the cell going
    pub continued_on_error: bool,
}

impl StepResult {
    pub fn skipped(index: usize, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
            status: StepStatus::Skipped,
            exit_code: None,
            duration: Duration::ZERO,
            error: None,
            continued_on_error: false,
        }
    }
}

/// Result of executing one matrix cell
#[derive(Debug, Clone, Serialize)]
pub struct CellResult {
    pub cell: JobCell,
    pub status: CellStatus,
    pub steps: Vec<StepResult>,
    #[serde(serialize_with = "duration_secs")]
    pub duration: Duration,
    /// First error that failed the cell, if any
    pub error: Option<String>,
}

impl CellResult {
    /// A cell that never ran
    pub fn skipped(cell: JobCell, reason: impl Into<String>) -> Self {
        Self {
            cell,
            status: CellStatus::Skipped,
            steps: Vec::new(),
            duration: Duration::ZERO,
            error: Some(reason.into()),
        }
    }

    pub fn failed(&self) -> bool {
        self.status == CellStatus::Failed
    }

    /// A failure that fails the whole run
    pub fn is_fatal(&self) -> bool {
        self.failed() && !self.cell.experimental
    }

    /// A failure swallowed by the experimental flag
    pub fn is_tolerated(&self) -> bool {
        self.failed() && self.cell.experimental
    }
}

/// `fail` if any non-experimental cell failed, `pass` otherwise
pub fn aggregate(results: &[CellResult]) -> RunStatus {
    if results.iter().any(CellResult::is_fatal) {
        RunStatus::Fail
    } else {
        RunStatus::Pass
    }
}

/// Everything a caller needs to report a finished run
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub workflow: String,
    pub event: TriggerEvent,
    pub status: RunStatus,
    pub cells: Vec<CellResult>,
    #[serde(serialize_with = "duration_secs")]
    pub duration: Duration,
}

impl RunOutcome {
    /// Aggregate finished cells into an outcome
    pub fn new(
        workflow: impl Into<String>,
        event: TriggerEvent,
        cells: Vec<CellResult>,
        duration: Duration,
    ) -> Self {
        Self {
            workflow: workflow.into(),
            event,
            status: aggregate(&cells),
            cells,
            duration,
        }
    }

    pub fn passed(&self) -> bool {
        self.status == RunStatus::Pass
    }

    /// Failures that decided the run
    pub fn fatal_failures(&self) -> impl Iterator<Item = &CellResult> {
        self.cells.iter().filter(|c| c.is_fatal())
    }

    /// Failures recorded for visibility only
    pub fn tolerated_failures(&self) -> impl Iterator<Item = &CellResult> {
        self.cells.iter().filter(|c| c.is_tolerated())
    }

    pub fn count(&self, status: CellStatus) -> usize {
        self.cells.iter().filter(|c| c.status == status).count()
    }
}

fn duration_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    fn cell(channel: &str, experimental: bool) -> JobCell {
        let mut values = Map::new();
        values.insert("rust".to_string(), json!(channel));
        values.insert("experimental".to_string(), json!(experimental));
        JobCell {
            job_id: "ci".to_string(),
            name: format!("ci ({}, {})", channel, experimental),
            index: 0,
            values,
            channel: Some(channel.to_string()),
            target: Some("thumbv6m-none-eabi".to_string()),
            experimental,
        }
    }

    fn result(channel: &str, experimental: bool, status: CellStatus) -> CellResult {
        CellResult {
            cell: cell(channel, experimental),
            status,
            steps: Vec::new(),
            duration: Duration::from_secs(1),
            error: None,
        }
    }

    #[test]
    fn test_stable_failure_fails_run() {
        let results = vec![
            result("stable", false, CellStatus::Failed),
            result("nightly", true, CellStatus::Succeeded),
        ];
        assert_eq!(aggregate(&results), RunStatus::Fail);
    }

    #[test]
    fn test_nightly_failure_is_tolerated() {
        let results = vec![
            result("stable", false, CellStatus::Succeeded),
            result("nightly", true, CellStatus::Failed),
        ];
        assert_eq!(aggregate(&results), RunStatus::Pass);
    }

    #[test]
    fn test_all_succeeded_passes() {
        let results = vec![
            result("stable", false, CellStatus::Succeeded),
            result("nightly", true, CellStatus::Succeeded),
        ];
        assert_eq!(aggregate(&results), RunStatus::Pass);
    }

    #[test]
    fn test_both_failed_fails() {
        let results = vec![
            result("stable", false, CellStatus::Failed),
            result("nightly", true, CellStatus::Failed),
        ];
        assert_eq!(aggregate(&results), RunStatus::Fail);
    }

    #[test]
    fn test_skipped_cells_do_not_fail() {
        let results = vec![result("stable", false, CellStatus::Skipped)];
        assert_eq!(aggregate(&results), RunStatus::Pass);
        assert_eq!(aggregate(&[]), RunStatus::Pass);
    }

    #[test]
    fn test_outcome_partitions_failures() {
        let outcome = RunOutcome::new(
            "Continuous integration",
            TriggerEvent::push_branch("master"),
            vec![
                result("stable", false, CellStatus::Succeeded),
                result("nightly", true, CellStatus::Failed),
            ],
            Duration::from_secs(2),
        );

        assert!(outcome.passed());
        assert_eq!(outcome.fatal_failures().count(), 0);
        let tolerated: Vec<_> = outcome
            .tolerated_failures()
            .map(|c| c.cell.channel.clone())
            .collect();
        assert_eq!(tolerated, vec![Some("nightly".to_string())]);
        assert_eq!(outcome.count(CellStatus::Succeeded), 1);
    }

    #[test]
    fn test_outcome_serializes_surface() {
        let outcome = RunOutcome::new(
            "ci",
            TriggerEvent::pull_request("master", None),
            vec![result("nightly", true, CellStatus::Failed)],
            Duration::from_millis(1500),
        );
        let report = serde_json::to_value(&outcome).unwrap();

        assert_eq!(report["status"], json!("pass"));
        assert_eq!(report["duration"], json!(1.5));
        assert_eq!(report["event"]["event"], json!("pull_request"));
        assert_eq!(report["cells"][0]["cell"]["channel"], json!("nightly"));
        assert_eq!(report["cells"][0]["cell"]["experimental"], json!(true));
        assert_eq!(report["cells"][0]["status"], json!("failed"));
    }
}
