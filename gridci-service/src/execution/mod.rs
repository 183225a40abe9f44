// Execution Engine Module
// Matrix expansion, per-cell execution and result aggregation

pub mod cell;
pub mod events;
pub mod executor;
pub mod matrix;
pub mod outcome;

// Re-export key types
pub use cell::{CellRunner, RunContext};
pub use events::{progress_channel, ExecutionEvent, LogLevel, ProgressReceiver, ProgressSender};
pub use executor::{ExecutorConfig, PlannedJob, RunPlan, WorkflowExecutor};
pub use matrix::{Combination, JobCell, MatrixExpander};
pub use outcome::{aggregate, CellResult, CellStatus, RunOutcome, RunStatus, StepResult, StepStatus};
