// gridci Service Library
// Plans and runs matrix workflows: trigger filtering, matrix expansion,
// isolated per-cell execution and result aggregation

pub mod error;
pub mod execution;
pub mod expression;
pub mod runners;
pub mod utils;
pub mod workflow;

// Re-export commonly used types
pub use error::{ServiceError, ServiceResult};

// Re-export workflow types
pub use workflow::{GitRef, Job, Trigger, TriggerEvent, Workflow, WorkflowParser};

// Re-export expression types
pub use expression::{EvalError, ExpressionContext, ExpressionEngine};

// Re-export execution types
pub use execution::{
    aggregate, progress_channel, CellResult, CellStatus, ExecutionEvent, ExecutorConfig, JobCell,
    MatrixExpander, ProgressReceiver, ProgressSender, RunOutcome, RunPlan, RunStatus,
    WorkflowExecutor,
};

// Re-export runner types
pub use runners::{RunnerRegistry, RustupInstaller, ShellRunner, ToolchainInstaller};
