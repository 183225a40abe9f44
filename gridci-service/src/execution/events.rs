// Execution Events
// Progress reporting and event types for matrix runs

use crate::execution::outcome::{CellStatus, RunStatus, StepStatus};

use std::time::Duration;
use tokio::sync::mpsc;

/// Sender for execution progress events
pub type ProgressSender = mpsc::UnboundedSender<ExecutionEvent>;

/// Receiver for execution progress events
pub type ProgressReceiver = mpsc::UnboundedReceiver<ExecutionEvent>;

/// Create a new progress channel
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Events emitted during a run.
///
/// Cells run concurrently, so events of different cells interleave; every
/// cell-scoped event carries the cell name.
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    /// The trigger matched and cells are about to run
    RunStarted {
        workflow: String,
        trigger: String,
        total_cells: usize,
    },

    /// The trigger did not match; nothing runs
    RunSkipped { workflow: String, trigger: String },

    /// All cells finished
    RunCompleted {
        workflow: String,
        status: RunStatus,
        duration: Duration,
    },

    /// Cell execution started
    CellStarted {
        cell: String,
        channel: Option<String>,
        experimental: bool,
        total_steps: usize,
    },

    /// Cell execution completed
    CellCompleted {
        cell: String,
        status: CellStatus,
        experimental: bool,
        duration: Duration,
    },

    /// Cell was not executed
    CellSkipped { cell: String, reason: String },

    /// Step execution started
    StepStarted {
        cell: String,
        step_index: usize,
        display_name: String,
    },

    /// Step output (stdout/stderr)
    StepOutput {
        cell: String,
        step_index: usize,
        output: String,
        is_error: bool,
    },

    /// Step execution completed
    StepCompleted {
        cell: String,
        step_index: usize,
        status: StepStatus,
        duration: Duration,
        exit_code: Option<i32>,
    },

    /// Step was skipped (condition false or an earlier step failed)
    StepSkipped {
        cell: String,
        step_index: usize,
        display_name: String,
        reason: String,
    },

    /// Log message (info, warning, error)
    Log {
        level: LogLevel,
        message: String,
        cell: Option<String>,
    },
}

/// Log level for log events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl ExecutionEvent {
    pub fn run_started(
        workflow: impl Into<String>,
        trigger: impl Into<String>,
        total_cells: usize,
    ) -> Self {
        Self::RunStarted {
            workflow: workflow.into(),
            trigger: trigger.into(),
            total_cells,
        }
    }

    pub fn run_skipped(workflow: impl Into<String>, trigger: impl Into<String>) -> Self {
        Self::RunSkipped {
            workflow: workflow.into(),
            trigger: trigger.into(),
        }
    }

    pub fn run_completed(workflow: impl Into<String>, status: RunStatus, duration: Duration) -> Self {
        Self::RunCompleted {
            workflow: workflow.into(),
            status,
            duration,
        }
    }

    pub fn cell_started(
        cell: impl Into<String>,
        channel: Option<String>,
        experimental: bool,
        total_steps: usize,
    ) -> Self {
        Self::CellStarted {
            cell: cell.into(),
            channel,
            experimental,
            total_steps,
        }
    }

    pub fn cell_completed(
        cell: impl Into<String>,
        status: CellStatus,
        experimental: bool,
        duration: Duration,
    ) -> Self {
        Self::CellCompleted {
            cell: cell.into(),
            status,
            experimental,
            duration,
        }
    }

    pub fn cell_skipped(cell: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CellSkipped {
            cell: cell.into(),
            reason: reason.into(),
        }
    }

    pub fn step_started(
        cell: impl Into<String>,
        step_index: usize,
        display_name: impl Into<String>,
    ) -> Self {
        Self::StepStarted {
            cell: cell.into(),
            step_index,
            display_name: display_name.into(),
        }
    }

    pub fn step_output(
        cell: impl Into<String>,
        step_index: usize,
        output: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self::StepOutput {
            cell: cell.into(),
            step_index,
            output: output.into(),
            is_error,
        }
    }

    pub fn step_completed(
        cell: impl Into<String>,
        step_index: usize,
        status: StepStatus,
        duration: Duration,
        exit_code: Option<i32>,
    ) -> Self {
        Self::StepCompleted {
            cell: cell.into(),
            step_index,
            status,
            duration,
            exit_code,
        }
    }

    pub fn step_skipped(
        cell: impl Into<String>,
        step_index: usize,
        display_name: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::StepSkipped {
            cell: cell.into(),
            step_index,
            display_name: display_name.into(),
            reason: reason.into(),
        }
    }

    /// Create an info log event
    pub fn info(message: impl Into<String>, cell: Option<String>) -> Self {
        Self::Log {
            level: LogLevel::Info,
            message: message.into(),
            cell,
        }
    }

    /// Create a warning log event
    pub fn warning(message: impl Into<String>, cell: Option<String>) -> Self {
        Self::Log {
            level: LogLevel::Warning,
            message: message.into(),
            cell,
        }
    }

    /// Create an error log event
    pub fn error(message: impl Into<String>, cell: Option<String>) -> Self {
        Self::Log {
            level: LogLevel::Error,
            message: message.into(),
            cell,
        }
    }
}

/// Helper trait for sending events, ignoring errors (fire-and-forget)
pub trait EventSender {
    fn send_event(&self, event: ExecutionEvent);
}

impl EventSender for ProgressSender {
    fn send_event(&self, event: ExecutionEvent) {
        let _ = self.send(event);
    }
}

impl EventSender for Option<ProgressSender> {
    fn send_event(&self, event: ExecutionEvent) {
        if let Some(sender) = self {
            let _ = sender.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_progress_channel() {
        let (tx, mut rx) = progress_channel();

        tx.send_event(ExecutionEvent::run_started("ci", "push to refs/heads/master", 2));
        tx.send_event(ExecutionEvent::cell_started(
            "ci (stable, false)",
            Some("stable".to_string()),
            false,
            3,
        ));

        let event1 = rx.recv().await.unwrap();
        assert!(matches!(event1, ExecutionEvent::RunStarted { total_cells: 2, .. }));

        let event2 = rx.recv().await.unwrap();
        assert!(matches!(event2, ExecutionEvent::CellStarted { .. }));
    }

    #[test]
    fn test_event_construction() {
        let event = ExecutionEvent::cell_completed(
            "ci (nightly, true)",
            CellStatus::Failed,
            true,
            Duration::from_secs(30),
        );

        if let ExecutionEvent::CellCompleted {
            cell,
            status,
            experimental,
            duration,
        } = event
        {
            assert_eq!(cell, "ci (nightly, true)");
            assert_eq!(status, CellStatus::Failed);
            assert!(experimental);
            assert_eq!(duration, Duration::from_secs(30));
        } else {
            panic!("wrong event type");
        }
    }

    #[test]
    fn test_optional_sender() {
        let sender: Option<ProgressSender> = None;
        // Should not panic
        sender.send_event(ExecutionEvent::info("test", None));
    }
}
