#[cfg(test)]
pub(crate) mod fixtures;
pub mod models;
pub mod parser;
pub mod trigger;

pub use models::{
    ContinueOnError, Defaults, EnvMap, Job, JobNeeds, Matrix, RunDefaults, RunsOn, Step,
    Strategy, Workflow,
};
pub use parser::WorkflowParser;
pub use trigger::{matches_filters, EventConfig, GitRef, Trigger, TriggerEvent};
