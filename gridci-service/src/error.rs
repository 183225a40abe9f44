// Service Errors
// Error type shared by workflow parsing, planning and provisioning

use crate::expression::EvalError;

use thiserror::Error;

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid workflow: {0}")]
    InvalidWorkflow(String),

    #[error("Expression error: {0}")]
    Expression(#[from] EvalError),

    #[error("Provisioning failed: {0}")]
    Provisioning(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
