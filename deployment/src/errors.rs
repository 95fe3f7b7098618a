//! Error types for the deployment core

use thiserror::Error;

/// Main error type for the deployment core
#[derive(Error, Debug)]
pub enum DeploymentError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid: {0}")]
    Invalid(String),

    #[error("dependency cycle: {0}")]
    Cycle(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl DeploymentError {
    /// Whether this error is the distinguished not-found signal that
    /// config-store callers treat as "empty, not fatal".
    pub fn is_not_found(&self) -> bool {
        matches!(self, DeploymentError::NotFound(_))
    }
}

impl From<anyhow::Error> for DeploymentError {
    fn from(err: anyhow::Error) -> Self {
        DeploymentError::Internal(err.to_string())
    }
}
