//! Error types for DeployIt.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("deployer not found: {0}")]
    DeployerNotFound(String),

    #[error("flavor invalid: {0}")]
    FlavorInvalid(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("external service error: {0}")]
    ExternalService(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Closed classification of failures, used to decide how each one is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Fail fast, never retried.
    Configuration,
    /// Captured into a failed deploy result.
    Execution,
    /// Degraded to cached or default data.
    TransientExternal,
    /// Logged after execution, best effort.
    Persistence,
    NotFound,
    Conflict,
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::DeployerNotFound(_) | Error::FlavorInvalid(_) | Error::InvalidInput(_) => {
                ErrorKind::Configuration
            }
            Error::ExecutionFailed(_) => ErrorKind::Execution,
            Error::ExternalService(_) => ErrorKind::TransientExternal,
            Error::Persistence(_) => ErrorKind::Persistence,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
