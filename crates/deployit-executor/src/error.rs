//! Executor errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("`{command}` failed: {output}")]
    CommandFailed { command: String, output: String },

    #[error("failed to parse tool output: {0}")]
    ParseFailed(String),

    #[error("workspace error: {0}")]
    Workspace(String),
}

pub type ExecutorResult<T> = std::result::Result<T, ExecutorError>;

impl From<ExecutorError> for deployit_core::Error {
    fn from(err: ExecutorError) -> Self {
        deployit_core::Error::ExecutionFailed(err.to_string())
    }
}
