use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Recoverable tool-level failures. These travel as data inside tool
/// requests and responses rather than aborting the query, so they are
/// serializable. Fatal failures (connection, completion service) use
/// `anyhow::Error` instead.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum AgentError {
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Tool execution failed: {0}")]
    ExecutionError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type AgentResult<T> = Result<T, AgentError>;
