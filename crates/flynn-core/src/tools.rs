use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::ids::SessionId;
use crate::messages::ToolResult;

/// Execution context handed to every tool call. The abort token is the
/// run's token; long-running tools select on it.
#[derive(Clone, Debug)]
pub struct ToolContext {
    pub session_id: SessionId,
    pub workdir: PathBuf,
    pub abort: CancellationToken,
}

impl ToolContext {
    pub fn new(session_id: SessionId, workdir: impl Into<PathBuf>) -> Self {
        Self {
            session_id,
            workdir: workdir.into(),
            abort: CancellationToken::new(),
        }
    }

    pub fn with_abort(mut self, abort: CancellationToken) -> Self {
        self.abort = abort;
        self
    }

    /// Resolve a possibly-relative path against the working directory.
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let p = PathBuf::from(path);
        if p.is_absolute() {
            p
        } else {
            self.workdir.join(p)
        }
    }
}

/// Wire-facing description of a tool, sent to the model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: Value,
}

/// The uniform plugin contract. Built-in and MCP-bridged tools look the
/// same to the executor; each validates its own parameters and fails fast
/// with a descriptive error.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters_schema: self.parameters_schema(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("aborted")]
    Aborted,
}

impl ToolError {
    /// Tool failures are data, not control flow: the executor feeds them
    /// back to the model as failed results.
    pub fn into_result(self) -> ToolResult {
        match self {
            Self::Aborted => ToolResult::aborted(),
            other => ToolResult::failed(other.to_string()),
        }
    }
}

/// Extract a required string argument from a tool-call arguments object.
pub fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ToolError::InvalidArguments(format!("missing required parameter: {key}")))
}

/// Extract an optional boolean argument, defaulting to false.
pub fn optional_bool(args: &Value, key: &str) -> bool {
    args.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
}

/// Extract an optional unsigned integer argument.
pub fn optional_u64(args: &Value, key: &str) -> Option<u64> {
    args.get(key).and_then(|v| v.as_u64())
}
