//! Shell execution. Foreground commands run to completion (with a
//! timeout) and return combined output; background commands are handed to
//! the ProcessManager and return immediately with the shell id.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use flynn_core::messages::ToolResult;
use flynn_core::tools::{optional_bool, optional_u64, required_str, Tool, ToolContext, ToolError};

use crate::process::ProcessManager;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
const MAX_TIMEOUT_MS: u64 = 600_000;

pub struct RunTerminalTool {
    process_manager: Arc<ProcessManager>,
    timeout: Duration,
}

impl RunTerminalTool {
    pub fn new(process_manager: Arc<ProcessManager>) -> Self {
        Self {
            process_manager,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Tool for RunTerminalTool {
    fn name(&self) -> &str {
        "run_terminal"
    }

    fn description(&self) -> &str {
        "Execute a shell command, optionally in the background"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["command"],
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "is_background": {
                    "type": "boolean",
                    "description": "Run in the background and return a shell id immediately"
                },
                "timeout_ms": {
                    "type": "integer",
                    "description": "Foreground timeout in milliseconds (max 600000)"
                }
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let command = required_str(&args, "command")?;

        if optional_bool(&args, "is_background") {
            let shell_id = self.process_manager.spawn(command, &ctx.workdir);
            return Ok(ToolResult {
                short_result: Some(format!("Started background shell {shell_id}")),
                ..ToolResult::ok(format!(
                    "Command running in background shell {shell_id}. \
                     Its output can be inspected from the shell panel."
                ))
            });
        }

        let timeout = optional_u64(&args, "timeout_ms")
            .map(|ms| Duration::from_millis(ms.min(MAX_TIMEOUT_MS)))
            .unwrap_or(self.timeout);

        let output = tokio::time::timeout(
            timeout,
            tokio::process::Command::new("bash")
                .arg("-c")
                .arg(command)
                .current_dir(&ctx.workdir)
                .output(),
        )
        .await
        .map_err(|_| ToolError::Timeout(timeout))?
        .map_err(|e| ToolError::ExecutionFailed(format!("Failed to execute command: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        let mut content = String::new();
        if !stdout.is_empty() {
            content.push_str(&stdout);
        }
        if !stderr.is_empty() {
            if !content.is_empty() {
                content.push('\n');
            }
            content.push_str("STDERR:\n");
            content.push_str(&stderr);
        }
        if content.is_empty() {
            content = "(no output)".to_string();
        }

        let exit_code = output.status.code().unwrap_or(-1);
        if output.status.success() {
            Ok(ToolResult::ok(content))
        } else {
            Ok(ToolResult {
                success: false,
                error: Some(format!("exit code {exit_code}")),
                ..ToolResult::ok(format!("Exit code: {exit_code}\n{content}"))
            })
        }
    }
}
