use async_trait::async_trait;
use serde_json::{json, Value};

use flynn_core::messages::ToolResult;
use flynn_core::tools::{required_str, Tool, ToolContext, ToolError};

pub struct DeleteFileTool;

#[async_trait]
impl Tool for DeleteFileTool {
    fn name(&self) -> &str {
        "delete_file"
    }

    fn description(&self) -> &str {
        "Delete a file from the filesystem"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["file_path"],
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path to the file to delete"
                }
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let file_path = required_str(&args, "file_path")?;
        let path = ctx.resolve_path(file_path);

        tokio::fs::remove_file(&path).await.map_err(|e| {
            ToolError::ExecutionFailed(format!("Failed to delete {}: {e}", path.display()))
        })?;

        Ok(ToolResult {
            file_path: Some(path.display().to_string()),
            ..ToolResult::ok(format!("Deleted {}", path.display()))
        })
    }
}
