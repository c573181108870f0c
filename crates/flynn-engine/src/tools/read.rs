use async_trait::async_trait;
use serde_json::{json, Value};

use flynn_core::messages::ToolResult;
use flynn_core::tools::{optional_u64, required_str, Tool, ToolContext, ToolError};

use crate::truncate;

const DEFAULT_LIMIT: u64 = 2000;
const MAX_LINE_LEN: usize = 2000;

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read file contents, with optional line offset and limit"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["file_path"],
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path to the file to read"
                },
                "offset": {
                    "type": "integer",
                    "description": "Line number to start reading from (1-based)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to read"
                }
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let file_path = required_str(&args, "file_path")?;
        let path = ctx.resolve_path(file_path);

        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            ToolError::ExecutionFailed(format!("Failed to read {}: {e}", path.display()))
        })?;

        let offset = optional_u64(&args, "offset").unwrap_or(1).max(1) as usize;
        let limit = optional_u64(&args, "limit").unwrap_or(DEFAULT_LIMIT) as usize;

        let lines: Vec<&str> = content.lines().collect();
        let start = (offset - 1).min(lines.len());
        let end = (start + limit).min(lines.len());

        let mut output = String::new();
        for (i, line) in lines[start..end].iter().enumerate() {
            let line_num = start + i + 1;
            // Long lines are cut on a char boundary so multibyte text
            // cannot split mid-character.
            let shown = if line.len() > MAX_LINE_LEN {
                &line[..truncate::floor_char_boundary(line, MAX_LINE_LEN)]
            } else {
                line
            };
            output.push_str(&format!("{line_num:>6}\t{shown}\n"));
        }

        if output.is_empty() {
            output = "(empty file)".to_string();
        }

        Ok(ToolResult {
            short_result: Some(format!("Read {} lines", end - start)),
            file_path: Some(path.display().to_string()),
            ..ToolResult::ok(output)
        })
    }
}
