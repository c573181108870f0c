//! File editing with three outcomes: create a missing file, rewrite an
//! existing one wholesale, or merge a partial edit whose elided regions
//! are marked `... existing code ...` (the merge itself is delegated to
//! the apply-edit collaborator).

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use std::sync::OnceLock;

use flynn_core::messages::{DiffPayload, ToolResult};
use flynn_core::provider::ApplyEditService;
use flynn_core::tools::{required_str, Tool, ToolContext, ToolError};

/// Matches an elision marker line such as `// ... existing code ...`,
/// `# ... existing code ...`, or the bare `... existing code ...`.
fn marker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*(?://|#|--|/\*|\*|<!--)?\s*\.\.\.\s*existing code\s*\.\.\.").unwrap()
    })
}

pub(crate) fn has_partial_markers(code: &str) -> bool {
    marker_regex().is_match(code)
}

pub struct EditFileTool {
    apply_edit: Arc<dyn ApplyEditService>,
}

impl EditFileTool {
    pub fn new(apply_edit: Arc<dyn ApplyEditService>) -> Self {
        Self { apply_edit }
    }
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Create or edit a file. Elide unchanged regions with a `... existing code ...` marker line"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["file_path", "code"],
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path to the file to create or edit"
                },
                "code": {
                    "type": "string",
                    "description": "The new file contents, or a partial edit using elision markers"
                }
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let file_path = required_str(&args, "file_path")?;
        let code = args
            .get("code")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArguments("missing required parameter: code".into()))?;

        let path = ctx.resolve_path(file_path);
        let exists = tokio::fs::try_exists(&path).await.unwrap_or(false);

        let (original, new_content, verb) = if !exists {
            ("".to_string(), code.to_string(), "Created new file")
        } else {
            let original = tokio::fs::read_to_string(&path).await.map_err(|e| {
                ToolError::ExecutionFailed(format!("Failed to read {}: {e}", path.display()))
            })?;
            if has_partial_markers(code) {
                let merged = self.apply_edit.apply_edit(&original, code).await?;
                (original, merged, "Modified file")
            } else {
                (original, code.to_string(), "Rewrote file")
            }
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                ToolError::ExecutionFailed(format!("Failed to create {}: {e}", parent.display()))
            })?;
        }
        tokio::fs::write(&path, &new_content).await.map_err(|e| {
            ToolError::ExecutionFailed(format!("Failed to write {}: {e}", path.display()))
        })?;

        let line_count = new_content.lines().count();
        let short = format!("{verb} ({line_count} lines)");

        Ok(ToolResult {
            success: true,
            content: short.clone(),
            error: None,
            short_result: Some(short),
            diff: Some(DiffPayload {
                original_content: original,
                new_content,
            }),
            file_path: Some(path.display().to_string()),
        })
    }
}
