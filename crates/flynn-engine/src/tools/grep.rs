//! Regex search over the working tree. Result lines are hard-capped at 50
//! regardless of how many lines match.

use std::path::Path;

use async_trait::async_trait;
use serde_json::{json, Value};

use flynn_core::messages::ToolResult;
use flynn_core::tools::{required_str, Tool, ToolContext, ToolError};

const RESULT_LINE_CAP: usize = 50;

const IGNORED_DIRS: &[&str] = &[
    "node_modules",
    "target",
    "dist",
    "build",
    "__pycache__",
    "vendor",
    ".git",
];

pub struct GrepSearchTool;

#[async_trait]
impl Tool for GrepSearchTool {
    fn name(&self) -> &str {
        "grep_search"
    }

    fn description(&self) -> &str {
        "Search file contents with a regex pattern"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["query"],
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Regex pattern to search for"
                },
                "path": {
                    "type": "string",
                    "description": "File or directory to search (default: working directory)"
                },
                "extension": {
                    "type": "string",
                    "description": "Only search files with this extension (e.g. 'rs')"
                }
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let query = required_str(&args, "query")?;
        let search_path = match args.get("path").and_then(|v| v.as_str()) {
            Some(p) => ctx.resolve_path(p),
            None => ctx.workdir.clone(),
        };
        let extension = args
            .get("extension")
            .and_then(|v| v.as_str())
            .map(String::from);

        // An unparsable pattern is a tool-level failure, never a crash.
        let regex = regex::Regex::new(query)
            .map_err(|e| ToolError::InvalidArguments(format!("Invalid search pattern: {e}")))?;

        let matches = tokio::task::spawn_blocking(move || {
            let mut matches = Vec::new();
            search(&search_path, &regex, extension.as_deref(), &mut matches);
            matches
        })
        .await
        .map_err(|e| ToolError::ExecutionFailed(format!("Search task failed: {e}")))?;

        if matches.is_empty() {
            return Ok(ToolResult::ok("No matches found."));
        }

        let total = matches.len();
        let shown = total.min(RESULT_LINE_CAP);
        let mut output = matches[..shown].join("\n");
        if total > RESULT_LINE_CAP {
            output.push_str(&format!("\n[{} more matches not shown]", total - shown));
        }

        Ok(ToolResult {
            short_result: Some(format!("{total} matches")),
            ..ToolResult::ok(output)
        })
    }
}

fn search(path: &Path, regex: &regex::Regex, extension: Option<&str>, out: &mut Vec<String>) {
    if out.len() > RESULT_LINE_CAP {
        return;
    }
    if path.is_file() {
        search_file(path, regex, out);
    } else if path.is_dir() {
        let Ok(entries) = std::fs::read_dir(path) else {
            return;
        };
        let mut paths: Vec<_> = entries.flatten().map(|e| e.path()).collect();
        paths.sort();
        for entry in paths {
            let name = entry.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if entry.is_dir() {
                if name.starts_with('.') || IGNORED_DIRS.contains(&name) {
                    continue;
                }
                search(&entry, regex, extension, out);
            } else {
                if let Some(ext) = extension {
                    if entry.extension().and_then(|e| e.to_str()) != Some(ext) {
                        continue;
                    }
                }
                search_file(&entry, regex, out);
            }
        }
    }
}

fn search_file(path: &Path, regex: &regex::Regex, out: &mut Vec<String>) {
    // Binary and unreadable files are skipped.
    let Ok(content) = std::fs::read_to_string(path) else {
        return;
    };
    for (i, line) in content.lines().enumerate() {
        if regex.is_match(line) {
            out.push(format!("{}:{}:{}", path.display(), i + 1, line));
            if out.len() > RESULT_LINE_CAP {
                return;
            }
        }
    }
}
