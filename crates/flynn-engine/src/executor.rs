//! Runs one model-requested tool call and normalizes every way it can go
//! wrong (unknown name, bad arguments, timeout, panic, abort) into a
//! `ToolResult` the model can read.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tracing::{error, warn};

use flynn_core::messages::{ToolCallBlock, ToolResult};
use flynn_core::tools::ToolContext;

use crate::registry::ToolRegistry;
use crate::truncate;

const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);

pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    tool_timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Execute one tool call to completion. Never returns an error: every
    /// failure mode becomes a `ToolResult` with `success = false` so the
    /// loop can feed it back to the model.
    pub async fn run(&self, call: &ToolCallBlock, ctx: &ToolContext) -> ToolResult {
        if ctx.abort.is_cancelled() {
            return ToolResult::aborted();
        }

        let Some(tool) = self.registry.get(&call.name) else {
            warn!(tool = %call.name, "unknown tool requested");
            return ToolResult::failed(format!("Unknown tool: {}", call.name));
        };

        let execution = tokio::time::timeout(
            self.tool_timeout,
            std::panic::AssertUnwindSafe(tool.execute(call.arguments.clone(), ctx)).catch_unwind(),
        );

        // Biased so a tool that finishes in the same poll as an abort
        // keeps its completed result.
        let mut result = tokio::select! {
            biased;
            outcome = execution => match outcome {
                Ok(Ok(Ok(result))) => result,
                Ok(Ok(Err(e))) => e.into_result(),
                Ok(Err(panic)) => {
                    error!(tool = %call.name, panic = %panic_message(&panic), "tool panicked");
                    ToolResult::failed("Internal error: tool crashed")
                }
                Err(_) => {
                    warn!(
                        tool = %call.name,
                        timeout_secs = self.tool_timeout.as_secs(),
                        "tool timed out"
                    );
                    ToolResult::failed(format!(
                        "Tool timed out after {}s",
                        self.tool_timeout.as_secs()
                    ))
                }
            },
            _ = ctx.abort.cancelled() => ToolResult::aborted(),
        };

        let max = truncate::max_output_for_tool(&call.name);
        result.content = truncate::truncate_output(&result.content, max);
        result
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    panic
        .downcast_ref::<String>()
        .map(|s| s.as_str())
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_string()
}
