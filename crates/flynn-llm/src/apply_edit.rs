use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use flynn_core::provider::{ApplyEditService, LlmContext, LlmProvider, StreamOptions};
use flynn_core::tools::ToolError;

use crate::summarize::collect_final_text;

const APPLY_EDIT_SYSTEM_PROMPT: &str = "\
You merge a partial code edit into an existing file. The edit uses \
`... existing code ...` markers to stand for unchanged regions; expand \
those markers from the original file and apply the changed lines. \
Output the complete merged file and nothing else. Do not wrap the \
output in a code fence.";

const APPLY_EDIT_MAX_TOKENS: u32 = 16_384;

/// Merges marker-style partial edits into a file by delegating the
/// expansion to the model.
pub struct LlmApplyEdit {
    provider: Arc<dyn LlmProvider>,
}

impl LlmApplyEdit {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl ApplyEditService for LlmApplyEdit {
    #[instrument(skip_all, fields(existing_bytes = existing.len(), edit_bytes = edit.len()))]
    async fn apply_edit(&self, existing: &str, edit: &str) -> Result<String, ToolError> {
        let prompt = format!(
            "<file>\n{existing}\n</file>\n\n<edit>\n{edit}\n</edit>\n\n\
             Produce the full contents of the file with the edit applied."
        );

        let context = LlmContext {
            messages: vec![flynn_core::messages::Message::user_text(prompt)],
            system_prompt: Some(APPLY_EDIT_SYSTEM_PROMPT.to_string()),
            tools: Vec::new(),
        };
        let options = StreamOptions {
            max_tokens: APPLY_EDIT_MAX_TOKENS,
            temperature: None,
        };

        let stream = self
            .provider
            .stream(&context, &options)
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("apply edit failed: {e}")))?;

        let merged = collect_final_text(stream, &CancellationToken::new())
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("apply edit failed: {e}")))?;

        Ok(strip_code_fence(&merged))
    }
}

/// Models occasionally fence the output despite instructions.
fn strip_code_fence(text: &str) -> String {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return text.to_string();
    };
    let Some(body) = rest.strip_suffix("```") else {
        return text.to_string();
    };
    // Drop the language tag line if present.
    match body.split_once('\n') {
        Some((_lang, content)) => content.to_string(),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockProvider, MockResponse};
    use flynn_core::errors::ProviderError;

    #[tokio::test]
    async fn returns_merged_content() {
        let provider = Arc::new(MockProvider::new(vec![MockResponse::text(
            "fn main() {\n    println!(\"patched\");\n}\n",
        )]));
        let service = LlmApplyEdit::new(provider.clone());

        let merged = service
            .apply_edit("fn main() {}\n", "// ... existing code ...\nprintln!(\"patched\");")
            .await
            .unwrap();
        assert!(merged.contains("patched"));

        let requests = provider.requests();
        let sent = requests[0].messages[0].text_content();
        assert!(sent.contains("<file>"));
        assert!(sent.contains("<edit>"));
    }

    #[tokio::test]
    async fn provider_error_becomes_tool_error() {
        let provider = Arc::new(MockProvider::new(vec![MockResponse::Error(
            ProviderError::Overloaded,
        )]));
        let service = LlmApplyEdit::new(provider);

        let err = service.apply_edit("a", "b").await.unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed(_)));
    }

    #[test]
    fn strips_fenced_output() {
        let fenced = "```rust\nfn main() {}\n```";
        assert_eq!(strip_code_fence(fenced), "fn main() {}\n");

        let plain = "fn main() {}\n";
        assert_eq!(strip_code_fence(plain), plain);
    }

    #[test]
    fn fence_without_language_tag() {
        let fenced = "```\nlet x = 1;\n```";
        assert_eq!(strip_code_fence(fenced), "let x = 1;\n");
    }
}
