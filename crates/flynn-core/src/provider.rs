use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use tokio_util::sync::CancellationToken;

use crate::errors::ProviderError;
use crate::messages::Message;
use crate::stream::StreamEvent;
use crate::tools::{ToolDefinition, ToolError};

/// Everything a provider needs to build one model call.
#[derive(Clone, Debug, Default)]
pub struct LlmContext {
    pub messages: Vec<Message>,
    pub system_prompt: Option<String>,
    pub tools: Vec<ToolDefinition>,
}

#[derive(Clone, Debug)]
pub struct StreamOptions {
    pub max_tokens: u32,
    pub temperature: Option<f64>,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            max_tokens: 8192,
            temperature: None,
        }
    }
}

pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// A streaming model backend. One `Done` or `Error` event ends the stream;
/// callers cancel by dropping it.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;

    async fn stream(
        &self,
        context: &LlmContext,
        options: &StreamOptions,
    ) -> Result<EventStream, ProviderError>;
}

/// Collapses a window of history into prose. Failures are absorbed by the
/// compression controller; implementations must not mutate anything.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(
        &self,
        messages: &[Message],
        abort: &CancellationToken,
    ) -> Result<String, ProviderError>;
}

/// Merges a partial-region edit (an edit containing `... existing code ...`
/// markers) into the current file contents, returning the full new file.
#[async_trait]
pub trait ApplyEditService: Send + Sync {
    async fn apply_edit(&self, existing: &str, edit: &str) -> Result<String, ToolError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_options_defaults() {
        let opts = StreamOptions::default();
        assert_eq!(opts.max_tokens, 8192);
        assert!(opts.temperature.is_none());
    }

    #[test]
    fn context_default_is_empty() {
        let ctx = LlmContext::default();
        assert!(ctx.messages.is_empty());
        assert!(ctx.system_prompt.is_none());
        assert!(ctx.tools.is_empty());
    }
}
