use std::sync::Arc;

use async_trait::async_trait;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use flynn_core::errors::ProviderError;
use flynn_core::messages::Message;
use flynn_core::provider::{EventStream, LlmContext, LlmProvider, StreamOptions, Summarizer};
use flynn_core::stream::StreamEvent;

const SUMMARIZE_SYSTEM_PROMPT: &str = "\
You summarize a span of an ongoing coding-assistant conversation so it \
can be replaced with a compact summary. Preserve: what the user asked \
for, what was done (files read, edited, created, commands run and their \
outcomes), decisions made, and anything still unresolved. Be specific \
about file paths and names. Write plain prose, no preamble.";

const SUMMARIZE_INSTRUCTION: &str =
    "Summarize the conversation above, following your instructions.";

const SUMMARIZE_MAX_TOKENS: u32 = 2048;

/// Summarizes a message window by asking the model for a recap.
pub struct LlmSummarizer {
    provider: Arc<dyn LlmProvider>,
}

impl LlmSummarizer {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    #[instrument(skip_all, fields(window_len = messages.len()))]
    async fn summarize(
        &self,
        messages: &[Message],
        abort: &CancellationToken,
    ) -> Result<String, ProviderError> {
        let mut window = messages.to_vec();
        window.push(Message::user_text(SUMMARIZE_INSTRUCTION));

        let context = LlmContext {
            messages: window,
            system_prompt: Some(SUMMARIZE_SYSTEM_PROMPT.to_string()),
            tools: Vec::new(),
        };
        let options = StreamOptions {
            max_tokens: SUMMARIZE_MAX_TOKENS,
            temperature: None,
        };

        let stream = self.provider.stream(&context, &options).await?;
        let summary = collect_final_text(stream, abort).await?;
        if summary.trim().is_empty() {
            return Err(ProviderError::StreamInterrupted(
                "summarizer returned empty text".into(),
            ));
        }
        Ok(summary)
    }
}

/// Drives a provider stream to completion and returns the turn's text.
/// Resolves with `ProviderError::Aborted` if the token fires first.
pub(crate) async fn collect_final_text(
    mut stream: EventStream,
    abort: &CancellationToken,
) -> Result<String, ProviderError> {
    loop {
        tokio::select! {
            _ = abort.cancelled() => return Err(ProviderError::Aborted),
            event = stream.next() => match event {
                Some(StreamEvent::Done { turn }) => return Ok(turn.text()),
                Some(StreamEvent::Error { error }) => return Err(error),
                Some(_) => {}
                None => {
                    return Err(ProviderError::StreamInterrupted(
                        "stream ended without a final message".into(),
                    ))
                }
            },
        }
    }
}
