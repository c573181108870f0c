//! Deterministic test doubles for the provider-facing traits. Used by
//! engine tests to script multi-turn conversations without API calls.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use flynn_core::errors::ProviderError;
use flynn_core::messages::{AssistantTurn, Block, Message, ToolCallBlock};
use flynn_core::provider::{
    ApplyEditService, EventStream, LlmContext, LlmProvider, StreamOptions, Summarizer,
};
use flynn_core::stream::StreamEvent;
use flynn_core::tokens::TokenUsage;
use flynn_core::tools::ToolError;

/// Pre-programmed response for one `stream()` call.
pub enum MockResponse {
    /// Yield these events immediately.
    Stream(Vec<StreamEvent>),
    /// Fail the `stream()` call itself.
    Error(ProviderError),
    /// Return a stream whose events only arrive after the delay.
    Delay(Duration, Vec<StreamEvent>),
}

impl MockResponse {
    /// A text-only turn with zero usage.
    pub fn text(text: &str) -> Self {
        Self::Stream(text_events(text, TokenUsage::default()))
    }

    /// A text-only turn reporting the given usage.
    pub fn text_with_usage(text: &str, usage: TokenUsage) -> Self {
        Self::Stream(text_events(text, usage))
    }

    /// A turn requesting the given tool calls.
    pub fn tool_calls(calls: Vec<ToolCallBlock>) -> Self {
        Self::tool_calls_with_usage(calls, TokenUsage::default())
    }

    pub fn tool_calls_with_usage(calls: Vec<ToolCallBlock>, usage: TokenUsage) -> Self {
        let mut events = Vec::new();
        for call in &calls {
            events.push(StreamEvent::ToolCallStart {
                tool_call_id: call.id.clone(),
                name: call.name.clone(),
            });
            events.push(StreamEvent::ToolCallEnd { tool_call: call.clone() });
        }
        events.push(StreamEvent::Done {
            turn: AssistantTurn {
                blocks: calls.into_iter().map(Block::ToolCall).collect(),
                usage: Some(usage),
            },
        });
        Self::Stream(events)
    }

    /// A stream that ends with an in-stream error event.
    pub fn error_event(error: ProviderError) -> Self {
        Self::Stream(vec![StreamEvent::Error { error }])
    }

    /// A text turn whose events only arrive after the delay.
    pub fn delayed_text(delay: Duration, text: &str) -> Self {
        Self::Delay(delay, text_events(text, TokenUsage::default()))
    }

    fn into_stream(self) -> Result<EventStream, ProviderError> {
        match self {
            Self::Stream(events) => Ok(Box::pin(stream::iter(events))),
            Self::Error(error) => Err(error),
            Self::Delay(delay, events) => {
                let delayed = stream::once(tokio::time::sleep(delay))
                    .flat_map(move |_| stream::iter(events.clone()));
                Ok(Box::pin(delayed))
            }
        }
    }
}

fn text_events(text: &str, usage: TokenUsage) -> Vec<StreamEvent> {
    vec![
        StreamEvent::TextDelta { delta: text.to_string() },
        StreamEvent::Done {
            turn: AssistantTurn {
                blocks: vec![Block::Text { content: text.to_string() }],
                usage: Some(usage),
            },
        },
    ]
}

/// Mock provider that consumes pre-programmed responses in order and
/// records every request it receives.
pub struct MockProvider {
    responses: Mutex<VecDeque<MockResponse>>,
    requests: Mutex<Vec<LlmContext>>,
    call_count: AtomicUsize,
}

impl MockProvider {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// The contexts passed to `stream()`, in call order.
    pub fn requests(&self) -> Vec<LlmContext> {
        self.requests.lock().clone()
    }

    pub fn push_response(&self, response: MockResponse) {
        self.responses.lock().push_back(response);
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn stream(
        &self,
        context: &LlmContext,
        _options: &StreamOptions,
    ) -> Result<EventStream, ProviderError> {
        let call = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.requests.lock().push(context.clone());

        let response = self.responses.lock().pop_front().ok_or_else(|| {
            ProviderError::InvalidRequest(format!(
                "MockProvider: no response configured for call {call}"
            ))
        })?;
        response.into_stream()
    }
}

/// Scripted summarizer that records the windows it is asked to condense.
pub struct MockSummarizer {
    results: Mutex<VecDeque<Result<String, ProviderError>>>,
    fallback: Option<String>,
    windows: Mutex<Vec<Vec<Message>>>,
}

impl MockSummarizer {
    pub fn new(results: Vec<Result<String, ProviderError>>) -> Self {
        Self {
            results: Mutex::new(results.into()),
            fallback: None,
            windows: Mutex::new(Vec::new()),
        }
    }

    /// Succeeds with the same summary text on every call.
    pub fn always(summary: &str) -> Self {
        Self {
            results: Mutex::new(VecDeque::new()),
            fallback: Some(summary.to_string()),
            windows: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.windows.lock().len()
    }

    /// The message windows passed to `summarize()`, in call order.
    pub fn windows(&self) -> Vec<Vec<Message>> {
        self.windows.lock().clone()
    }
}

#[async_trait]
impl Summarizer for MockSummarizer {
    async fn summarize(
        &self,
        messages: &[Message],
        _abort: &CancellationToken,
    ) -> Result<String, ProviderError> {
        self.windows.lock().push(messages.to_vec());
        let scripted = self.results.lock().pop_front();
        match (scripted, &self.fallback) {
            (Some(result), _) => result,
            (None, Some(summary)) => Ok(summary.clone()),
            (None, None) => Err(ProviderError::InvalidRequest(
                "MockSummarizer: no result configured".into(),
            )),
        }
    }
}

/// Returns a fixed merged file for every apply-edit request.
pub struct MockApplyEdit {
    output: String,
}

impl MockApplyEdit {
    pub fn new(output: impl Into<String>) -> Self {
        Self { output: output.into() }
    }
}

#[async_trait]
impl ApplyEditService for MockApplyEdit {
    async fn apply_edit(&self, _existing: &str, _edit: &str) -> Result<String, ToolError> {
        Ok(self.output.clone())
    }
}
