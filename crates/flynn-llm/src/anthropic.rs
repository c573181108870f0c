use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Future, Stream};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use tracing::instrument;

use flynn_core::errors::ProviderError;
use flynn_core::provider::{EventStream, LlmContext, LlmProvider, StreamOptions};
use flynn_core::stream::StreamEvent;

use crate::sse::{self, SseParser};
use crate::wire;

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const SSE_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";

/// Streaming client for the Anthropic Messages API.
pub struct AnthropicProvider {
    client: Client,
    api_key: SecretString,
    model: String,
}

impl AnthropicProvider {
    pub fn new(api_key: SecretString, model: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .build()
                .expect("failed to build HTTP client"),
            api_key,
            model: model.into(),
        }
    }

    fn build_request(
        &self,
        context: &LlmContext,
        options: &StreamOptions,
    ) -> reqwest::RequestBuilder {
        let body = wire::build_request_body(&self.model, context, options);
        self.client
            .post(API_URL)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("accept", "application/json")
            .header("content-type", "application/json")
            .json(&body)
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    #[instrument(skip_all, fields(model = %self.model))]
    async fn stream(
        &self,
        context: &LlmContext,
        options: &StreamOptions,
    ) -> Result<EventStream, ProviderError> {
        let resp = self
            .build_request(context, options)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, body));
        }

        let stream = SseStream::new(resp.bytes_stream());
        Ok(Box::pin(stream))
    }
}

/// Wraps a reqwest byte stream and yields parsed StreamEvents. If no
/// data arrives within the idle window, emits a StreamInterrupted error.
struct SseStream {
    inner: Pin<Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>,
    parser: SseParser,
    buffer: String,
    pending: std::collections::VecDeque<StreamEvent>,
    idle_deadline: Pin<Box<tokio::time::Sleep>>,
    idle_duration: Duration,
}

impl SseStream {
    fn new(
        byte_stream: impl Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
    ) -> Self {
        Self::with_idle_timeout(byte_stream, SSE_IDLE_TIMEOUT)
    }

    fn with_idle_timeout(
        byte_stream: impl Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            inner: Box::pin(byte_stream),
            parser: SseParser::new(),
            buffer: String::new(),
            pending: std::collections::VecDeque::new(),
            idle_deadline: Box::pin(tokio::time::sleep(idle_timeout)),
            idle_duration: idle_timeout,
        }
    }

    fn drain_buffer(&mut self) {
        while let Some(pos) = self.buffer.find("\n\n") {
            let chunk = self.buffer[..pos + 2].to_string();
            self.buffer = self.buffer[pos + 2..].to_string();

            for (event_type, data) in sse::parse_sse_lines(&chunk) {
                let events = self.parser.parse_event(&event_type, &data);
                self.pending.extend(events);
            }
        }
    }
}

impl Stream for SseStream {
    type Item = StreamEvent;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        if let Some(event) = self.pending.pop_front() {
            return std::task::Poll::Ready(Some(event));
        }
        if self.parser.is_done() {
            return std::task::Poll::Ready(None);
        }

        loop {
            match self.inner.as_mut().poll_next(cx) {
                std::task::Poll::Ready(Some(Ok(bytes))) => {
                    // Data received, reset the idle timer.
                    let new_deadline = tokio::time::Instant::now() + self.idle_duration;
                    self.idle_deadline.as_mut().reset(new_deadline);

                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    self.buffer.push_str(&text);
                    self.drain_buffer();

                    if let Some(event) = self.pending.pop_front() {
                        return std::task::Poll::Ready(Some(event));
                    }
                }
                std::task::Poll::Ready(Some(Err(e))) => {
                    return std::task::Poll::Ready(Some(StreamEvent::Error {
                        error: ProviderError::StreamInterrupted(e.to_string()),
                    }));
                }
                std::task::Poll::Ready(None) => {
                    // Stream ended, flush whatever is left.
                    if !self.buffer.is_empty() {
                        let remaining = std::mem::take(&mut self.buffer);
                        for (event_type, data) in sse::parse_sse_lines(&remaining) {
                            let events = self.parser.parse_event(&event_type, &data);
                            self.pending.extend(events);
                        }
                        if let Some(event) = self.pending.pop_front() {
                            return std::task::Poll::Ready(Some(event));
                        }
                    }
                    return std::task::Poll::Ready(None);
                }
                std::task::Poll::Pending => {
                    if self.idle_deadline.as_mut().poll(cx).is_ready() {
                        return std::task::Poll::Ready(Some(StreamEvent::Error {
                            error: ProviderError::StreamInterrupted(format!(
                                "idle timeout after {}s",
                                self.idle_duration.as_secs()
                            )),
                        }));
                    }
                    return std::task::Poll::Pending;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn provider_properties() {
        let provider = AnthropicProvider::new(SecretString::from("test-key"), DEFAULT_MODEL);
        assert_eq!(provider.name(), "anthropic");
        assert_eq!(provider.model(), DEFAULT_MODEL);
    }

    #[tokio::test]
    async fn sse_stream_idle_timeout_fires_when_no_data() {
        tokio::time::pause();

        let byte_stream = futures::stream::pending::<Result<bytes::Bytes, reqwest::Error>>();
        let mut stream =
            Box::pin(SseStream::with_idle_timeout(byte_stream, Duration::from_secs(5)));

        tokio::time::advance(Duration::from_secs(6)).await;

        let event = stream.next().await;
        assert!(
            matches!(
                &event,
                Some(StreamEvent::Error { error: ProviderError::StreamInterrupted(msg) })
                    if msg.contains("idle timeout")
            ),
            "expected idle timeout error, got: {event:?}"
        );
    }

    #[tokio::test]
    async fn sse_stream_idle_timer_resets_on_data() {
        tokio::time::pause();

        let (tx, rx) = tokio::sync::mpsc::channel::<Result<bytes::Bytes, reqwest::Error>>(16);
        let rx_stream = tokio_stream::wrappers::ReceiverStream::new(rx);
        let mut stream =
            Box::pin(SseStream::with_idle_timeout(rx_stream, Duration::from_secs(5)));

        let delta_chunk = "event: content_block_delta\ndata: {\"delta\":{\"type\":\"text_delta\",\"text\":\"hi\"}}\n\n";

        tx.send(Ok(bytes::Bytes::from(delta_chunk))).await.unwrap();
        let event = stream.next().await;
        assert!(matches!(event, Some(StreamEvent::TextDelta { .. })), "got: {event:?}");

        // Less than the timeout from the reset point.
        tokio::time::advance(Duration::from_secs(4)).await;

        tx.send(Ok(bytes::Bytes::from(delta_chunk))).await.unwrap();
        let event = stream.next().await;
        assert!(matches!(event, Some(StreamEvent::TextDelta { .. })), "got: {event:?}");

        drop(tx);
        let event = stream.next().await;
        assert!(event.is_none(), "expected stream end, got: {event:?}");
    }

    #[tokio::test]
    async fn sse_stream_fuses_after_message_stop() {
        let chunks = vec![
            Ok(bytes::Bytes::from(
                "event: content_block_start\ndata: {\"content_block\":{\"type\":\"text\"}}\n\n",
            )),
            Ok(bytes::Bytes::from(
                "event: content_block_delta\ndata: {\"delta\":{\"type\":\"text_delta\",\"text\":\"ok\"}}\n\n",
            )),
            Ok(bytes::Bytes::from(
                "event: content_block_stop\ndata: {}\n\nevent: message_stop\ndata: {}\n\n",
            )),
        ];
        let byte_stream = futures::stream::iter(chunks);
        let mut stream =
            Box::pin(SseStream::with_idle_timeout(byte_stream, Duration::from_secs(5)));

        let mut saw_done = false;
        while let Some(event) = stream.next().await {
            if matches!(event, StreamEvent::Done { .. }) {
                saw_done = true;
            } else {
                assert!(!saw_done, "event after Done: {event:?}");
            }
        }
        assert!(saw_done);
    }

    #[tokio::test]
    async fn sse_stream_splits_events_across_chunks() {
        let chunks = vec![
            Ok(bytes::Bytes::from("event: content_block_delta\ndata: {\"delta\":{\"type\":")),
            Ok(bytes::Bytes::from("\"text_delta\",\"text\":\"split\"}}\n\n")),
        ];
        let byte_stream = futures::stream::iter(chunks);
        let mut stream =
            Box::pin(SseStream::with_idle_timeout(byte_stream, Duration::from_secs(5)));

        let event = stream.next().await;
        assert_eq!(event, Some(StreamEvent::TextDelta { delta: "split".into() }));
    }
}
