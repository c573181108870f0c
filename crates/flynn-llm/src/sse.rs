use serde::Deserialize;
use serde_json::Value;

use flynn_core::errors::ProviderError;
use flynn_core::ids::ToolCallId;
use flynn_core::messages::{AssistantTurn, Block, ToolCallBlock};
use flynn_core::stream::StreamEvent;
use flynn_core::tokens::TokenUsage;

/// State machine for parsing Anthropic SSE stream events.
///
/// Content blocks are accumulated in stream order so the final turn
/// preserves interleaving (text before and after tool calls). Thinking
/// is surfaced live as deltas but not retained in the turn.
pub struct SseParser {
    blocks: Vec<PendingBlock>,
    // Token tracking
    input_tokens: u32,
    output_tokens: u32,
    cache_read_tokens: u32,
    cache_creation_tokens: u32,
    current_block: Option<BlockKind>,
    done: bool,
}

enum PendingBlock {
    Text { text: String },
    Tool { id: String, name: String, arguments_json: String },
}

#[derive(Clone, Copy, PartialEq)]
enum BlockKind {
    Text,
    Thinking,
    Tool,
}

impl Default for SseParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SseParser {
    pub fn new() -> Self {
        Self {
            blocks: Vec::new(),
            input_tokens: 0,
            output_tokens: 0,
            cache_read_tokens: 0,
            cache_creation_tokens: 0,
            current_block: None,
            done: false,
        }
    }

    /// Whether a terminal event (`message_stop` or `error`) was seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Parse a single SSE event and return zero or more StreamEvents.
    pub fn parse_event(&mut self, event_type: &str, data: &str) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        match event_type {
            "message_start" => {
                if let Ok(msg) = serde_json::from_str::<MessageStartEvent>(data) {
                    if let Some(usage) = msg.message.usage {
                        self.input_tokens = usage.input_tokens.unwrap_or(0);
                        self.cache_read_tokens = usage.cache_read_input_tokens.unwrap_or(0);
                        self.cache_creation_tokens =
                            usage.cache_creation_input_tokens.unwrap_or(0);
                    }
                }
            }

            "content_block_start" => {
                if let Ok(start) = serde_json::from_str::<ContentBlockStartEvent>(data) {
                    match start.content_block.get("type").and_then(|t| t.as_str()) {
                        Some("text") => {
                            self.current_block = Some(BlockKind::Text);
                            self.blocks.push(PendingBlock::Text { text: String::new() });
                        }
                        Some("thinking") => {
                            self.current_block = Some(BlockKind::Thinking);
                        }
                        Some("tool_use") => {
                            let id = start
                                .content_block
                                .get("id")
                                .and_then(|v| v.as_str())
                                .unwrap_or("")
                                .to_string();
                            let name = start
                                .content_block
                                .get("name")
                                .and_then(|v| v.as_str())
                                .unwrap_or("")
                                .to_string();
                            self.current_block = Some(BlockKind::Tool);
                            self.blocks.push(PendingBlock::Tool {
                                id: id.clone(),
                                name: name.clone(),
                                arguments_json: String::new(),
                            });
                            events.push(StreamEvent::ToolCallStart {
                                tool_call_id: ToolCallId::from_raw(id),
                                name,
                            });
                        }
                        _ => {}
                    }
                }
            }

            "content_block_delta" => {
                if let Ok(delta) = serde_json::from_str::<ContentBlockDeltaEvent>(data) {
                    match delta.delta.get("type").and_then(|t| t.as_str()) {
                        Some("text_delta") => {
                            let text =
                                delta.delta.get("text").and_then(|t| t.as_str()).unwrap_or("");
                            if let Some(PendingBlock::Text { text: buf }) = self.blocks.last_mut()
                            {
                                buf.push_str(text);
                            }
                            events.push(StreamEvent::TextDelta { delta: text.to_string() });
                        }
                        Some("thinking_delta") => {
                            let thinking = delta
                                .delta
                                .get("thinking")
                                .and_then(|t| t.as_str())
                                .unwrap_or("");
                            events.push(StreamEvent::ThinkingDelta {
                                delta: thinking.to_string(),
                            });
                        }
                        Some("input_json_delta") => {
                            let partial = delta
                                .delta
                                .get("partial_json")
                                .and_then(|t| t.as_str())
                                .unwrap_or("");
                            if let Some(PendingBlock::Tool { id, arguments_json, .. }) =
                                self.blocks.last_mut()
                            {
                                arguments_json.push_str(partial);
                                events.push(StreamEvent::ToolCallDelta {
                                    tool_call_id: ToolCallId::from_raw(id.clone()),
                                    arguments_delta: partial.to_string(),
                                });
                            }
                        }
                        _ => {} // signature_delta, etc.
                    }
                }
            }

            "content_block_stop" => {
                if self.current_block == Some(BlockKind::Tool) {
                    if let Some(PendingBlock::Tool { id, name, arguments_json }) =
                        self.blocks.last()
                    {
                        events.push(StreamEvent::ToolCallEnd {
                            tool_call: ToolCallBlock {
                                id: ToolCallId::from_raw(id.clone()),
                                name: name.clone(),
                                arguments: parse_arguments(arguments_json),
                            },
                        });
                    }
                }
                self.current_block = None;
            }

            "message_delta" => {
                if let Ok(delta) = serde_json::from_str::<MessageDeltaEvent>(data) {
                    if let Some(usage) = delta.usage {
                        self.output_tokens = usage.output_tokens.unwrap_or(0);
                    }
                }
            }

            "message_stop" => {
                self.done = true;
                events.push(StreamEvent::Done { turn: self.build_turn() });
            }

            "error" => {
                if let Ok(err) = serde_json::from_str::<ErrorEvent>(data) {
                    self.done = true;
                    events.push(StreamEvent::Error { error: classify_error(&err) });
                }
            }

            _ => {} // ping, etc.
        }

        events
    }

    pub fn token_usage(&self) -> TokenUsage {
        TokenUsage {
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            cache_read_tokens: self.cache_read_tokens,
            cache_creation_tokens: self.cache_creation_tokens,
        }
    }

    fn build_turn(&self) -> AssistantTurn {
        let blocks = self
            .blocks
            .iter()
            .filter_map(|block| match block {
                PendingBlock::Text { text } => {
                    if text.is_empty() {
                        None
                    } else {
                        Some(Block::Text { content: text.clone() })
                    }
                }
                PendingBlock::Tool { id, name, arguments_json } => {
                    Some(Block::ToolCall(ToolCallBlock {
                        id: ToolCallId::from_raw(id.clone()),
                        name: name.clone(),
                        arguments: parse_arguments(arguments_json),
                    }))
                }
            })
            .collect();

        AssistantTurn {
            blocks,
            usage: Some(self.token_usage()),
        }
    }
}

/// Tool arguments arrive as concatenated JSON fragments. An empty or
/// malformed payload degrades to `{}` and fails tool-side validation
/// instead of killing the stream.
fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(serde_json::Map::new());
    }
    serde_json::from_str(raw).unwrap_or(Value::Object(serde_json::Map::new()))
}

fn classify_error(err: &ErrorEvent) -> ProviderError {
    match err.error.error_type.as_str() {
        "overloaded_error" => ProviderError::Overloaded,
        "rate_limit_error" => ProviderError::RateLimited { retry_after_secs: None },
        "authentication_error" => {
            ProviderError::AuthenticationFailed(err.error.message.clone())
        }
        "invalid_request_error" => {
            if err.error.message.contains("context window")
                || err.error.message.contains("too many tokens")
            {
                ProviderError::ContextWindowExceeded
            } else {
                ProviderError::InvalidRequest(err.error.message.clone())
            }
        }
        _ => ProviderError::ServerError { status: 500, body: err.error.message.clone() },
    }
}

/// Parse raw SSE text into (event_type, data) pairs.
pub fn parse_sse_lines(raw: &str) -> Vec<(String, String)> {
    let mut events = Vec::new();
    let mut current_event = String::new();
    let mut current_data = String::new();

    for line in raw.lines() {
        if let Some(event) = line.strip_prefix("event: ") {
            current_event = event.to_string();
        } else if let Some(data) = line.strip_prefix("data: ") {
            current_data = data.to_string();
        } else if line.is_empty() && !current_event.is_empty() {
            events.push((current_event.clone(), current_data.clone()));
            current_event.clear();
            current_data.clear();
        }
    }

    // Trailing event without a blank line
    if !current_event.is_empty() {
        events.push((current_event, current_data));
    }

    events
}

// --- Deserialization types for Anthropic SSE events ---

#[derive(Deserialize)]
struct MessageStartEvent {
    message: MessageStartPayload,
}

#[derive(Deserialize)]
struct MessageStartPayload {
    usage: Option<UsagePayload>,
}

#[derive(Deserialize)]
struct UsagePayload {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
    cache_read_input_tokens: Option<u32>,
    cache_creation_input_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ContentBlockStartEvent {
    content_block: Value,
}

#[derive(Deserialize)]
struct ContentBlockDeltaEvent {
    delta: Value,
}

#[derive(Deserialize)]
struct MessageDeltaEvent {
    usage: Option<UsagePayload>,
}

#[derive(Deserialize)]
struct ErrorEvent {
    error: ErrorPayload,
}

#[derive(Deserialize)]
struct ErrorPayload {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}
