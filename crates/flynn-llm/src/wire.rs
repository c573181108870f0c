//! Conversion between engine messages and the Anthropic Messages API
//! wire format.
//!
//! The engine keeps one flat message list per session. The wire format
//! wants `user`/`assistant` turns with typed content blocks, so this
//! module flattens our [`Block`]s into that shape:
//!
//! - tool results become `tool_result` blocks inside `user` turns
//! - compress blocks become a single assistant text turn carrying the
//!   summary
//! - tool results whose originating `tool_use` was compressed away are
//!   downgraded to plain user text, since the API rejects a
//!   `tool_result` without a matching `tool_use`

use std::collections::HashSet;

use flynn_core::messages::{Block, Message, Role};
use flynn_core::provider::{LlmContext, StreamOptions};
use serde_json::{json, Value};

/// Prefix for the synthetic assistant turn that replaces a compressed
/// span of conversation.
pub const SUMMARY_MARKER: &str = "[Summary of earlier conversation]";

/// Builds the JSON body for a streaming `/v1/messages` request.
pub fn build_request_body(model: &str, context: &LlmContext, options: &StreamOptions) -> Value {
    let mut body = json!({
        "model": model,
        "max_tokens": options.max_tokens,
        "stream": true,
        "messages": to_wire_messages(&context.messages),
    });

    if let Some(system) = &context.system_prompt {
        body["system"] = json!(system);
    }
    if let Some(temperature) = options.temperature {
        body["temperature"] = json!(temperature);
    }
    if !context.tools.is_empty() {
        let tools: Vec<Value> = context
            .tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters_schema,
                })
            })
            .collect();
        body["tools"] = json!(tools);
    }

    body
}

/// Renders the session history as API messages.
///
/// System messages are omitted here; the system prompt travels in the
/// top-level `system` field.
pub fn to_wire_messages(messages: &[Message]) -> Vec<Value> {
    let mut wire = Vec::with_capacity(messages.len());
    let mut seen_tool_calls: HashSet<String> = HashSet::new();

    for message in messages {
        let rendered = match message.role {
            Role::User => render_user(message),
            Role::Assistant => render_assistant(message, &mut seen_tool_calls),
            Role::Tool => render_tool(message, &seen_tool_calls),
            Role::System => None,
        };
        if let Some(value) = rendered {
            wire.push(value);
        }
    }

    merge_adjacent(wire)
}

fn render_user(message: &Message) -> Option<Value> {
    let mut content = Vec::new();
    for block in &message.blocks {
        match block {
            Block::Text { content: text } => {
                content.push(json!({ "type": "text", "text": text }));
            }
            Block::Image { urls } => {
                for url in urls {
                    content.push(json!({
                        "type": "image",
                        "source": { "type": "url", "url": url },
                    }));
                }
            }
            _ => {}
        }
    }
    wrap("user", content)
}

fn render_assistant(message: &Message, seen_tool_calls: &mut HashSet<String>) -> Option<Value> {
    // A compress block subsumes the whole turn.
    if let Some(Block::Compress { summary, .. }) = message
        .blocks
        .iter()
        .find(|b| matches!(b, Block::Compress { .. }))
    {
        let text = format!("{SUMMARY_MARKER}\n\n{summary}");
        return wrap("assistant", vec![json!({ "type": "text", "text": text })]);
    }

    let mut content = Vec::new();
    for block in &message.blocks {
        match block {
            Block::Text { content: text } => {
                content.push(json!({ "type": "text", "text": text }));
            }
            Block::ToolCall(call) => {
                seen_tool_calls.insert(call.id.to_string());
                content.push(json!({
                    "type": "tool_use",
                    "id": call.id,
                    "name": call.name,
                    "input": call.arguments,
                }));
            }
            _ => {}
        }
    }
    wrap("assistant", content)
}

fn render_tool(message: &Message, seen_tool_calls: &HashSet<String>) -> Option<Value> {
    let mut content = Vec::new();
    for block in &message.blocks {
        let Block::ToolResult(result) = block else {
            continue;
        };
        if seen_tool_calls.contains(result.tool_call_id.as_str()) {
            content.push(json!({
                "type": "tool_result",
                "tool_use_id": result.tool_call_id,
                "content": [{ "type": "text", "text": result.result.content }],
                "is_error": !result.result.success,
            }));
        } else {
            // The matching tool_use was compressed away.
            content.push(json!({
                "type": "text",
                "text": format!("Result of an earlier tool call:\n{}", result.result.content),
            }));
        }
    }
    wrap("user", content)
}

fn wrap(role: &str, content: Vec<Value>) -> Option<Value> {
    if content.is_empty() {
        return None;
    }
    Some(json!({ "role": role, "content": content }))
}

/// Collapses consecutive same-role turns into one, concatenating their
/// content arrays. Back-to-back tool result messages and the summary
/// turn both produce runs of a single role.
fn merge_adjacent(wire: Vec<Value>) -> Vec<Value> {
    let mut merged: Vec<Value> = Vec::with_capacity(wire.len());
    for value in wire {
        match merged.last_mut() {
            Some(prev) if prev["role"] == value["role"] => {
                if let (Some(existing), Some(Value::Array(incoming))) =
                    (prev["content"].as_array_mut(), value.get("content"))
                {
                    existing.extend(incoming.iter().cloned());
                }
            }
            _ => merged.push(value),
        }
    }
    merged
}
