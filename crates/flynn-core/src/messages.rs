use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::ToolCallId;
use crate::tokens::TokenUsage;

/// Who produced a message. List position is the sole timeline; messages
/// carry no ordering timestamps of their own.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Tool,
    System,
}

/// One entry of a session's history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub blocks: Vec<Block>,
}

/// A typed fragment of a message's content.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Text {
        content: String,
    },
    ToolCall(ToolCallBlock),
    ToolResult(ToolResultBlock),
    /// Replacement for a span of older messages that was summarized away.
    Compress {
        summary: String,
        compressed_message_count: usize,
    },
    Image {
        urls: Vec<String>,
    },
}

/// A model-requested tool invocation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallBlock {
    pub id: ToolCallId,
    pub name: String,
    pub arguments: Value,
}

/// The resolved outcome of a tool call, tagged with the call it answers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResultBlock {
    pub tool_call_id: ToolCallId,
    #[serde(flatten)]
    pub result: ToolResult,
}

/// Normalized tool outcome. Immutable once produced.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub short_result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<DiffPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
}

/// Before/after contents of a file edit. Rendering into a visual diff is a
/// UI concern; the engine only carries the two versions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiffPayload {
    pub original_content: String,
    pub new_content: String,
}

impl ToolResult {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            success: false,
            content: error.clone(),
            error: Some(error),
            ..Self::default()
        }
    }

    /// Result used for tool calls that were still pending when the run's
    /// cancellation token fired.
    pub fn aborted() -> Self {
        Self {
            success: false,
            content: "Tool execution aborted".to_string(),
            error: Some("aborted".to_string()),
            ..Self::default()
        }
    }
}

/// One completed model response: content blocks plus the usage the
/// provider reported for the call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssistantTurn {
    pub blocks: Vec<Block>,
    pub usage: Option<TokenUsage>,
}

impl AssistantTurn {
    pub fn tool_calls(&self) -> Vec<&ToolCallBlock> {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                Block::ToolCall(tc) => Some(tc),
                _ => None,
            })
            .collect()
    }

    pub fn has_tool_calls(&self) -> bool {
        self.blocks.iter().any(|b| matches!(b, Block::ToolCall(_)))
    }

    pub fn text(&self) -> String {
        collect_text(&self.blocks)
    }

    pub fn into_message(self) -> Message {
        Message {
            role: Role::Assistant,
            blocks: self.blocks,
        }
    }
}

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            blocks: vec![Block::Text { content: text.into() }],
        }
    }

    pub fn user_with_images(text: impl Into<String>, urls: Vec<String>) -> Self {
        let mut blocks = vec![Block::Text { content: text.into() }];
        if !urls.is_empty() {
            blocks.push(Block::Image { urls });
        }
        Self {
            role: Role::User,
            blocks,
        }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            blocks: vec![Block::Text { content: text.into() }],
        }
    }

    /// A `tool` message carries exactly one result block.
    pub fn tool_result(tool_call_id: ToolCallId, result: ToolResult) -> Self {
        Self {
            role: Role::Tool,
            blocks: vec![Block::ToolResult(ToolResultBlock {
                tool_call_id,
                result,
            })],
        }
    }

    pub fn compress(summary: impl Into<String>, compressed_message_count: usize) -> Self {
        Self {
            role: Role::Assistant,
            blocks: vec![Block::Compress {
                summary: summary.into(),
                compressed_message_count,
            }],
        }
    }

    pub fn tool_calls(&self) -> Vec<&ToolCallBlock> {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                Block::ToolCall(tc) => Some(tc),
                _ => None,
            })
            .collect()
    }

    pub fn has_tool_calls(&self) -> bool {
        self.blocks.iter().any(|b| matches!(b, Block::ToolCall(_)))
    }

    pub fn tool_result_block(&self) -> Option<&ToolResultBlock> {
        self.blocks.iter().find_map(|b| match b {
            Block::ToolResult(tr) => Some(tr),
            _ => None,
        })
    }

    pub fn is_compress(&self) -> bool {
        self.blocks.iter().any(|b| matches!(b, Block::Compress { .. }))
    }

    pub fn text_content(&self) -> String {
        collect_text(&self.blocks)
    }
}

fn collect_text(blocks: &[Block]) -> String {
    blocks
        .iter()
        .filter_map(|b| match b {
            Block::Text { content } => Some(content.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("")
}
