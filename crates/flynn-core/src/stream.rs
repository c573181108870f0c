use serde::{Deserialize, Serialize};

use crate::errors::ProviderError;
use crate::ids::ToolCallId;
use crate::messages::{AssistantTurn, ToolCallBlock};

/// Incremental events yielded by a provider stream. Exactly one terminal
/// event (`Done` or `Error`) ends a well-formed stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    TextDelta { delta: String },
    ThinkingDelta { delta: String },
    ToolCallStart { tool_call_id: ToolCallId, name: String },
    ToolCallDelta { tool_call_id: ToolCallId, arguments_delta: String },
    ToolCallEnd { tool_call: ToolCallBlock },
    Done { turn: AssistantTurn },
    Error { error: ProviderError },
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}
