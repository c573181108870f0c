use serde::{Deserialize, Serialize};

use crate::ids::{SessionId, ToolCallId};

/// Events emitted by a run, in the order the UI should render them.
/// `thinking_started`/`thinking_ended` bracket each model call; the delta
/// events stream inside that bracket.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentEvent {
    #[serde(rename = "thinking_started")]
    ThinkingStarted { session_id: SessionId },

    #[serde(rename = "text_delta")]
    TextDelta { session_id: SessionId, delta: String },

    #[serde(rename = "thinking_delta")]
    ThinkingDelta { session_id: SessionId, delta: String },

    #[serde(rename = "thinking_ended")]
    ThinkingEnded { session_id: SessionId },

    #[serde(rename = "tool_started")]
    ToolStarted {
        session_id: SessionId,
        tool_call_id: ToolCallId,
        tool_name: String,
    },

    #[serde(rename = "tool_finished")]
    ToolFinished {
        session_id: SessionId,
        tool_call_id: ToolCallId,
        success: bool,
        preview: String,
        duration_ms: u64,
    },

    #[serde(rename = "compression_started")]
    CompressionStarted { session_id: SessionId },

    #[serde(rename = "compression_complete")]
    CompressionComplete {
        session_id: SessionId,
        tokens_before: u32,
        messages_removed: usize,
    },

    #[serde(rename = "final_text")]
    FinalText { session_id: SessionId, text: String },

    #[serde(rename = "aborted")]
    Aborted { session_id: SessionId },

    #[serde(rename = "error")]
    Error { session_id: SessionId, message: String },
}

impl AgentEvent {
    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::ThinkingStarted { session_id }
            | Self::TextDelta { session_id, .. }
            | Self::ThinkingDelta { session_id, .. }
            | Self::ThinkingEnded { session_id }
            | Self::ToolStarted { session_id, .. }
            | Self::ToolFinished { session_id, .. }
            | Self::CompressionStarted { session_id }
            | Self::CompressionComplete { session_id, .. }
            | Self::FinalText { session_id, .. }
            | Self::Aborted { session_id }
            | Self::Error { session_id, .. } => session_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ThinkingStarted { .. } => "thinking_started",
            Self::TextDelta { .. } => "text_delta",
            Self::ThinkingDelta { .. } => "thinking_delta",
            Self::ThinkingEnded { .. } => "thinking_ended",
            Self::ToolStarted { .. } => "tool_started",
            Self::ToolFinished { .. } => "tool_finished",
            Self::CompressionStarted { .. } => "compression_started",
            Self::CompressionComplete { .. } => "compression_complete",
            Self::FinalText { .. } => "final_text",
            Self::Aborted { .. } => "aborted",
            Self::Error { .. } => "error",
        }
    }

    /// True for the events that end a run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::FinalText { .. } | Self::Aborted { .. } | Self::Error { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_accessor() {
        let sid = SessionId::new();
        let evt = AgentEvent::ToolStarted {
            session_id: sid.clone(),
            tool_call_id: ToolCallId::new(),
            tool_name: "read_file".into(),
        };
        assert_eq!(evt.session_id(), &sid);
    }

    #[test]
    fn event_type_matches_serde_tag() {
        let evt = AgentEvent::FinalText {
            session_id: SessionId::new(),
            text: "done".into(),
        };
        let value = serde_json::to_value(&evt).unwrap();
        assert_eq!(value["type"], evt.event_type());
    }

    #[test]
    fn terminal_events() {
        let sid = SessionId::new();
        assert!(AgentEvent::Aborted { session_id: sid.clone() }.is_terminal());
        assert!(AgentEvent::Error {
            session_id: sid.clone(),
            message: "boom".into()
        }
        .is_terminal());
        assert!(!AgentEvent::ThinkingStarted { session_id: sid }.is_terminal());
    }

    #[test]
    fn serde_roundtrip() {
        let events = vec![
            AgentEvent::ThinkingStarted { session_id: SessionId::new() },
            AgentEvent::TextDelta {
                session_id: SessionId::new(),
                delta: "hel".into(),
            },
            AgentEvent::ToolFinished {
                session_id: SessionId::new(),
                tool_call_id: ToolCallId::new(),
                success: true,
                preview: "42 lines".into(),
                duration_ms: 12,
            },
            AgentEvent::CompressionComplete {
                session_id: SessionId::new(),
                tokens_before: 70_000,
                messages_removed: 6,
            },
        ];
        for evt in &events {
            let json = serde_json::to_string(evt).unwrap();
            let parsed: AgentEvent = serde_json::from_str(&json).unwrap();
            assert_eq!(json, serde_json::to_string(&parsed).unwrap());
        }
    }
}
