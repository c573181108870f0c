use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::SessionId;
use crate::messages::Message;

/// One conversation. Owned exclusively by the orchestrator while a run is
/// active; everyone else sees append-only snapshots.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub workdir: PathBuf,
    pub messages: Vec<Message>,
    /// Raw user inputs, for shell-style history recall in the UI.
    pub input_history: Vec<String>,
    /// Latest total reported by the provider, not a running sum.
    pub total_tokens: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            workdir: workdir.into(),
            messages: Vec::new(),
            input_history: Vec::new(),
            total_tokens: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
        self.updated_at = Utc::now();
    }

    /// The single structural rewrite allowed on history: remove `len`
    /// messages starting at `start` and insert one replacement there.
    /// Everything outside the window keeps its relative order.
    pub fn replace_window(&mut self, start: usize, len: usize, replacement: Message) {
        debug_assert!(start + len <= self.messages.len());
        self.messages.splice(start..start + len, std::iter::once(replacement));
        self.updated_at = Utc::now();
    }

    pub fn record_input(&mut self, text: &str) {
        self.input_history.push(text.to_string());
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            workdir: self.workdir.clone(),
            message_count: self.messages.len(),
            total_tokens: self.total_tokens,
            updated_at: self.updated_at,
        }
    }
}

/// Listing row for session pickers; cheap to load without message bodies.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub workdir: PathBuf,
    pub message_count: usize,
    pub total_tokens: u32,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_is_empty() {
        let session = Session::new("/work");
        assert!(session.messages.is_empty());
        assert!(session.input_history.is_empty());
        assert_eq!(session.total_tokens, 0);
        assert!(session.id.as_str().starts_with("sess_"));
    }

    #[test]
    fn push_appends_in_order() {
        let mut session = Session::new("/work");
        session.push(Message::user_text("one"));
        session.push(Message::assistant_text("two"));
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.messages[0].text_content(), "one");
        assert_eq!(session.messages[1].text_content(), "two");
    }

    #[test]
    fn replace_window_net_change() {
        let mut session = Session::new("/work");
        for i in 0..10 {
            session.push(Message::user_text(format!("m{i}")));
        }
        session.replace_window(2, 6, Message::compress("summary", 6));

        assert_eq!(session.messages.len(), 5);
        assert_eq!(session.messages[0].text_content(), "m0");
        assert_eq!(session.messages[1].text_content(), "m1");
        assert!(session.messages[2].is_compress());
        assert_eq!(session.messages[3].text_content(), "m8");
        assert_eq!(session.messages[4].text_content(), "m9");
    }

    #[test]
    fn record_input_keeps_duplicates() {
        let mut session = Session::new("/work");
        session.record_input("ls");
        session.record_input("ls");
        assert_eq!(session.input_history, vec!["ls", "ls"]);
    }

    #[test]
    fn serde_roundtrip() {
        let mut session = Session::new("/work");
        session.push(Message::user_text("hi"));
        session.total_tokens = 1234;
        let json = serde_json::to_string(&session).unwrap();
        let parsed: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, session.id);
        assert_eq!(parsed.messages.len(), 1);
        assert_eq!(parsed.total_tokens, 1234);
    }
}
