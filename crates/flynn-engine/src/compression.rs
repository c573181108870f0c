//! Token-driven history compression.
//!
//! Once a model call reports more than `TOKEN_LIMIT` total tokens and the
//! session holds more than six messages, the six messages ending one
//! position before the end of the list are summarized and replaced by a
//! single compress block. The just-finished exchange is deliberately left
//! intact for continuity.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use flynn_core::messages::Message;
use flynn_core::provider::Summarizer;
use flynn_core::session::Session;

pub const TOKEN_LIMIT: u32 = 64_000;
pub const WINDOW_LEN: usize = 6;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompressionReport {
    pub tokens_before: u32,
    pub messages_removed: usize,
}

pub struct CompressionController {
    summarizer: Arc<dyn Summarizer>,
    token_limit: u32,
}

impl CompressionController {
    pub fn new(summarizer: Arc<dyn Summarizer>) -> Self {
        Self {
            summarizer,
            token_limit: TOKEN_LIMIT,
        }
    }

    /// Lower the threshold; used by tests.
    pub fn with_token_limit(mut self, token_limit: u32) -> Self {
        self.token_limit = token_limit;
        self
    }

    /// Both conditions are required: a high-token exchange with six or
    /// fewer messages has nothing to compress.
    pub fn triggered(&self, message_count: usize, total_tokens: u32) -> bool {
        total_tokens > self.token_limit && message_count > WINDOW_LEN
    }

    /// Summarize `messages[len-7 ..= len-2]` and splice the window out,
    /// inserting one compress message at its start. On summarizer failure
    /// the session is left untouched and `None` is returned; a later turn
    /// retries once usage crosses the threshold again.
    #[instrument(skip_all, fields(tokens = total_tokens))]
    pub async fn compress(
        &self,
        session: &Mutex<Session>,
        total_tokens: u32,
        abort: &CancellationToken,
    ) -> Option<CompressionReport> {
        let (window, start) = {
            let s = session.lock();
            let len = s.messages.len();
            if !self.triggered(len, total_tokens) {
                return None;
            }
            let start = len - WINDOW_LEN - 1;
            (s.messages[start..start + WINDOW_LEN].to_vec(), start)
        };

        match self.summarizer.summarize(&window, abort).await {
            Ok(summary) => {
                let mut s = session.lock();
                s.replace_window(start, WINDOW_LEN, Message::compress(summary, WINDOW_LEN));
                info!(
                    messages_removed = WINDOW_LEN,
                    new_len = s.messages.len(),
                    "history compressed"
                );
                Some(CompressionReport {
                    tokens_before: total_tokens,
                    messages_removed: WINDOW_LEN,
                })
            }
            Err(e) => {
                // Swallowed at this boundary: the conversation continues
                // with uncompressed history.
                warn!(error = %e, "compression failed, session unchanged");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flynn_core::errors::ProviderError;
    use flynn_llm::mock::MockSummarizer;

    fn session_with(n: usize) -> Mutex<Session> {
        let mut session = Session::new("/work");
        for i in 0..n {
            if i % 2 == 0 {
                session.push(Message::user_text(format!("m{i}")));
            } else {
                session.push(Message::assistant_text(format!("m{i}")));
            }
        }
        Mutex::new(session)
    }

    fn controller(summarizer: &Arc<MockSummarizer>) -> CompressionController {
        CompressionController::new(Arc::clone(summarizer) as Arc<dyn Summarizer>)
    }

    #[test]
    fn trigger_requires_both_conditions() {
        let summarizer = Arc::new(MockSummarizer::always("s"));
        let ctrl = controller(&summarizer);

        assert!(ctrl.triggered(7, 64_001));
        assert!(!ctrl.triggered(7, 64_000));
        assert!(!ctrl.triggered(6, 70_000));
        assert!(!ctrl.triggered(2, 1_000_000));
    }

    #[tokio::test]
    async fn compresses_exact_window() {
        let summarizer = Arc::new(MockSummarizer::always("the recap"));
        let ctrl = controller(&summarizer);
        let session = session_with(10);

        let report = ctrl
            .compress(&session, 70_000, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.messages_removed, 6);
        assert_eq!(report.tokens_before, 70_000);

        // Window was messages[3..=8]; m9 and m0..m2 survive.
        let s = session.lock();
        assert_eq!(s.messages.len(), 5);
        assert_eq!(s.messages[0].text_content(), "m0");
        assert_eq!(s.messages[2].text_content(), "m2");
        assert!(s.messages[3].is_compress());
        assert_eq!(s.messages[4].text_content(), "m9");

        let windows = summarizer.windows();
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].len(), 6);
        assert_eq!(windows[0][0].text_content(), "m3");
        assert_eq!(windows[0][5].text_content(), "m8");
    }

    #[tokio::test]
    async fn below_threshold_never_calls_summarizer() {
        let summarizer = Arc::new(MockSummarizer::always("s"));
        let ctrl = controller(&summarizer);
        let session = session_with(10);

        assert!(ctrl
            .compress(&session, 64_000, &CancellationToken::new())
            .await
            .is_none());
        assert_eq!(summarizer.call_count(), 0);
        assert_eq!(session.lock().messages.len(), 10);
    }

    #[tokio::test]
    async fn short_history_never_calls_summarizer() {
        let summarizer = Arc::new(MockSummarizer::always("s"));
        let ctrl = controller(&summarizer);
        let session = session_with(6);

        assert!(ctrl
            .compress(&session, 200_000, &CancellationToken::new())
            .await
            .is_none());
        assert_eq!(summarizer.call_count(), 0);
    }

    #[tokio::test]
    async fn failure_leaves_session_unchanged() {
        let summarizer = Arc::new(MockSummarizer::new(vec![Err(ProviderError::Overloaded)]));
        let ctrl = controller(&summarizer);
        let session = session_with(10);

        let before = serde_json::to_string(&session.lock().messages).unwrap();
        let report = ctrl
            .compress(&session, 70_000, &CancellationToken::new())
            .await;
        assert!(report.is_none());

        let after = serde_json::to_string(&session.lock().messages).unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn seven_messages_is_the_minimum() {
        let summarizer = Arc::new(MockSummarizer::always("recap"));
        let ctrl = controller(&summarizer);
        let session = session_with(7);

        let report = ctrl
            .compress(&session, 70_000, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.messages_removed, 6);

        let s = session.lock();
        assert_eq!(s.messages.len(), 2);
        assert!(s.messages[0].is_compress());
        assert_eq!(s.messages[1].text_content(), "m6");
    }
}
