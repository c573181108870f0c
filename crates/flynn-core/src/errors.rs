use serde::{Deserialize, Serialize};

/// Failures raised by a model-call collaborator (provider or summarizer).
/// Terminal for the turn that hit them; the orchestrator never retries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderError {
    #[error("network error: {0}")]
    Network(String),

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("rate limited")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("provider overloaded")]
    Overloaded,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("context window exceeded")]
    ContextWindowExceeded,

    #[error("server error ({status}): {body}")]
    ServerError { status: u16, body: String },

    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("call aborted")]
    Aborted,
}

impl ProviderError {
    /// Classify an HTTP error status from the provider API.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::AuthenticationFailed(body),
            413 => Self::ContextWindowExceeded,
            429 => Self::RateLimited { retry_after_secs: None },
            400 => {
                if body.contains("context window") || body.contains("too many tokens") {
                    Self::ContextWindowExceeded
                } else {
                    Self::InvalidRequest(body)
                }
            }
            529 => Self::Overloaded,
            _ => Self::ServerError { status, body },
        }
    }

    /// Whether a caller with its own retry policy could reasonably retry.
    /// The orchestrator does not retry; the REPL surfaces this as a hint.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_)
                | Self::RateLimited { .. }
                | Self::Overloaded
                | Self::StreamInterrupted(_)
                | Self::ServerError { status: 500..=599, .. }
        )
    }

    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(matches!(
            ProviderError::from_status(401, "bad key".into()),
            ProviderError::AuthenticationFailed(_)
        ));
        assert!(matches!(
            ProviderError::from_status(429, String::new()),
            ProviderError::RateLimited { .. }
        ));
        assert_eq!(ProviderError::from_status(529, String::new()), ProviderError::Overloaded);
        assert!(matches!(
            ProviderError::from_status(500, "oops".into()),
            ProviderError::ServerError { status: 500, .. }
        ));
    }

    #[test]
    fn context_window_detected_in_400_body() {
        let err = ProviderError::from_status(400, "prompt exceeds context window".into());
        assert_eq!(err, ProviderError::ContextWindowExceeded);

        let err = ProviderError::from_status(400, "missing field".into());
        assert!(matches!(err, ProviderError::InvalidRequest(_)));
    }

    #[test]
    fn retryability() {
        assert!(ProviderError::Overloaded.is_retryable());
        assert!(ProviderError::Network("reset".into()).is_retryable());
        assert!(!ProviderError::AuthenticationFailed("no".into()).is_retryable());
        assert!(!ProviderError::Aborted.is_retryable());
    }
}
