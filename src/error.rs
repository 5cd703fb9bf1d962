// src/error.rs
// Standardized error types for mesbot

use thiserror::Error;

/// Main error type for the mesbot library
#[derive(Error, Debug)]
pub enum BotError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("transport error: {0}")]
    Transport(TransportError),

    #[error("authentication failed: {0}")]
    Unauthenticated(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("operation timed out")]
    Timeout,

    #[error("task cancelled")]
    Cancelled,

    #[error("unknown error: {0}")]
    Other(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Transport-level failure with its reconnect classification.
///
/// `code == 1` is the platform's "permanent" marker: the event loop must stop
/// and the error is surfaced to the operator rather than retried.
#[derive(Debug, Clone)]
pub struct TransportError {
    pub message: String,
    pub code: Option<i32>,
    pub transient: bool,
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (code {})", self.message, code),
            None => write!(f, "{}", self.message),
        }
    }
}

impl TransportError {
    pub fn is_permanent(&self) -> bool {
        self.code == Some(1)
    }
}

/// Convenience type alias for Result using BotError
pub type Result<T> = std::result::Result<T, BotError>;

impl BotError {
    /// Whether the failure is worth retrying (reconnect / backoff paths).
    pub fn is_transient(&self) -> bool {
        match self {
            BotError::Transport(t) => t.transient,
            BotError::Unavailable(_) | BotError::Timeout => true,
            _ => false,
        }
    }
}

impl From<String> for BotError {
    fn from(s: String) -> Self {
        BotError::Other(s)
    }
}

impl From<tokio::task::JoinError> for BotError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            BotError::Cancelled
        } else {
            BotError::Other(err.to_string())
        }
    }
}

impl From<BotError> for String {
    fn from(err: BotError) -> Self {
        err.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_permanent() {
        let err = TransportError {
            message: "Authentication failed".to_string(),
            code: Some(1),
            transient: false,
        };
        assert!(err.is_permanent());
        assert!(!BotError::Transport(err).is_transient());
    }

    #[test]
    fn test_transient_classification() {
        let err = TransportError {
            message: "connection reset".to_string(),
            code: None,
            transient: true,
        };
        assert!(BotError::Transport(err).is_transient());
        assert!(BotError::Unavailable("rate limited".into()).is_transient());
        assert!(!BotError::Config("missing FB_XS".into()).is_transient());
    }

    #[test]
    fn test_display_includes_code() {
        let err = TransportError {
            message: "stream closed".to_string(),
            code: Some(1),
            transient: false,
        };
        assert_eq!(err.to_string(), "stream closed (code 1)");
    }
}
