// src/error.rs
// Standardized error types for engram

use thiserror::Error;

/// Main error type for the engram library
#[derive(Error, Debug)]
pub enum EngramError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("consolidation run already active for corpus {0}")]
    RunActive(String),

    #[error("task cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown error: {0}")]
    Other(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Convenience type alias for Result using EngramError
pub type Result<T> = std::result::Result<T, EngramError>;

impl From<String> for EngramError {
    fn from(s: String) -> Self {
        EngramError::Other(s)
    }
}

impl From<tokio::task::JoinError> for EngramError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            EngramError::Cancelled
        } else {
            EngramError::Other(err.to_string())
        }
    }
}

impl From<EngramError> for String {
    fn from(err: EngramError) -> Self {
        err.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_input_error() {
        let err = EngramError::InvalidInput("bad duration".to_string());
        assert!(err.to_string().contains("invalid input"));
        assert!(err.to_string().contains("bad duration"));
    }

    #[test]
    fn test_run_active_error() {
        let err = EngramError::RunActive("project-a".to_string());
        assert!(err.to_string().contains("already active"));
        assert!(err.to_string().contains("project-a"));
    }

    #[test]
    fn test_embedding_error() {
        let err = EngramError::Embedding("dimension mismatch".to_string());
        assert!(err.to_string().contains("embedding error"));
        assert!(err.to_string().contains("dimension mismatch"));
    }

    #[test]
    fn test_from_string() {
        let err: EngramError = "some error".to_string().into();
        assert!(matches!(err, EngramError::Other(_)));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<i32>("not json").unwrap_err();
        let err: EngramError = json_err.into();
        assert!(matches!(err, EngramError::Json(_)));
    }

    #[test]
    fn test_cancelled_display() {
        assert!(EngramError::Cancelled.to_string().contains("cancelled"));
    }
}
