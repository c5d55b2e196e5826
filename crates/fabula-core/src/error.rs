//! Error types for fabula.

use thiserror::Error;

use crate::models::TokenUsage;

/// Result type alias using fabula's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for fabula operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Chunk not found
    #[error("Chunk not found: {0}")]
    ChunkNotFound(uuid::Uuid),

    /// Context window could not be built
    #[error("Window build error: {0}")]
    WindowBuild(String),

    /// Generation call failed
    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    /// Model response rejected by the schema contract
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error means storage is wholly unavailable.
    ///
    /// Pool- and connection-level failures make further durable progress
    /// impossible, so the orchestrator aborts the remainder of the run.
    /// Row-level database errors stay chunk-scoped.
    pub fn is_storage_unavailable(&self) -> bool {
        matches!(
            self,
            Error::Database(
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
            )
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Generation(GenerationError {
            kind: if e.is_timeout() {
                GenerationErrorKind::Timeout
            } else {
                GenerationErrorKind::ServiceError
            },
            message: e.to_string(),
            usage: TokenUsage::default(),
        })
    }
}

// ---------------------------------------------------------------------------
// Generation failure taxonomy
// ---------------------------------------------------------------------------

/// Classification of a failed generation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationErrorKind {
    /// Service applied rate limiting (HTTP 429). Retryable.
    RateLimited,
    /// Request exceeded its deadline. Retryable.
    Timeout,
    /// Request was malformed or rejected by the service (4xx). Not retryable.
    InvalidRequest,
    /// Service-side failure (5xx or transport). Not retryable.
    ServiceError,
    /// Response arrived but could not be parsed as the expected payload.
    MalformedOutput,
}

impl GenerationErrorKind {
    /// Whether the orchestrator should retry this failure with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Timeout)
    }
}

impl std::fmt::Display for GenerationErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RateLimited => write!(f, "rate_limited"),
            Self::Timeout => write!(f, "timeout"),
            Self::InvalidRequest => write!(f, "invalid_request"),
            Self::ServiceError => write!(f, "service_error"),
            Self::MalformedOutput => write!(f, "malformed_output"),
        }
    }
}

/// A failed call to the generative service.
///
/// Carries the token usage consumed by the failed call so cost accounting
/// stays accurate even when partial usage is billed.
#[derive(Error, Debug, Clone)]
#[error("{kind}: {message}")]
pub struct GenerationError {
    pub kind: GenerationErrorKind,
    pub message: String,
    pub usage: TokenUsage,
}

impl GenerationError {
    pub fn new(kind: GenerationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            usage: TokenUsage::default(),
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }
}

// ---------------------------------------------------------------------------
// Validation failure
// ---------------------------------------------------------------------------

/// A model response rejected by the schema contract.
///
/// Never retried automatically: a validation failure implies a prompt or
/// schema mismatch that needs human inspection, so the offending field
/// path and reason are retained for the run report.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{field_path}: {reason}")]
pub struct ValidationError {
    /// Dotted path of the offending field (e.g. "narrative_vector.magnitude").
    pub field_path: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field_path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field_path: field_path.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_error_display_chunk_not_found() {
        let id = Uuid::nil();
        let err = Error::ChunkNotFound(id);
        assert_eq!(err.to_string(), format!("Chunk not found: {}", id));
    }

    #[test]
    fn test_error_display_window_build() {
        let err = Error::WindowBuild("target missing".to_string());
        assert_eq!(err.to_string(), "Window build error: target missing");
    }

    #[test]
    fn test_error_display_config() {
        let err = Error::Config("missing API key".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing API key");
    }

    #[test]
    fn test_generation_error_display() {
        let err = GenerationError::new(GenerationErrorKind::RateLimited, "slow down");
        assert_eq!(err.to_string(), "rate_limited: slow down");
    }

    #[test]
    fn test_generation_error_kind_retryable() {
        assert!(GenerationErrorKind::RateLimited.is_retryable());
        assert!(GenerationErrorKind::Timeout.is_retryable());
        assert!(!GenerationErrorKind::InvalidRequest.is_retryable());
        assert!(!GenerationErrorKind::ServiceError.is_retryable());
        assert!(!GenerationErrorKind::MalformedOutput.is_retryable());
    }

    #[test]
    fn test_generation_error_carries_usage() {
        let err = GenerationError::new(GenerationErrorKind::Timeout, "deadline")
            .with_usage(TokenUsage::new(120, 0));
        assert_eq!(err.usage.input_tokens, 120);
        assert_eq!(err.usage.output_tokens, 0);
    }

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::new("narrative_vector.magnitude", "missing required field");
        assert_eq!(
            err.to_string(),
            "narrative_vector.magnitude: missing required field"
        );
    }

    #[test]
    fn test_validation_error_into_core_error() {
        let err: Error = ValidationError::new("themes", "expected list").into();
        assert!(err.to_string().contains("Validation error"));
        assert!(err.to_string().contains("themes"));
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        match err {
            Error::Serialization(msg) => assert!(!msg.is_empty()),
            _ => panic!("Expected Serialization error"),
        }
    }

    #[test]
    fn test_storage_unavailable_classification() {
        let err = Error::Database(sqlx::Error::PoolClosed);
        assert!(err.is_storage_unavailable());

        let err = Error::Database(sqlx::Error::RowNotFound);
        assert!(!err.is_storage_unavailable());

        let err = Error::Internal("unexpected".into());
        assert!(!err.is_storage_unavailable());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
