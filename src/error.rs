use thiserror::Error;
use std::io;

/// Custom result type alias for the crate
pub type Result<T> = std::result::Result<T, TaskwardenError>;

/// Errors that can occur while orchestrating tasks and monitoring services
#[derive(Debug, Error)]
pub enum TaskwardenError {
    /// I/O errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// HTTP request/response errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing/serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration file parsing errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing errors
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Input validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Content filter misconfiguration
    #[error("Content filter error: {0}")]
    Filter(String),

    /// A capability executor failed
    #[error("Execution error: {0}")]
    Execution(String),

    /// Lookup of an unknown task, capability or service
    #[error("Not found: {0}")]
    NotFound(String),

    /// Service probe errors
    #[error("Probe error: {0}")]
    Probe(String),

    /// Network errors worth retrying, such as a 5xx reply
    #[error("Network error: {0}")]
    Network(String),

    /// Notification delivery errors
    #[error("Notification error: {0}")]
    Notification(String),

    /// General message errors
    #[error("{0}")]
    Message(String),
}

impl TaskwardenError {
    /// Creates a new error with the specified message
    pub fn new(message: &str) -> Self {
        Self::Message(message.to_string())
    }

    /// Shorthand for an executor failure
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }

    /// Checks if this error is transient and retryable
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network(_) |
            Self::Http(_) |
            Self::Probe(_) |
            Self::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = TaskwardenError::new("test error");
        assert!(matches!(error, TaskwardenError::Message(_)));

        if let TaskwardenError::Message(msg) = error {
            assert_eq!(msg, "test error");
        }
    }

    #[test]
    fn test_is_transient() {
        let transient = TaskwardenError::Network("connection timeout".into());
        let fatal = TaskwardenError::Validation("invalid input".into());

        assert!(transient.is_transient());
        assert!(!fatal.is_transient());
        assert!(!TaskwardenError::Notification("400".into()).is_transient());
    }

    #[test]
    fn test_execution_message() {
        let error = TaskwardenError::execution("backend exploded");
        assert_eq!(error.to_string(), "Execution error: backend exploded");
    }
}
