//! Error types for the papertrail worker.

use thiserror::Error;

use crate::defaults::JOB_ERROR_MAX_CHARS;

/// Result type alias using papertrail's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for papertrail operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Job queue error (illegal transition, missing job)
    #[error("Job error: {0}")]
    Job(String),

    /// Inference endpoint unreachable or returned an unusable response
    #[error("Inference error: {0}")]
    Inference(String),

    /// Text extraction from fetched content failed
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// Source document retrieval failed
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}

/// Bound an error message to the length stored on a failed job.
///
/// Cuts on a character boundary, so multi-byte text never panics.
pub fn truncate_error(message: &str) -> String {
    match message.char_indices().nth(JOB_ERROR_MAX_CHARS) {
        Some((byte_idx, _)) => message[..byte_idx].to_string(),
        None => message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_not_found() {
        let err = Error::NotFound("work W123".to_string());
        assert_eq!(err.to_string(), "Not found: work W123");
    }

    #[test]
    fn test_error_display_inference() {
        let err = Error::Inference("model timeout".to_string());
        assert_eq!(err.to_string(), "Inference error: model timeout");
    }

    #[test]
    fn test_error_display_extraction() {
        let err = Error::Extraction("missing %PDF header".to_string());
        assert_eq!(err.to_string(), "Extraction error: missing %PDF header");
    }

    #[test]
    fn test_error_display_job() {
        let err = Error::Job("job is not processing".to_string());
        assert_eq!(err.to_string(), "Job error: job is not processing");
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization(_)));
        assert!(err.to_string().starts_with("Serialization error:"));
    }

    #[test]
    fn test_from_serde_yaml_error() {
        let yaml_err = serde_yaml::from_str::<Vec<String>>("{ not: [a list").unwrap_err();
        let err: Error = yaml_err.into();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "prompts.yaml");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("prompts.yaml"));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }

    #[test]
    fn test_truncate_error_short_message_unchanged() {
        assert_eq!(truncate_error("boom"), "boom");
        assert_eq!(truncate_error(""), "");
    }

    #[test]
    fn test_truncate_error_caps_at_limit() {
        let long = "x".repeat(JOB_ERROR_MAX_CHARS + 250);
        let truncated = truncate_error(&long);
        assert_eq!(truncated.chars().count(), JOB_ERROR_MAX_CHARS);
    }

    #[test]
    fn test_truncate_error_exact_limit_unchanged() {
        let exact = "y".repeat(JOB_ERROR_MAX_CHARS);
        assert_eq!(truncate_error(&exact), exact);
    }

    #[test]
    fn test_truncate_error_respects_char_boundaries() {
        let long = "é".repeat(JOB_ERROR_MAX_CHARS + 1);
        let truncated = truncate_error(&long);
        assert_eq!(truncated.chars().count(), JOB_ERROR_MAX_CHARS);
        assert!(truncated.chars().all(|c| c == 'é'));
    }
}
