//! Error types for depscope.

use thiserror::Error;

/// Result type alias using depscope's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for depscope operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Work queue operation failed
    #[error("Queue error: {0}")]
    Queue(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Component not found by package coordinate
    #[error("Component not found: {0}")]
    ComponentNotFound(String),

    /// Job catalog could not be loaded or is malformed
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// External collector process failed
    #[error("Execution error: {0}")]
    Execution(String),

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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_queue() {
        let err = Error::Queue("unreachable".to_string());
        assert_eq!(err.to_string(), "Queue error: unreachable");
    }

    #[test]
    fn test_error_display_component_not_found() {
        let err = Error::ComponentNotFound("pkg:npm/left-pad".to_string());
        assert_eq!(err.to_string(), "Component not found: pkg:npm/left-pad");
    }

    #[test]
    fn test_error_display_catalog() {
        let err = Error::Catalog("missing config key".to_string());
        assert_eq!(err.to_string(), "Catalog error: missing config key");
    }

    #[test]
    fn test_error_display_execution() {
        let err = Error::Execution("exit code 2".to_string());
        assert_eq!(err.to_string(), "Execution error: exit code 2");
    }

    #[test]
    fn test_error_display_invalid_input() {
        let err = Error::InvalidInput("bad tier".to_string());
        assert_eq!(err.to_string(), "Invalid input: bad tier");
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
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing catalog");
        let err: Error = io_err.into();
        assert!(err.to_string().contains("I/O error:"));
        assert!(err.to_string().contains("missing catalog"));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }

    #[test]
    fn test_result_type_ok() {
        fn get_result() -> Result<i32> {
            Ok(7)
        }
        assert_eq!(get_result().unwrap(), 7);
    }
}
