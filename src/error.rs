//! Error types for podhub.

use thiserror::Error;

/// Common error type for podhub.
#[derive(Error, Debug)]
pub enum PodhubError {
    /// Database error.
    ///
    /// Errors from sqlx are converted into this variant automatically.
    #[error("database error: {0}")]
    Database(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Outbound HTTP failure (client construction, transport, status).
    #[error("HTTP error: {0}")]
    Http(String),

    /// Feed download or parse failure.
    #[error("feed error: {0}")]
    Feed(String),

    /// Hub protocol failure.
    #[error("hub error: {0}")]
    Hub(String),

    /// Validation error for input or configuration values.
    #[error("validation error: {0}")]
    Validation(String),

    /// Resource not found.
    #[error("{0} not found")]
    NotFound(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<sqlx::Error> for PodhubError {
    fn from(e: sqlx::Error) -> Self {
        PodhubError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for PodhubError {
    fn from(e: serde_json::Error) -> Self {
        PodhubError::Validation(e.to_string())
    }
}

/// Result type alias for podhub operations.
pub type Result<T> = std::result::Result<T, PodhubError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_error_display() {
        let err = PodhubError::Feed("unexpected end of document".to_string());
        assert_eq!(err.to_string(), "feed error: unexpected end of document");
    }

    #[test]
    fn test_hub_error_display() {
        let err = PodhubError::Hub("503 Service Unavailable".to_string());
        assert_eq!(err.to_string(), "hub error: 503 Service Unavailable");
    }

    #[test]
    fn test_not_found_error_display() {
        let err = PodhubError::NotFound("subscription".to_string());
        assert_eq!(err.to_string(), "subscription not found");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: PodhubError = io_err.into();
        assert!(matches!(err, PodhubError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_sqlx_error_conversion() {
        let err: PodhubError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, PodhubError::Database(_)));
    }
}
