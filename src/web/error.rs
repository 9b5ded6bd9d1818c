//! Error envelope returned by the admin API.
//!
//! Every failing `/api/*` request answers with
//! `{"error": {"code": "...", "message": "...", "details": {...}}}`. The hub
//! callback endpoint does not use this type; it replies in plain text.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::collections::HashMap;

use crate::PodhubError;

/// Machine-readable `error.code` values of the admin API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Malformed JSON body or an unknown status filter (400).
    BadRequest,
    /// Missing or wrong admin bearer token (401).
    Unauthorized,
    /// No such podcast or subscription (404).
    NotFound,
    /// Request body failed `validator` checks; see `details` (422).
    ValidationError,
    /// A feed URL or hub the store refuses, such as a private host (422).
    UnprocessableEntity,
    /// The hub or feed host failed while serving an admin action (502).
    BadGateway,
    /// Storage failure. The message is generic; the cause is logged (500).
    InternalError,
}

impl ErrorCode {
    /// HTTP status sent with this code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::BadRequest => StatusCode::BAD_REQUEST,
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::ValidationError => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCode::UnprocessableEntity => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCode::BadGateway => StatusCode::BAD_GATEWAY,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// JSON body of a failed admin request.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: ErrorCode,
    /// Shown to the operator as-is.
    pub message: String,
    /// Per-field messages, only for `VALIDATION_ERROR`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HashMap<String, Vec<String>>>,
}

/// Error returned by admin handlers and the bearer-token middleware.
#[derive(Debug)]
pub struct ApiError {
    code: ErrorCode,
    message: String,
    details: Option<HashMap<String, Vec<String>>>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// The error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::UnprocessableEntity, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Collect the failures of a request DTO into `details`, keyed by field.
    pub fn from_validation_errors(errors: validator::ValidationErrors) -> Self {
        let mut details: HashMap<String, Vec<String>> = HashMap::new();

        for (field, field_errors) in errors.field_errors() {
            let messages: Vec<String> = field_errors
                .iter()
                .map(|e| {
                    e.message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("Invalid value for {}", field))
                })
                .collect();
            details.insert(field.to_string(), messages);
        }

        Self {
            code: ErrorCode::ValidationError,
            message: "Validation failed".to_string(),
            details: Some(details),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.code.status_code();
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
                details: self.details,
            },
        };
        (status, Json(body)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

/// Storage details never reach the response; hub and fetch failures do,
/// since the operator needs them to act.
impl From<PodhubError> for ApiError {
    fn from(err: PodhubError) -> Self {
        match &err {
            PodhubError::NotFound(what) => ApiError::not_found(format!("{} not found", what)),
            PodhubError::Validation(msg) => ApiError::unprocessable(msg.clone()),
            PodhubError::Http(msg) | PodhubError::Hub(msg) => {
                ApiError::new(ErrorCode::BadGateway, msg.clone())
            }
            _ => {
                tracing::error!("Internal error: {}", err);
                ApiError::internal("An internal error occurred")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_status() {
        assert_eq!(ErrorCode::BadRequest.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ErrorCode::Unauthorized.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(ErrorCode::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            ErrorCode::ValidationError.status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(ErrorCode::BadGateway.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            ErrorCode::InternalError.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_from_podhub_error() {
        let err = ApiError::from(PodhubError::NotFound("subscription".into()));
        assert_eq!(err.code(), ErrorCode::NotFound);
        assert_eq!(err.message, "subscription not found");

        let err = ApiError::from(PodhubError::Validation("private host".into()));
        assert_eq!(err.code(), ErrorCode::UnprocessableEntity);

        let err = ApiError::from(PodhubError::Database("disk I/O error".into()));
        assert_eq!(err.code(), ErrorCode::InternalError);
        assert_eq!(err.message, "An internal error occurred");
    }

    #[test]
    fn test_validation_error_details() {
        let mut errors = validator::ValidationErrors::new();
        errors.add("url", validator::ValidationError::new("url"));

        let err = ApiError::from_validation_errors(errors);
        assert_eq!(err.code(), ErrorCode::ValidationError);
        let details = err.details.unwrap();
        assert_eq!(details["url"], vec!["Invalid value for url".to_string()]);
    }

    #[tokio::test]
    async fn test_hub_failure_envelope() {
        let response =
            ApiError::from(PodhubError::Hub("hub returned 503".into())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["code"], "BAD_GATEWAY");
        assert_eq!(json["error"]["message"], "hub returned 503");
        assert!(json["error"].get("details").is_none());
    }
}
