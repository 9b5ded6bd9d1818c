//! Bearer token authentication for the admin API.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::web::error::ApiError;

/// The configured admin token.
#[derive(Clone)]
pub struct AdminToken(Arc<str>);

impl AdminToken {
    /// Wrap a token.
    pub fn new(token: &str) -> Self {
        Self(Arc::from(token))
    }

    /// Compare in constant time.
    pub fn matches(&self, provided: &str) -> bool {
        !self.0.is_empty() && bool::from(self.0.as_bytes().ct_eq(provided.as_bytes()))
    }
}

impl std::fmt::Debug for AdminToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AdminToken(..)")
    }
}

/// Reject requests without `Authorization: Bearer <admin token>`.
pub async fn require_admin_token(
    State(token): State<AdminToken>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let provided = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::unauthorized("Missing authorization"))?;

    if !token.matches(provided.trim()) {
        tracing::debug!("Admin token rejected");
        return Err(ApiError::unauthorized("Invalid token"));
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_matches() {
        let token = AdminToken::new("s3cret");
        assert!(token.matches("s3cret"));
        assert!(!token.matches("s3cre"));
        assert!(!token.matches("s3cret!"));
        assert!(!token.matches(""));
    }

    #[test]
    fn test_empty_token_never_matches() {
        assert!(!AdminToken::new("").matches(""));
    }

    #[test]
    fn test_debug_hides_token() {
        assert_eq!(format!("{:?}", AdminToken::new("s3cret")), "AdminToken(..)");
    }
}
