//! WebSub callback endpoint.

use axum::{
    body::Bytes,
    extract::{RawQuery, State},
    http::{header::CONTENT_TYPE, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::web::handlers::AppState;
use crate::websub::callback::CallbackRequest;

/// GET|POST /websub/callback - Hub verification and content notification.
pub async fn websub_callback(
    State(state): State<Arc<AppState>>,
    method: Method,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = CallbackRequest {
        method: method.to_string(),
        params: parse_query(query.as_deref()),
        headers: header_pairs(&headers),
        body: body.to_vec(),
    };

    let response = state.engine.callbacks().handle(&request).await;
    let status =
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    (status, [(CONTENT_TYPE, response.content_type)], response.body).into_response()
}

fn parse_query(query: Option<&str>) -> Vec<(String, String)> {
    query
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default()
}

/// Header pairs with lowercased names. Values that are not visible ASCII
/// are dropped.
fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_parse_query_decodes() {
        let params = parse_query(Some(
            "hub.mode=subscribe&hub.topic=https%3A%2F%2Fexample.com%2Ffeed.xml&hub.challenge=a+b",
        ));
        assert_eq!(
            params,
            vec![
                ("hub.mode".to_string(), "subscribe".to_string()),
                ("hub.topic".to_string(), "https://example.com/feed.xml".to_string()),
                ("hub.challenge".to_string(), "a b".to_string()),
            ]
        );
        assert!(parse_query(None).is_empty());
    }

    #[test]
    fn test_header_pairs_lowercase() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Hub-Signature", HeaderValue::from_static("sha1=abc"));
        let pairs = header_pairs(&headers);
        assert_eq!(pairs, vec![("x-hub-signature".to_string(), "sha1=abc".to_string())]);
    }
}
