//! Router configuration.

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use super::handlers::{
    add_feed, get_podcast, list_callback_logs, list_podcasts, list_subscriptions,
    renew_subscription, resync_feed, run_sweep, set_podcast_dead, unsubscribe, websub_callback,
    AppState,
};
use super::middleware::{require_admin_token, AdminToken};

/// Path the callback endpoint is mounted at when the configured callback URL
/// has no path of its own.
pub const DEFAULT_CALLBACK_PATH: &str = "/websub/callback";

/// Create the main router.
///
/// The admin API is only mounted when `admin_token` is non-empty.
pub fn create_router(
    app_state: Arc<AppState>,
    callback_path: &str,
    admin_token: &str,
    callback_body_limit: usize,
) -> Router {
    let callback_routes = Router::new()
        .route(callback_path, get(websub_callback).post(websub_callback))
        .layer(DefaultBodyLimit::max(callback_body_limit));

    let mut router = Router::new().merge(callback_routes);

    if admin_token.is_empty() {
        tracing::info!("Admin API disabled (no admin token configured)");
    } else {
        let admin_routes = Router::new()
            .route("/subscriptions", get(list_subscriptions))
            .route("/subscriptions/renew", post(renew_subscription))
            .route("/subscriptions/unsubscribe", post(unsubscribe))
            .route("/callback-logs", get(list_callback_logs))
            .route("/podcasts", get(list_podcasts))
            .route("/podcasts/:id", get(get_podcast))
            .route("/podcasts/:id/dead", put(set_podcast_dead))
            .route("/feeds", post(add_feed))
            .route("/feeds/resync", post(resync_feed))
            .route("/sweep", post(run_sweep))
            .route_layer(middleware::from_fn_with_state(
                AdminToken::new(admin_token),
                require_admin_token,
            ));
        router = router.nest("/api", admin_routes);
    }

    router
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(app_state)
}

/// Create a health check router.
pub fn create_health_router() -> Router {
    Router::new().route("/health", get(health_check))
}

/// Health check handler.
async fn health_check() -> &'static str {
    "OK"
}

/// Path component of the configured callback URL.
pub fn callback_path(callback_url: &str) -> String {
    match url::Url::parse(callback_url) {
        Ok(url) if url.path() != "/" && !url.path().is_empty() => url.path().to_string(),
        _ => DEFAULT_CALLBACK_PATH.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_path() {
        assert_eq!(
            callback_path("https://podhub.example.org/hooks/websub?key=1"),
            "/hooks/websub"
        );
        assert_eq!(callback_path("https://podhub.example.org/"), DEFAULT_CALLBACK_PATH);
        assert_eq!(callback_path("not a url"), DEFAULT_CALLBACK_PATH);
    }

    #[tokio::test]
    async fn test_health_check() {
        use axum::body::Body;
        use axum::http::{Request, StatusCode};
        use http_body_util::BodyExt;
        use tower::util::ServiceExt;

        let response = create_health_router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"OK");
    }
}
