//! Web server.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;

use crate::config::Config;
use crate::engine::Engine;
use crate::{PodhubError, Result};

use super::handlers::AppState;
use super::router::{callback_path, create_health_router, create_router};

/// Web server for the callback endpoint and admin API.
pub struct WebServer {
    /// Server address.
    addr: SocketAddr,
    /// Application state.
    app_state: Arc<AppState>,
    callback_path: String,
    admin_token: String,
    callback_body_limit: usize,
}

impl WebServer {
    /// Create a new web server.
    pub fn new(config: &Config, engine: Arc<Engine>) -> Result<Self> {
        let addr = format!("{}:{}", config.server.host, config.server.port)
            .parse()
            .map_err(|e| PodhubError::Config(format!("invalid server address: {}", e)))?;

        Ok(Self {
            addr,
            app_state: Arc::new(AppState::new(engine)),
            callback_path: callback_path(&config.websub.callback_url),
            admin_token: config.admin.token.clone(),
            callback_body_limit: usize::try_from(config.feed.max_feed_size_bytes)
                .unwrap_or(usize::MAX),
        })
    }

    /// Get the server address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Build the full router.
    pub fn router(&self) -> Router {
        create_router(
            self.app_state.clone(),
            &self.callback_path,
            &self.admin_token,
            self.callback_body_limit,
        )
        .merge(create_health_router())
    }

    /// Run the web server until `shutdown` resolves, then drain connections.
    pub async fn run<F>(self, shutdown: F) -> std::result::Result<(), std::io::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = self.router();
        let listener = TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;

        tracing::info!(
            "Web server listening on http://{} (callback path {})",
            local_addr,
            self.callback_path
        );

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
    }

    /// Run the server in the background and return the actual bound address.
    ///
    /// This is useful for testing when binding to port 0.
    pub async fn run_with_addr(self) -> std::result::Result<SocketAddr, std::io::Error> {
        let router = self.router();
        let listener = TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;

        tracing::info!("Web server listening on http://{}", local_addr);

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                tracing::error!("Web server error: {}", e);
            }
        });

        Ok(local_addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::db::Database;

    async fn create_test_server() -> WebServer {
        let mut config = Config::default();
        config.server.host = "127.0.0.1".to_string();
        config.server.port = 0;
        config.websub.callback_url = "http://127.0.0.1/websub/callback".to_string();

        let db = Database::open_in_memory().await.unwrap();
        let engine =
            Engine::new(&config, db, reqwest::Client::new(), Arc::new(SystemClock)).unwrap();
        WebServer::new(&config, Arc::new(engine)).unwrap()
    }

    #[tokio::test]
    async fn test_web_server_new() {
        let server = create_test_server().await;
        assert_eq!(server.addr().ip().to_string(), "127.0.0.1");
        assert_eq!(server.callback_path, "/websub/callback");
    }

    #[tokio::test]
    async fn test_web_server_run() {
        let server = create_test_server().await;
        let addr = server.run_with_addr().await.unwrap();

        let client = reqwest::Client::new();
        let resp = client
            .get(format!("http://{}/health", addr))
            .send()
            .await
            .unwrap();

        assert!(resp.status().is_success());
        assert_eq!(resp.text().await.unwrap(), "OK");
    }
}
