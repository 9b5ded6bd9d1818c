//! Test helpers for integration tests.
//!
//! Provides a mock publisher (feed host and hub on one local server) and a
//! fully wired podhub app behind an `axum_test::TestServer`.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::header::{CONTENT_TYPE, LINK};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use axum_test::TestServer;
use chrono::{DateTime, TimeZone, Utc};
use tokio::net::TcpListener;

use podhub::http::build_client;
use podhub::websub::SubscriptionRepository;
use podhub::{Config, Database, Engine, ManualClock, WebServer};

/// Admin token configured for tests.
pub const ADMIN_TOKEN: &str = "test-admin-token";

/// Fixed start time for the manual clock.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap()
}

/// An RSS document with the given build date and items.
pub fn rss(build_date: &str, items: &[(&str, &str, &str)]) -> String {
    let items: String = items
        .iter()
        .map(|(guid, title, pub_date)| {
            format!(
                r#"
    <item>
      <title>{title}</title>
      <guid>{guid}</guid>
      <pubDate>{pub_date}</pubDate>
      <enclosure url="https://cdn.example.com/{guid}.mp3" type="audio/mpeg" length="1000"/>
    </item>"#
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Test Show</title>
    <link>https://example.com/</link>
    <description>A show for tests</description>
    <lastBuildDate>{build_date}</lastBuildDate>{items}
  </channel>
</rss>"#
    )
}

struct PublisherState {
    base_url: String,
    feed: Mutex<String>,
    feed_requests: AtomicUsize,
    hub_status: AtomicU16,
    hub_requests: Mutex<Vec<HashMap<String, String>>>,
}

/// A local server that hosts one feed and acts as its hub.
pub struct MockPublisher {
    pub addr: SocketAddr,
    state: Arc<PublisherState>,
}

impl MockPublisher {
    /// Start the publisher on an ephemeral port.
    pub async fn start(feed: String) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let state = Arc::new(PublisherState {
            base_url: format!("http://{}", addr),
            feed: Mutex::new(feed),
            feed_requests: AtomicUsize::new(0),
            hub_status: AtomicU16::new(202),
            hub_requests: Mutex::new(Vec::new()),
        });

        let router = Router::new()
            .route("/feed.xml", get(serve_feed))
            .route("/hub", post(hub))
            .with_state(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn feed_url(&self) -> String {
        format!("{}/feed.xml", self.state.base_url)
    }

    pub fn hub_url(&self) -> String {
        format!("{}/hub", self.state.base_url)
    }

    /// Replace the hosted feed document.
    pub fn set_feed(&self, feed: String) {
        *self.state.feed.lock().unwrap() = feed;
    }

    /// Status the hub answers subscription requests with.
    pub fn set_hub_status(&self, status: u16) {
        self.state.hub_status.store(status, Ordering::SeqCst);
    }

    /// Form bodies of every hub request received so far.
    pub fn hub_requests(&self) -> Vec<HashMap<String, String>> {
        self.state.hub_requests.lock().unwrap().clone()
    }

    pub fn feed_requests(&self) -> usize {
        self.state.feed_requests.load(Ordering::SeqCst)
    }
}

async fn serve_feed(State(state): State<Arc<PublisherState>>) -> Response {
    state.feed_requests.fetch_add(1, Ordering::SeqCst);
    let feed = state.feed.lock().unwrap().clone();
    let link = format!(
        r#"<{base}/hub>; rel="hub", <{base}/feed.xml>; rel="self""#,
        base = state.base_url
    );
    (
        [(CONTENT_TYPE, "application/rss+xml".to_string()), (LINK, link)],
        feed,
    )
        .into_response()
}

async fn hub(
    State(state): State<Arc<PublisherState>>,
    Form(form): Form<HashMap<String, String>>,
) -> StatusCode {
    state.hub_requests.lock().unwrap().push(form);
    StatusCode::from_u16(state.hub_status.load(Ordering::SeqCst)).unwrap()
}

/// Configuration pointing at local test servers.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.websub.callback_url = "http://127.0.0.1:9/websub/callback".to_string();
    config.websub.max_attempts = 2;
    config.websub.retry_delay_secs = 0;
    config.websub.try_fallback_hubs = false;
    config.feed.allow_private_hosts = true;
    config.admin.token = ADMIN_TOKEN.to_string();
    config
}

/// A wired-up podhub instance.
pub struct TestApp {
    pub server: TestServer,
    pub engine: Arc<Engine>,
    pub clock: Arc<ManualClock>,
}

impl TestApp {
    pub fn db(&self) -> &Database {
        self.engine.db()
    }

    /// Secret stored for a topic's subscription.
    pub async fn secret_for(&self, topic: &str) -> String {
        SubscriptionRepository::new(self.db().pool())
            .get_by_topic(topic)
            .await
            .unwrap()
            .expect("subscription exists")
            .secret
    }

    /// Complete the hub's verification handshake for `topic`.
    pub async fn verify(&self, topic: &str, challenge: &str) {
        let response = self
            .server
            .get("/websub/callback")
            .add_query_param("hub.mode", "subscribe")
            .add_query_param("hub.topic", topic)
            .add_query_param("hub.challenge", challenge)
            .await;
        response.assert_status_ok();
        assert_eq!(response.text(), challenge);
    }
}

/// Build an app from `config` with a manual clock at [`t0`].
pub async fn create_app(config: Config) -> TestApp {
    let db = Database::open_in_memory().await.unwrap();
    let clock = Arc::new(ManualClock::new(t0()));
    let client = build_client(&config.feed).unwrap();
    let engine = Arc::new(Engine::new(&config, db, client, clock.clone()).unwrap());

    let web = WebServer::new(&config, engine.clone()).unwrap();
    let server = TestServer::new(web.router()).unwrap();

    TestApp {
        server,
        engine,
        clock,
    }
}
