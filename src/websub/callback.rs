//! Callback handler.
//!
//! Decides the response to every request a hub makes to the callback
//! endpoint and writes each one to the callback log. The HTTP layer only
//! translates to and from [`CallbackRequest`] / [`CallbackResponse`].

use std::sync::Arc;

use chrono::Duration;
use serde_json::json;
use tracing::{debug, error, info, warn};

use super::manager::TOPIC_PARAM;
use super::repository::{CallbackLogRepository, SubscriptionRepository};
use super::signature::{verify_signature, SignatureCheck, SIGNATURE_HEADER};
use super::types::{CallbackKind, HubMode, NewCallbackLog};
use crate::clock::Clock;
use crate::config::WebSubConfig;
use crate::db::Database;
use crate::feed::sync::{FeedSynchronizer, SyncOutcome};
use crate::http::find_link_rel;

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
const APPLICATION_JSON: &str = "application/json";

/// An inbound callback request.
#[derive(Debug, Clone, Default)]
pub struct CallbackRequest {
    pub method: String,
    /// Query string pairs, in order.
    pub params: Vec<(String, String)>,
    /// Header pairs, names lowercased.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl CallbackRequest {
    /// First value of a query parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// First value of a header, matched case-insensitively.
    pub fn header<'a>(&'a self, name: &str) -> Option<&'a str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn is_verification(&self) -> bool {
        self.param("hub.mode").is_some()
    }
}

/// Response to send back to the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackResponse {
    pub status: u16,
    pub body: String,
    pub content_type: &'static str,
}

impl CallbackResponse {
    fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            content_type: TEXT_PLAIN,
        }
    }

    fn json(status: u16, body: serde_json::Value) -> Self {
        Self {
            status,
            body: body.to_string(),
            content_type: APPLICATION_JSON,
        }
    }
}

/// Handles hub callbacks.
pub struct CallbackHandler {
    db: Database,
    clock: Arc<dyn Clock>,
    synchronizer: Arc<FeedSynchronizer>,
    default_lease_secs: i64,
    require_signature: bool,
}

impl CallbackHandler {
    /// Create a handler.
    pub fn new(
        db: Database,
        clock: Arc<dyn Clock>,
        synchronizer: Arc<FeedSynchronizer>,
        config: &WebSubConfig,
    ) -> Self {
        Self {
            db,
            clock,
            synchronizer,
            default_lease_secs: config.default_lease_secs,
            require_signature: config.require_signature,
        }
    }

    /// Handle one callback request. Always produces a response; the request
    /// and the response are appended to the callback log.
    pub async fn handle(&self, request: &CallbackRequest) -> CallbackResponse {
        let (kind, topic, response) = if request.is_verification() {
            let (topic, response) = self.verify(request).await;
            (CallbackKind::Verification, topic, response)
        } else {
            let (topic, response) = self.notify(request).await;
            (CallbackKind::Notification, topic, response)
        };

        self.audit(request, kind, topic, &response).await;
        response
    }

    async fn verify(&self, request: &CallbackRequest) -> (Option<String>, CallbackResponse) {
        let topic = request.param("hub.topic").filter(|t| !t.is_empty());
        let challenge = request.param("hub.challenge").filter(|c| !c.is_empty());

        let (Some(topic), Some(challenge)) = (topic, challenge) else {
            debug!("Verification missing hub.topic or hub.challenge");
            return (
                topic.map(str::to_string),
                CallbackResponse::text(400, "missing hub.topic or hub.challenge"),
            );
        };

        let mode = match request.param("hub.mode").and_then(HubMode::parse) {
            Some(mode) => mode,
            None => {
                let other = request.param("hub.mode");
                debug!(topic = %topic, mode = ?other, "Unsupported verification mode");
                return (
                    Some(topic.to_string()),
                    CallbackResponse::text(400, "unsupported hub.mode"),
                );
            }
        };

        let now = self.clock.now();
        let repo = SubscriptionRepository::new(self.db.pool());
        // Only a request we actually sent can be confirmed.
        let applied = match mode {
            HubMode::Subscribe => {
                let lease = self.granted_lease(request.param("hub.lease_seconds"));
                let expires_at = now + Duration::seconds(lease);
                repo.activate(topic, lease, expires_at, now)
                    .await
                    .map(|sub| sub.is_some())
            }
            HubMode::Unsubscribe => repo.mark_unsubscribed(topic, now).await,
        };

        let response = match applied {
            Ok(true) => {
                info!(topic = %topic, mode = ?mode, "Hub verified subscription change");
                CallbackResponse::text(200, challenge)
            }
            Ok(false) => {
                warn!(topic = %topic, mode = ?mode, "Verification without a matching request");
                CallbackResponse::text(404, "unknown subscription")
            }
            Err(e) => {
                error!(topic = %topic, "Failed to apply verification: {}", e);
                CallbackResponse::text(500, "internal error")
            }
        };
        (Some(topic.to_string()), response)
    }

    /// Lease granted by the hub, falling back to the default when absent or
    /// not a positive integer.
    fn granted_lease(&self, value: Option<&str>) -> i64 {
        value
            .and_then(|v| v.trim().parse::<i64>().ok())
            .filter(|lease| *lease > 0)
            .unwrap_or(self.default_lease_secs)
    }

    async fn notify(&self, request: &CallbackRequest) -> (Option<String>, CallbackResponse) {
        let Some(topic) = resolve_topic(request) else {
            debug!("Notification without a topic");
            return (None, CallbackResponse::text(404, "unknown subscription"));
        };

        let now = self.clock.now();
        let repo = SubscriptionRepository::new(self.db.pool());
        let subscription = match repo.get_by_topic(&topic).await {
            Ok(Some(sub)) if sub.is_live(now) => sub,
            Ok(_) => {
                debug!(topic = %topic, "Notification for inactive subscription");
                return (Some(topic), CallbackResponse::text(404, "unknown subscription"));
            }
            Err(e) => {
                error!(topic = %topic, "Failed to load subscription: {}", e);
                return (Some(topic), CallbackResponse::text(500, "internal error"));
            }
        };

        let signature = verify_signature(
            request.header(SIGNATURE_HEADER),
            &subscription.secret,
            &request.body,
        );
        match signature {
            SignatureCheck::Mismatch => {
                warn!(topic = %topic, "Notification signature mismatch");
                return (Some(topic), CallbackResponse::text(403, "invalid signature"));
            }
            SignatureCheck::Missing if self.require_signature => {
                warn!(topic = %topic, "Unsigned notification rejected");
                return (Some(topic), CallbackResponse::text(403, "signature required"));
            }
            SignatureCheck::Missing | SignatureCheck::Valid => {}
        }

        let response = match self
            .synchronizer
            .sync_pushed(&topic, &request.body, signature)
            .await
        {
            Ok(outcome) if !outcome.is_failure() => {
                if let Err(e) = repo.touch_notified(&topic, self.clock.now()).await {
                    error!(topic = %topic, "Failed to record notification: {}", e);
                }
                CallbackResponse::json(200, status_payload(&outcome))
            }
            Ok(outcome) => CallbackResponse::json(500, status_payload(&outcome)),
            Err(e) => {
                error!(topic = %topic, "Sync after notification failed: {}", e);
                CallbackResponse::json(500, json!({ "status": "error" }))
            }
        };
        (Some(topic), response)
    }

    async fn audit(
        &self,
        request: &CallbackRequest,
        kind: CallbackKind,
        topic: Option<String>,
        response: &CallbackResponse,
    ) {
        let entry = NewCallbackLog::new(kind, request.method.clone())
            .with_topic(topic)
            .with_headers(request.headers.clone())
            .with_params(request.params.clone())
            .with_body(&request.body)
            .with_response(response.status, response.body.clone());

        if let Err(e) = CallbackLogRepository::new(self.db.pool())
            .insert(&entry, self.clock.now())
            .await
        {
            error!("Failed to write callback log: {}", e);
        }
    }
}

/// Topic of a notification: our own `topic` callback parameter, then
/// `hub.topic`, then a `Link: <..>; rel="self"` header.
fn resolve_topic(request: &CallbackRequest) -> Option<String> {
    request
        .param(TOPIC_PARAM)
        .or_else(|| request.param("hub.topic"))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .or_else(|| find_link_rel(request.header_values("link"), "self"))
}

fn status_payload(outcome: &SyncOutcome) -> serde_json::Value {
    match outcome {
        SyncOutcome::Synced(stats) => json!({
            "status": outcome.label(),
            "inserted": stats.inserted,
            "updated": stats.updated,
        }),
        SyncOutcome::Skipped { .. } => json!({ "status": outcome.label() }),
        SyncOutcome::ParseFailed(reason) | SyncOutcome::FetchFailed(reason) => json!({
            "status": outcome.label(),
            "error": reason,
        }),
    }
}
