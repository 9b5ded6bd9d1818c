//! Subscription lifecycle manager.
//!
//! Sends subscribe/unsubscribe requests to hubs and records them. Hubs
//! verify asynchronously by calling back into [`super::callback`], which
//! completes the transition to `active` or `expired`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use reqwest::Client;
use tracing::{debug, info, warn};

use super::discovery::HubDiscoverer;
use super::repository::SubscriptionRepository;
use super::signature::generate_secret;
use super::types::{HubMode, PendingSubscription, Subscription};
use crate::clock::Clock;
use crate::config::{FeedConfig, WebSubConfig};
use crate::db::Database;
use crate::http::UrlPolicy;
use crate::retry::RetryPolicy;
use crate::{PodhubError, Result};

/// Query parameter carrying the topic on the callback URL handed to hubs.
pub const TOPIC_PARAM: &str = "topic";

/// Result of a subscribe call. None of these are errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// A live subscription exists; nothing was sent.
    AlreadyActive,
    /// The hub accepted the request; verification is pending.
    Pending,
    /// No hub could be found for the topic.
    NoHub,
    /// The hub refused or could not be reached.
    Abandoned {
        attempts: u32,
        reason: String,
        transient: bool,
    },
}

/// Result of an unsubscribe call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnsubscribeOutcome {
    /// The hub accepted the request; it will verify by calling back.
    Requested,
    /// There is no subscription for the topic.
    NotSubscribed,
    /// The hub refused or could not be reached.
    Abandoned {
        attempts: u32,
        reason: String,
        transient: bool,
    },
}

/// Failure of a single hub request.
#[derive(Debug, Clone, PartialEq, Eq)]
enum HubRequestError {
    /// Connection failure or timeout.
    Transport(String),
    /// Non-2xx response.
    Status(u16),
}

impl HubRequestError {
    /// Gateway timeouts and overload are worth retrying, other 4xx are not.
    fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status(code) => matches!(code, 408 | 409 | 429) || *code >= 500,
        }
    }
}

impl std::fmt::Display for HubRequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "{}", e),
            Self::Status(code) => write!(f, "hub returned HTTP {}", code),
        }
    }
}

/// Orchestrates subscribe, renew and unsubscribe against hubs.
pub struct SubscriptionManager {
    db: Database,
    client: Client,
    clock: Arc<dyn Clock>,
    discoverer: HubDiscoverer,
    policy: UrlPolicy,
    retry: RetryPolicy,
    callback_url: url::Url,
    requested_lease_secs: i64,
    hub_timeout: Duration,
}

impl SubscriptionManager {
    /// Create a manager.
    pub fn new(
        db: Database,
        client: Client,
        clock: Arc<dyn Clock>,
        websub: &WebSubConfig,
        feed: &FeedConfig,
    ) -> Result<Self> {
        let callback_url = url::Url::parse(&websub.callback_url)
            .map_err(|e| PodhubError::Config(format!("invalid websub.callback_url: {}", e)))?;
        let discoverer = HubDiscoverer::new(client.clone(), websub, feed)?;

        Ok(Self {
            db,
            client,
            clock,
            discoverer,
            policy: UrlPolicy::from_config(feed),
            retry: RetryPolicy::fixed(
                websub.max_attempts,
                Duration::from_secs(websub.retry_delay_secs),
            ),
            callback_url,
            requested_lease_secs: websub.requested_lease_secs,
            hub_timeout: Duration::from_secs(websub.hub_timeout_secs),
        })
    }

    /// The hub discoverer.
    pub fn discoverer(&self) -> &HubDiscoverer {
        &self.discoverer
    }

    /// Callback URL handed to the hub for `topic`.
    pub fn callback_for(&self, topic: &str) -> String {
        let mut url = self.callback_url.clone();
        url.query_pairs_mut().append_pair(TOPIC_PARAM, topic);
        url.to_string()
    }

    /// Subscribe to `topic` at `hub`.
    ///
    /// A no-op when a live subscription already exists.
    pub async fn subscribe(&self, topic: &str, hub: &str) -> Result<SubscribeOutcome> {
        self.request_subscription(topic, hub, false).await
    }

    /// Discover the hub for `topic` and subscribe there.
    pub async fn subscribe_discovered(&self, topic: &str) -> Result<SubscribeOutcome> {
        if self.live_subscription(topic).await?.is_some() {
            return Ok(SubscribeOutcome::AlreadyActive);
        }
        match self.discoverer.discover(topic).await {
            Some(hub) => self.request_subscription(topic, &hub.url, false).await,
            None => {
                info!(topic = %topic, "No hub found, relying on pull sync");
                Ok(SubscribeOutcome::NoHub)
            }
        }
    }

    /// Re-send the subscribe request for an existing subscription, even if
    /// its lease is still live.
    pub async fn renew(&self, topic: &str) -> Result<SubscribeOutcome> {
        let existing = SubscriptionRepository::new(self.db.pool())
            .get_by_topic(topic)
            .await?
            .ok_or_else(|| PodhubError::NotFound("subscription".into()))?;
        self.request_subscription(topic, &existing.hub, true).await
    }

    /// Ask the hub to drop the subscription for `topic`.
    ///
    /// The row flips to `expired` when the hub verifies the unsubscribe.
    pub async fn unsubscribe(&self, topic: &str) -> Result<UnsubscribeOutcome> {
        let Some(existing) = SubscriptionRepository::new(self.db.pool())
            .get_by_topic(topic)
            .await?
        else {
            return Ok(UnsubscribeOutcome::NotSubscribed);
        };

        match self
            .send_with_retry(HubMode::Unsubscribe, topic, &existing.hub, &existing.secret)
            .await
        {
            Ok(()) => {
                SubscriptionRepository::new(self.db.pool())
                    .request_unsubscribe(topic, self.clock.now())
                    .await?;
                info!(topic = %topic, hub = %existing.hub, "Unsubscribe requested");
                Ok(UnsubscribeOutcome::Requested)
            }
            Err((attempts, reason, transient)) => Ok(UnsubscribeOutcome::Abandoned {
                attempts,
                reason,
                transient,
            }),
        }
    }

    async fn live_subscription(&self, topic: &str) -> Result<Option<Subscription>> {
        let now = self.clock.now();
        Ok(SubscriptionRepository::new(self.db.pool())
            .get_by_topic(topic)
            .await?
            .filter(|sub| sub.is_live(now)))
    }

    async fn request_subscription(
        &self,
        topic: &str,
        hub: &str,
        force: bool,
    ) -> Result<SubscribeOutcome> {
        let live = self.live_subscription(topic).await?;
        if live.is_some() && !force {
            debug!(topic = %topic, "Subscription already active");
            return Ok(SubscribeOutcome::AlreadyActive);
        }

        if let Err(e) = self.policy.check(hub) {
            warn!(topic = %topic, hub = %hub, "Refusing hub URL: {}", e);
            return Ok(SubscribeOutcome::Abandoned {
                attempts: 0,
                reason: e.to_string(),
                transient: false,
            });
        }

        // A renewal of a live subscription keeps its secret so notifications
        // signed before the hub re-verifies still authenticate.
        let secret = match live {
            Some(sub) => sub.secret,
            None => generate_secret(),
        };

        if let Err((attempts, reason, transient)) = self
            .send_with_retry(HubMode::Subscribe, topic, hub, &secret)
            .await
        {
            return Ok(SubscribeOutcome::Abandoned {
                attempts,
                reason,
                transient,
            });
        }

        let now = self.clock.now();
        let pending = PendingSubscription {
            topic: topic.to_string(),
            hub: hub.to_string(),
            secret,
            lease_seconds: self.requested_lease_secs,
            expires_at: now + ChronoDuration::seconds(self.requested_lease_secs),
        };
        let sub = SubscriptionRepository::new(self.db.pool())
            .upsert_pending(&pending, now)
            .await?;

        info!(topic = %topic, hub = %hub, status = %sub.status, "Subscribe request accepted");
        Ok(SubscribeOutcome::Pending)
    }

    /// Send one hub request under the retry policy. On failure returns
    /// `(attempts, reason, transient)`.
    async fn send_with_retry(
        &self,
        mode: HubMode,
        topic: &str,
        hub: &str,
        secret: &str,
    ) -> std::result::Result<(), (u32, String, bool)> {
        let operation = format!("{} {}", mode.as_str(), topic);
        self.retry
            .run(
                &operation,
                || self.send_hub_request(mode, topic, hub, secret),
                HubRequestError::is_transient,
            )
            .await
            .map_err(|gave_up| {
                warn!(
                    topic = %topic,
                    hub = %hub,
                    attempts = gave_up.attempts,
                    transient = gave_up.transient,
                    "Hub {} request abandoned: {}",
                    mode.as_str(),
                    gave_up.error
                );
                (gave_up.attempts, gave_up.error.to_string(), gave_up.transient)
            })
    }

    async fn send_hub_request(
        &self,
        mode: HubMode,
        topic: &str,
        hub: &str,
        secret: &str,
    ) -> std::result::Result<(), HubRequestError> {
        let callback = self.callback_for(topic);
        let lease = self.requested_lease_secs.to_string();
        let mut form = vec![
            ("hub.mode", mode.as_str()),
            ("hub.topic", topic),
            ("hub.callback", callback.as_str()),
            ("hub.verify", "async"),
        ];
        if mode == HubMode::Subscribe {
            form.push(("hub.secret", secret));
            form.push(("hub.lease_seconds", lease.as_str()));
        }

        let response = self
            .client
            .post(hub)
            .timeout(self.hub_timeout)
            .form(&form)
            .send()
            .await
            .map_err(|e| HubRequestError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!(topic = %topic, hub = %hub, status = status.as_u16(), "Hub accepted request");
            Ok(())
        } else {
            Err(HubRequestError::Status(status.as_u16()))
        }
    }
}
