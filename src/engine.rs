//! Service wiring.
//!
//! [`Engine`] is built once at startup and owns every component, sharing
//! one database pool, one HTTP client and one clock between them.

use std::sync::Arc;

use reqwest::Client;
use serde::Serialize;
use tracing::info;

use crate::clock::Clock;
use crate::config::Config;
use crate::db::Database;
use crate::feed::fetcher::FeedFetcher;
use crate::feed::repository::PodcastRepository;
use crate::feed::sync::{FeedSynchronizer, SyncOutcome};
use crate::feed::types::Podcast;
use crate::http::UrlPolicy;
use crate::scheduler::ReconciliationScheduler;
use crate::websub::callback::CallbackHandler;
use crate::websub::manager::{SubscribeOutcome, SubscriptionManager};
use crate::Result;

/// Result of registering a feed.
#[derive(Debug, Clone)]
pub struct AddedFeed {
    pub podcast: Podcast,
    pub sync: SyncOutcome,
    pub subscription: SubscribeOutcome,
}

/// Summary of a feed registration for API responses.
#[derive(Debug, Clone, Serialize)]
pub struct AddedFeedSummary {
    pub podcast_id: i64,
    pub feed_url: String,
    pub sync: &'static str,
    pub subscription: &'static str,
}

impl From<&AddedFeed> for AddedFeedSummary {
    fn from(added: &AddedFeed) -> Self {
        Self {
            podcast_id: added.podcast.id,
            feed_url: added.podcast.feed_url.clone(),
            sync: added.sync.label(),
            subscription: subscribe_label(&added.subscription),
        }
    }
}

/// Short label for a subscribe outcome.
pub fn subscribe_label(outcome: &SubscribeOutcome) -> &'static str {
    match outcome {
        SubscribeOutcome::AlreadyActive => "already_active",
        SubscribeOutcome::Pending => "pending",
        SubscribeOutcome::NoHub => "no_hub",
        SubscribeOutcome::Abandoned { .. } => "abandoned",
    }
}

/// The podhub engine.
pub struct Engine {
    db: Database,
    clock: Arc<dyn Clock>,
    policy: UrlPolicy,
    manager: Arc<SubscriptionManager>,
    synchronizer: Arc<FeedSynchronizer>,
    callbacks: Arc<CallbackHandler>,
    scheduler: Arc<ReconciliationScheduler>,
}

impl Engine {
    /// Wire up all components.
    pub fn new(config: &Config, db: Database, client: Client, clock: Arc<dyn Clock>) -> Result<Self> {
        let manager = Arc::new(SubscriptionManager::new(
            db.clone(),
            client.clone(),
            clock.clone(),
            &config.websub,
            &config.feed,
        )?);
        let synchronizer = Arc::new(FeedSynchronizer::new(
            db.clone(),
            clock.clone(),
            FeedFetcher::new(client, &config.feed),
        ));
        let callbacks = Arc::new(CallbackHandler::new(
            db.clone(),
            clock.clone(),
            synchronizer.clone(),
            &config.websub,
        ));
        let scheduler = Arc::new(ReconciliationScheduler::new(
            db.clone(),
            clock.clone(),
            manager.clone(),
            synchronizer.clone(),
            config.scheduler.clone(),
            config.feed.max_concurrent_fetches,
        ));

        Ok(Self {
            db,
            clock,
            policy: UrlPolicy::from_config(&config.feed),
            manager,
            synchronizer,
            callbacks,
            scheduler,
        })
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn manager(&self) -> &Arc<SubscriptionManager> {
        &self.manager
    }

    pub fn synchronizer(&self) -> &Arc<FeedSynchronizer> {
        &self.synchronizer
    }

    pub fn callbacks(&self) -> &Arc<CallbackHandler> {
        &self.callbacks
    }

    pub fn scheduler(&self) -> &Arc<ReconciliationScheduler> {
        &self.scheduler
    }

    /// Register a feed: create its podcast row, sync it once, then discover
    /// its hub and subscribe.
    ///
    /// A failed first sync does not prevent the subscription.
    pub async fn add_feed(&self, feed_url: &str) -> Result<AddedFeed> {
        let url = self.policy.check(feed_url)?;
        let topic = url.as_str();

        PodcastRepository::new(self.db.pool())
            .get_or_create(topic, self.clock.now())
            .await?;
        let sync = self.synchronizer.sync_topic(topic).await?;
        let subscription = self.manager.subscribe_discovered(topic).await?;

        let podcast = PodcastRepository::new(self.db.pool())
            .get_by_feed_url(topic)
            .await?
            .ok_or_else(|| crate::PodhubError::NotFound("podcast".into()))?;

        info!(
            topic = %topic,
            sync = sync.label(),
            subscription = subscribe_label(&subscription),
            "Feed registered"
        );
        Ok(AddedFeed {
            podcast,
            sync,
            subscription,
        })
    }
}
