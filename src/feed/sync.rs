//! Feed synchronizer.
//!
//! Turns a feed document into idempotent writes against the content store.
//! Repeated or out-of-order documents are absorbed by the build timestamp
//! guard; episode identity (GUID, else enclosure URL) keeps rows unique.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::fetcher::{parse_feed, FeedFetcher};
use super::repository::{EpisodeRepository, PodcastRepository, UpsertResult};
use super::types::{EpisodeCandidate, ParsedFeed, Podcast};
use crate::clock::Clock;
use crate::db::Database;
use crate::websub::signature::SignatureCheck;
use crate::Result;

/// Counters for one sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub inserted: usize,
    pub updated: usize,
    /// Already-stored items not newer than the latest stored episode.
    pub unchanged: usize,
    /// Later occurrences of a key seen earlier in the same document.
    pub duplicates: usize,
    pub without_enclosure: usize,
}

/// Result of a sync run. Storage failures are returned as `Err` instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The document was applied.
    Synced(SyncStats),
    /// The document is not newer than the last one applied.
    Skipped {
        last_build_at: DateTime<Utc>,
        document_build_at: DateTime<Utc>,
    },
    /// The document could not be parsed; the podcast is flagged.
    ParseFailed(String),
    /// The document could not be downloaded.
    FetchFailed(String),
}

impl SyncOutcome {
    /// Short label for logs and status payloads.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Synced(_) => "synced",
            Self::Skipped { .. } => "skipped",
            Self::ParseFailed(_) => "parse_failed",
            Self::FetchFailed(_) => "fetch_failed",
        }
    }

    /// Whether the run ended in a failure recorded against the podcast.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::ParseFailed(_) | Self::FetchFailed(_))
    }
}

/// Feed synchronizer.
pub struct FeedSynchronizer {
    db: Database,
    clock: Arc<dyn Clock>,
    fetcher: FeedFetcher,
}

impl FeedSynchronizer {
    /// Create a synchronizer.
    pub fn new(db: Database, clock: Arc<dyn Clock>, fetcher: FeedFetcher) -> Self {
        Self { db, clock, fetcher }
    }

    /// Fetch the topic and apply it.
    pub async fn sync_topic(&self, topic: &str) -> Result<SyncOutcome> {
        let podcast = PodcastRepository::new(self.db.pool())
            .get_or_create(topic, self.clock.now())
            .await?;
        self.fetch_and_apply(&podcast).await
    }

    /// Apply a document that is already in hand.
    pub async fn sync_document(&self, topic: &str, document: &[u8]) -> Result<SyncOutcome> {
        let podcast = PodcastRepository::new(self.db.pool())
            .get_or_create(topic, self.clock.now())
            .await?;
        self.parse_and_apply(&podcast, document).await
    }

    /// Apply a pushed notification body.
    ///
    /// Only a body whose signature checked out is applied directly. Unsigned,
    /// empty or unparseable bodies fall back to fetching the topic.
    pub async fn sync_pushed(
        &self,
        topic: &str,
        body: &[u8],
        signature: SignatureCheck,
    ) -> Result<SyncOutcome> {
        let podcast = PodcastRepository::new(self.db.pool())
            .get_or_create(topic, self.clock.now())
            .await?;

        if signature != SignatureCheck::Valid {
            debug!(topic = %topic, ?signature, "Pushed body not authenticated, fetching");
        } else if !body.iter().all(u8::is_ascii_whitespace) {
            match parse_feed(body) {
                Ok(parsed) => return self.apply(&podcast, parsed).await,
                Err(e) => debug!(topic = %topic, "Pushed body is not a feed, fetching: {}", e),
            }
        }
        self.fetch_and_apply(&podcast).await
    }

    async fn fetch_and_apply(&self, podcast: &Podcast) -> Result<SyncOutcome> {
        match self.fetcher.fetch(&podcast.feed_url).await {
            Ok(document) => self.parse_and_apply(podcast, &document).await,
            Err(e) => {
                let reason = e.to_string();
                warn!(topic = %podcast.feed_url, "Feed fetch failed: {}", reason);
                PodcastRepository::new(self.db.pool())
                    .record_fetch_failure(podcast.id, &reason, self.clock.now())
                    .await?;
                Ok(SyncOutcome::FetchFailed(reason))
            }
        }
    }

    async fn parse_and_apply(&self, podcast: &Podcast, document: &[u8]) -> Result<SyncOutcome> {
        match parse_feed(document) {
            Ok(parsed) => self.apply(podcast, parsed).await,
            Err(e) => {
                let reason = e.to_string();
                warn!(topic = %podcast.feed_url, "Feed parse failed: {}", reason);
                PodcastRepository::new(self.db.pool())
                    .record_parse_failure(podcast.id, &reason, self.clock.now())
                    .await?;
                Ok(SyncOutcome::ParseFailed(reason))
            }
        }
    }

    async fn apply(&self, podcast: &Podcast, parsed: ParsedFeed) -> Result<SyncOutcome> {
        let now = self.clock.now();
        let podcasts = PodcastRepository::new(self.db.pool());
        let episodes = EpisodeRepository::new(self.db.pool());

        // `podcast` may be stale; the claim is checked against the stored row.
        if let Some(document_build_at) = parsed.build_at {
            if !podcasts.claim_build(podcast.id, document_build_at).await? {
                return self.skipped(podcast, document_build_at).await;
            }
        }

        let merged = parsed.metadata.merged_over(podcast);
        if !podcasts
            .update_metadata(podcast.id, &merged, parsed.build_at, now)
            .await?
        {
            if let Some(document_build_at) = parsed.build_at {
                return self.skipped(podcast, document_build_at).await;
            }
        }

        let mut stats = SyncStats {
            without_enclosure: parsed.items_without_enclosure,
            ..SyncStats::default()
        };

        let latest_known = episodes.latest_published_at(podcast.id).await?;
        let mut fresh = Vec::with_capacity(parsed.episodes.len());
        for candidate in parsed.episodes {
            let is_old = match (latest_known, candidate.published_at) {
                (Some(latest), Some(published)) => published <= latest,
                // Undated items are never dropped.
                _ => false,
            };
            if is_old && episodes.key_exists(podcast.id, &candidate.key()).await? {
                stats.unchanged += 1;
                continue;
            }
            fresh.push(candidate);
        }

        let (unique, duplicates) = dedup_by_key(fresh);
        stats.duplicates = duplicates;

        let (with_guid, without_guid): (Vec<_>, Vec<_>) =
            unique.into_iter().partition(|c| c.guid.is_some());

        for candidate in &with_guid {
            let result = episodes.upsert_with_guid(podcast.id, candidate, now).await?;
            count(&mut stats, result);
        }
        for candidate in &without_guid {
            let result = episodes.upsert_without_guid(podcast.id, candidate, now).await?;
            count(&mut stats, result);
        }

        podcasts.record_sync_success(podcast.id, now).await?;

        if stats.inserted > 0 {
            info!(
                topic = %podcast.feed_url,
                inserted = stats.inserted,
                updated = stats.updated,
                "Feed synced"
            );
        } else {
            debug!(topic = %podcast.feed_url, updated = stats.updated, "Feed synced, no new episodes");
        }

        Ok(SyncOutcome::Synced(stats))
    }

    async fn skipped(&self, podcast: &Podcast, document_build_at: DateTime<Utc>) -> Result<SyncOutcome> {
        let last_build_at = PodcastRepository::new(self.db.pool())
            .get_by_id(podcast.id)
            .await?
            .and_then(|p| p.last_build_at)
            .unwrap_or(document_build_at);
        debug!(
            topic = %podcast.feed_url,
            %last_build_at,
            %document_build_at,
            "Feed not newer than last sync, skipping"
        );
        Ok(SyncOutcome::Skipped {
            last_build_at,
            document_build_at,
        })
    }
}

fn count(stats: &mut SyncStats, result: UpsertResult) {
    match result {
        UpsertResult::Inserted => stats.inserted += 1,
        UpsertResult::Updated => stats.updated += 1,
    }
}

/// Keep the first candidate for each identity key. Returns the survivors in
/// document order and the number dropped.
pub fn dedup_by_key(candidates: Vec<EpisodeCandidate>) -> (Vec<EpisodeCandidate>, usize) {
    let mut seen = HashSet::with_capacity(candidates.len());
    let total = candidates.len();
    let unique: Vec<_> = candidates
        .into_iter()
        .filter(|c| seen.insert(c.key()))
        .collect();
    let dropped = total - unique.len();
    (unique, dropped)
}
