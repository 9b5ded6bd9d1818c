//! Podcast and episode repositories.
//!
//! Every write is an idempotent upsert keyed by natural identity: a podcast
//! by its feed URL, an episode by GUID or, lacking one, by enclosure URL.

use chrono::{DateTime, Utc};

use super::types::{Episode, EpisodeCandidate, EpisodeKey, Podcast, PodcastMetadata};
use crate::clock::{format_timestamp, parse_timestamp};
use crate::db::{DbPool, SQL_FALSE, SQL_TRUE};
use crate::{PodhubError, Result};

const PODCAST_COLUMNS: &str = "id, feed_url, title, description, link, language, author, \
     image_url, optimized_image_url, explicit, last_build_at, has_parse_errors, is_dead, \
     error_count, last_error, last_synced_at, created_at, updated_at";

const EPISODE_COLUMNS: &str = "id, podcast_id, guid, enclosure_url, enclosure_type, \
     enclosure_length, title, description, link, duration_secs, explicit, image_url, \
     published_at, created_at, updated_at";

/// Maximum stored length of a podcast's last error message.
const MAX_ERROR_LENGTH: usize = 1000;

/// Row type for a podcast from the database.
#[derive(Debug, Clone, sqlx::FromRow)]
struct PodcastRow {
    id: i64,
    feed_url: String,
    title: Option<String>,
    description: Option<String>,
    link: Option<String>,
    language: Option<String>,
    author: Option<String>,
    image_url: Option<String>,
    optimized_image_url: Option<String>,
    explicit: Option<bool>,
    last_build_at: Option<String>,
    has_parse_errors: bool,
    is_dead: bool,
    error_count: i64,
    last_error: Option<String>,
    last_synced_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl From<PodcastRow> for Podcast {
    fn from(row: PodcastRow) -> Self {
        Podcast {
            id: row.id,
            feed_url: row.feed_url,
            title: row.title,
            description: row.description,
            link: row.link,
            language: row.language,
            author: row.author,
            image_url: row.image_url,
            optimized_image_url: row.optimized_image_url,
            explicit: row.explicit,
            last_build_at: row.last_build_at.and_then(|s| parse_timestamp(&s)),
            has_parse_errors: row.has_parse_errors,
            is_dead: row.is_dead,
            error_count: row.error_count,
            last_error: row.last_error,
            last_synced_at: row.last_synced_at.and_then(|s| parse_timestamp(&s)),
            created_at: parse_timestamp(&row.created_at).unwrap_or_else(Utc::now),
            updated_at: parse_timestamp(&row.updated_at).unwrap_or_else(Utc::now),
        }
    }
}

/// Row type for an episode from the database.
#[derive(Debug, Clone, sqlx::FromRow)]
struct EpisodeRow {
    id: i64,
    podcast_id: i64,
    guid: Option<String>,
    enclosure_url: String,
    enclosure_type: Option<String>,
    enclosure_length: Option<i64>,
    title: Option<String>,
    description: Option<String>,
    link: Option<String>,
    duration_secs: Option<i64>,
    explicit: Option<bool>,
    image_url: Option<String>,
    published_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl From<EpisodeRow> for Episode {
    fn from(row: EpisodeRow) -> Self {
        Episode {
            id: row.id,
            podcast_id: row.podcast_id,
            guid: row.guid,
            enclosure_url: row.enclosure_url,
            enclosure_type: row.enclosure_type,
            enclosure_length: row.enclosure_length,
            title: row.title,
            description: row.description,
            link: row.link,
            duration_secs: row.duration_secs,
            explicit: row.explicit,
            image_url: row.image_url,
            published_at: row.published_at.and_then(|s| parse_timestamp(&s)),
            created_at: parse_timestamp(&row.created_at).unwrap_or_else(Utc::now),
            updated_at: parse_timestamp(&row.updated_at).unwrap_or_else(Utc::now),
        }
    }
}

fn truncate_error(error: &str) -> String {
    if error.len() <= MAX_ERROR_LENGTH {
        return error.to_string();
    }
    let mut end = MAX_ERROR_LENGTH;
    while !error.is_char_boundary(end) {
        end -= 1;
    }
    error[..end].to_string()
}

/// Repository for podcast rows.
pub struct PodcastRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> PodcastRepository<'a> {
    /// Create a new repository instance.
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Get a podcast by ID.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<Podcast>> {
        let query = format!("SELECT {} FROM podcasts WHERE id = $1", PODCAST_COLUMNS);
        let row = sqlx::query_as::<_, PodcastRow>(&query)
            .bind(id)
            .fetch_optional(self.pool)
            .await
            .map_err(|e| PodhubError::Database(e.to_string()))?;

        Ok(row.map(Podcast::from))
    }

    /// Get a podcast by feed URL.
    pub async fn get_by_feed_url(&self, feed_url: &str) -> Result<Option<Podcast>> {
        let query = format!("SELECT {} FROM podcasts WHERE feed_url = $1", PODCAST_COLUMNS);
        let row = sqlx::query_as::<_, PodcastRow>(&query)
            .bind(feed_url)
            .fetch_optional(self.pool)
            .await
            .map_err(|e| PodhubError::Database(e.to_string()))?;

        Ok(row.map(Podcast::from))
    }

    /// Get the podcast for `feed_url`, registering it if unknown.
    pub async fn get_or_create(&self, feed_url: &str, now: DateTime<Utc>) -> Result<Podcast> {
        let now = format_timestamp(&now);
        sqlx::query(
            r#"
            INSERT INTO podcasts (feed_url, created_at, updated_at)
            VALUES ($1, $2, $2)
            ON CONFLICT(feed_url) DO NOTHING
            "#,
        )
        .bind(feed_url)
        .bind(&now)
        .execute(self.pool)
        .await
        .map_err(|e| PodhubError::Database(e.to_string()))?;

        self.get_by_feed_url(feed_url)
            .await?
            .ok_or_else(|| PodhubError::NotFound("podcast".into()))
    }

    /// List podcasts, most recently updated first.
    pub async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Podcast>> {
        let query = format!(
            "SELECT {} FROM podcasts ORDER BY updated_at DESC, id DESC LIMIT $1 OFFSET $2",
            PODCAST_COLUMNS
        );
        let rows = sqlx::query_as::<_, PodcastRow>(&query)
            .bind(limit)
            .bind(offset)
            .fetch_all(self.pool)
            .await
            .map_err(|e| PodhubError::Database(e.to_string()))?;

        Ok(rows.into_iter().map(Podcast::from).collect())
    }

    /// Advance `last_build_at` to `build_at` if it is strictly newer than the
    /// stored value. Returns `false` when an equal or newer build is already
    /// recorded, in which case nothing is written.
    pub async fn claim_build(&self, id: i64, build_at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE podcasts
            SET last_build_at = $1
            WHERE id = $2 AND (last_build_at IS NULL OR last_build_at < $1)
            "#,
        )
        .bind(format_timestamp(&build_at))
        .bind(id)
        .execute(self.pool)
        .await
        .map_err(|e| PodhubError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    /// Write merged feed-level metadata. `optimized_image_url` is not touched.
    ///
    /// With a `build_at`, the write only happens while that build is still
    /// the recorded one; returns `false` if a newer build has been claimed
    /// since.
    pub async fn update_metadata(
        &self,
        id: i64,
        metadata: &PodcastMetadata,
        build_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE podcasts
            SET title = $1, description = $2, link = $3, language = $4, author = $5,
                image_url = $6, explicit = $7, updated_at = $8
            WHERE id = $9 AND ($10 IS NULL OR last_build_at = $10)
            "#,
        )
        .bind(&metadata.title)
        .bind(&metadata.description)
        .bind(&metadata.link)
        .bind(&metadata.language)
        .bind(&metadata.author)
        .bind(&metadata.image_url)
        .bind(metadata.explicit)
        .bind(format_timestamp(&now))
        .bind(id)
        .bind(build_at.map(|at| format_timestamp(&at)))
        .execute(self.pool)
        .await
        .map_err(|e| PodhubError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    /// Record a completed sync: cleared failure state and the sync time. The
    /// build timestamp is written by [`Self::claim_build`].
    pub async fn record_sync_success(&self, id: i64, now: DateTime<Utc>) -> Result<()> {
        let query = format!(
            r#"
            UPDATE podcasts
            SET has_parse_errors = {}, error_count = 0, last_error = NULL,
                last_synced_at = $1, updated_at = $1
            WHERE id = $2
            "#,
            SQL_FALSE
        );
        sqlx::query(&query)
            .bind(format_timestamp(&now))
            .bind(id)
            .execute(self.pool)
            .await
            .map_err(|e| PodhubError::Database(e.to_string()))?;

        Ok(())
    }

    /// Flag a parse failure. Bumps `updated_at` so the feed is not picked up
    /// again on the very next sweep.
    pub async fn record_parse_failure(&self, id: i64, error: &str, now: DateTime<Utc>) -> Result<()> {
        let query = format!(
            r#"
            UPDATE podcasts
            SET has_parse_errors = {}, error_count = error_count + 1, last_error = $1,
                updated_at = $2
            WHERE id = $3
            "#,
            SQL_TRUE
        );
        sqlx::query(&query)
            .bind(truncate_error(error))
            .bind(format_timestamp(&now))
            .bind(id)
            .execute(self.pool)
            .await
            .map_err(|e| PodhubError::Database(e.to_string()))?;

        Ok(())
    }

    /// Record a failed download.
    pub async fn record_fetch_failure(&self, id: i64, error: &str, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE podcasts
            SET error_count = error_count + 1, last_error = $1, updated_at = $2
            WHERE id = $3
            "#,
        )
        .bind(truncate_error(error))
        .bind(format_timestamp(&now))
        .bind(id)
        .execute(self.pool)
        .await
        .map_err(|e| PodhubError::Database(e.to_string()))?;

        Ok(())
    }

    /// Note that the feed was checked and had nothing new.
    pub async fn mark_checked(&self, id: i64, now: DateTime<Utc>) -> Result<()> {
        let now = format_timestamp(&now);
        sqlx::query("UPDATE podcasts SET last_synced_at = $1, updated_at = $1 WHERE id = $2")
            .bind(&now)
            .bind(id)
            .execute(self.pool)
            .await
            .map_err(|e| PodhubError::Database(e.to_string()))?;

        Ok(())
    }

    /// Set the dead/alive flag. Returns false if the podcast does not exist.
    pub async fn set_dead(&self, id: i64, is_dead: bool, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query("UPDATE podcasts SET is_dead = $1, updated_at = $2 WHERE id = $3")
            .bind(is_dead)
            .bind(format_timestamp(&now))
            .bind(id)
            .execute(self.pool)
            .await
            .map_err(|e| PodhubError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    /// Podcasts due for a pull sync: alive, untouched since `cutoff`, and
    /// without an active subscription that was notified since `cutoff`.
    /// Least recently updated first.
    pub async fn list_stale(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<Vec<Podcast>> {
        let query = format!(
            r#"
            SELECT {}
            FROM podcasts
            WHERE is_dead = {}
              AND updated_at < $1
              AND NOT EXISTS (
                  SELECT 1 FROM subscriptions s
                  WHERE s.topic = podcasts.feed_url
                    AND s.status = 'active'
                    AND s.last_notified_at >= $1
              )
            ORDER BY updated_at ASC
            LIMIT $2
            "#,
            PODCAST_COLUMNS, SQL_FALSE
        );
        let rows = sqlx::query_as::<_, PodcastRow>(&query)
            .bind(format_timestamp(&cutoff))
            .bind(limit)
            .fetch_all(self.pool)
            .await
            .map_err(|e| PodhubError::Database(e.to_string()))?;

        Ok(rows.into_iter().map(Podcast::from).collect())
    }
}

/// Whether an episode upsert created or updated a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertResult {
    Inserted,
    Updated,
}

/// Repository for episode rows.
pub struct EpisodeRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> EpisodeRepository<'a> {
    /// Create a new repository instance.
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// List a podcast's episodes, newest first.
    pub async fn list_by_podcast(&self, podcast_id: i64, limit: i64) -> Result<Vec<Episode>> {
        let query = format!(
            r#"
            SELECT {}
            FROM episodes
            WHERE podcast_id = $1
            ORDER BY published_at DESC, id DESC
            LIMIT $2
            "#,
            EPISODE_COLUMNS
        );
        let rows = sqlx::query_as::<_, EpisodeRow>(&query)
            .bind(podcast_id)
            .bind(limit)
            .fetch_all(self.pool)
            .await
            .map_err(|e| PodhubError::Database(e.to_string()))?;

        Ok(rows.into_iter().map(Episode::from).collect())
    }

    /// Count a podcast's episodes.
    pub async fn count_by_podcast(&self, podcast_id: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM episodes WHERE podcast_id = $1")
            .bind(podcast_id)
            .fetch_one(self.pool)
            .await
            .map_err(|e| PodhubError::Database(e.to_string()))?;

        Ok(count)
    }

    /// Most recent publish date among a podcast's episodes.
    pub async fn latest_published_at(&self, podcast_id: i64) -> Result<Option<DateTime<Utc>>> {
        let latest: Option<String> =
            sqlx::query_scalar("SELECT MAX(published_at) FROM episodes WHERE podcast_id = $1")
                .bind(podcast_id)
                .fetch_one(self.pool)
                .await
                .map_err(|e| PodhubError::Database(e.to_string()))?;

        Ok(latest.and_then(|s| parse_timestamp(&s)))
    }

    /// Whether an episode with this identity is stored.
    pub async fn key_exists(&self, podcast_id: i64, key: &EpisodeKey) -> Result<bool> {
        let (sql, value) = match key {
            EpisodeKey::Guid(guid) => (
                "SELECT EXISTS(SELECT 1 FROM episodes WHERE podcast_id = $1 AND guid = $2)",
                guid,
            ),
            EpisodeKey::Enclosure(url) => (
                "SELECT EXISTS(SELECT 1 FROM episodes WHERE podcast_id = $1 AND enclosure_url = $2)",
                url,
            ),
        };
        let exists: bool = sqlx::query_scalar(sql)
            .bind(podcast_id)
            .bind(value)
            .fetch_one(self.pool)
            .await
            .map_err(|e| PodhubError::Database(e.to_string()))?;

        Ok(exists)
    }

    async fn get_by_guid(&self, podcast_id: i64, guid: &str) -> Result<Option<Episode>> {
        let query = format!(
            "SELECT {} FROM episodes WHERE podcast_id = $1 AND guid = $2",
            EPISODE_COLUMNS
        );
        let row = sqlx::query_as::<_, EpisodeRow>(&query)
            .bind(podcast_id)
            .bind(guid)
            .fetch_optional(self.pool)
            .await
            .map_err(|e| PodhubError::Database(e.to_string()))?;

        Ok(row.map(Episode::from))
    }

    /// Find by enclosure URL, preferring a GUID-less row.
    async fn get_by_enclosure(&self, podcast_id: i64, enclosure_url: &str) -> Result<Option<Episode>> {
        let query = format!(
            r#"
            SELECT {}
            FROM episodes
            WHERE podcast_id = $1 AND enclosure_url = $2
            ORDER BY guid IS NULL DESC, id ASC
            LIMIT 1
            "#,
            EPISODE_COLUMNS
        );
        let row = sqlx::query_as::<_, EpisodeRow>(&query)
            .bind(podcast_id)
            .bind(enclosure_url)
            .fetch_optional(self.pool)
            .await
            .map_err(|e| PodhubError::Database(e.to_string()))?;

        Ok(row.map(Episode::from))
    }

    /// Upsert an episode that has a GUID.
    ///
    /// A GUID-less row with the same enclosure is adopted first, so an item
    /// that gains a GUID keeps its row instead of getting a second one.
    pub async fn upsert_with_guid(
        &self,
        podcast_id: i64,
        candidate: &EpisodeCandidate,
        now: DateTime<Utc>,
    ) -> Result<UpsertResult> {
        let Some(guid) = candidate.guid.as_deref() else {
            return Err(PodhubError::Validation("episode has no GUID".into()));
        };

        sqlx::query(
            r#"
            UPDATE episodes
            SET guid = $1, updated_at = $2
            WHERE id = (
                SELECT id FROM episodes
                WHERE podcast_id = $3 AND guid IS NULL AND enclosure_url = $4
                LIMIT 1
            )
            AND NOT EXISTS (SELECT 1 FROM episodes WHERE podcast_id = $3 AND guid = $1)
            "#,
        )
        .bind(guid)
        .bind(format_timestamp(&now))
        .bind(podcast_id)
        .bind(&candidate.enclosure_url)
        .execute(self.pool)
        .await
        .map_err(|e| PodhubError::Database(e.to_string()))?;

        let inserted: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO episodes
                (podcast_id, guid, enclosure_url, enclosure_type, enclosure_length, title,
                 description, link, duration_secs, explicit, image_url, published_at,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $13)
            ON CONFLICT(podcast_id, guid) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(podcast_id)
        .bind(guid)
        .bind(&candidate.enclosure_url)
        .bind(&candidate.enclosure_type)
        .bind(candidate.enclosure_length)
        .bind(&candidate.title)
        .bind(&candidate.description)
        .bind(&candidate.link)
        .bind(candidate.duration_secs)
        .bind(candidate.explicit)
        .bind(&candidate.image_url)
        .bind(candidate.published_at.map(|at| format_timestamp(&at)))
        .bind(format_timestamp(&now))
        .fetch_optional(self.pool)
        .await
        .map_err(|e| PodhubError::Database(e.to_string()))?;

        if inserted.is_some() {
            return Ok(UpsertResult::Inserted);
        }

        let existing = self
            .get_by_guid(podcast_id, guid)
            .await?
            .ok_or_else(|| PodhubError::NotFound("episode".into()))?;
        self.update_merged(&existing, candidate, now).await?;
        Ok(UpsertResult::Updated)
    }

    /// Upsert an episode without a GUID, keyed by its enclosure URL.
    pub async fn upsert_without_guid(
        &self,
        podcast_id: i64,
        candidate: &EpisodeCandidate,
        now: DateTime<Utc>,
    ) -> Result<UpsertResult> {
        if let Some(existing) = self
            .get_by_enclosure(podcast_id, &candidate.enclosure_url)
            .await?
        {
            self.update_merged(&existing, candidate, now).await?;
            return Ok(UpsertResult::Updated);
        }

        let inserted: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO episodes
                (podcast_id, guid, enclosure_url, enclosure_type, enclosure_length, title,
                 description, link, duration_secs, explicit, image_url, published_at,
                 created_at, updated_at)
            VALUES ($1, NULL, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $12)
            ON CONFLICT(podcast_id, enclosure_url) WHERE guid IS NULL DO NOTHING
            RETURNING id
            "#,
        )
        .bind(podcast_id)
        .bind(&candidate.enclosure_url)
        .bind(&candidate.enclosure_type)
        .bind(candidate.enclosure_length)
        .bind(&candidate.title)
        .bind(&candidate.description)
        .bind(&candidate.link)
        .bind(candidate.duration_secs)
        .bind(candidate.explicit)
        .bind(&candidate.image_url)
        .bind(candidate.published_at.map(|at| format_timestamp(&at)))
        .bind(format_timestamp(&now))
        .fetch_optional(self.pool)
        .await
        .map_err(|e| PodhubError::Database(e.to_string()))?;

        if inserted.is_some() {
            return Ok(UpsertResult::Inserted);
        }

        // Lost a race with a concurrent insert of the same enclosure.
        let existing = self
            .get_by_enclosure(podcast_id, &candidate.enclosure_url)
            .await?
            .ok_or_else(|| PodhubError::NotFound("episode".into()))?;
        self.update_merged(&existing, candidate, now).await?;
        Ok(UpsertResult::Updated)
    }

    async fn update_merged(
        &self,
        existing: &Episode,
        candidate: &EpisodeCandidate,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let merged = candidate.merged_over(existing);
        sqlx::query(
            r#"
            UPDATE episodes
            SET guid = $1, enclosure_url = $2, enclosure_type = $3, enclosure_length = $4,
                title = $5, description = $6, link = $7, duration_secs = $8, explicit = $9,
                image_url = $10, published_at = $11, updated_at = $12
            WHERE id = $13
            "#,
        )
        .bind(&merged.guid)
        .bind(&merged.enclosure_url)
        .bind(&merged.enclosure_type)
        .bind(merged.enclosure_length)
        .bind(&merged.title)
        .bind(&merged.description)
        .bind(&merged.link)
        .bind(merged.duration_secs)
        .bind(merged.explicit)
        .bind(&merged.image_url)
        .bind(merged.published_at.map(|at| format_timestamp(&at)))
        .bind(format_timestamp(&now))
        .bind(existing.id)
        .execute(self.pool)
        .await
        .map_err(|e| PodhubError::Database(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use chrono::{Duration, TimeZone};

    const FEED: &str = "https://example.com/feed.xml";

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap()
    }

    async fn setup() -> (Database, i64) {
        let db = Database::open_in_memory().await.unwrap();
        let podcast = PodcastRepository::new(db.pool())
            .get_or_create(FEED, t0())
            .await
            .unwrap();
        (db, podcast.id)
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let (db, id) = setup().await;
        let repo = PodcastRepository::new(db.pool());
        let again = repo.get_or_create(FEED, t0() + Duration::hours(1)).await.unwrap();
        assert_eq!(again.id, id);
        assert_eq!(again.created_at, t0());
        assert_eq!(repo.list(10, 0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_metadata_preserves_optimized_image() {
        let (db, id) = setup().await;
        sqlx::query("UPDATE podcasts SET optimized_image_url = 'https://cdn.example.com/a.webp'")
            .execute(db.pool())
            .await
            .unwrap();

        let repo = PodcastRepository::new(db.pool());
        let metadata = PodcastMetadata {
            title: Some("Show".into()),
            image_url: Some("https://example.com/new.jpg".into()),
            ..PodcastMetadata::default()
        };
        assert!(repo.update_metadata(id, &metadata, None, t0()).await.unwrap());

        let podcast = repo.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(podcast.title.as_deref(), Some("Show"));
        assert_eq!(podcast.image_url.as_deref(), Some("https://example.com/new.jpg"));
        assert_eq!(
            podcast.optimized_image_url.as_deref(),
            Some("https://cdn.example.com/a.webp")
        );
    }

    #[tokio::test]
    async fn test_failure_bookkeeping() {
        let (db, id) = setup().await;
        let repo = PodcastRepository::new(db.pool());

        repo.record_parse_failure(id, "bad xml", t0() + Duration::minutes(1))
            .await
            .unwrap();
        repo.record_fetch_failure(id, "HTTP error: 500", t0() + Duration::minutes(2))
            .await
            .unwrap();
        let podcast = repo.get_by_id(id).await.unwrap().unwrap();
        assert!(podcast.has_parse_errors);
        assert_eq!(podcast.error_count, 2);
        assert_eq!(podcast.last_error.as_deref(), Some("HTTP error: 500"));
        assert_eq!(podcast.updated_at, t0() + Duration::minutes(2));

        repo.record_sync_success(id, t0() + Duration::minutes(3))
            .await
            .unwrap();
        let podcast = repo.get_by_id(id).await.unwrap().unwrap();
        assert!(!podcast.has_parse_errors);
        assert_eq!(podcast.error_count, 0);
        assert!(podcast.last_error.is_none());
        assert_eq!(podcast.last_synced_at, Some(t0() + Duration::minutes(3)));
    }

    #[tokio::test]
    async fn test_claim_build_only_moves_forward() {
        let (db, id) = setup().await;
        let repo = PodcastRepository::new(db.pool());
        let b1 = t0() - Duration::days(2);
        let b2 = t0() - Duration::days(1);

        assert!(repo.claim_build(id, b2).await.unwrap());
        assert!(!repo.claim_build(id, b2).await.unwrap());
        assert!(!repo.claim_build(id, b1).await.unwrap());
        let podcast = repo.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(podcast.last_build_at, Some(b2));
        // The claim alone does not count as an update for the stale sweep.
        assert_eq!(podcast.updated_at, t0());
    }

    #[tokio::test]
    async fn test_update_metadata_requires_current_build() {
        let (db, id) = setup().await;
        let repo = PodcastRepository::new(db.pool());
        let b1 = t0() - Duration::days(2);
        let b2 = t0() - Duration::days(1);
        assert!(repo.claim_build(id, b1).await.unwrap());
        assert!(repo.claim_build(id, b2).await.unwrap());

        let stale = PodcastMetadata {
            title: Some("Old".into()),
            ..PodcastMetadata::default()
        };
        assert!(!repo.update_metadata(id, &stale, Some(b1), t0()).await.unwrap());
        let current = PodcastMetadata {
            title: Some("New".into()),
            ..PodcastMetadata::default()
        };
        assert!(repo.update_metadata(id, &current, Some(b2), t0()).await.unwrap());

        let podcast = repo.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(podcast.title.as_deref(), Some("New"));
    }

    #[tokio::test]
    async fn test_list_stale_excludes_dead_and_recently_pushed() {
        let (db, id) = setup().await;
        let repo = PodcastRepository::new(db.pool());
        let cutoff = t0() + Duration::hours(6);

        assert_eq!(repo.list_stale(cutoff, 10).await.unwrap().len(), 1);

        sqlx::query(
            "INSERT INTO subscriptions (topic, hub, secret, lease_seconds, status, last_notified_at, created_at, updated_at)
             VALUES ($1, 'https://hub.example.com/', 's', 60, 'active', $2, $2, $2)",
        )
        .bind(FEED)
        .bind(format_timestamp(&(cutoff + Duration::minutes(1))))
        .execute(db.pool())
        .await
        .unwrap();
        assert!(repo.list_stale(cutoff, 10).await.unwrap().is_empty());

        sqlx::query("DELETE FROM subscriptions")
            .execute(db.pool())
            .await
            .unwrap();
        assert!(repo.set_dead(id, true, t0()).await.unwrap());
        assert!(repo.list_stale(cutoff, 10).await.unwrap().is_empty());
        assert!(!repo.set_dead(9999, true, t0()).await.unwrap());
    }

    #[tokio::test]
    async fn test_upsert_with_guid_inserts_then_updates() {
        let (db, podcast_id) = setup().await;
        let repo = EpisodeRepository::new(db.pool());

        let candidate = EpisodeCandidate::new("https://cdn.example.com/1.mp3")
            .with_guid("ep-1")
            .with_title("First");
        assert_eq!(
            repo.upsert_with_guid(podcast_id, &candidate, t0()).await.unwrap(),
            UpsertResult::Inserted
        );

        let renamed = EpisodeCandidate::new("https://cdn.example.com/1.mp3")
            .with_guid("ep-1")
            .with_title("First (remastered)");
        assert_eq!(
            repo.upsert_with_guid(podcast_id, &renamed, t0()).await.unwrap(),
            UpsertResult::Updated
        );

        let episodes = repo.list_by_podcast(podcast_id, 10).await.unwrap();
        assert_eq!(episodes.len(), 1);
        assert_eq!(episodes[0].title.as_deref(), Some("First (remastered)"));
    }

    #[tokio::test]
    async fn test_guidless_row_adopted_when_guid_appears() {
        let (db, podcast_id) = setup().await;
        let repo = EpisodeRepository::new(db.pool());

        let without = EpisodeCandidate::new("https://cdn.example.com/1.mp3").with_title("One");
        assert_eq!(
            repo.upsert_without_guid(podcast_id, &without, t0()).await.unwrap(),
            UpsertResult::Inserted
        );

        let with = EpisodeCandidate::new("https://cdn.example.com/1.mp3").with_guid("ep-1");
        assert_eq!(
            repo.upsert_with_guid(podcast_id, &with, t0()).await.unwrap(),
            UpsertResult::Updated
        );

        let episodes = repo.list_by_podcast(podcast_id, 10).await.unwrap();
        assert_eq!(episodes.len(), 1);
        assert_eq!(episodes[0].guid.as_deref(), Some("ep-1"));
        assert_eq!(episodes[0].title.as_deref(), Some("One"));
    }

    #[tokio::test]
    async fn test_upsert_without_guid_matches_enclosure() {
        let (db, podcast_id) = setup().await;
        let repo = EpisodeRepository::new(db.pool());

        let candidate = EpisodeCandidate::new("https://cdn.example.com/1.mp3");
        repo.upsert_without_guid(podcast_id, &candidate, t0()).await.unwrap();
        assert_eq!(
            repo.upsert_without_guid(podcast_id, &candidate, t0()).await.unwrap(),
            UpsertResult::Updated
        );
        assert_eq!(repo.count_by_podcast(podcast_id).await.unwrap(), 1);

        let key = candidate.key();
        assert!(repo.key_exists(podcast_id, &key).await.unwrap());
        assert!(!repo
            .key_exists(podcast_id, &EpisodeKey::Guid("nope".into()))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_latest_published_at() {
        let (db, podcast_id) = setup().await;
        let repo = EpisodeRepository::new(db.pool());
        assert_eq!(repo.latest_published_at(podcast_id).await.unwrap(), None);

        for (guid, days) in [("a", 1), ("b", 3), ("c", 2)] {
            let candidate = EpisodeCandidate::new(format!("https://cdn.example.com/{guid}.mp3"))
                .with_guid(guid)
                .with_published_at(t0() - Duration::days(days));
            repo.upsert_with_guid(podcast_id, &candidate, t0()).await.unwrap();
        }
        assert_eq!(
            repo.latest_published_at(podcast_id).await.unwrap(),
            Some(t0() - Duration::days(1))
        );
    }

    #[test]
    fn test_truncate_error() {
        assert_eq!(truncate_error("short"), "short");
        let long = "é".repeat(MAX_ERROR_LENGTH);
        let truncated = truncate_error(&long);
        assert!(truncated.len() <= MAX_ERROR_LENGTH);
        assert!(truncated.chars().all(|c| c == 'é'));
    }
}
