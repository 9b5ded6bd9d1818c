//! Podcast and episode types.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A podcast feed in the content store.
#[derive(Debug, Clone, Serialize)]
pub struct Podcast {
    pub id: i64,
    pub feed_url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub link: Option<String>,
    pub language: Option<String>,
    pub author: Option<String>,
    pub image_url: Option<String>,
    /// Written by the image pipeline, never by sync.
    pub optimized_image_url: Option<String>,
    pub explicit: Option<bool>,
    /// Build/publish timestamp declared by the feed at the last sync.
    pub last_build_at: Option<DateTime<Utc>>,
    pub has_parse_errors: bool,
    pub is_dead: bool,
    pub error_count: i64,
    pub last_error: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Feed-level metadata read from a document. `None` means the document
/// carried no usable value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodcastMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub link: Option<String>,
    pub language: Option<String>,
    pub author: Option<String>,
    pub image_url: Option<String>,
    pub explicit: Option<bool>,
}

/// Field-wise conditional merge: a fresh value replaces, an absent one keeps.
pub fn merge_field<T>(current: Option<T>, fresh: Option<T>) -> Option<T> {
    fresh.or(current)
}

impl PodcastMetadata {
    /// Merge fresh values over what is stored for `podcast`.
    pub fn merged_over(&self, podcast: &Podcast) -> PodcastMetadata {
        PodcastMetadata {
            title: merge_field(podcast.title.clone(), self.title.clone()),
            description: merge_field(podcast.description.clone(), self.description.clone()),
            link: merge_field(podcast.link.clone(), self.link.clone()),
            language: merge_field(podcast.language.clone(), self.language.clone()),
            author: merge_field(podcast.author.clone(), self.author.clone()),
            image_url: merge_field(podcast.image_url.clone(), self.image_url.clone()),
            explicit: merge_field(podcast.explicit, self.explicit),
        }
    }
}

/// A stored episode.
#[derive(Debug, Clone, Serialize)]
pub struct Episode {
    pub id: i64,
    pub podcast_id: i64,
    pub guid: Option<String>,
    pub enclosure_url: String,
    pub enclosure_type: Option<String>,
    pub enclosure_length: Option<i64>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub link: Option<String>,
    pub duration_secs: Option<i64>,
    pub explicit: Option<bool>,
    pub image_url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Stable identity of an episode across syncs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EpisodeKey {
    /// Feed-provided unique identifier.
    Guid(String),
    /// Media URL, for items without a GUID.
    Enclosure(String),
}

/// An episode as read from a feed document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeCandidate {
    pub guid: Option<String>,
    pub enclosure_url: String,
    pub enclosure_type: Option<String>,
    pub enclosure_length: Option<i64>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub link: Option<String>,
    pub duration_secs: Option<i64>,
    pub explicit: Option<bool>,
    pub image_url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

impl EpisodeCandidate {
    /// Create a candidate with only its enclosure set.
    pub fn new(enclosure_url: impl Into<String>) -> Self {
        Self {
            guid: None,
            enclosure_url: enclosure_url.into(),
            enclosure_type: None,
            enclosure_length: None,
            title: None,
            description: None,
            link: None,
            duration_secs: None,
            explicit: None,
            image_url: None,
            published_at: None,
        }
    }

    /// Set the GUID.
    pub fn with_guid(mut self, guid: impl Into<String>) -> Self {
        self.guid = Some(guid.into());
        self
    }

    /// Set the title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the publish date.
    pub fn with_published_at(mut self, published_at: DateTime<Utc>) -> Self {
        self.published_at = Some(published_at);
        self
    }

    /// Identity key: the GUID if present, else the enclosure URL.
    pub fn key(&self) -> EpisodeKey {
        match &self.guid {
            Some(guid) => EpisodeKey::Guid(guid.clone()),
            None => EpisodeKey::Enclosure(self.enclosure_url.clone()),
        }
    }

    /// Merge this candidate over a stored episode. The enclosure URL is
    /// always present on a candidate and always wins; a stored GUID is never
    /// dropped.
    pub fn merged_over(&self, episode: &Episode) -> EpisodeCandidate {
        EpisodeCandidate {
            guid: merge_field(episode.guid.clone(), self.guid.clone()),
            enclosure_url: self.enclosure_url.clone(),
            enclosure_type: merge_field(episode.enclosure_type.clone(), self.enclosure_type.clone()),
            enclosure_length: merge_field(episode.enclosure_length, self.enclosure_length),
            title: merge_field(episode.title.clone(), self.title.clone()),
            description: merge_field(episode.description.clone(), self.description.clone()),
            link: merge_field(episode.link.clone(), self.link.clone()),
            duration_secs: merge_field(episode.duration_secs, self.duration_secs),
            explicit: merge_field(episode.explicit, self.explicit),
            image_url: merge_field(episode.image_url.clone(), self.image_url.clone()),
            published_at: merge_field(episode.published_at, self.published_at),
        }
    }
}

/// A parsed feed document.
#[derive(Debug, Clone, Default)]
pub struct ParsedFeed {
    pub metadata: PodcastMetadata,
    /// Declared build/publish timestamp of the document.
    pub build_at: Option<DateTime<Utc>>,
    /// Items with a usable enclosure, in document order.
    pub episodes: Vec<EpisodeCandidate>,
    /// Items dropped for lacking an enclosure.
    pub items_without_enclosure: usize,
}
