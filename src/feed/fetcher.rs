//! Feed download and parsing.

use std::sync::Arc;

use feed_rs::model::{Entry, Feed, MediaContent};
use feed_rs::parser;
use regex::Regex;
use reqwest::Client;
use tokio::sync::Semaphore;
use tracing::debug;

use super::types::{EpisodeCandidate, ParsedFeed, PodcastMetadata};
use crate::config::FeedConfig;
use crate::http::{read_body_capped, UrlPolicy};
use crate::{PodhubError, Result};

/// Downloads feed documents, capping size and concurrent requests.
pub struct FeedFetcher {
    client: Client,
    policy: UrlPolicy,
    max_bytes: u64,
    permits: Arc<Semaphore>,
}

impl FeedFetcher {
    /// Create a fetcher sharing `client`.
    pub fn new(client: Client, config: &FeedConfig) -> Self {
        Self {
            client,
            policy: UrlPolicy::from_config(config),
            max_bytes: config.max_feed_size_bytes,
            permits: Arc::new(Semaphore::new(config.max_concurrent_fetches.max(1))),
        }
    }

    /// Fetch the raw feed document at `url`.
    ///
    /// Waits for a slot when the concurrent fetch limit is reached.
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let url = self.policy.check(url)?;

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| PodhubError::Http(format!("fetch limiter closed: {}", e)))?;

        debug!(url = %url, "Fetching feed");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PodhubError::Http(format!("failed to fetch feed: {}", e)))?;

        if !response.status().is_success() {
            return Err(PodhubError::Http(format!("HTTP error: {}", response.status())));
        }

        read_body_capped(response, self.max_bytes).await
    }
}

/// Parse a feed document.
///
/// Items without an http(s) media enclosure are counted and left out.
pub fn parse_feed(bytes: &[u8]) -> Result<ParsedFeed> {
    // An empty id marks an item without a GUID instead of a synthesized one.
    let feed = parser::Builder::new()
        .id_generator(|_, _, _| String::new())
        .build()
        .parse(bytes)
        .map_err(|e| PodhubError::Feed(format!("failed to parse feed: {}", e)))?;

    let channel_explicit = channel_explicit_flag(bytes);
    Ok(convert_feed(feed, channel_explicit))
}

fn convert_feed(feed: Feed, channel_explicit: Option<bool>) -> ParsedFeed {
    let metadata = PodcastMetadata {
        title: non_empty(feed.title.map(|t| t.content)),
        description: non_empty(feed.description.map(|d| d.content)),
        link: non_empty(feed.links.first().map(|l| l.href.clone())),
        language: non_empty(feed.language),
        author: non_empty(feed.authors.first().map(|a| a.name.clone())),
        image_url: non_empty(feed.logo.or(feed.icon).map(|i| i.uri)),
        explicit: channel_explicit,
    };
    let build_at = feed.updated.or(feed.published);

    let mut episodes = Vec::with_capacity(feed.entries.len());
    let mut items_without_enclosure = 0;
    for entry in feed.entries {
        match convert_entry(entry) {
            Some(candidate) => episodes.push(candidate),
            None => items_without_enclosure += 1,
        }
    }

    ParsedFeed {
        metadata,
        build_at,
        episodes,
        items_without_enclosure,
    }
}

fn convert_entry(entry: Entry) -> Option<EpisodeCandidate> {
    let (content, object_duration) = entry.media.iter().find_map(|object| {
        object
            .content
            .iter()
            .find(|c| is_http_url(c))
            .map(|c| (c.clone(), object.duration))
    })?;
    let enclosure_url = content.url.as_ref()?.to_string();

    let image_url = entry
        .media
        .iter()
        .flat_map(|object| object.thumbnails.iter())
        .map(|thumb| thumb.image.uri.clone())
        .next();

    let duration = content.duration.or(object_duration);

    Some(EpisodeCandidate {
        guid: non_empty(Some(entry.id)),
        enclosure_url,
        enclosure_type: content.content_type.as_ref().map(|m| m.to_string()),
        enclosure_length: content
            .size
            .and_then(|s| i64::try_from(s).ok())
            .filter(|s| *s > 0),
        title: non_empty(entry.title.map(|t| t.content)),
        description: non_empty(
            entry
                .summary
                .map(|t| t.content)
                .or(entry.content.and_then(|c| c.body)),
        ),
        link: non_empty(entry.links.first().map(|l| l.href.clone())),
        duration_secs: duration.and_then(|d| i64::try_from(d.as_secs()).ok()),
        explicit: content
            .rating
            .as_ref()
            .and_then(|r| parse_explicit(&r.value)),
        image_url: non_empty(image_url),
        published_at: entry.published.or(entry.updated),
    })
}

fn is_http_url(content: &MediaContent) -> bool {
    content
        .url
        .as_ref()
        .is_some_and(|u| matches!(u.scheme(), "http" | "https"))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_explicit(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "yes" | "true" | "explicit" => Some(true),
        "no" | "false" | "clean" => Some(false),
        _ => None,
    }
}

/// Read the channel-level `<itunes:explicit>` flag, which feed-rs does not
/// surface. Only the part of the document before the first item is searched.
fn channel_explicit_flag(bytes: &[u8]) -> Option<bool> {
    let doc = String::from_utf8_lossy(bytes);
    let channel = match doc.find("<item") {
        Some(end) => &doc[..end],
        None => &doc[..],
    };
    let re = Regex::new(r"(?i)<itunes:explicit>\s*([a-z]+)\s*</itunes:explicit>").ok()?;
    re.captures(channel)
        .and_then(|cap| cap.get(1))
        .and_then(|m| parse_explicit(m.as_str()))
}
