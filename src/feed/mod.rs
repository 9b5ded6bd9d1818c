//! Podcast feed ingestion.
//!
//! Downloads and parses feeds and applies them to the podcast and episode
//! tables.

pub mod fetcher;
pub mod repository;
pub mod sync;
pub mod types;

pub use fetcher::{parse_feed, FeedFetcher};
pub use repository::{EpisodeRepository, PodcastRepository, UpsertResult};
pub use sync::{FeedSynchronizer, SyncOutcome, SyncStats};
pub use types::{Episode, EpisodeKey, Podcast, PodcastMetadata};
