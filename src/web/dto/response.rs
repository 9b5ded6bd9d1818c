//! Response DTOs for the admin API.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::feed::sync::{SyncOutcome, SyncStats};
use crate::feed::types::{Episode, Podcast};
use crate::scheduler::SweepReport;
use crate::websub::manager::{SubscribeOutcome, UnsubscribeOutcome};
use crate::websub::types::{CallbackLog, Subscription};

// ============================================================================
// Generic Response Wrappers
// ============================================================================

/// Generic API response wrapper.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    /// Response data.
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    /// Create a new API response.
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

/// Paginated response wrapper.
#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T: Serialize> {
    /// Response data.
    pub data: Vec<T>,
    /// Pagination metadata.
    pub meta: PaginationMeta,
}

impl<T: Serialize> PaginatedResponse<T> {
    /// Create a new paginated response.
    pub fn new(data: Vec<T>, page: u32, per_page: u32) -> Self {
        Self {
            data,
            meta: PaginationMeta { page, per_page },
        }
    }
}

/// Pagination metadata.
#[derive(Debug, Serialize)]
pub struct PaginationMeta {
    /// Current page number.
    pub page: u32,
    /// Items per page.
    pub per_page: u32,
}

fn rfc3339(dt: Option<DateTime<Utc>>) -> Option<String> {
    dt.map(|dt| dt.to_rfc3339())
}

// ============================================================================
// WebSub
// ============================================================================

/// Subscription as shown to operators. The secret is never exposed.
#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    pub id: i64,
    pub topic: String,
    pub hub: String,
    pub status: String,
    /// `subscribe` or `unsubscribe` while the hub has yet to verify.
    pub pending_mode: Option<&'static str>,
    pub lease_seconds: i64,
    pub expires_at: Option<String>,
    pub verified_at: Option<String>,
    pub last_notified_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Subscription> for SubscriptionResponse {
    fn from(sub: Subscription) -> Self {
        Self {
            id: sub.id,
            topic: sub.topic,
            hub: sub.hub,
            status: sub.status.to_string(),
            pending_mode: sub.pending_mode.map(|mode| mode.as_str()),
            lease_seconds: sub.lease_seconds,
            expires_at: rfc3339(sub.expires_at),
            verified_at: rfc3339(sub.verified_at),
            last_notified_at: rfc3339(sub.last_notified_at),
            created_at: sub.created_at.to_rfc3339(),
            updated_at: sub.updated_at.to_rfc3339(),
        }
    }
}

/// Callback log entry.
#[derive(Debug, Serialize)]
pub struct CallbackLogResponse {
    pub id: i64,
    pub kind: String,
    pub topic: Option<String>,
    pub method: String,
    pub headers: serde_json::Value,
    pub params: serde_json::Value,
    pub body: Option<String>,
    pub response_status: u16,
    pub response_body: Option<String>,
    pub created_at: String,
}

impl From<CallbackLog> for CallbackLogResponse {
    fn from(log: CallbackLog) -> Self {
        Self {
            id: log.id,
            kind: log.kind.as_str().to_string(),
            topic: log.topic,
            method: log.method,
            headers: log.headers,
            params: log.params,
            body: log.body,
            response_status: log.response_status,
            response_body: log.response_body,
            created_at: log.created_at.to_rfc3339(),
        }
    }
}

/// Result of a subscribe or renew request.
#[derive(Debug, Serialize)]
pub struct SubscribeResponse {
    pub topic: String,
    /// `already_active`, `pending`, `no_hub` or `abandoned`.
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SubscribeResponse {
    pub fn new(topic: impl Into<String>, outcome: &SubscribeOutcome) -> Self {
        let (attempts, reason) = match outcome {
            SubscribeOutcome::Abandoned {
                attempts, reason, ..
            } => (Some(*attempts), Some(reason.clone())),
            _ => (None, None),
        };
        Self {
            topic: topic.into(),
            outcome: crate::engine::subscribe_label(outcome),
            attempts,
            reason,
        }
    }
}

/// Result of an unsubscribe request.
#[derive(Debug, Serialize)]
pub struct UnsubscribeResponse {
    pub topic: String,
    /// `requested`, `not_subscribed` or `abandoned`.
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl UnsubscribeResponse {
    pub fn new(topic: impl Into<String>, outcome: &UnsubscribeOutcome) -> Self {
        let (label, reason) = match outcome {
            UnsubscribeOutcome::Requested => ("requested", None),
            UnsubscribeOutcome::NotSubscribed => ("not_subscribed", None),
            UnsubscribeOutcome::Abandoned { reason, .. } => ("abandoned", Some(reason.clone())),
        };
        Self {
            topic: topic.into(),
            outcome: label,
            reason,
        }
    }
}

// ============================================================================
// Feeds
// ============================================================================

/// Podcast as shown to operators.
#[derive(Debug, Serialize)]
pub struct PodcastResponse {
    pub id: i64,
    pub feed_url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub link: Option<String>,
    pub language: Option<String>,
    pub author: Option<String>,
    pub image_url: Option<String>,
    pub optimized_image_url: Option<String>,
    pub explicit: Option<bool>,
    pub last_build_at: Option<String>,
    pub has_parse_errors: bool,
    pub is_dead: bool,
    pub error_count: i64,
    pub last_error: Option<String>,
    pub last_synced_at: Option<String>,
    pub updated_at: String,
}

impl From<Podcast> for PodcastResponse {
    fn from(p: Podcast) -> Self {
        Self {
            id: p.id,
            feed_url: p.feed_url,
            title: p.title,
            description: p.description,
            link: p.link,
            language: p.language,
            author: p.author,
            image_url: p.image_url,
            optimized_image_url: p.optimized_image_url,
            explicit: p.explicit,
            last_build_at: rfc3339(p.last_build_at),
            has_parse_errors: p.has_parse_errors,
            is_dead: p.is_dead,
            error_count: p.error_count,
            last_error: p.last_error,
            last_synced_at: rfc3339(p.last_synced_at),
            updated_at: p.updated_at.to_rfc3339(),
        }
    }
}

/// Episode summary.
#[derive(Debug, Serialize)]
pub struct EpisodeResponse {
    pub id: i64,
    pub guid: Option<String>,
    pub title: Option<String>,
    pub enclosure_url: String,
    pub enclosure_type: Option<String>,
    pub duration_secs: Option<i64>,
    pub published_at: Option<String>,
}

impl From<Episode> for EpisodeResponse {
    fn from(e: Episode) -> Self {
        Self {
            id: e.id,
            guid: e.guid,
            title: e.title,
            enclosure_url: e.enclosure_url,
            enclosure_type: e.enclosure_type,
            duration_secs: e.duration_secs,
            published_at: rfc3339(e.published_at),
        }
    }
}

/// Podcast with its most recent episodes.
#[derive(Debug, Serialize)]
pub struct PodcastDetailResponse {
    #[serde(flatten)]
    pub podcast: PodcastResponse,
    pub episode_count: i64,
    pub recent_episodes: Vec<EpisodeResponse>,
}

/// Result of a sync run.
#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub topic: String,
    /// `synced`, `skipped`, `parse_failed` or `fetch_failed`.
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<SyncStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncResponse {
    pub fn new(topic: impl Into<String>, outcome: &SyncOutcome) -> Self {
        let (stats, error) = match outcome {
            SyncOutcome::Synced(stats) => (Some(stats.clone()), None),
            SyncOutcome::Skipped { .. } => (None, None),
            SyncOutcome::ParseFailed(e) | SyncOutcome::FetchFailed(e) => (None, Some(e.clone())),
        };
        Self {
            topic: topic.into(),
            outcome: outcome.label(),
            stats,
            error,
        }
    }
}

/// Result of a manual sweep.
#[derive(Debug, Serialize)]
pub struct SweepResponse {
    /// False when a sweep was already running and this one was skipped.
    pub ran: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<SweepReport>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_response_abandoned() {
        let resp = SubscribeResponse::new(
            "https://example.com/feed.xml",
            &SubscribeOutcome::Abandoned {
                attempts: 3,
                reason: "hub returned HTTP 504".into(),
                transient: true,
            },
        );
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["outcome"], "abandoned");
        assert_eq!(json["attempts"], 3);
        assert_eq!(json["reason"], "hub returned HTTP 504");
    }

    #[test]
    fn test_sync_response_skips_empty_fields() {
        let resp = SyncResponse::new(
            "https://example.com/feed.xml",
            &SyncOutcome::Synced(SyncStats::default()),
        );
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["outcome"], "synced");
        assert!(json.get("error").is_none());
        assert_eq!(json["stats"]["inserted"], 0);
    }
}
