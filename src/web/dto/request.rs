//! Request DTOs for the admin API.

use serde::Deserialize;
use validator::Validate;

use super::validation::no_control_chars;

/// Default page size for list endpoints.
pub const DEFAULT_PER_PAGE: u32 = 50;
/// Largest page size a client may ask for.
pub const MAX_PER_PAGE: u32 = 200;

/// Page selection for list endpoints. Pages start at 1.
#[derive(Debug, Default, Deserialize)]
pub struct PaginationQuery {
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub per_page: Option<u32>,
}

impl PaginationQuery {
    /// Page number, at least 1.
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    /// Page size, clamped to `1..=MAX_PER_PAGE`.
    pub fn per_page(&self) -> u32 {
        self.per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE)
    }

    /// SQL `(limit, offset)`.
    pub fn limit_offset(&self) -> (i64, i64) {
        let per_page = i64::from(self.per_page());
        (per_page, (i64::from(self.page()) - 1) * per_page)
    }
}

// Query strings are flat, so the list filters repeat the page fields
// instead of flattening a PaginationQuery.

/// Filters for the subscription list.
#[derive(Debug, Default, Deserialize)]
pub struct SubscriptionListQuery {
    /// `pending`, `active` or `expired`.
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub per_page: Option<u32>,
}

impl SubscriptionListQuery {
    pub fn pagination(&self) -> PaginationQuery {
        PaginationQuery {
            page: self.page,
            per_page: self.per_page,
        }
    }
}

/// Filters for the callback log list.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackLogQuery {
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub per_page: Option<u32>,
}

impl CallbackLogQuery {
    pub fn pagination(&self) -> PaginationQuery {
        PaginationQuery {
            page: self.page,
            per_page: self.per_page,
        }
    }
}

/// Register a feed.
#[derive(Debug, Deserialize, Validate)]
pub struct AddFeedRequest {
    /// Feed URL.
    #[validate(url(message = "Must be a valid URL"), custom(function = "no_control_chars"))]
    pub url: String,
}

/// Act on one topic.
#[derive(Debug, Deserialize, Validate)]
pub struct TopicRequest {
    /// Feed URL the subscription is for.
    #[validate(url(message = "Must be a valid URL"))]
    pub topic: String,
}

/// Set a podcast's dead flag.
#[derive(Debug, Deserialize)]
pub struct SetDeadRequest {
    pub dead: bool,
}
