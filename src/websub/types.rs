//! WebSub record types.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Maximum callback body stored in the audit log (64 KiB).
pub const MAX_LOGGED_BODY_BYTES: usize = 64 * 1024;

/// Lifecycle state of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    /// Request sent to the hub, not yet verified.
    Pending,
    /// Verified and within its lease.
    Active,
    /// Lease elapsed or unsubscribed.
    Expired,
}

impl SubscriptionStatus {
    /// Stored representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Expired => "expired",
        }
    }

    /// Parse the stored representation; unknown values read as expired.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "pending" => Self::Pending,
            "active" => Self::Active,
            _ => Self::Expired,
        }
    }
}

/// `hub.mode` of a subscription request, and of the verification that
/// answers it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HubMode {
    Subscribe,
    Unsubscribe,
}

impl HubMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
        }
    }

    /// Parse a `hub.mode` value; anything else is `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "subscribe" => Some(Self::Subscribe),
            "unsubscribe" => Some(Self::Unsubscribe),
            _ => None,
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A subscription to one topic at one hub.
#[derive(Debug, Clone, Serialize)]
pub struct Subscription {
    pub id: i64,
    /// Canonical feed URL.
    pub topic: String,
    /// Hub endpoint the subscription was requested from.
    pub hub: String,
    /// HMAC key for inbound notifications.
    #[serde(skip_serializing)]
    pub secret: String,
    pub lease_seconds: i64,
    /// Provisional until the hub verifies.
    pub expires_at: Option<DateTime<Utc>>,
    pub status: SubscriptionStatus,
    /// Request sent to the hub and not yet verified. A verification whose
    /// mode does not match is refused.
    pub pending_mode: Option<HubMode>,
    pub verified_at: Option<DateTime<Utc>>,
    pub last_notified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Active and not past its expiry at `now`.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.status == SubscriptionStatus::Active && self.expires_at.map_or(true, |at| at > now)
    }
}

/// Values written when a subscribe request is accepted by the hub.
#[derive(Debug, Clone)]
pub struct PendingSubscription {
    pub topic: String,
    pub hub: String,
    pub secret: String,
    pub lease_seconds: i64,
    pub expires_at: DateTime<Utc>,
}

/// Kind of inbound hub request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallbackKind {
    Verification,
    Notification,
}

impl CallbackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Verification => "verification",
            Self::Notification => "notification",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        if s == "verification" {
            Self::Verification
        } else {
            Self::Notification
        }
    }
}

/// One audited callback request. Never mutated after insert.
#[derive(Debug, Clone, Serialize)]
pub struct CallbackLog {
    pub id: i64,
    pub kind: CallbackKind,
    pub topic: Option<String>,
    pub method: String,
    pub headers: serde_json::Value,
    pub params: serde_json::Value,
    pub body: Option<String>,
    pub response_status: u16,
    pub response_body: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// New callback log entry.
#[derive(Debug, Clone)]
pub struct NewCallbackLog {
    pub kind: CallbackKind,
    pub topic: Option<String>,
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub params: Vec<(String, String)>,
    pub body: Option<String>,
    pub response_status: u16,
    pub response_body: Option<String>,
}

impl NewCallbackLog {
    /// Create an entry for a request of the given kind and method.
    pub fn new(kind: CallbackKind, method: impl Into<String>) -> Self {
        Self {
            kind,
            topic: None,
            method: method.into(),
            headers: Vec::new(),
            params: Vec::new(),
            body: None,
            response_status: 0,
            response_body: None,
        }
    }

    /// Set the topic.
    pub fn with_topic(mut self, topic: Option<String>) -> Self {
        self.topic = topic;
        self
    }

    /// Set the request headers.
    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }

    /// Set the query/form parameters.
    pub fn with_params(mut self, params: Vec<(String, String)>) -> Self {
        self.params = params;
        self
    }

    /// Set the request body, truncated to [`MAX_LOGGED_BODY_BYTES`].
    pub fn with_body(mut self, body: &[u8]) -> Self {
        if !body.is_empty() {
            let end = body.len().min(MAX_LOGGED_BODY_BYTES);
            self.body = Some(String::from_utf8_lossy(&body[..end]).into_owned());
        }
        self
    }

    /// Set the response that was sent.
    pub fn with_response(mut self, status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        self.response_status = status;
        self.response_body = if body.is_empty() { None } else { Some(body) };
        self
    }
}

/// Convert header/param pairs to a JSON object for storage.
pub fn pairs_to_json(pairs: &[(String, String)]) -> serde_json::Value {
    let map = pairs
        .iter()
        .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
        .collect::<serde_json::Map<_, _>>();
    serde_json::Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn subscription(status: SubscriptionStatus, expires_at: Option<DateTime<Utc>>) -> Subscription {
        let now = Utc::now();
        Subscription {
            id: 1,
            topic: "https://example.com/feed.xml".to_string(),
            hub: "https://hub.example.com/".to_string(),
            secret: "s".to_string(),
            lease_seconds: 60,
            expires_at,
            status,
            pending_mode: None,
            verified_at: None,
            last_notified_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            SubscriptionStatus::Pending,
            SubscriptionStatus::Active,
            SubscriptionStatus::Expired,
        ] {
            assert_eq!(SubscriptionStatus::from_str_lossy(status.as_str()), status);
        }
        assert_eq!(
            SubscriptionStatus::from_str_lossy("bogus"),
            SubscriptionStatus::Expired
        );
    }

    #[test]
    fn test_hub_mode_parse() {
        assert_eq!(HubMode::parse("subscribe"), Some(HubMode::Subscribe));
        assert_eq!(HubMode::parse("unsubscribe"), Some(HubMode::Unsubscribe));
        assert_eq!(HubMode::parse("denied"), None);
        assert_eq!(HubMode::Unsubscribe.as_str(), "unsubscribe");
    }

    #[test]
    fn test_is_live() {
        let now = Utc::now();
        assert!(subscription(SubscriptionStatus::Active, Some(now + Duration::seconds(1))).is_live(now));
        assert!(!subscription(SubscriptionStatus::Active, Some(now)).is_live(now));
        assert!(!subscription(SubscriptionStatus::Pending, Some(now + Duration::days(1))).is_live(now));
    }

    #[test]
    fn test_secret_not_serialized() {
        let json = serde_json::to_value(subscription(SubscriptionStatus::Active, None)).unwrap();
        assert!(json.get("secret").is_none());
        assert_eq!(json["status"], "active");
    }

    #[test]
    fn test_log_body_truncated() {
        let body = vec![b'a'; MAX_LOGGED_BODY_BYTES + 10];
        let log = NewCallbackLog::new(CallbackKind::Notification, "POST").with_body(&body);
        assert_eq!(log.body.unwrap().len(), MAX_LOGGED_BODY_BYTES);

        let empty = NewCallbackLog::new(CallbackKind::Notification, "POST").with_body(b"");
        assert!(empty.body.is_none());
    }

    #[test]
    fn test_pairs_to_json() {
        let json = pairs_to_json(&[("hub.mode".to_string(), "subscribe".to_string())]);
        assert_eq!(json["hub.mode"], "subscribe");
    }
}
