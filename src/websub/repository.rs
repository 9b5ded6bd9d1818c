//! Subscription and callback log repositories.

use chrono::{DateTime, Utc};

use super::types::{
    pairs_to_json, CallbackKind, CallbackLog, HubMode, NewCallbackLog, PendingSubscription,
    Subscription, SubscriptionStatus,
};
use crate::clock::{format_timestamp, parse_timestamp};
use crate::db::DbPool;
use crate::{PodhubError, Result};

const SUBSCRIPTION_COLUMNS: &str = "id, topic, hub, secret, lease_seconds, expires_at, status, \
     pending_mode, verified_at, last_notified_at, created_at, updated_at";

/// Row type for a subscription from the database.
#[derive(Debug, Clone, sqlx::FromRow)]
struct SubscriptionRow {
    id: i64,
    topic: String,
    hub: String,
    secret: String,
    lease_seconds: i64,
    expires_at: Option<String>,
    status: String,
    pending_mode: Option<String>,
    verified_at: Option<String>,
    last_notified_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl From<SubscriptionRow> for Subscription {
    fn from(row: SubscriptionRow) -> Self {
        Subscription {
            id: row.id,
            topic: row.topic,
            hub: row.hub,
            secret: row.secret,
            lease_seconds: row.lease_seconds,
            expires_at: row.expires_at.and_then(|s| parse_timestamp(&s)),
            status: SubscriptionStatus::from_str_lossy(&row.status),
            pending_mode: row.pending_mode.as_deref().and_then(HubMode::parse),
            verified_at: row.verified_at.and_then(|s| parse_timestamp(&s)),
            last_notified_at: row.last_notified_at.and_then(|s| parse_timestamp(&s)),
            created_at: parse_timestamp(&row.created_at).unwrap_or_else(Utc::now),
            updated_at: parse_timestamp(&row.updated_at).unwrap_or_else(Utc::now),
        }
    }
}

/// Row type for a callback log entry from the database.
#[derive(Debug, Clone, sqlx::FromRow)]
struct CallbackLogRow {
    id: i64,
    kind: String,
    topic: Option<String>,
    method: String,
    headers: String,
    params: String,
    body: Option<String>,
    response_status: i64,
    response_body: Option<String>,
    created_at: String,
}

impl From<CallbackLogRow> for CallbackLog {
    fn from(row: CallbackLogRow) -> Self {
        CallbackLog {
            id: row.id,
            kind: CallbackKind::from_str_lossy(&row.kind),
            topic: row.topic,
            method: row.method,
            headers: serde_json::from_str(&row.headers).unwrap_or(serde_json::Value::Null),
            params: serde_json::from_str(&row.params).unwrap_or(serde_json::Value::Null),
            body: row.body,
            response_status: u16::try_from(row.response_status).unwrap_or(0),
            response_body: row.response_body,
            created_at: parse_timestamp(&row.created_at).unwrap_or_else(Utc::now),
        }
    }
}

/// Repository for subscription records.
pub struct SubscriptionRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> SubscriptionRepository<'a> {
    /// Create a new repository instance.
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Get the subscription for a topic.
    pub async fn get_by_topic(&self, topic: &str) -> Result<Option<Subscription>> {
        let query = format!(
            "SELECT {} FROM subscriptions WHERE topic = $1",
            SUBSCRIPTION_COLUMNS
        );
        let row = sqlx::query_as::<_, SubscriptionRow>(&query)
            .bind(topic)
            .fetch_optional(self.pool)
            .await
            .map_err(|e| PodhubError::Database(e.to_string()))?;

        Ok(row.map(Subscription::from))
    }

    /// List subscriptions, optionally filtered by status, newest first.
    pub async fn list(
        &self,
        status: Option<SubscriptionStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Subscription>> {
        let query = format!(
            r#"
            SELECT {}
            FROM subscriptions
            WHERE ($1 IS NULL OR status = $1)
            ORDER BY updated_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
            SUBSCRIPTION_COLUMNS
        );
        let rows = sqlx::query_as::<_, SubscriptionRow>(&query)
            .bind(status.map(|s| s.as_str()))
            .bind(limit)
            .bind(offset)
            .fetch_all(self.pool)
            .await
            .map_err(|e| PodhubError::Database(e.to_string()))?;

        Ok(rows.into_iter().map(Subscription::from).collect())
    }

    /// Record an accepted subscribe request.
    ///
    /// Creates the row in `pending`, or overwrites hub/secret/lease of an
    /// existing one. Either way a subscribe verification is now expected. A row that is still active and unexpired at `now` keeps
    /// its status and expiry so notifications keep flowing while the hub
    /// re-verifies.
    pub async fn upsert_pending(
        &self,
        pending: &PendingSubscription,
        now: DateTime<Utc>,
    ) -> Result<Subscription> {
        let now = format_timestamp(&now);
        sqlx::query(
            r#"
            INSERT INTO subscriptions
                (topic, hub, secret, lease_seconds, expires_at, status, pending_mode,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, 'pending', 'subscribe', $6, $6)
            ON CONFLICT(topic) DO UPDATE SET
                hub = excluded.hub,
                pending_mode = 'subscribe',
                secret = excluded.secret,
                lease_seconds = excluded.lease_seconds,
                expires_at = CASE
                    WHEN subscriptions.status = 'active' AND subscriptions.expires_at > $6
                    THEN subscriptions.expires_at
                    ELSE excluded.expires_at
                END,
                status = CASE
                    WHEN subscriptions.status = 'active' AND subscriptions.expires_at > $6
                    THEN 'active'
                    ELSE 'pending'
                END,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&pending.topic)
        .bind(&pending.hub)
        .bind(&pending.secret)
        .bind(pending.lease_seconds)
        .bind(format_timestamp(&pending.expires_at))
        .bind(&now)
        .execute(self.pool)
        .await
        .map_err(|e| PodhubError::Database(e.to_string()))?;

        self.get_by_topic(&pending.topic)
            .await?
            .ok_or_else(|| PodhubError::NotFound("subscription".into()))
    }

    /// Record an accepted unsubscribe request. Returns false if the topic has
    /// no subscription.
    pub async fn request_unsubscribe(&self, topic: &str, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE subscriptions SET pending_mode = 'unsubscribe', updated_at = $1 WHERE topic = $2",
        )
        .bind(format_timestamp(&now))
        .bind(topic)
        .execute(self.pool)
        .await
        .map_err(|e| PodhubError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    /// Mark a subscription verified.
    ///
    /// Only a row with an outstanding subscribe request can be activated.
    /// Returns the updated row, or `None` if there is none.
    pub async fn activate(
        &self,
        topic: &str,
        lease_seconds: i64,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<Subscription>> {
        let now = format_timestamp(&now);
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'active', lease_seconds = $1, expires_at = $2,
                pending_mode = NULL, verified_at = $3, updated_at = $3
            WHERE topic = $4 AND pending_mode = 'subscribe'
              AND status IN ('pending', 'active')
            "#,
        )
        .bind(lease_seconds)
        .bind(format_timestamp(&expires_at))
        .bind(&now)
        .bind(topic)
        .execute(self.pool)
        .await
        .map_err(|e| PodhubError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_by_topic(topic).await
    }

    /// Flip a subscription to `expired` after an unsubscribe verification.
    ///
    /// Returns false unless an unsubscribe request is outstanding.
    pub async fn mark_unsubscribed(&self, topic: &str, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'expired', pending_mode = NULL, updated_at = $1
            WHERE topic = $2 AND pending_mode = 'unsubscribe'
            "#,
        )
        .bind(format_timestamp(&now))
        .bind(topic)
        .execute(self.pool)
        .await
        .map_err(|e| PodhubError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    /// Record that an authenticated notification arrived.
    pub async fn touch_notified(&self, topic: &str, now: DateTime<Utc>) -> Result<()> {
        let now = format_timestamp(&now);
        sqlx::query(
            "UPDATE subscriptions SET last_notified_at = $1, updated_at = $1 WHERE topic = $2",
        )
        .bind(&now)
        .bind(topic)
        .execute(self.pool)
        .await
        .map_err(|e| PodhubError::Database(e.to_string()))?;

        Ok(())
    }

    /// Expire every active subscription whose lease has passed.
    ///
    /// Returns the number of rows flipped.
    pub async fn expire_due(&self, now: DateTime<Utc>) -> Result<u64> {
        let now = format_timestamp(&now);
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'expired', updated_at = $1
            WHERE status = 'active' AND expires_at IS NOT NULL AND expires_at <= $1
            "#,
        )
        .bind(&now)
        .execute(self.pool)
        .await
        .map_err(|e| PodhubError::Database(e.to_string()))?;

        Ok(result.rows_affected())
    }

    /// Active subscriptions whose lease ends within `(now, until]`, soonest first.
    pub async fn list_expiring(
        &self,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Subscription>> {
        let query = format!(
            r#"
            SELECT {}
            FROM subscriptions
            WHERE status = 'active' AND expires_at > $1 AND expires_at <= $2
            ORDER BY expires_at ASC
            LIMIT $3
            "#,
            SUBSCRIPTION_COLUMNS
        );
        let rows = sqlx::query_as::<_, SubscriptionRow>(&query)
            .bind(format_timestamp(&now))
            .bind(format_timestamp(&until))
            .bind(limit)
            .fetch_all(self.pool)
            .await
            .map_err(|e| PodhubError::Database(e.to_string()))?;

        Ok(rows.into_iter().map(Subscription::from).collect())
    }
}

/// Repository for the append-only callback audit log.
pub struct CallbackLogRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> CallbackLogRepository<'a> {
    /// Create a new repository instance.
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Append an entry.
    pub async fn insert(&self, log: &NewCallbackLog, now: DateTime<Utc>) -> Result<i64> {
        let headers = pairs_to_json(&log.headers).to_string();
        let params = pairs_to_json(&log.params).to_string();

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO callback_logs
                (kind, topic, method, headers, params, body, response_status, response_body, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id
            "#,
        )
        .bind(log.kind.as_str())
        .bind(&log.topic)
        .bind(&log.method)
        .bind(headers)
        .bind(params)
        .bind(&log.body)
        .bind(i64::from(log.response_status))
        .bind(&log.response_body)
        .bind(format_timestamp(&now))
        .fetch_one(self.pool)
        .await
        .map_err(|e| PodhubError::Database(e.to_string()))?;

        Ok(id)
    }

    /// List entries, optionally for one topic, newest first.
    pub async fn list(&self, topic: Option<&str>, limit: i64, offset: i64) -> Result<Vec<CallbackLog>> {
        let rows = sqlx::query_as::<_, CallbackLogRow>(
            r#"
            SELECT id, kind, topic, method, headers, params, body, response_status,
                   response_body, created_at
            FROM callback_logs
            WHERE ($1 IS NULL OR topic = $1)
            ORDER BY id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(topic)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool)
        .await
        .map_err(|e| PodhubError::Database(e.to_string()))?;

        Ok(rows.into_iter().map(CallbackLog::from).collect())
    }

    /// Time of the last notification accepted for a topic.
    pub async fn last_accepted_notification(&self, topic: &str) -> Result<Option<DateTime<Utc>>> {
        let created_at: Option<String> = sqlx::query_scalar(
            r#"
            SELECT MAX(created_at) FROM callback_logs
            WHERE topic = $1 AND kind = 'notification' AND response_status = 200
            "#,
        )
        .bind(topic)
        .fetch_one(self.pool)
        .await
        .map_err(|e| PodhubError::Database(e.to_string()))?;

        Ok(created_at.and_then(|s| parse_timestamp(&s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use chrono::{Duration, TimeZone};

    const TOPIC: &str = "https://example.com/feed.xml";

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap()
    }

    fn pending(secret: &str) -> PendingSubscription {
        PendingSubscription {
            topic: TOPIC.to_string(),
            hub: "https://hub.example.com/".to_string(),
            secret: secret.to_string(),
            lease_seconds: 3600,
            expires_at: t0() + Duration::seconds(3600),
        }
    }

    #[tokio::test]
    async fn test_upsert_pending_creates_row() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = SubscriptionRepository::new(db.pool());

        let sub = repo.upsert_pending(&pending("s1"), t0()).await.unwrap();
        assert_eq!(sub.topic, TOPIC);
        assert_eq!(sub.status, SubscriptionStatus::Pending);
        assert_eq!(sub.secret, "s1");
        assert_eq!(sub.created_at, t0());
        assert_eq!(sub.pending_mode, Some(HubMode::Subscribe));
        assert!(sub.verified_at.is_none());
    }

    #[tokio::test]
    async fn test_upsert_pending_is_one_row_per_topic() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = SubscriptionRepository::new(db.pool());

        repo.upsert_pending(&pending("s1"), t0()).await.unwrap();
        let sub = repo
            .upsert_pending(&pending("s2"), t0() + Duration::seconds(5))
            .await
            .unwrap();

        assert_eq!(sub.secret, "s2");
        assert_eq!(repo.list(None, 10, 0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_activate_sets_expiry() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = SubscriptionRepository::new(db.pool());
        repo.upsert_pending(&pending("s1"), t0()).await.unwrap();

        let verified_at = t0() + Duration::seconds(30);
        let expires_at = verified_at + Duration::seconds(600);
        let sub = repo
            .activate(TOPIC, 600, expires_at, verified_at)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.lease_seconds, 600);
        assert_eq!(sub.expires_at, Some(expires_at));
        assert_eq!(sub.verified_at, Some(verified_at));
        assert_eq!(sub.pending_mode, None);
    }

    #[tokio::test]
    async fn test_activate_requires_outstanding_request() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = SubscriptionRepository::new(db.pool());
        repo.upsert_pending(&pending("s1"), t0()).await.unwrap();
        let expires_at = t0() + Duration::hours(1);
        repo.activate(TOPIC, 3600, expires_at, t0()).await.unwrap();

        // A second handshake nobody asked for changes nothing.
        assert!(repo
            .activate(TOPIC, 1, t0() + Duration::seconds(1), t0())
            .await
            .unwrap()
            .is_none());
        let sub = repo.get_by_topic(TOPIC).await.unwrap().unwrap();
        assert_eq!(sub.lease_seconds, 3600);
        assert_eq!(sub.expires_at, Some(expires_at));
    }

    #[tokio::test]
    async fn test_unsubscribe_requires_outstanding_request() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = SubscriptionRepository::new(db.pool());
        repo.upsert_pending(&pending("s1"), t0()).await.unwrap();
        repo.activate(TOPIC, 3600, t0() + Duration::hours(1), t0())
            .await
            .unwrap();

        assert!(!repo.mark_unsubscribed(TOPIC, t0()).await.unwrap());
        assert_eq!(
            repo.get_by_topic(TOPIC).await.unwrap().unwrap().status,
            SubscriptionStatus::Active
        );

        assert!(repo.request_unsubscribe(TOPIC, t0()).await.unwrap());
        assert_eq!(
            repo.get_by_topic(TOPIC).await.unwrap().unwrap().pending_mode,
            Some(HubMode::Unsubscribe)
        );
        assert!(repo.mark_unsubscribed(TOPIC, t0()).await.unwrap());
        let sub = repo.get_by_topic(TOPIC).await.unwrap().unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Expired);
        assert_eq!(sub.pending_mode, None);
    }

    #[tokio::test]
    async fn test_activate_unknown_or_expired() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = SubscriptionRepository::new(db.pool());

        assert!(repo.activate(TOPIC, 60, t0(), t0()).await.unwrap().is_none());

        repo.upsert_pending(&pending("s1"), t0()).await.unwrap();
        repo.request_unsubscribe(TOPIC, t0()).await.unwrap();
        assert!(repo.mark_unsubscribed(TOPIC, t0()).await.unwrap());
        assert!(repo.activate(TOPIC, 60, t0(), t0()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_renewal_keeps_live_subscription_active() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = SubscriptionRepository::new(db.pool());
        repo.upsert_pending(&pending("s1"), t0()).await.unwrap();
        let expires_at = t0() + Duration::hours(1);
        repo.activate(TOPIC, 3600, expires_at, t0()).await.unwrap();

        let sub = repo
            .upsert_pending(&pending("s1"), t0() + Duration::minutes(50))
            .await
            .unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.expires_at, Some(expires_at));

        // Once the lease has lapsed a new request starts over as pending.
        let sub = repo
            .upsert_pending(&pending("s1"), t0() + Duration::hours(2))
            .await
            .unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Pending);
    }

    #[tokio::test]
    async fn test_expire_due_only_past_leases() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = SubscriptionRepository::new(db.pool());
        repo.upsert_pending(&pending("s1"), t0()).await.unwrap();
        let expires_at = t0() + Duration::hours(1);
        repo.activate(TOPIC, 3600, expires_at, t0()).await.unwrap();

        assert_eq!(repo.expire_due(expires_at - Duration::seconds(1)).await.unwrap(), 0);
        assert_eq!(
            repo.get_by_topic(TOPIC).await.unwrap().unwrap().status,
            SubscriptionStatus::Active
        );

        assert_eq!(repo.expire_due(expires_at).await.unwrap(), 1);
        assert_eq!(
            repo.get_by_topic(TOPIC).await.unwrap().unwrap().status,
            SubscriptionStatus::Expired
        );
    }

    #[tokio::test]
    async fn test_list_expiring_window() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = SubscriptionRepository::new(db.pool());
        repo.upsert_pending(&pending("s1"), t0()).await.unwrap();
        repo.activate(TOPIC, 3600, t0() + Duration::hours(1), t0())
            .await
            .unwrap();

        let soon = repo
            .list_expiring(t0(), t0() + Duration::minutes(30), 10)
            .await
            .unwrap();
        assert!(soon.is_empty());

        let soon = repo
            .list_expiring(t0(), t0() + Duration::hours(2), 10)
            .await
            .unwrap();
        assert_eq!(soon.len(), 1);
    }

    #[tokio::test]
    async fn test_list_by_status() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = SubscriptionRepository::new(db.pool());
        repo.upsert_pending(&pending("s1"), t0()).await.unwrap();

        assert_eq!(
            repo.list(Some(SubscriptionStatus::Pending), 10, 0)
                .await
                .unwrap()
                .len(),
            1
        );
        assert!(repo
            .list(Some(SubscriptionStatus::Active), 10, 0)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_callback_log_insert_and_list() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = CallbackLogRepository::new(db.pool());

        let entry = NewCallbackLog::new(CallbackKind::Notification, "POST")
            .with_topic(Some(TOPIC.to_string()))
            .with_headers(vec![("content-type".into(), "application/rss+xml".into())])
            .with_body(b"<rss/>")
            .with_response(200, "ok");
        repo.insert(&entry, t0()).await.unwrap();

        let other = NewCallbackLog::new(CallbackKind::Verification, "GET")
            .with_topic(Some("https://other.example.com/feed".into()))
            .with_response(404, "");
        repo.insert(&other, t0()).await.unwrap();

        let logs = repo.list(Some(TOPIC), 10, 0).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].kind, CallbackKind::Notification);
        assert_eq!(logs[0].headers["content-type"], "application/rss+xml");
        assert_eq!(logs[0].body.as_deref(), Some("<rss/>"));
        assert_eq!(logs[0].response_status, 200);

        assert_eq!(repo.list(None, 10, 0).await.unwrap().len(), 2);
        assert_eq!(
            repo.last_accepted_notification(TOPIC).await.unwrap(),
            Some(t0())
        );
        assert_eq!(
            repo.last_accepted_notification("https://other.example.com/feed")
                .await
                .unwrap(),
            None
        );
    }
}
