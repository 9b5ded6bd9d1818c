//! Database schema and migrations for podhub.
//!
//! Migrations are applied in order when the database is opened; the
//! `schema_version` table records which ones have run.

/// Database migrations.
pub const MIGRATIONS: &[&str] = &[
    // v1: WebSub subscriptions, one row per topic
    r#"
CREATE TABLE subscriptions (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    topic             TEXT NOT NULL UNIQUE,
    hub               TEXT NOT NULL,
    secret            TEXT NOT NULL,
    lease_seconds     INTEGER NOT NULL,
    expires_at        TEXT,                              -- provisional until verified
    status            TEXT NOT NULL DEFAULT 'pending',   -- 'pending', 'active', 'expired'
    verified_at       TEXT,
    last_notified_at  TEXT,
    created_at        TEXT NOT NULL,
    updated_at        TEXT NOT NULL
);

CREATE INDEX idx_subscriptions_status_expires ON subscriptions(status, expires_at);
"#,
    // v2: append-only audit trail of hub callbacks
    r#"
CREATE TABLE callback_logs (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    kind             TEXT NOT NULL,                      -- 'verification', 'notification'
    topic            TEXT,
    method           TEXT NOT NULL,
    headers          TEXT NOT NULL,                      -- JSON object
    params           TEXT NOT NULL,                      -- JSON object
    body             TEXT,
    response_status  INTEGER NOT NULL,
    response_body    TEXT,
    created_at       TEXT NOT NULL
);

CREATE INDEX idx_callback_logs_topic ON callback_logs(topic, created_at);
"#,
    // v3: podcasts (feed-level content)
    r#"
CREATE TABLE podcasts (
    id                   INTEGER PRIMARY KEY AUTOINCREMENT,
    feed_url             TEXT NOT NULL UNIQUE,
    title                TEXT,
    description          TEXT,
    link                 TEXT,
    language             TEXT,
    author               TEXT,
    image_url            TEXT,
    optimized_image_url  TEXT,                           -- owned by the image pipeline
    explicit             INTEGER,
    last_build_at        TEXT,
    has_parse_errors     INTEGER NOT NULL DEFAULT 0,
    is_dead              INTEGER NOT NULL DEFAULT 0,
    error_count          INTEGER NOT NULL DEFAULT 0,
    last_error           TEXT,
    last_synced_at       TEXT,
    created_at           TEXT NOT NULL,
    updated_at           TEXT NOT NULL
);

CREATE INDEX idx_podcasts_updated_at ON podcasts(updated_at);
"#,
    // v4: episodes, keyed by GUID or (for GUID-less items) enclosure URL
    r#"
CREATE TABLE episodes (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    podcast_id        INTEGER NOT NULL REFERENCES podcasts(id) ON DELETE CASCADE,
    guid              TEXT,
    enclosure_url     TEXT NOT NULL,
    enclosure_type    TEXT,
    enclosure_length  INTEGER,
    title             TEXT,
    description       TEXT,
    link              TEXT,
    duration_secs     INTEGER,
    explicit          INTEGER,
    image_url         TEXT,
    published_at      TEXT,
    created_at        TEXT NOT NULL,
    updated_at        TEXT NOT NULL
);

CREATE UNIQUE INDEX idx_episodes_guid ON episodes(podcast_id, guid);
CREATE UNIQUE INDEX idx_episodes_enclosure_no_guid ON episodes(podcast_id, enclosure_url)
    WHERE guid IS NULL;
CREATE INDEX idx_episodes_published_at ON episodes(podcast_id, published_at);
"#,
    // v5: outstanding hub request awaiting verification
    r#"
ALTER TABLE subscriptions ADD COLUMN pending_mode TEXT;   -- 'subscribe', 'unsubscribe'
"#,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_not_empty() {
        assert!(!MIGRATIONS.is_empty());
    }

    #[test]
    fn test_migrations_are_valid_sql() {
        for migration in MIGRATIONS {
            assert!(!migration.trim().is_empty());
            assert!(migration.contains("CREATE TABLE") || migration.contains("ALTER TABLE"));
        }
    }

    #[test]
    fn test_subscription_topic_is_unique() {
        assert!(MIGRATIONS[0].contains("topic             TEXT NOT NULL UNIQUE"));
    }

    #[test]
    fn test_pending_mode_column() {
        assert!(MIGRATIONS[4].contains("ADD COLUMN pending_mode"));
    }

    #[test]
    fn test_episode_identity_indexes() {
        let episodes = MIGRATIONS[3];
        assert!(episodes.contains("ON episodes(podcast_id, guid)"));
        assert!(episodes.contains("WHERE guid IS NULL"));
    }
}
