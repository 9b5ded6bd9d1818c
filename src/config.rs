//! Configuration module for podhub.

use serde::Deserialize;
use std::path::Path;

use crate::{PodhubError, Result};

/// HTTP server configuration (callback endpoint and admin API).
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port number to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "data/podhub.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/podhub.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// WebSub subscriber configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WebSubConfig {
    /// Public URL of this service's callback endpoint.
    #[serde(default)]
    pub callback_url: String,
    /// Lease applied when a hub verifies without `hub.lease_seconds`.
    #[serde(default = "default_lease_secs")]
    pub default_lease_secs: i64,
    /// Lease requested in `hub.lease_seconds`.
    #[serde(default = "default_lease_secs")]
    pub requested_lease_secs: i64,
    /// Timeout for a single hub request in seconds.
    #[serde(default = "default_hub_timeout")]
    pub hub_timeout_secs: u64,
    /// Attempts per subscription request, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Fixed delay between attempts in seconds.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
    /// Public hubs tried when a feed advertises none.
    #[serde(default = "default_fallback_hubs")]
    pub fallback_hubs: Vec<String>,
    /// Whether to try `fallback_hubs` at all.
    #[serde(default = "default_true")]
    pub try_fallback_hubs: bool,
    /// Reject notifications that carry no signature header.
    #[serde(default)]
    pub require_signature: bool,
}

fn default_lease_secs() -> i64 {
    864_000 // 10 days
}

fn default_hub_timeout() -> u64 {
    10
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    5
}

fn default_fallback_hubs() -> Vec<String> {
    vec![
        "https://pubsubhubbub.appspot.com/".to_string(),
        "https://pubsubhubbub.superfeedr.com/".to_string(),
    ]
}

fn default_true() -> bool {
    true
}

impl Default for WebSubConfig {
    fn default() -> Self {
        Self {
            callback_url: String::new(),
            default_lease_secs: default_lease_secs(),
            requested_lease_secs: default_lease_secs(),
            hub_timeout_secs: default_hub_timeout(),
            max_attempts: default_max_attempts(),
            retry_delay_secs: default_retry_delay(),
            fallback_hubs: default_fallback_hubs(),
            try_fallback_hubs: true,
            require_signature: false,
        }
    }
}

/// Feed fetching configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Read timeout in seconds.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
    /// Total request timeout in seconds.
    #[serde(default = "default_total_timeout")]
    pub total_timeout_secs: u64,
    /// Maximum number of redirects.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    /// Maximum feed size in bytes.
    #[serde(default = "default_max_feed_size")]
    pub max_feed_size_bytes: u64,
    /// Upper bound on concurrent outbound feed fetches.
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
    /// Allow loopback and private network hosts (tests, intranet hubs).
    #[serde(default)]
    pub allow_private_hosts: bool,
    /// User agent sent with every outbound request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_read_timeout() -> u64 {
    20
}

fn default_total_timeout() -> u64 {
    30
}

fn default_max_redirects() -> usize {
    5
}

fn default_max_feed_size() -> u64 {
    20 * 1024 * 1024 // 20MB, podcast feeds with full back catalogues are large
}

fn default_max_concurrent_fetches() -> usize {
    5
}

fn default_user_agent() -> String {
    concat!("podhub/", env!("CARGO_PKG_VERSION")).to_string()
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
            total_timeout_secs: default_total_timeout(),
            max_redirects: default_max_redirects(),
            max_feed_size_bytes: default_max_feed_size(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
            allow_private_hosts: false,
            user_agent: default_user_agent(),
        }
    }
}

/// Reconciliation scheduler configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Whether the background sweep runs at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds between sweeps.
    #[serde(default = "default_sweep_interval")]
    pub interval_secs: u64,
    /// A feed without a verified push for this long is re-synced by pull.
    #[serde(default = "default_staleness")]
    pub staleness_secs: i64,
    /// Re-issue subscribe requests for leases about to lapse.
    #[serde(default = "default_true")]
    pub renew_expiring: bool,
    /// How close to expiry a lease must be to get renewed.
    #[serde(default = "default_renew_window")]
    pub renew_window_secs: i64,
    /// Maximum feeds re-synced (and leases renewed) per sweep.
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
}

fn default_sweep_interval() -> u64 {
    3600
}

fn default_staleness() -> i64 {
    21_600 // 6 hours
}

fn default_renew_window() -> i64 {
    86_400
}

fn default_batch_size() -> i64 {
    50
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_sweep_interval(),
            staleness_secs: default_staleness(),
            renew_expiring: true,
            renew_window_secs: default_renew_window(),
            batch_size: default_batch_size(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdminConfig {
    /// Bearer token for the admin API; empty disables the API.
    #[serde(default)]
    pub token: String,
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// WebSub configuration.
    #[serde(default)]
    pub websub: WebSubConfig,
    /// Feed fetching configuration.
    #[serde(default)]
    pub feed: FeedConfig,
    /// Scheduler configuration.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Admin API configuration.
    #[serde(default)]
    pub admin: AdminConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(PodhubError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| PodhubError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides.
    ///
    /// Supported environment variables:
    /// - `PODHUB_CALLBACK_URL`: public callback URL handed to hubs
    /// - `PODHUB_ADMIN_TOKEN`: admin API bearer token
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("PODHUB_CALLBACK_URL") {
            if !url.is_empty() {
                self.websub.callback_url = url;
            }
        }
        if let Ok(token) = std::env::var("PODHUB_ADMIN_TOKEN") {
            if !token.is_empty() {
                self.admin.token = token;
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.websub.callback_url.is_empty() {
            return Err(PodhubError::Config(
                "websub.callback_url is not set. \
                 Set it in config.toml or via PODHUB_CALLBACK_URL."
                    .to_string(),
            ));
        }
        let callback = url::Url::parse(&self.websub.callback_url)
            .map_err(|e| PodhubError::Config(format!("invalid websub.callback_url: {e}")))?;
        if !matches!(callback.scheme(), "http" | "https") {
            return Err(PodhubError::Config(
                "websub.callback_url must use http or https".to_string(),
            ));
        }
        if self.websub.max_attempts == 0 {
            return Err(PodhubError::Config(
                "websub.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.websub.default_lease_secs <= 0 || self.websub.requested_lease_secs <= 0 {
            return Err(PodhubError::Config(
                "lease durations must be positive".to_string(),
            ));
        }
        if self.feed.max_concurrent_fetches == 0 {
            return Err(PodhubError::Config(
                "feed.max_concurrent_fetches must be at least 1".to_string(),
            ));
        }
        if self.scheduler.interval_secs == 0 {
            return Err(PodhubError::Config(
                "scheduler.interval_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.websub.callback_url = "https://podhub.example.org/websub/callback".to_string();
        config
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.database.path, "data/podhub.db");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.file, "logs/podhub.log");

        assert!(config.websub.callback_url.is_empty());
        assert_eq!(config.websub.default_lease_secs, 864_000);
        assert_eq!(config.websub.requested_lease_secs, 864_000);
        assert_eq!(config.websub.hub_timeout_secs, 10);
        assert_eq!(config.websub.max_attempts, 3);
        assert_eq!(config.websub.retry_delay_secs, 5);
        assert_eq!(config.websub.fallback_hubs.len(), 2);
        assert!(config.websub.try_fallback_hubs);
        assert!(!config.websub.require_signature);

        assert_eq!(config.feed.total_timeout_secs, 30);
        assert_eq!(config.feed.max_concurrent_fetches, 5);
        assert!(!config.feed.allow_private_hosts);
        assert!(config.feed.user_agent.starts_with("podhub/"));

        assert!(config.scheduler.enabled);
        assert_eq!(config.scheduler.interval_secs, 3600);
        assert_eq!(config.scheduler.staleness_secs, 21_600);
        assert!(config.scheduler.renew_expiring);
        assert_eq!(config.scheduler.renew_window_secs, 86_400);

        assert!(config.admin.token.is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[server]
host = "127.0.0.1"
port = 9000

[database]
path = "custom/podhub.sqlite"

[logging]
level = "debug"
file = "custom/logs/podhub.log"

[websub]
callback_url = "https://hooks.example.org/websub"
default_lease_secs = 3600
requested_lease_secs = 7200
hub_timeout_secs = 4
max_attempts = 5
retry_delay_secs = 1
fallback_hubs = ["https://hub.example.net/"]
try_fallback_hubs = false
require_signature = true

[feed]
max_concurrent_fetches = 8
allow_private_hosts = true
user_agent = "custom-agent/2"

[scheduler]
enabled = false
interval_secs = 600
staleness_secs = 7200
renew_expiring = false
renew_window_secs = 1800
batch_size = 10

[admin]
token = "s3cr3t"
"#;

        let config = Config::parse(toml).unwrap();

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.database.path, "custom/podhub.sqlite");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.websub.callback_url, "https://hooks.example.org/websub");
        assert_eq!(config.websub.default_lease_secs, 3600);
        assert_eq!(config.websub.requested_lease_secs, 7200);
        assert_eq!(config.websub.hub_timeout_secs, 4);
        assert_eq!(config.websub.max_attempts, 5);
        assert_eq!(config.websub.fallback_hubs, vec!["https://hub.example.net/"]);
        assert!(!config.websub.try_fallback_hubs);
        assert!(config.websub.require_signature);
        assert_eq!(config.feed.max_concurrent_fetches, 8);
        assert!(config.feed.allow_private_hosts);
        assert_eq!(config.feed.user_agent, "custom-agent/2");
        assert!(!config.scheduler.enabled);
        assert_eq!(config.scheduler.batch_size, 10);
        assert_eq!(config.admin.token, "s3cr3t");
    }

    #[test]
    fn test_parse_empty_config() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.database.path, "data/podhub.db");
    }

    #[test]
    fn test_parse_invalid_config() {
        let result = Config::parse("this is not valid toml [[[");
        match result {
            Err(PodhubError::Config(msg)) => assert!(msg.contains("config parse error")),
            other => panic!("Expected Config error, got {:?}", other),
        }
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = Config::load("nonexistent.toml");
        assert!(matches!(result, Err(PodhubError::Io(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("podhub.toml");
        std::fs::write(&path, "[server]\nport = 7000\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.server.port, 7000);
    }

    #[test]
    fn test_apply_env_overrides() {
        let original = std::env::var("PODHUB_ADMIN_TOKEN").ok();
        std::env::set_var("PODHUB_ADMIN_TOKEN", "env-token");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.admin.token, "env-token");

        match original {
            Some(val) => std::env::set_var("PODHUB_ADMIN_TOKEN", val),
            None => std::env::remove_var("PODHUB_ADMIN_TOKEN"),
        }
    }

    #[test]
    fn test_validate_requires_callback_url() {
        let config = Config::default();
        match config.validate() {
            Err(PodhubError::Config(msg)) => assert!(msg.contains("callback_url")),
            other => panic!("Expected Config error, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_non_http_callback() {
        let mut config = valid_config();
        config.websub.callback_url = "ftp://podhub.example.org/callback".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut config = valid_config();
        config.websub.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_ok() {
        assert!(valid_config().validate().is_ok());
    }
}
