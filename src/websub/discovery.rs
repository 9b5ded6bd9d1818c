//! Hub discovery.
//!
//! Looks for a hub in the feed's `Link` response headers, then in
//! `<atom:link rel="hub">` and `<link rel="hub">` elements of the body, and
//! finally checks a short list of public hubs. Discovery is best-effort:
//! every failure reads as "no hub".

use std::time::Duration;

use regex::Regex;
use reqwest::header::LINK;
use reqwest::Client;
use tracing::{debug, info};

use crate::config::{FeedConfig, WebSubConfig};
use crate::http::{find_link_rel, read_body_capped, UrlPolicy};
use crate::{PodhubError, Result};

/// Where a hub was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubSource {
    LinkHeader,
    AtomLink,
    HtmlLink,
    Fallback,
}

/// A discovered hub endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredHub {
    pub url: String,
    pub source: HubSource,
}

/// `rel="hub"` element patterns, each in both attribute orders.
struct HubPatterns {
    atom_rel_first: Regex,
    atom_href_first: Regex,
    link_rel_first: Regex,
    link_href_first: Regex,
}

impl HubPatterns {
    fn new() -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| PodhubError::Config(format!("invalid hub pattern: {}", e)))
        };
        Ok(Self {
            atom_rel_first: compile(
                r#"(?i)<atom:link\s[^>]*rel=["']hub["'][^>]*href=["']([^"']+)["']"#,
            )?,
            atom_href_first: compile(
                r#"(?i)<atom:link\s[^>]*href=["']([^"']+)["'][^>]*rel=["']hub["']"#,
            )?,
            link_rel_first: compile(r#"(?i)<link\s[^>]*rel=["']hub["'][^>]*href=["']([^"']+)["']"#)?,
            link_href_first: compile(
                r#"(?i)<link\s[^>]*href=["']([^"']+)["'][^>]*rel=["']hub["']"#,
            )?,
        })
    }

    fn first_match(first: &Regex, second: &Regex, body: &str) -> Option<String> {
        first
            .captures(body)
            .or_else(|| second.captures(body))
            .and_then(|cap| cap.get(1))
            .map(|m| m.as_str().trim().to_string())
    }
}

/// Finds the hub a topic is published through.
pub struct HubDiscoverer {
    client: Client,
    policy: UrlPolicy,
    fallback_hubs: Vec<String>,
    liveness_timeout: Duration,
    max_body_bytes: u64,
    patterns: HubPatterns,
}

impl HubDiscoverer {
    /// Create a discoverer. Fallback probing is disabled when
    /// `websub.try_fallback_hubs` is false.
    pub fn new(client: Client, websub: &WebSubConfig, feed: &FeedConfig) -> Result<Self> {
        let fallback_hubs = if websub.try_fallback_hubs {
            websub.fallback_hubs.clone()
        } else {
            Vec::new()
        };

        Ok(Self {
            client,
            policy: UrlPolicy::from_config(feed),
            fallback_hubs,
            liveness_timeout: Duration::from_secs(websub.hub_timeout_secs),
            max_body_bytes: feed.max_feed_size_bytes,
            patterns: HubPatterns::new()?,
        })
    }

    /// Discover the hub for `topic`, or `None` if push is unavailable.
    pub async fn discover(&self, topic: &str) -> Option<DiscoveredHub> {
        match self.discover_advertised(topic).await {
            Ok(Some(hub)) => {
                info!(topic = %topic, hub = %hub.url, source = ?hub.source, "Hub discovered");
                return Some(hub);
            }
            Ok(None) => debug!(topic = %topic, "Feed advertises no hub"),
            Err(e) => {
                debug!(topic = %topic, "Hub discovery fetch failed: {}", e);
                return None;
            }
        }

        for hub in &self.fallback_hubs {
            if self.is_alive(hub).await {
                info!(topic = %topic, hub = %hub, "Using fallback hub");
                return Some(DiscoveredHub {
                    url: hub.clone(),
                    source: HubSource::Fallback,
                });
            }
        }

        None
    }

    /// Fetch the topic once and look for an advertised hub.
    async fn discover_advertised(&self, topic: &str) -> Result<Option<DiscoveredHub>> {
        let base = self.policy.check(topic)?;

        let response = self
            .client
            .get(base.clone())
            .send()
            .await
            .map_err(|e| PodhubError::Http(format!("failed to fetch topic: {}", e)))?;

        if !response.status().is_success() {
            return Err(PodhubError::Http(format!("HTTP error: {}", response.status())));
        }

        let link_headers: Vec<String> = response
            .headers()
            .get_all(LINK)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect();

        let body = read_body_capped(response, self.max_body_bytes).await?;
        let body = String::from_utf8_lossy(&body);

        Ok(self.find_hub(&link_headers, &body, &base))
    }

    /// Inspect headers and body in priority order. Relative hrefs are
    /// resolved against `base`.
    pub fn find_hub(
        &self,
        link_headers: &[String],
        body: &str,
        base: &url::Url,
    ) -> Option<DiscoveredHub> {
        let resolve = |href: String| base.join(&href).ok().map(|u| u.to_string());
        let p = &self.patterns;

        if let Some(url) = find_link_rel(link_headers.iter().map(String::as_str), "hub").and_then(resolve) {
            return Some(DiscoveredHub {
                url,
                source: HubSource::LinkHeader,
            });
        }

        if let Some(url) =
            HubPatterns::first_match(&p.atom_rel_first, &p.atom_href_first, body).and_then(resolve)
        {
            return Some(DiscoveredHub {
                url,
                source: HubSource::AtomLink,
            });
        }

        HubPatterns::first_match(&p.link_rel_first, &p.link_href_first, body)
            .and_then(resolve)
            .map(|url| DiscoveredHub {
                url,
                source: HubSource::HtmlLink,
            })
    }

    /// Lightweight liveness check: any response below 500 counts as alive.
    async fn is_alive(&self, hub: &str) -> bool {
        if self.policy.check(hub).is_err() {
            return false;
        }
        match self.client.get(hub).timeout(self.liveness_timeout).send().await {
            Ok(response) => {
                let alive = response.status().as_u16() < 500;
                debug!(hub = %hub, status = response.status().as_u16(), alive, "Checked fallback hub");
                alive
            }
            Err(e) => {
                debug!(hub = %hub, "Fallback hub check failed: {}", e);
                false
            }
        }
    }
}
