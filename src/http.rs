//! Outbound HTTP helpers shared by hub discovery, hub requests and feed
//! fetching.

use std::net::IpAddr;
use std::time::Duration;

use reqwest::Client;

use crate::config::FeedConfig;
use crate::{PodhubError, Result};

/// Build the shared HTTP client from the feed configuration.
pub fn build_client(config: &FeedConfig) -> Result<Client> {
    Client::builder()
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .read_timeout(Duration::from_secs(config.read_timeout_secs))
        .timeout(Duration::from_secs(config.total_timeout_secs))
        .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
        .user_agent(config.user_agent.as_str())
        .build()
        .map_err(|e| PodhubError::Http(format!("failed to create HTTP client: {}", e)))
}

/// Read a response body, failing once it grows past `max_bytes`.
///
/// The declared `Content-Length` is checked up front; the body is then read
/// chunk by chunk so a lying or absent length cannot exhaust memory.
pub async fn read_body_capped(mut response: reqwest::Response, max_bytes: u64) -> Result<Vec<u8>> {
    if let Some(content_length) = response.content_length() {
        if content_length > max_bytes {
            return Err(PodhubError::Http(format!(
                "response too large: {} bytes (max {} bytes)",
                content_length, max_bytes
            )));
        }
    }

    let mut body = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| PodhubError::Http(format!("failed to read response: {}", e)))?
    {
        if (body.len() + chunk.len()) as u64 > max_bytes {
            return Err(PodhubError::Http(format!(
                "response too large: more than {} bytes",
                max_bytes
            )));
        }
        body.extend_from_slice(&chunk);
    }

    Ok(body)
}

/// Guard against requests to internal infrastructure.
#[derive(Debug, Clone, Copy)]
pub struct UrlPolicy {
    allow_private_hosts: bool,
}

impl UrlPolicy {
    /// Reject loopback, private and reserved hosts.
    pub fn strict() -> Self {
        Self {
            allow_private_hosts: false,
        }
    }

    /// Build from configuration.
    pub fn from_config(config: &FeedConfig) -> Self {
        Self {
            allow_private_hosts: config.allow_private_hosts,
        }
    }

    /// Validate and parse a URL.
    ///
    /// Checks that the scheme is http or https and, unless private hosts are
    /// allowed, that the host is neither a private/loopback address nor a
    /// reserved hostname.
    pub fn check(&self, url: &str) -> Result<url::Url> {
        let parsed =
            url::Url::parse(url).map_err(|e| PodhubError::Validation(format!("invalid URL: {}", e)))?;

        match parsed.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(PodhubError::Validation(format!(
                    "unsupported URL scheme: {}",
                    scheme
                )));
            }
        }

        let host = parsed
            .host()
            .ok_or_else(|| PodhubError::Validation("URL has no host".to_string()))?;

        if self.allow_private_hosts {
            return Ok(parsed);
        }

        match host {
            url::Host::Domain(domain) => {
                if is_forbidden_hostname(domain) {
                    return Err(PodhubError::Validation(format!("forbidden host: {}", domain)));
                }
            }
            url::Host::Ipv4(ipv4) => {
                let ip = IpAddr::V4(ipv4);
                if is_private_ip(&ip) {
                    return Err(PodhubError::Validation(format!(
                        "private IP address not allowed: {}",
                        ip
                    )));
                }
            }
            url::Host::Ipv6(ipv6) => {
                let ip = IpAddr::V6(ipv6);
                if is_private_ip(&ip) {
                    return Err(PodhubError::Validation(format!(
                        "private IP address not allowed: {}",
                        ip
                    )));
                }
            }
        }

        Ok(parsed)
    }
}

fn is_forbidden_hostname(host: &str) -> bool {
    let host_lower = host.to_lowercase();
    if host_lower == "localhost" {
        return true;
    }
    [".local", ".localhost", ".internal", ".intranet", ".lan"]
        .iter()
        .any(|suffix| host_lower.ends_with(suffix))
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => {
            let octets = ipv4.octets();
            ipv4.is_loopback()
                || ipv4.is_private()
                || ipv4.is_link_local()
                || ipv4.is_broadcast()
                || ipv4.is_unspecified()
                || ipv4.is_documentation()
                // Carrier-grade NAT: 100.64.0.0/10
                || (octets[0] == 100 && (64..=127).contains(&octets[1]))
        }
        IpAddr::V6(ipv6) => {
            let segments = ipv6.segments();
            ipv6.is_loopback()
                || ipv6.is_unspecified()
                // Unique local: fc00::/7
                || (segments[0] & 0xfe00) == 0xfc00
                // Link-local: fe80::/10
                || (segments[0] & 0xffc0) == 0xfe80
        }
    }
}

/// One entry of an RFC 8288 `Link` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkValue {
    /// Target URI (between the angle brackets).
    pub uri: String,
    /// Relation types, lowercased.
    pub rels: Vec<String>,
}

impl LinkValue {
    /// Whether this link carries the given relation type.
    pub fn has_rel(&self, rel: &str) -> bool {
        self.rels.iter().any(|r| r.eq_ignore_ascii_case(rel))
    }
}

/// Parse a `Link` header value into its entries.
///
/// Handles several comma-separated links per header, quoted and bare `rel`
/// values, and space-separated relation lists (`rel="hub self"`).
/// Malformed entries are skipped.
pub fn parse_link_header(value: &str) -> Vec<LinkValue> {
    let mut links = Vec::new();
    let mut rest = value;

    while let Some(start) = rest.find('<') {
        let after = &rest[start + 1..];
        let Some(end) = after.find('>') else {
            break;
        };
        let uri = after[..end].trim().to_string();
        let params_and_rest = &after[end + 1..];

        // Parameters run until the next link starts.
        let params_end = params_and_rest.find('<').unwrap_or(params_and_rest.len());
        let params = &params_and_rest[..params_end];

        let mut rels = Vec::new();
        for param in params.split(';') {
            let Some((name, val)) = param.split_once('=') else {
                continue;
            };
            if !name.trim().eq_ignore_ascii_case("rel") {
                continue;
            }
            let val = val.trim().trim_end_matches(',').trim().trim_matches('"');
            rels.extend(val.split_whitespace().map(|r| r.to_lowercase()));
        }

        if !uri.is_empty() {
            links.push(LinkValue { uri, rels });
        }
        rest = &params_and_rest[params_end..];
    }

    links
}

/// Find the first link with the given relation across all `Link` headers.
pub fn find_link_rel<'a, I>(header_values: I, rel: &str) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    header_values
        .into_iter()
        .flat_map(parse_link_header)
        .find(|link| link.has_rel(rel))
        .map(|link| link.uri)
}
