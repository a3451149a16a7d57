//! Metadata sources
//!
//! A [`MetadataSource`] performs one discovery + key-set fetch for an
//! authority. Retries, caching and coalescing live in the cache; sources only
//! do the I/O.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::types::{DiscoveredMetadata, DiscoveryDocument};
use crate::authority::Authority;
use crate::config::ValidatorConfig;
use crate::error::MetadataFetchError;

/// One-shot fetch of an authority's discovery metadata and signing keys
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Fetch the discovery document and the key set it points to
    async fn fetch(&self, authority: &Authority) -> Result<DiscoveredMetadata, MetadataFetchError>;
}

/// Fetches metadata over HTTPS with `reqwest`
///
/// - Plain HTTP is only allowed for loopback hosts
/// - Redirects are not followed
/// - Bodies larger than the configured limit are rejected
/// - `Cache-Control: max-age` becomes the TTL hint
#[derive(Debug, Clone)]
pub struct HttpMetadataSource {
    client: reqwest::Client,
    max_response_size: usize,
}

impl HttpMetadataSource {
    /// Create a source using the timeout and size limit from `config`
    ///
    /// # Errors
    ///
    /// [`MetadataFetchError::Http`] if the HTTP client cannot be built.
    pub fn new(config: &ValidatorConfig) -> Result<Self, MetadataFetchError> {
        let client = reqwest::Client::builder()
            .timeout(config.fetch_timeout)
            .user_agent(concat!("tokenward/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| MetadataFetchError::Http {
                url: String::new(),
                message: format!("failed to create HTTP client: {e}"),
            })?;

        Ok(Self::with_client(client, config.max_response_size))
    }

    /// Use a preconfigured client
    pub fn with_client(client: reqwest::Client, max_response_size: usize) -> Self {
        Self {
            client,
            max_response_size,
        }
    }

    async fn get(&self, url: &str) -> Result<(bytes::Bytes, Option<Duration>), MetadataFetchError> {
        ensure_secure(url)?;

        let mut response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| transport_error(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MetadataFetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let ttl_hint = response
            .headers()
            .get(reqwest::header::CACHE_CONTROL)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_cache_control);

        if let Some(content_length) = response.content_length()
            && content_length > self.max_response_size as u64
        {
            return Err(MetadataFetchError::ResponseTooLarge {
                url: url.to_string(),
                limit: self.max_response_size,
            });
        }

        // Content-Length may be absent, so the limit is enforced while reading
        let mut body = bytes::BytesMut::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| transport_error(url, &e))?
        {
            if body.len() + chunk.len() > self.max_response_size {
                return Err(MetadataFetchError::ResponseTooLarge {
                    url: url.to_string(),
                    limit: self.max_response_size,
                });
            }
            body.extend_from_slice(&chunk);
        }

        Ok((body.freeze(), ttl_hint))
    }
}

#[async_trait]
impl MetadataSource for HttpMetadataSource {
    async fn fetch(&self, authority: &Authority) -> Result<DiscoveredMetadata, MetadataFetchError> {
        let discovery_url = authority.discovery_url();
        debug!(url = %discovery_url, "fetching discovery document");

        let (body, discovery_ttl) = self.get(&discovery_url).await?;
        let document: DiscoveryDocument =
            serde_json::from_slice(&body).map_err(|e| MetadataFetchError::InvalidDocument {
                url: discovery_url.clone(),
                message: e.to_string(),
            })?;

        if document.issuer.is_empty() || document.jwks_uri.is_empty() {
            return Err(MetadataFetchError::InvalidDocument {
                url: discovery_url,
                message: "issuer and jwks_uri must be non-empty".to_string(),
            });
        }

        debug!(url = %document.jwks_uri, "fetching signing keys");
        let (body, keys_ttl) = self.get(&document.jwks_uri).await?;
        let keys = DiscoveredMetadata::parse_key_set(&body).map_err(|e| {
            MetadataFetchError::InvalidDocument {
                url: document.jwks_uri.clone(),
                message: e.to_string(),
            }
        })?;

        // The shorter of the two lifetimes wins
        let ttl_hint = match (discovery_ttl, keys_ttl) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        Ok(DiscoveredMetadata {
            issuer: document.issuer,
            keys,
            ttl_hint,
        })
    }
}

fn transport_error(url: &str, error: &reqwest::Error) -> MetadataFetchError {
    MetadataFetchError::Http {
        url: url.to_string(),
        message: error.to_string(),
    }
}

/// Reject anything but HTTPS, except plain HTTP to loopback for local testing
pub(crate) fn ensure_secure(raw: &str) -> Result<(), MetadataFetchError> {
    let url = url::Url::parse(raw).map_err(|e| MetadataFetchError::InvalidUrl {
        url: raw.to_string(),
        message: e.to_string(),
    })?;

    match url.scheme() {
        "https" => Ok(()),
        "http" if is_loopback(&url) => Ok(()),
        _ => Err(MetadataFetchError::InsecureUrl(raw.to_string())),
    }
}

fn is_loopback(url: &url::Url) -> bool {
    match url.host() {
        Some(url::Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(url::Host::Ipv4(ip)) => IpAddr::V4(ip).is_loopback(),
        Some(url::Host::Ipv6(ip)) => IpAddr::V6(ip).is_loopback(),
        None => false,
    }
}

/// TTL hint from a `Cache-Control` header value
///
/// `no-store` and `no-cache` map to zero; the cache clamps that up to its
/// minimum refresh interval.
pub(crate) fn parse_cache_control(value: &str) -> Option<Duration> {
    let directives: Vec<&str> = value.split(',').map(str::trim).collect();

    if directives
        .iter()
        .any(|d| d.eq_ignore_ascii_case("no-store") || d.eq_ignore_ascii_case("no-cache"))
    {
        return Some(Duration::ZERO);
    }

    directives.iter().find_map(|directive| {
        let (name, value) = directive.split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("max-age") {
            return None;
        }
        value
            .trim()
            .trim_matches('"')
            .parse::<u64>()
            .ok()
            .map(Duration::from_secs)
    })
}
