//! Validator configuration
//!
//! Tunables for the metadata cache and token checks. All fields have
//! production defaults; the `with_*` setters exist for hosts and tests that
//! need something else.

use std::time::Duration;

use jsonwebtoken::Algorithm;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Clock-skew allowance for `exp`, `nbf` and `iat` (default: 30 seconds)
    pub clock_skew: Duration,

    /// Metadata TTL when the provider sends no cache headers (default: 24 hours)
    pub cache_ttl: Duration,

    /// Upper bound for header-provided TTLs (default: 24 hours)
    pub max_cache_ttl: Duration,

    /// Minimum spacing between refreshes of one authority (default: 5 seconds)
    ///
    /// Unknown-key refreshes inside this window reuse the most recent fetch,
    /// and a failed fetch is reported again without touching the network.
    pub min_refresh_interval: Duration,

    /// Timeout for a single fetch attempt (default: 10 seconds)
    pub fetch_timeout: Duration,

    /// How long a validation waits for metadata before giving up (default: 30 seconds)
    pub fetch_deadline: Duration,

    /// Retries after the first failed attempt (default: 3)
    pub max_retries: u32,

    /// Delay before the first retry, doubled each time (default: 100 ms)
    pub initial_backoff: Duration,

    /// Cap on the retry delay (default: 2 seconds)
    pub max_backoff: Duration,

    /// Maximum discovery / key-set body size in bytes (default: 64 KiB)
    pub max_response_size: usize,

    /// Accepted signing algorithms; asymmetric only
    pub allowed_algorithms: Vec<Algorithm>,

    /// Refresh in the background once metadata is this close to expiry
    ///
    /// `None` (the default) refreshes only when metadata has expired or a
    /// token names an unknown key.
    pub refresh_ahead: Option<Duration>,

    /// Hosts that serve as one identity provider
    ///
    /// A discovery issuer on a different host than the authority is only
    /// trusted when both hosts are listed here. Defaults to the Microsoft
    /// Entra ID public cloud hosts.
    pub issuer_aliases: Vec<String>,

    /// Accept v1 tokens on a `/v2.0` authority (default: true)
    ///
    /// A token whose `iss` does not end in `v2.0` is checked against the
    /// issuer of the matching v1 authority.
    pub accept_v1_tokens: bool,
}

/// Microsoft Entra ID public cloud hosts
pub const DEFAULT_ISSUER_ALIASES: &[&str] = &[
    "login.microsoftonline.com",
    "login.windows.net",
    "login.microsoft.com",
    "sts.windows.net",
];

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            clock_skew: Duration::from_secs(30),
            cache_ttl: Duration::from_secs(24 * 3600),
            max_cache_ttl: Duration::from_secs(24 * 3600),
            min_refresh_interval: Duration::from_secs(5),
            fetch_timeout: Duration::from_secs(10),
            fetch_deadline: Duration::from_secs(30),
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            max_response_size: 64 * 1024,
            allowed_algorithms: vec![
                Algorithm::RS256,
                Algorithm::RS384,
                Algorithm::RS512,
                Algorithm::PS256,
                Algorithm::PS384,
                Algorithm::PS512,
                Algorithm::ES256,
                Algorithm::ES384,
            ],
            refresh_ahead: None,
            issuer_aliases: DEFAULT_ISSUER_ALIASES.iter().map(|h| (*h).to_string()).collect(),
            accept_v1_tokens: true,
        }
    }
}

impl ValidatorConfig {
    /// Set the clock-skew allowance
    pub fn with_clock_skew(mut self, skew: Duration) -> Self {
        self.clock_skew = skew;
        self
    }

    /// Set the default metadata TTL
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Set the minimum refresh interval
    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    /// Set the per-attempt fetch timeout
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Set how long validations wait for metadata
    pub fn with_fetch_deadline(mut self, deadline: Duration) -> Self {
        self.fetch_deadline = deadline;
        self
    }

    /// Set the retry policy
    pub fn with_retries(mut self, max_retries: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.initial_backoff = initial_backoff;
        self.max_backoff = max_backoff;
        self
    }

    /// Set accepted algorithms
    ///
    /// # Security Warning
    ///
    /// Only asymmetric algorithms are accepted by [`validate`](Self::validate);
    /// a symmetric algorithm would let anyone holding the public key mint tokens.
    pub fn with_algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.allowed_algorithms = algorithms;
        self
    }

    /// Enable proactive refresh inside `window` before expiry
    pub fn with_refresh_ahead(mut self, window: Duration) -> Self {
        self.refresh_ahead = Some(window);
        self
    }

    /// Replace the issuer alias hosts
    pub fn with_issuer_aliases<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.issuer_aliases = hosts.into_iter().map(Into::into).collect();
        self
    }

    /// Accept or refuse v1 tokens on a `/v2.0` authority
    pub fn with_v1_tokens(mut self, accept: bool) -> Self {
        self.accept_v1_tokens = accept;
        self
    }

    /// Whether `host` is one of the issuer alias hosts
    pub(crate) fn is_issuer_alias(&self, host: &str) -> bool {
        self.issuer_aliases
            .iter()
            .any(|alias| alias.eq_ignore_ascii_case(host))
    }

    /// Set the response size limit
    pub fn with_max_response_size(mut self, bytes: usize) -> Self {
        self.max_response_size = bytes;
        self
    }

    /// Check the configuration for values the engine cannot work with
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] describing the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.fetch_timeout.is_zero() || self.fetch_deadline.is_zero() {
            return Err(Error::configuration("fetch timeout and deadline must be non-zero"));
        }
        if self.cache_ttl.is_zero() {
            return Err(Error::configuration("cache ttl must be non-zero"));
        }
        if self.max_backoff < self.initial_backoff {
            return Err(Error::configuration(
                "max backoff must not be shorter than initial backoff",
            ));
        }
        if self.min_refresh_interval > self.max_cache_ttl {
            return Err(Error::configuration(
                "min refresh interval must not exceed max cache ttl",
            ));
        }
        if self.max_response_size == 0 {
            return Err(Error::configuration("max response size must be non-zero"));
        }
        if self.allowed_algorithms.is_empty() {
            return Err(Error::configuration("at least one algorithm must be allowed"));
        }
        if let Some(alg) = self
            .allowed_algorithms
            .iter()
            .find(|alg| matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512))
        {
            return Err(Error::configuration(format!(
                "symmetric algorithm {alg:?} cannot be used for bearer tokens"
            )));
        }
        Ok(())
    }

    /// Delay before retry number `retry` (1-based)
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Clamp a provider-supplied TTL into the configured bounds
    pub(crate) fn effective_ttl(&self, hint: Option<Duration>) -> Duration {
        match hint {
            Some(ttl) => ttl.max(self.min_refresh_interval).min(self.max_cache_ttl),
            None => self.cache_ttl,
        }
    }
}
