//! Validation entry points
//!
//! [`Validator`] is configured once and validates many tokens.
//! [`validate_token`] is the stateless form: it resolves a transient
//! configuration per call and shares only the metadata cache.

use std::time::Duration;

use tracing::{debug, warn};

use crate::audience::AudienceSet;
use crate::authority::Authority;
use crate::config::ValidatorConfig;
use crate::error::{Error, Result};
use crate::jwt::TokenValidator;
use crate::metadata::MetadataCache;
use crate::options::Options;

/// A configured token validator
///
/// Cheap to clone; clones share the metadata cache.
///
/// # Example
///
/// ```rust,no_run
/// use tokenward::{Options, Validator, ValidatorConfig};
///
/// # async fn run() -> tokenward::Result<()> {
/// let options = Options::for_tenant("https://login.microsoftonline.com/", "contoso.onmicrosoft.com")
///     .with_audience("api://a88bb933-319c-41b5-9f04-eff36d985612");
/// let validator = Validator::configure(&options, ValidatorConfig::default())?;
///
/// let issuer = validator.validate("eyJ0eXAiOiJKV1Qi...").await?;
/// println!("token issued by {issuer}");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Validator {
    tokens: TokenValidator,
}

impl Validator {
    /// Resolve authority and audiences and create a dedicated metadata cache
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] if the options or the config are incomplete or
    /// inconsistent, [`Error::MetadataFetch`] if the HTTP client cannot be
    /// built.
    pub fn configure(options: &Options, config: ValidatorConfig) -> Result<Self> {
        let authority = Authority::resolve(options)?;
        let audiences = AudienceSet::resolve(options)?;
        let cache = MetadataCache::new(config)?;
        Ok(Self::from_parts(authority, audiences, cache))
    }

    /// Resolve authority and audiences over an existing cache
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] if the options are incomplete.
    pub fn with_cache(options: &Options, cache: MetadataCache) -> Result<Self> {
        let authority = Authority::resolve(options)?;
        let audiences = AudienceSet::resolve(options)?;
        Ok(Self::from_parts(authority, audiences, cache))
    }

    fn from_parts(authority: Authority, audiences: AudienceSet, cache: MetadataCache) -> Self {
        debug!(
            authority = %authority,
            audiences = audiences.len(),
            "validator configured"
        );
        Self {
            tokens: TokenValidator::new(authority, audiences, cache),
        }
    }

    /// Resolved authority
    pub fn authority(&self) -> &Authority {
        self.tokens.authority()
    }

    /// Effective audience set
    pub fn audiences(&self) -> &AudienceSet {
        self.tokens.audiences()
    }

    /// Shared metadata cache
    pub fn cache(&self) -> &MetadataCache {
        self.tokens.cache()
    }

    /// Validate a compact token and return its issuer
    ///
    /// # Errors
    ///
    /// See [`Error`]; only [`Error::MetadataFetch`] is worth retrying.
    pub async fn validate(&self, token: &str) -> Result<String> {
        let deadline = self.cache().config().fetch_deadline;
        self.validate_with_deadline(token, deadline).await
    }

    /// Validate with a caller-supplied bound on metadata waits
    ///
    /// # Errors
    ///
    /// See [`Error`]. A passed deadline is [`Error::MetadataFetch`].
    pub async fn validate_with_deadline(&self, token: &str, deadline: Duration) -> Result<String> {
        self.tokens
            .validate(token, deadline)
            .await
            .inspect_err(|e| log_rejection(self.authority(), e))
    }

    /// Validate the value of an HTTP `Authorization` header
    ///
    /// # Errors
    ///
    /// [`Error::MalformedToken`] if the header is not `Bearer <token>`,
    /// otherwise as [`validate`](Self::validate).
    pub async fn validate_authorization_header(&self, header: &str) -> Result<String> {
        let token = bearer_token(header).inspect_err(|e| log_rejection(self.authority(), e))?;
        self.validate(token).await
    }
}

/// Validate a token against an instance + tenant without a configured validator
///
/// Resolves authority and audience per call; metadata comes from `cache`, so
/// repeated calls for the same authority do not refetch.
///
/// # Errors
///
/// [`Error::Configuration`] for empty arguments, otherwise as
/// [`Validator::validate`].
pub async fn validate_token(
    cache: &MetadataCache,
    instance: &str,
    tenant: &str,
    audience: &str,
    token: &str,
) -> Result<String> {
    let options = Options::for_tenant(instance, tenant).with_audience(audience);
    let validator = Validator::with_cache(&options, cache.clone())?;
    validator.validate(token).await
}

/// Extract the token from `Bearer <token>`; the scheme is case-insensitive
///
/// # Errors
///
/// [`Error::MalformedToken`] for any other shape.
pub fn bearer_token(header: &str) -> Result<&str> {
    let mut parts = header.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(scheme), Some(token), None) if scheme.eq_ignore_ascii_case("bearer") => Ok(token),
        (Some(scheme), Some(_), None) => Err(Error::malformed(format!(
            "unsupported authorization scheme {scheme:?}"
        ))),
        _ => Err(Error::malformed(
            "authorization header must have the form: Bearer <token>",
        )),
    }
}

fn log_rejection(authority: &Authority, error: &Error) {
    warn!(authority = %authority, kind = %error.kind(), "token rejected");
}
