//! Bearer token validation pipeline
//!
//! ```text
//! Decoded ──► KeyResolved ──► SignatureVerified ──► ClaimsValidated ──► Accepted
//!    │             │                  │                    │
//!    └─────────────┴──────────────────┴────────────────────┴──► Rejected(Error)
//! ```
//!
//! The only network activity is the metadata lookup in the key resolution
//! step, plus at most one refresh when the token names an unknown key.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::errors::ErrorKind as JwtErrorKind;
use jsonwebtoken::{Algorithm, Validation, decode};
use tracing::debug;

use super::token::{Claims, DecodedToken};
use crate::audience::AudienceSet;
use crate::authority::Authority;
use crate::config::ValidatorConfig;
use crate::error::{ClaimValidationError, Error, Result};
use crate::metadata::{Metadata, MetadataCache, SigningKey};

const TENANT_TEMPLATE: &str = "{tenantid}";

/// Validates bearer tokens for one authority and audience set
#[derive(Debug, Clone)]
pub struct TokenValidator {
    authority: Authority,
    audiences: AudienceSet,
    cache: MetadataCache,
}

impl TokenValidator {
    /// Create a validator over a shared metadata cache
    pub fn new(authority: Authority, audiences: AudienceSet, cache: MetadataCache) -> Self {
        Self {
            authority,
            audiences,
            cache,
        }
    }

    /// Authority tokens must be issued by
    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    /// Accepted audiences
    pub fn audiences(&self) -> &AudienceSet {
        &self.audiences
    }

    /// Metadata cache used for key lookups
    pub fn cache(&self) -> &MetadataCache {
        &self.cache
    }

    /// Validate a compact JWS and return its issuer
    ///
    /// `deadline` bounds each wait for metadata.
    ///
    /// # Errors
    ///
    /// The first failing check, as described on [`Error`].
    pub async fn validate(&self, token: &str, deadline: Duration) -> Result<String> {
        let decoded = DecodedToken::parse(token)?;
        let algorithm = self.allowed_algorithm(&decoded)?;

        let (metadata, key) = self.resolve_key(&decoded, deadline).await?;
        verify_signature(&decoded, algorithm, &key)?;

        let config = self.cache.config();
        check_lifetime(&decoded.claims, unix_now(), config.clock_skew)?;
        let issuer = match check_issuer(&decoded.claims, &self.authority, &metadata, config) {
            Ok(issuer) => issuer,
            Err(mismatch @ ClaimValidationError::IssuerMismatch { .. }) => self
                .check_v1_issuer(&decoded.claims, deadline)
                .await
                .ok_or(mismatch)?,
            Err(e) => return Err(e.into()),
        };
        check_audience(&decoded.claims, &self.audiences)?;

        debug!(
            authority = %self.authority,
            kid = key.kid(),
            algorithm = ?algorithm,
            "token accepted"
        );
        Ok(issuer)
    }

    /// Issuer check against the v1 authority, for tokens whose `iss` is not
    /// a v2.0 issuer
    async fn check_v1_issuer(&self, claims: &Claims, deadline: Duration) -> Option<String> {
        let config = self.cache.config();
        let iss = claims.iss.as_deref()?;
        if !config.accept_v1_tokens || is_v2_issuer(iss) {
            return None;
        }
        let v1 = self.authority.v1()?;

        match self.cache.get_with_deadline(&v1, deadline).await {
            Ok(metadata) => check_issuer(claims, &v1, &metadata, config).ok(),
            Err(e) => {
                debug!(authority = %v1, error = %e, "v1 metadata unavailable");
                None
            }
        }
    }

    fn allowed_algorithm(&self, decoded: &DecodedToken<'_>) -> Result<Algorithm> {
        let algorithm = decoded.algorithm()?;
        if !self.cache.config().allowed_algorithms.contains(&algorithm) {
            return Err(Error::signature(format!(
                "algorithm {algorithm:?} is not allowed"
            )));
        }
        Ok(algorithm)
    }

    async fn resolve_key(
        &self,
        decoded: &DecodedToken<'_>,
        deadline: Duration,
    ) -> Result<(Arc<Metadata>, Arc<SigningKey>)> {
        let Some(kid) = decoded.header.kid.as_deref() else {
            return Err(Error::UnknownKey { kid: None });
        };

        let metadata = self
            .cache
            .get_with_deadline(&self.authority, deadline)
            .await?;
        if let Some(key) = metadata.key(kid) {
            return Ok((Arc::clone(&metadata), Arc::clone(key)));
        }

        debug!(authority = %self.authority, kid, "unknown key id, refreshing metadata");
        let refreshed = self
            .cache
            .refresh_for_unknown_key(&self.authority, &metadata, deadline)
            .await?;
        match refreshed.key(kid) {
            Some(key) => Ok((Arc::clone(&refreshed), Arc::clone(key))),
            None => Err(Error::UnknownKey {
                kid: Some(kid.to_string()),
            }),
        }
    }
}

fn verify_signature(
    decoded: &DecodedToken<'_>,
    algorithm: Algorithm,
    key: &SigningKey,
) -> Result<()> {
    if !key.family().supports(algorithm) {
        return Err(Error::signature(format!(
            "algorithm {algorithm:?} cannot be used with a {} key",
            key.family()
        )));
    }
    if let Some(declared) = key.algorithm()
        && declared != algorithm
    {
        return Err(Error::signature(format!(
            "algorithm {algorithm:?} does not match the key's declared {declared:?}"
        )));
    }

    // Claims are checked separately with their own error mapping
    let mut validation = Validation::new(algorithm);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    decode::<serde::de::IgnoredAny>(decoded.raw, key.decoding_key(), &validation)
        .map(|_| ())
        .map_err(|e| match e.kind() {
            JwtErrorKind::InvalidToken
            | JwtErrorKind::Base64(_)
            | JwtErrorKind::Json(_)
            | JwtErrorKind::Utf8(_) => Error::malformed(e.to_string()),
            _ => Error::signature(e.to_string()),
        })
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as i64)
}

/// `exp` is required; `nbf` and `iat` are checked when present
pub(crate) fn check_lifetime(
    claims: &Claims,
    now: i64,
    skew: Duration,
) -> std::result::Result<(), ClaimValidationError> {
    let skew = skew.as_secs() as i64;

    let exp = claims.exp.ok_or(ClaimValidationError::MissingClaim("exp"))?;
    if now >= exp.saturating_add(skew) {
        return Err(ClaimValidationError::Expired);
    }

    for not_before in [claims.nbf, claims.iat].into_iter().flatten() {
        if not_before.saturating_sub(skew) > now {
            return Err(ClaimValidationError::NotYetValid);
        }
    }
    Ok(())
}

/// Accept the authority itself, the discovery issuer, or the discovery
/// issuer's `{tenantid}` template instantiated with the token's tenant
///
/// The discovery issuer is only trusted on the authority's own origin, or on
/// a host that is an alias of the authority's host.
pub(crate) fn check_issuer(
    claims: &Claims,
    authority: &Authority,
    metadata: &Metadata,
    config: &ValidatorConfig,
) -> std::result::Result<String, ClaimValidationError> {
    let iss = claims
        .iss
        .as_deref()
        .ok_or(ClaimValidationError::MissingClaim("iss"))?;

    if authority.matches_issuer(iss) {
        return Ok(iss.to_string());
    }

    let discovered = metadata.issuer();
    if trusted_origin(authority, discovered, config) {
        if same_issuer(discovered, iss) {
            return Ok(iss.to_string());
        }
        if let Some(expected) = instantiate_template(discovered, claims, iss)
            && same_issuer(&expected, iss)
        {
            return Ok(iss.to_string());
        }
    }

    Err(ClaimValidationError::IssuerMismatch {
        expected: authority.to_string(),
        actual: iss.to_string(),
    })
}

fn same_issuer(expected: &str, actual: &str) -> bool {
    expected.strip_suffix('/').unwrap_or(expected) == actual.strip_suffix('/').unwrap_or(actual)
}

/// Same scheme, host and port as the authority, or both hosts are aliases
fn trusted_origin(authority: &Authority, issuer: &str, config: &ValidatorConfig) -> bool {
    let (Ok(expected), Ok(actual)) = (url::Url::parse(authority.as_str()), url::Url::parse(issuer))
    else {
        return false;
    };
    let (Some(expected_host), Some(actual_host)) = (expected.host_str(), actual.host_str()) else {
        return false;
    };

    if expected.origin() == actual.origin() {
        return true;
    }
    config.is_issuer_alias(expected_host) && config.is_issuer_alias(actual_host)
}

fn is_v2_issuer(iss: &str) -> bool {
    let trimmed = iss.trim_end_matches('/');
    trimmed
        .len()
        .checked_sub("v2.0".len())
        .and_then(|cut| trimmed.get(cut..))
        .is_some_and(|suffix| suffix.eq_ignore_ascii_case("v2.0"))
}

/// Replace a case-insensitive `{tenantid}` placeholder with the token's
/// tenant: `tid`, then `tenantid`, then the tenant segment of `iss`
fn instantiate_template(template: &str, claims: &Claims, iss: &str) -> Option<String> {
    let start = template.to_ascii_lowercase().find(TENANT_TEMPLATE)?;
    let tenant = claims
        .tid
        .as_deref()
        .or(claims.tenantid.as_deref())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .or_else(|| {
            Authority::new(iss)
                .ok()
                .and_then(|a| a.tenant().map(str::to_string))
        })?;

    let end = start + TENANT_TEMPLATE.len();
    Some(format!("{}{tenant}{}", &template[..start], &template[end..]))
}

pub(crate) fn check_audience(
    claims: &Claims,
    audiences: &AudienceSet,
) -> std::result::Result<(), ClaimValidationError> {
    let aud = claims
        .aud
        .as_ref()
        .ok_or(ClaimValidationError::MissingClaim("aud"))?;
    if audiences.intersects(aud.values()) {
        Ok(())
    } else {
        Err(ClaimValidationError::AudienceMismatch)
    }
}
