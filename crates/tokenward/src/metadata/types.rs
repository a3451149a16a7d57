//! Discovery metadata and signing keys

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::jwk::Jwk;
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::authority::Authority;

/// OpenID Connect discovery document
///
/// Only the fields the validator needs; everything else is ignored.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct DiscoveryDocument {
    pub(crate) issuer: String,
    pub(crate) jwks_uri: String,
}

/// Key set as served by the `jwks_uri` endpoint
///
/// Keys stay raw JSON so one unusable entry does not reject the whole set.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawKeySet {
    pub(crate) keys: Vec<serde_json::Value>,
}

/// Public-key family of a signing key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyFamily {
    /// `kty: RSA`; RS* and PS* algorithms
    Rsa,
    /// `kty: EC`; ES* algorithms
    Ec,
    /// `kty: OKP`; EdDSA
    Okp,
}

impl KeyFamily {
    fn from_kty(kty: &str) -> Option<Self> {
        match kty {
            "RSA" => Some(Self::Rsa),
            "EC" => Some(Self::Ec),
            "OKP" => Some(Self::Okp),
            _ => None,
        }
    }

    /// Whether `algorithm` can be verified with a key of this family
    pub fn supports(self, algorithm: Algorithm) -> bool {
        match self {
            Self::Rsa => matches!(
                algorithm,
                Algorithm::RS256
                    | Algorithm::RS384
                    | Algorithm::RS512
                    | Algorithm::PS256
                    | Algorithm::PS384
                    | Algorithm::PS512
            ),
            Self::Ec => matches!(algorithm, Algorithm::ES256 | Algorithm::ES384),
            Self::Okp => matches!(algorithm, Algorithm::EdDSA),
        }
    }
}

impl fmt::Display for KeyFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Rsa => "RSA",
            Self::Ec => "EC",
            Self::Okp => "OKP",
        })
    }
}

/// A public signing key from the provider's key set
#[derive(Clone)]
pub struct SigningKey {
    kid: String,
    algorithm: Option<Algorithm>,
    family: KeyFamily,
    key: DecodingKey,
}

// Key material stays out of Debug output
impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .field("family", &self.family)
            .finish_non_exhaustive()
    }
}

impl SigningKey {
    /// Build a signing key from one JWK entry
    ///
    /// Returns `None` for entries that cannot verify signatures: no `kid`,
    /// `use: enc`, unknown key type or algorithm, or unusable key parameters.
    pub fn from_jwk(value: &serde_json::Value) -> Option<Self> {
        let kid = value.get("kid").and_then(|v| v.as_str())?;

        if value.get("use").and_then(|v| v.as_str()) == Some("enc") {
            debug!(kid, "skipping encryption key");
            return None;
        }

        let kty = value.get("kty").and_then(|v| v.as_str()).unwrap_or_default();
        let Some(family) = KeyFamily::from_kty(kty) else {
            debug!(kid, kty, "skipping key with unsupported type");
            return None;
        };

        let algorithm = match value.get("alg").and_then(|v| v.as_str()) {
            Some(alg) => match Algorithm::from_str(alg) {
                Ok(alg) if family.supports(alg) => Some(alg),
                _ => {
                    warn!(kid, alg, kty, "skipping key with unusable algorithm");
                    return None;
                }
            },
            None => None,
        };

        let key = serde_json::from_value::<Jwk>(value.clone())
            .ok()
            .and_then(|jwk| DecodingKey::from_jwk(&jwk).ok());
        let Some(key) = key else {
            warn!(kid, kty, "skipping key with invalid parameters");
            return None;
        };

        Some(Self {
            kid: kid.to_string(),
            algorithm,
            family,
            key,
        })
    }

    /// Key identifier
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Algorithm the key is declared for, if the key set names one
    pub fn algorithm(&self) -> Option<Algorithm> {
        self.algorithm
    }

    /// Key family
    pub fn family(&self) -> KeyFamily {
        self.family
    }

    pub(crate) fn decoding_key(&self) -> &DecodingKey {
        &self.key
    }
}

/// Metadata as returned by a [`MetadataSource`](super::MetadataSource)
#[derive(Debug, Clone)]
pub struct DiscoveredMetadata {
    /// Issuer from the discovery document
    pub issuer: String,
    /// Usable signing keys
    pub keys: Vec<SigningKey>,
    /// Freshness lifetime advertised by the provider, if any
    pub ttl_hint: Option<Duration>,
}

impl DiscoveredMetadata {
    /// Parse a JWK Set document, keeping only usable signing keys
    ///
    /// # Errors
    ///
    /// Returns the JSON error if the document is not a key set at all.
    pub fn parse_key_set(body: &[u8]) -> Result<Vec<SigningKey>, serde_json::Error> {
        let raw: RawKeySet = serde_json::from_slice(body)?;
        Ok(raw.keys.iter().filter_map(SigningKey::from_jwk).collect())
    }
}

/// Immutable snapshot of one authority's discovery metadata
///
/// Snapshots are never modified; a refresh installs a new one.
#[derive(Debug)]
pub struct Metadata {
    authority: Authority,
    issuer: String,
    keys: HashMap<String, Arc<SigningKey>>,
    fetched_at: Instant,
    ttl: Duration,
}

impl Metadata {
    /// Create a snapshot fetched now
    pub fn new(authority: Authority, issuer: String, keys: Vec<SigningKey>, ttl: Duration) -> Self {
        let keys = keys
            .into_iter()
            .map(|key| (key.kid.clone(), Arc::new(key)))
            .collect();
        Self {
            authority,
            issuer,
            keys,
            fetched_at: Instant::now(),
            ttl,
        }
    }

    /// Authority this snapshot belongs to
    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    /// Issuer from the discovery document
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Look up a signing key by identifier
    pub fn key(&self, kid: &str) -> Option<&Arc<SigningKey>> {
        self.keys.get(kid)
    }

    /// Identifiers of all signing keys
    pub fn key_ids(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }

    /// Number of signing keys
    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// Time-to-live of this snapshot
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Time since the snapshot was fetched
    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }

    /// Whether the TTL has not elapsed yet
    pub fn is_fresh(&self) -> bool {
        self.age() < self.ttl
    }

    /// Whether the snapshot expires within `window`
    pub fn expires_within(&self, window: Duration) -> bool {
        self.age() + window >= self.ttl
    }
}
