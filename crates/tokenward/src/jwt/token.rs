//! Compact JWS decoding
//!
//! Splits a token into its segments and parses the header and payload without
//! verifying anything. Verification happens in the validator once a key has
//! been selected.

use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::Algorithm;
use serde::{Deserialize, Deserializer};

use crate::error::{Error, Result};

/// Upper bound on the compact token length
pub(crate) const MAX_TOKEN_LENGTH: usize = 16 * 1024;

/// JOSE header fields the validator looks at
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TokenHeader {
    pub(crate) alg: String,
    #[serde(default)]
    pub(crate) kid: Option<String>,
}

/// `aud` is either a single string or an array of strings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub(crate) enum AudienceClaim {
    One(String),
    Many(Vec<String>),
}

impl AudienceClaim {
    pub(crate) fn values(&self) -> impl Iterator<Item = &str> {
        let values: &[String] = match self {
            Self::One(aud) => std::slice::from_ref(aud),
            Self::Many(auds) => auds,
        };
        values.iter().map(String::as_str)
    }
}

/// Registered claims plus the tenant claims used for template issuers
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct Claims {
    #[serde(default)]
    pub(crate) iss: Option<String>,
    #[serde(default)]
    pub(crate) aud: Option<AudienceClaim>,
    #[serde(default, deserialize_with = "numeric_date")]
    pub(crate) exp: Option<i64>,
    #[serde(default, deserialize_with = "numeric_date")]
    pub(crate) nbf: Option<i64>,
    #[serde(default, deserialize_with = "numeric_date")]
    pub(crate) iat: Option<i64>,
    #[serde(default)]
    pub(crate) tid: Option<String>,
    #[serde(default)]
    pub(crate) tenantid: Option<String>,
}

/// A token split and parsed, signature not yet checked
#[derive(Debug)]
pub(crate) struct DecodedToken<'a> {
    pub(crate) raw: &'a str,
    pub(crate) header: TokenHeader,
    pub(crate) claims: Claims,
}

impl<'a> DecodedToken<'a> {
    /// Split and parse a compact JWS
    ///
    /// # Errors
    ///
    /// [`Error::MalformedToken`] unless the token has exactly three non-empty
    /// base64url segments whose first two are JSON objects.
    pub(crate) fn parse(raw: &'a str) -> Result<Self> {
        if raw.is_empty() {
            return Err(Error::malformed("token is empty"));
        }
        if raw.len() > MAX_TOKEN_LENGTH {
            return Err(Error::malformed(format!(
                "token exceeds {MAX_TOKEN_LENGTH} bytes"
            )));
        }

        let mut segments = raw.split('.');
        let (Some(header), Some(payload), Some(signature), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(Error::malformed("token must have exactly three segments"));
        };

        if header.is_empty() || payload.is_empty() || signature.is_empty() {
            return Err(Error::malformed("token segments must be non-empty"));
        }

        Ok(Self {
            raw,
            header: decode_segment(header, "header")?,
            claims: decode_segment(payload, "payload")?,
        })
    }

    /// Header algorithm, if it names one `jsonwebtoken` knows
    pub(crate) fn algorithm(&self) -> Result<Algorithm> {
        Algorithm::from_str(&self.header.alg).map_err(|_| {
            Error::signature(format!("unsupported algorithm {:?}", self.header.alg))
        })
    }
}

fn decode_segment<T: for<'de> Deserialize<'de>>(segment: &str, name: &str) -> Result<T> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| Error::malformed(format!("{name} is not base64url: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| Error::malformed(format!("{name} is not valid JSON: {e}")))
}

/// NumericDate per RFC 7519; fractional seconds are truncated
fn numeric_date<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Number>::deserialize(deserializer)?;
    Ok(value.and_then(|n| n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))))
}
