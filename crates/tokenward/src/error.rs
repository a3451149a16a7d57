//! Error types for token validation
//!
//! Every failure the engine can produce is one variant of [`Error`]. Hosts
//! that only need to report a failure can use [`Error::kind`],
//! [`Error::http_status`] and [`Error::www_authenticate`] without matching on
//! variants.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Token validation errors
#[derive(Debug, Error)]
pub enum Error {
    /// Options are missing or inconsistent; fatal to the call, never retried
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Discovery metadata or the signing-key set could not be obtained
    #[error("metadata fetch failed: {0}")]
    MetadataFetch(#[from] MetadataFetchError),

    /// The token is not a structurally valid compact JWS
    #[error("malformed token: {0}")]
    MalformedToken(String),

    /// No signing key matches the token's key identifier, even after refresh
    #[error("no signing key found for kid {}", kid.as_deref().unwrap_or("<missing>"))]
    UnknownKey {
        /// The `kid` header value, if the token carried one
        kid: Option<String>,
    },

    /// Signature did not verify, or the algorithm is not acceptable for the key
    #[error("signature verification failed: {0}")]
    SignatureVerification(String),

    /// Signature is fine but a registered claim is not acceptable
    #[error(transparent)]
    Claim(#[from] ClaimValidationError),
}

/// Claim check failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClaimValidationError {
    /// `exp` is in the past, beyond the clock-skew allowance
    #[error("token has expired")]
    Expired,

    /// `nbf` or `iat` is in the future, beyond the clock-skew allowance
    #[error("token is not yet valid")]
    NotYetValid,

    /// `iss` does not match the resolved authority
    #[error("issuer mismatch: expected {expected}, found {actual}")]
    IssuerMismatch {
        /// Issuer the token had to carry
        expected: String,
        /// Issuer the token carried
        actual: String,
    },

    /// None of the `aud` values are in the configured audience set
    #[error("token audience is not accepted")]
    AudienceMismatch,

    /// A claim required for validation is absent
    #[error("token is missing the {0} claim")]
    MissingClaim(&'static str),
}

/// Discovery and key-set fetch failures
///
/// `Clone` so that one shared refresh outcome can be handed to every caller
/// waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetadataFetchError {
    /// Transport-level failure (connect, TLS, body read)
    #[error("request to {url} failed: {message}")]
    Http {
        /// Requested URL
        url: String,
        /// Underlying error message
        message: String,
    },

    /// Endpoint answered with a non-success status
    #[error("{url} returned HTTP {status}")]
    Status {
        /// Requested URL
        url: String,
        /// HTTP status code
        status: u16,
    },

    /// Body exceeds the configured size limit
    #[error("response from {url} exceeds {limit} bytes")]
    ResponseTooLarge {
        /// Requested URL
        url: String,
        /// Configured limit in bytes
        limit: usize,
    },

    /// Body is not a usable discovery document or key set
    #[error("invalid document from {url}: {message}")]
    InvalidDocument {
        /// Requested URL
        url: String,
        /// Parse or validation error
        message: String,
    },

    /// URL could not be parsed
    #[error("invalid URL {url}: {message}")]
    InvalidUrl {
        /// Offending URL
        url: String,
        /// Parse error
        message: String,
    },

    /// Plain HTTP to a non-loopback host
    #[error("refusing to fetch metadata over plain HTTP: {0}")]
    InsecureUrl(String),

    /// A fetch attempt or the caller's wait exceeded its deadline
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The background refresh task ended without producing a result
    #[error("metadata refresh aborted: {0}")]
    Aborted(String),
}

impl MetadataFetchError {
    /// Whether another attempt could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { .. } | Self::Timeout(_) | Self::Aborted(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::ResponseTooLarge { .. }
            | Self::InvalidDocument { .. }
            | Self::InvalidUrl { .. }
            | Self::InsecureUrl(_) => false,
        }
    }
}

/// Coarse error classification for reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`Error::Configuration`]
    Configuration,
    /// See [`Error::MetadataFetch`]
    MetadataFetch,
    /// See [`Error::MalformedToken`]
    MalformedToken,
    /// See [`Error::UnknownKey`]
    UnknownKey,
    /// See [`Error::SignatureVerification`]
    SignatureVerification,
    /// [`ClaimValidationError::Expired`]
    Expired,
    /// [`ClaimValidationError::NotYetValid`]
    NotYetValid,
    /// [`ClaimValidationError::IssuerMismatch`]
    IssuerMismatch,
    /// [`ClaimValidationError::AudienceMismatch`]
    AudienceMismatch,
    /// [`ClaimValidationError::MissingClaim`]
    MissingClaim,
}

impl ErrorKind {
    /// Stable name used in logs and host-facing reports
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Configuration => "ConfigurationError",
            Self::MetadataFetch => "MetadataFetchError",
            Self::MalformedToken => "MalformedTokenError",
            Self::UnknownKey => "UnknownKeyError",
            Self::SignatureVerification => "SignatureVerificationError",
            Self::Expired => "ClaimValidationError::Expired",
            Self::NotYetValid => "ClaimValidationError::NotYetValid",
            Self::IssuerMismatch => "ClaimValidationError::IssuerMismatch",
            Self::AudienceMismatch => "ClaimValidationError::AudienceMismatch",
            Self::MissingClaim => "ClaimValidationError::MissingClaim",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a malformed token error
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedToken(message.into())
    }

    /// Create a signature verification error
    pub fn signature(message: impl Into<String>) -> Self {
        Self::SignatureVerification(message.into())
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::MetadataFetch(_) => ErrorKind::MetadataFetch,
            Self::MalformedToken(_) => ErrorKind::MalformedToken,
            Self::UnknownKey { .. } => ErrorKind::UnknownKey,
            Self::SignatureVerification(_) => ErrorKind::SignatureVerification,
            Self::Claim(claim) => match claim {
                ClaimValidationError::Expired => ErrorKind::Expired,
                ClaimValidationError::NotYetValid => ErrorKind::NotYetValid,
                ClaimValidationError::IssuerMismatch { .. } => ErrorKind::IssuerMismatch,
                ClaimValidationError::AudienceMismatch => ErrorKind::AudienceMismatch,
                ClaimValidationError::MissingClaim(_) => ErrorKind::MissingClaim,
            },
        }
    }

    /// Whether the caller may retry the same call later
    ///
    /// Only metadata fetch failures are transient; a token that failed any
    /// other check will fail it again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::MetadataFetch(_))
    }

    /// HTTP status a resource server should answer with
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Configuration(_) => 500,
            Self::MetadataFetch(_) => 503,
            _ => 401,
        }
    }

    /// RFC 6750 `WWW-Authenticate` challenge for token errors
    ///
    /// Returns `None` for server-side failures, where the token itself was
    /// never judged.
    pub fn www_authenticate(&self) -> Option<String> {
        match self {
            Self::Configuration(_) | Self::MetadataFetch(_) => None,
            _ => Some(format!(
                "Bearer error=\"invalid_token\", error_description=\"{}\"",
                self.challenge_description()
            )),
        }
    }

    fn challenge_description(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Expired => "The access token has expired.",
            ErrorKind::NotYetValid => "The access token is not yet valid.",
            ErrorKind::AudienceMismatch => "The access token was not issued for this audience.",
            ErrorKind::IssuerMismatch => "The access token was issued by an untrusted issuer.",
            _ => "The access token is not valid.",
        }
    }
}
