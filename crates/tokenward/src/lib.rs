//! # tokenward - Bearer Token Validation
//!
//! Validates bearer tokens issued by an OpenID Connect identity provider
//! (Microsoft Entra ID style authorities by default, any OIDC authority via an
//! explicit override) and returns the validated issuer.
//!
//! ## Architecture
//!
//! - [`authority`] - resolves the expected issuer authority from options
//! - [`audience`] - the effective set of accepted audiences
//! - [`metadata`] - discovery metadata and signing keys, cached per authority
//!   with single-flight refresh
//! - [`jwt`] - token decoding, signature verification and claim checks
//! - [`engine`] - [`Validator`] and the stateless [`validate_token`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tokenward::{Options, Validator, ValidatorConfig};
//!
//! # async fn run(authorization: &str) -> tokenward::Result<()> {
//! let options = Options::for_tenant("https://login.microsoftonline.com/", "contoso.onmicrosoft.com")
//!     .with_audiences(["api://my-api", "my-api-client-id"]);
//! let validator = Validator::configure(&options, ValidatorConfig::default())?;
//!
//! match validator.validate_authorization_header(authorization).await {
//!     Ok(issuer) => println!("accepted token from {issuer}"),
//!     Err(e) => {
//!         // 401 + challenge for token errors, 503 for provider outages
//!         let status = e.http_status();
//!         let challenge = e.www_authenticate();
//!         println!("{status} {challenge:?}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Security
//!
//! - Only asymmetric algorithms from the configured allow-list are accepted;
//!   `none` and HMAC algorithms are always rejected
//! - The header algorithm must fit the key's type and declared algorithm
//! - Discovery and key-set URLs must be HTTPS (plain HTTP only for loopback)
//! - Errors and logs never carry token contents or key material

pub mod audience;
pub mod authority;
pub mod config;
pub mod engine;
pub mod error;
pub mod jwt;
pub mod metadata;
pub mod options;

#[doc(inline)]
pub use audience::AudienceSet;
#[doc(inline)]
pub use authority::Authority;
#[doc(inline)]
pub use config::{DEFAULT_ISSUER_ALIASES, ValidatorConfig};
#[doc(inline)]
pub use engine::{Validator, bearer_token, validate_token};
#[doc(inline)]
pub use error::{ClaimValidationError, Error, ErrorKind, MetadataFetchError, Result};
#[doc(inline)]
pub use jwt::TokenValidator;
#[doc(inline)]
pub use metadata::{
    CacheStats, DiscoveredMetadata, HttpMetadataSource, KeyFamily, Metadata, MetadataCache,
    MetadataSource, SigningKey,
};
#[doc(inline)]
pub use options::Options;
