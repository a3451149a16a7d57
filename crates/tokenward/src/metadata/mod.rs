//! OpenID discovery metadata
//!
//! ```text
//! Authority ──► {authority}/.well-known/openid-configuration
//!                   │  issuer, jwks_uri
//!                   ▼
//!               jwks_uri ──► signing keys
//!                   │
//!                   ▼
//!               Metadata snapshot (issuer, keys by kid, TTL)
//! ```
//!
//! - [`MetadataSource`] does one fetch; [`HttpMetadataSource`] is the default
//! - [`MetadataCache`] caches snapshots per authority, retries failed fetches
//!   and coalesces concurrent refreshes

mod cache;
mod source;
mod types;

pub use cache::{CacheStats, MetadataCache};
pub use source::{HttpMetadataSource, MetadataSource};
pub use types::{DiscoveredMetadata, KeyFamily, Metadata, SigningKey};
