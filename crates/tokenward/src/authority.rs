//! Authority resolution
//!
//! The authority is the issuer base URL tokens are validated against and the
//! key under which discovery metadata is cached. It is either the explicit
//! override from [`Options::authority`] or `{instance}/{tenant}/v2.0`.

use std::fmt;

use crate::error::{Error, Result};
use crate::options::Options;

const VERSION_SUFFIX: &str = "v2.0";
const DISCOVERY_PATH: &str = "/.well-known/openid-configuration";
const V2_SUFFIX: &str = "/v2.0";
const MULTI_TENANT_SEGMENTS: &[&str] = &["common", "organizations", "consumers"];

/// A resolved issuer authority
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Authority(String);

impl Authority {
    /// Resolve the authority from options
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] when there is no non-empty override and the
    /// instance + tenant pair is incomplete.
    pub fn resolve(options: &Options) -> Result<Self> {
        if let Some(authority) = options.authority.as_deref().filter(|a| !a.trim().is_empty()) {
            return Self::new(authority);
        }

        let instance = options
            .instance
            .as_deref()
            .map(|i| i.trim().trim_end_matches('/'))
            .filter(|i| !i.is_empty());
        let tenant = options
            .tenant_id
            .as_deref()
            .map(|t| t.trim().trim_matches('/'))
            .filter(|t| !t.is_empty());

        match (instance, tenant) {
            (Some(instance), Some(tenant)) => Ok(Self(format!(
                "{instance}/{tenant}/{VERSION_SUFFIX}"
            ))),
            (None, None) => Err(Error::configuration(
                "either an authority or both instance and tenant id must be set",
            )),
            (None, Some(_)) => Err(Error::configuration("instance is required with tenant id")),
            (Some(_), None) => Err(Error::configuration("tenant id is required with instance")),
        }
    }

    /// Use an explicit authority, trimming whitespace and trailing separators
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] if nothing is left after trimming.
    pub fn new(authority: &str) -> Result<Self> {
        let trimmed = authority.trim().trim_end_matches('/').trim_end();
        if trimmed.is_empty() {
            return Err(Error::configuration("authority must not be empty"));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// The authority URL
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// OpenID Connect discovery endpoint for this authority
    pub fn discovery_url(&self) -> String {
        format!("{}{DISCOVERY_PATH}", self.0)
    }

    /// Tenant path segment, for `{instance}/{tenant}[/v2.0]` shaped authorities
    pub fn tenant(&self) -> Option<&str> {
        let base = self
            .0
            .strip_suffix(VERSION_SUFFIX)
            .and_then(|b| b.strip_suffix('/'))
            .unwrap_or(&self.0);
        let (instance, tenant) = base.rsplit_once('/')?;
        let (_, host) = instance.split_once("://")?;
        if host.is_empty() || tenant.is_empty() {
            return None;
        }
        Some(tenant)
    }

    /// Whether the tenant segment accepts tokens from many tenants
    pub fn is_multi_tenant(&self) -> bool {
        self.tenant().is_some_and(|tenant| {
            MULTI_TENANT_SEGMENTS
                .iter()
                .any(|segment| segment.eq_ignore_ascii_case(tenant))
        })
    }

    /// The v1 authority for a `/v2.0` authority
    ///
    /// Drops the version suffix; `organizations` becomes `common`, which is
    /// the v1 multi-tenant endpoint. `None` when there is no `/v2.0` suffix.
    pub fn v1(&self) -> Option<Self> {
        let cut = self.0.len().checked_sub(V2_SUFFIX.len())?;
        let (base, suffix) = (self.0.get(..cut)?, self.0.get(cut..)?);
        if !suffix.eq_ignore_ascii_case(V2_SUFFIX) || base.is_empty() {
            return None;
        }

        match base.rsplit_once('/') {
            Some((instance, tenant)) if tenant.eq_ignore_ascii_case("organizations") => {
                Some(Self(format!("{instance}/common")))
            }
            _ => Some(Self(base.to_string())),
        }
    }

    /// Compare against an issuer, ignoring a single trailing slash
    pub fn matches_issuer(&self, issuer: &str) -> bool {
        self.0 == issuer || issuer.strip_suffix('/') == Some(self.0.as_str())
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Authority {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
