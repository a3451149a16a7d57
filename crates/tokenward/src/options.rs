//! Identity-provider options
//!
//! [`Options`] is what a host hands over after reading its own configuration
//! source. Field names serialize in camelCase and also accept the PascalCase
//! keys of the usual `AzureAd` configuration section.

use serde::{Deserialize, Serialize};

/// Identity-provider configuration for one protected resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Options {
    /// Identity-provider instance, e.g. `https://login.microsoftonline.com/`
    #[serde(default, alias = "Instance", skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,

    /// Tenant ID, domain, or one of `common` / `organizations` / `consumers`
    #[serde(default, alias = "TenantId", skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,

    /// Explicit authority; takes precedence over `instance` + `tenant_id`
    #[serde(default, alias = "Authority", skip_serializing_if = "Option::is_none")]
    pub authority: Option<String>,

    /// Single accepted audience
    #[serde(default, alias = "Audience", skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,

    /// Additional accepted audiences; unioned with `audience`
    #[serde(default, alias = "Audiences", skip_serializing_if = "Option::is_none")]
    pub audiences: Option<Vec<String>>,
}

impl Options {
    /// Options for an instance + tenant pair
    pub fn for_tenant(instance: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            instance: Some(instance.into()),
            tenant_id: Some(tenant_id.into()),
            ..Self::default()
        }
    }

    /// Options for an explicit authority
    pub fn for_authority(authority: impl Into<String>) -> Self {
        Self {
            authority: Some(authority.into()),
            ..Self::default()
        }
    }

    /// Set the single accepted audience
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    /// Set the accepted audience list
    pub fn with_audiences<I, S>(mut self, audiences: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.audiences = Some(audiences.into_iter().map(Into::into).collect());
        self
    }
}
