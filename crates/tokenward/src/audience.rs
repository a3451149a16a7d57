//! Accepted audiences
//!
//! The effective audience set is the union of [`Options::audience`] and
//! [`Options::audiences`]. Matching is exact and case-sensitive.

use std::collections::BTreeSet;

use crate::error::{Error, Result};
use crate::options::Options;

/// Non-empty set of accepted audience values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudienceSet(BTreeSet<String>);

impl AudienceSet {
    /// Build the effective audience set from options
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] if neither field contributes a non-empty value.
    pub fn resolve(options: &Options) -> Result<Self> {
        let single = options.audience.iter();
        let many = options.audiences.iter().flatten();
        Self::from_values(single.chain(many))
    }

    /// Build a set from arbitrary values, skipping empty strings
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] if no non-empty value is given.
    pub fn from_values<I, S>(values: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let set: BTreeSet<String> = values
            .into_iter()
            .filter(|v| !v.as_ref().is_empty())
            .map(|v| v.as_ref().to_string())
            .collect();

        if set.is_empty() {
            return Err(Error::configuration(
                "at least one non-empty audience must be configured",
            ));
        }
        Ok(Self(set))
    }

    /// Exact membership test
    pub fn contains(&self, audience: &str) -> bool {
        self.0.contains(audience)
    }

    /// Whether any of the given audiences is accepted
    pub fn intersects<'a>(&self, audiences: impl IntoIterator<Item = &'a str>) -> bool {
        audiences.into_iter().any(|aud| self.contains(aud))
    }

    /// Number of accepted audiences
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; kept for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate accepted audiences in sorted order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}
