use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Capability string: `resource:action`, `resource:*` or the global `*`.
///
/// Capabilities are both what a route declares it needs and what a role or an
/// API key is granted. Granted capabilities may contain wildcards; the matching
/// rules live in [`Capability::grants`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Capability(Cow<'static, str>);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("invalid capability '{0}': expected 'resource:action', 'resource:*' or '*'")]
    Malformed(String),
}

pub const GLOBAL_WILDCARD: &str = "*";

impl Capability {
    /// Build a capability from a compile-time literal (route declarations).
    ///
    /// Literals are not validated; use [`Capability::parse`] for user input.
    pub const fn from_static(value: &'static str) -> Self {
        Self(Cow::Borrowed(value))
    }

    /// Parse and validate a capability string from untrusted input.
    pub fn parse(value: impl Into<String>) -> Result<Self, CapabilityError> {
        let value = value.into();
        if is_well_formed(&value) {
            Ok(Self(Cow::Owned(value)))
        } else {
            Err(CapabilityError::Malformed(value))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == GLOBAL_WILDCARD
    }

    /// Resource part (`plants` in `plants:read`). `None` for the global wildcard.
    pub fn resource(&self) -> Option<&str> {
        self.as_str().split_once(':').map(|(resource, _)| resource)
    }

    /// Action part (`read` in `plants:read`, `*` in `plants:*`).
    pub fn action(&self) -> Option<&str> {
        self.as_str().split_once(':').map(|(_, action)| action)
    }

    /// Does holding `self` satisfy a requirement for `required`?
    pub fn grants(&self, required: &Capability) -> bool {
        grants(self.as_str(), required.as_str())
    }
}

/// Capability matching, in resolution order:
/// 1. global wildcard `*` grants everything
/// 2. exact match
/// 3. `resource:*` grants `resource:<any action>`
/// 4. otherwise deny
pub fn grants(granted: &str, required: &str) -> bool {
    if granted == GLOBAL_WILDCARD {
        return true;
    }
    if granted == required {
        return true;
    }
    match (granted.split_once(':'), required.split_once(':')) {
        (Some((granted_resource, "*")), Some((required_resource, _))) => {
            granted_resource == required_resource
        }
        _ => false,
    }
}

fn is_well_formed(value: &str) -> bool {
    if value == GLOBAL_WILDCARD {
        return true;
    }
    let Some((resource, action)) = value.split_once(':') else {
        return false;
    };
    let segment_ok = |s: &str| {
        !s.is_empty() && s.chars().all(|c| c.is_ascii_lowercase() || c == '_')
    };
    segment_ok(resource) && (action == "*" || segment_ok(action))
}

impl TryFrom<String> for Capability {
    type Error = CapabilityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Capability::parse(value)
    }
}

impl From<Capability> for String {
    fn from(value: Capability) -> Self {
        value.0.into_owned()
    }
}

impl core::fmt::Display for Capability {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
