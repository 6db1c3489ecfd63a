//! # Resource Identifiers
//!
//! A [`ResourceId`] names a remote resource, usually by URL. Equality is plain
//! string equality; two identifiers that resolve to the same cache key are
//! still different identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

/// Opaque name of a loadable resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    /// Create a new identifier
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the identifier is empty (or whitespace only)
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Parse the identifier as a URL
    pub fn to_url(&self) -> Result<Url, url::ParseError> {
        Url::parse(&self.0)
    }

    /// Lower-cased URL scheme, if the identifier parses as a URL
    pub fn scheme(&self) -> Option<String> {
        self.to_url().ok().map(|url| url.scheme().to_ascii_lowercase())
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ResourceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ResourceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ResourceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&String> for ResourceId {
    fn from(value: &String) -> Self {
        Self(value.clone())
    }
}

impl From<Url> for ResourceId {
    fn from(value: Url) -> Self {
        Self(value.into())
    }
}
