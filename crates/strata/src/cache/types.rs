//! # Cache Types
//!
//! This module defines common types used across the caching system.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::resource::Resource;

/// Cache tier selector.
///
/// In requests it scopes an operation (`All` means every tier, `None` means
/// skip). In responses it names the tier that answered, which is only ever
/// `Memory` or `Disk`; `None` reports a miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum CacheType {
    /// No tier
    None,
    /// Disk tier only
    Disk,
    /// Memory tier only
    Memory,
    /// Every tier
    #[default]
    All,
}

impl CacheType {
    /// Whether a request scoped to `self` touches the memory tier
    pub fn includes_memory(self) -> bool {
        matches!(self, CacheType::Memory | CacheType::All)
    }

    /// Whether a request scoped to `self` touches the disk tier
    pub fn includes_disk(self) -> bool {
        matches!(self, CacheType::Disk | CacheType::All)
    }

    /// The same scope with the disk tier removed
    pub fn without_disk(self) -> Self {
        match self {
            CacheType::All | CacheType::Memory => CacheType::Memory,
            CacheType::Disk | CacheType::None => CacheType::None,
        }
    }
}

/// Cache key for identifying resources
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Create a new cache key
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert to a filename-safe string
    pub fn to_filename(&self) -> String {
        use sha2::{Digest, Sha256};

        let hash = Sha256::digest(self.0.as_bytes());
        hex::encode(hash)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for CacheKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Result of a successful cache query
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Decoded resource, when the tier keeps one
    pub resource: Option<Resource>,
    /// Raw bytes, when the tier keeps them
    pub data: Option<Bytes>,
    /// Tier that produced the entry (`Memory` or `Disk`)
    pub cache_type: CacheType,
    /// Transformer key of the stored product, if it was post-processed
    pub transform_key: Option<String>,
}

impl CacheEntry {
    /// Entry answered by a memory tier
    pub fn memory(
        resource: Option<Resource>,
        data: Option<Bytes>,
        transform_key: Option<String>,
    ) -> Self {
        Self {
            resource,
            data,
            cache_type: CacheType::Memory,
            transform_key,
        }
    }

    /// Entry answered by a disk tier
    pub fn disk(data: Bytes, transform_key: Option<String>) -> Self {
        Self {
            resource: None,
            data: Some(data),
            cache_type: CacheType::Disk,
            transform_key,
        }
    }

    /// Whether the entry carries anything usable
    pub fn has_content(&self) -> bool {
        self.resource.is_some() || self.data.as_ref().is_some_and(|d| !d.is_empty())
    }

    pub fn transform_key(&self) -> Option<&str> {
        self.transform_key.as_deref()
    }
}

/// Metadata for a cached resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// When the resource was cached
    pub cached_at: u64,
    /// When the resource expires
    pub expires_at: Option<u64>,
    /// Transformer key of the stored product
    pub transform_key: Option<String>,
    /// Content type of the resource
    pub content_type: Option<String>,
    /// Size of the cached resource in bytes
    pub size: u64,
}

impl EntryMetadata {
    /// Create new metadata for a resource
    pub fn new(size: u64) -> Self {
        Self {
            cached_at: unix_now(),
            expires_at: None,
            transform_key: None,
            content_type: None,
            size,
        }
    }

    /// Set the expiration time
    pub fn with_expiration(mut self, duration: Duration) -> Self {
        self.expires_at = Some(self.cached_at + duration.as_secs());
        self
    }

    /// Set the transformer key as an Option
    pub fn with_transform_key_option(mut self, transform_key: Option<String>) -> Self {
        self.transform_key = transform_key;
        self
    }

    /// Set the content type as an Option
    pub fn with_content_type_option(mut self, content_type: Option<String>) -> Self {
        self.content_type = content_type;
        self
    }

    /// Check if the resource has expired
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= unix_now())
    }
}

pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Configuration for the default tiered cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Whether caching is enabled
    pub enabled: bool,
    /// Whether the disk tier is enabled
    pub disk_enabled: bool,
    /// Path for disk cache storage
    pub disk_cache_path: Option<PathBuf>,
    /// Maximum size of memory cache in bytes
    pub max_memory_cache_size: u64,
    /// Time-to-live for memory entries (None = until evicted)
    pub memory_ttl: Option<Duration>,
    /// Time-to-live for disk entries
    pub disk_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            disk_enabled: true,
            disk_cache_path: None, // If None, we'll use system temp dir
            max_memory_cache_size: 64 * 1024 * 1024, // 64MB
            memory_ttl: None,
            disk_ttl: Duration::from_secs(7 * 24 * 3600), // 1 week
        }
    }
}

impl CacheConfig {
    /// Memory tier only, no disk I/O
    pub fn memory_only() -> Self {
        Self {
            disk_enabled: false,
            ..Self::default()
        }
    }
}

/// Result of a cache operation
pub type CacheResult<T> = std::result::Result<T, std::io::Error>;
