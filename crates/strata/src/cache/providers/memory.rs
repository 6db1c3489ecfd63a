//! # Memory Cache Provider
//!
//! This module provides an in-memory cache implementation using Moka caching.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use moka::future::Cache as MokaCache;
use tracing::{debug, warn};

use crate::cache::providers::ResourceCache;
use crate::cache::types::{CacheEntry, CacheKey, CacheResult, CacheType, EntryMetadata};
use crate::context::RequestContext;
use crate::options::RequestOptions;
use crate::resource::Resource;

/// Entry in the memory cache
#[derive(Clone)]
struct MemoryEntry {
    resource: Option<Resource>,
    data: Option<Bytes>,
    metadata: EntryMetadata,
}

impl MemoryEntry {
    fn weight(&self) -> u32 {
        let size = self.resource.as_ref().map_or(0, Resource::byte_size)
            + self.data.as_ref().map_or(0, |d| d.len() as u64);
        size.try_into().unwrap_or(u32::MAX)
    }
}

/// Memory cache provider implementation using Moka
#[derive(Clone)]
pub struct MemoryCache {
    /// Moka cache for storing entries
    cache: MokaCache<CacheKey, MemoryEntry>,
    /// Maximum size for this cache in bytes
    max_size: u64,
}

impl MemoryCache {
    /// Create a new memory cache with the specified size limit
    ///
    /// # Panics
    ///
    /// Panics if `max_size_bytes` is zero.
    pub fn new(max_size_bytes: u64, ttl: Option<Duration>) -> Self {
        if max_size_bytes == 0 {
            panic!("Memory cache size must be greater than zero");
        }

        // Size based eviction
        let mut builder = MokaCache::builder()
            .weigher(|_k, v: &MemoryEntry| v.weight())
            .max_capacity(max_size_bytes);

        if let Some(ttl) = ttl.filter(|ttl| !ttl.is_zero()) {
            builder = builder.time_to_live(ttl);
        }

        let cache = builder.build();

        debug!(
            max_size = max_size_bytes,
            ttl = ?ttl,
            "Memory cache created with size limit and TTL"
        );

        Self {
            cache,
            max_size: max_size_bytes,
        }
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Evict entries Moka has already marked as expired
    pub async fn sweep(&self) {
        self.cache.run_pending_tasks().await;
    }
}

#[async_trait]
impl ResourceCache for MemoryCache {
    async fn query(
        &self,
        key: &CacheKey,
        _options: RequestOptions,
        _context: &RequestContext,
        scope: CacheType,
    ) -> CacheResult<Option<CacheEntry>> {
        if !scope.includes_memory() {
            return Ok(None);
        }

        let Some(entry) = self.cache.get(key).await else {
            return Ok(None);
        };

        // Moka's TTL is global; per-entry expiry lives in the metadata
        if entry.metadata.is_expired() {
            debug!(key = %key, "Memory cache entry expired based on metadata.expires_at");
            self.cache.invalidate(key).await;
            return Ok(None);
        }

        Ok(Some(CacheEntry::memory(
            entry.resource,
            entry.data,
            entry.metadata.transform_key,
        )))
    }

    async fn store(
        &self,
        key: &CacheKey,
        resource: Option<Resource>,
        data: Option<Bytes>,
        scope: CacheType,
    ) -> CacheResult<()> {
        if !scope.includes_memory() || (resource.is_none() && data.is_none()) {
            return Ok(());
        }

        let transform_key = resource
            .as_ref()
            .and_then(|r| r.transform_key().map(str::to_owned));
        let mut entry = MemoryEntry {
            resource,
            data,
            metadata: EntryMetadata::new(0).with_transform_key_option(transform_key),
        };
        entry.metadata.size = entry.weight() as u64;

        // A single entry shouldn't be larger than the total cache size
        if entry.metadata.size > self.max_size {
            warn!(
                key = %key,
                size = entry.metadata.size,
                max_size = self.max_size,
                "Entry too large for memory cache, skipping"
            );
            return Ok(());
        }

        self.cache.insert(key.clone(), entry).await;
        Ok(())
    }

    async fn remove(&self, key: &CacheKey, scope: CacheType) -> CacheResult<()> {
        if scope.includes_memory() && self.cache.remove(key).await.is_some() {
            debug!(key = %key, "Removed entry from memory cache");
        }
        Ok(())
    }

    async fn contains(&self, key: &CacheKey, scope: CacheType) -> CacheResult<CacheType> {
        if scope.includes_memory() && self.cache.contains_key(key) {
            return Ok(CacheType::Memory);
        }
        Ok(CacheType::None)
    }

    async fn clear(&self, scope: CacheType) -> CacheResult<()> {
        if scope.includes_memory() {
            self.cache.invalidate_all();
            debug!("Memory cache cleared");
        }
        Ok(())
    }
}
