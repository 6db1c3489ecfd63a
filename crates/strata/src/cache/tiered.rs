//! # Tiered Cache
//!
//! The default cache collaborator: a memory tier in front of a disk tier.
//! Disk hits are promoted to memory when the query scope includes it.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io;
use tracing::{debug, warn};

use crate::cache::providers::{FileCache, MemoryCache, ResourceCache};
use crate::cache::types::{CacheConfig, CacheEntry, CacheKey, CacheResult, CacheType};
use crate::context::RequestContext;
use crate::options::RequestOptions;
use crate::resource::Resource;

/// Memory and disk tiers behind one [`ResourceCache`]
#[derive(Clone)]
pub struct TieredCache {
    memory_cache: Option<Arc<MemoryCache>>,
    file_cache: Option<Arc<FileCache>>,
    config: Arc<CacheConfig>,
}

impl TieredCache {
    /// Create a new tiered cache with the specified configuration
    pub async fn new(mut config: CacheConfig) -> io::Result<Self> {
        // If no disk cache path provided, use system temp
        if config.disk_cache_path.is_none() {
            config.disk_cache_path = Some(std::env::temp_dir().join("strata-cache"));
        }

        let memory_cache = (config.enabled && config.max_memory_cache_size > 0).then(|| {
            Arc::new(MemoryCache::new(
                config.max_memory_cache_size,
                config.memory_ttl,
            ))
        });

        let file_cache = match (&config.disk_cache_path, config.enabled && config.disk_enabled) {
            (Some(dir), true) => {
                let file_cache = FileCache::new(dir.clone(), config.disk_ttl);
                // Initialize the cache directory in advance
                file_cache.ensure_initialized().await?;
                Some(Arc::new(file_cache))
            }
            _ => None,
        };

        debug!(
            memory = memory_cache.is_some(),
            disk = file_cache.is_some(),
            path = ?config.disk_cache_path,
            "Tiered cache created"
        );

        Ok(Self {
            memory_cache,
            file_cache,
            config: Arc::new(config),
        })
    }

    /// Get configuration reference
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn memory(&self) -> Option<&Arc<MemoryCache>> {
        self.memory_cache.as_ref()
    }

    pub fn disk(&self) -> Option<&Arc<FileCache>> {
        self.file_cache.as_ref()
    }

    /// Drop expired entries from both tiers
    pub async fn maintain(&self) -> CacheResult<()> {
        if let Some(memory) = &self.memory_cache {
            memory.sweep().await;
        }
        if let Some(disk) = &self.file_cache {
            disk.remove_expired().await?;
        }
        Ok(())
    }

    /// Start a background maintenance task
    pub fn start_maintenance_task(
        self: Arc<Self>,
        interval: std::time::Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval);
            loop {
                interval.tick().await;
                if let Err(e) = self.maintain().await {
                    warn!("Cache maintenance error: {}", e);
                }
            }
        })
    }
}

#[async_trait]
impl ResourceCache for TieredCache {
    async fn query(
        &self,
        key: &CacheKey,
        options: RequestOptions,
        context: &RequestContext,
        scope: CacheType,
    ) -> CacheResult<Option<CacheEntry>> {
        // Check memory cache first
        if let Some(memory) = &self.memory_cache {
            if let Some(entry) = query_memory(&**memory, key, options, context, scope).await {
                return Ok(Some(entry));
            }
        }

        let Some(disk) = &self.file_cache else {
            return Ok(None);
        };

        let Some(entry) = disk.query(key, options, context, scope).await? else {
            return Ok(None);
        };

        // Promote so the next query is answered from memory
        if let (true, Some(memory)) = (scope.includes_memory(), &self.memory_cache) {
            promote(&**memory, key, &entry).await;
        }

        Ok(Some(entry))
    }

    async fn store(
        &self,
        key: &CacheKey,
        resource: Option<Resource>,
        data: Option<Bytes>,
        scope: CacheType,
    ) -> CacheResult<()> {
        if let Some(memory) = &self.memory_cache {
            if let Err(error) = memory.store(key, resource.clone(), data.clone(), scope).await {
                warn!(key = %key, %error, "Memory tier store failed");
            }
        }

        match &self.file_cache {
            Some(disk) => disk.store(key, resource, data, scope).await,
            None => Ok(()),
        }
    }

    async fn remove(&self, key: &CacheKey, scope: CacheType) -> CacheResult<()> {
        let mem_result = match &self.memory_cache {
            Some(memory) => memory.remove(key, scope).await,
            None => Ok(()),
        };
        let file_result = match &self.file_cache {
            Some(disk) => disk.remove(key, scope).await,
            None => Ok(()),
        };

        // Return file cache error if any, otherwise memory cache error if any
        file_result.and(mem_result)
    }

    async fn contains(&self, key: &CacheKey, scope: CacheType) -> CacheResult<CacheType> {
        if let Some(memory) = &self.memory_cache {
            let found = memory.contains(key, scope).await?;
            if found != CacheType::None {
                return Ok(found);
            }
        }

        match &self.file_cache {
            Some(disk) => disk.contains(key, scope).await,
            None => Ok(CacheType::None),
        }
    }

    async fn clear(&self, scope: CacheType) -> CacheResult<()> {
        let mem_result = match &self.memory_cache {
            Some(memory) => memory.clear(scope).await,
            None => Ok(()),
        };
        let file_result = match &self.file_cache {
            Some(disk) => disk.clear(scope).await,
            None => Ok(()),
        };

        file_result.and(mem_result)
    }
}

/// A failing memory tier is a miss, the disk tier still answers
async fn query_memory(
    memory: &dyn ResourceCache,
    key: &CacheKey,
    options: RequestOptions,
    context: &RequestContext,
    scope: CacheType,
) -> Option<CacheEntry> {
    match memory.query(key, options, context, scope).await {
        Ok(entry) => entry,
        Err(error) => {
            warn!(key = %key, %error, "Memory tier query failed, treating as a miss");
            None
        }
    }
}

async fn promote(memory: &dyn ResourceCache, key: &CacheKey, entry: &CacheEntry) {
    let promoted = entry
        .data
        .clone()
        .map(|data| tag(Resource::raw(data), entry.transform_key()));
    if let Err(error) = memory.store(key, promoted, None, CacheType::Memory).await {
        warn!(key = %key, %error, "Promotion to memory failed");
    }
}

fn tag(resource: Resource, transform_key: Option<&str>) -> Resource {
    match transform_key {
        Some(key) => resource.with_transform_key(key),
        None => resource,
    }
}
