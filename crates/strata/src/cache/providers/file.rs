//! # File Cache
//!
//! This module implements a file-based persistent cache provider. Each key
//! maps to a data file and a JSON `.meta` sidecar, both named after the
//! SHA-256 of the key.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tokio::io;
use tracing::{debug, warn};

use crate::cache::providers::ResourceCache;
use crate::cache::types::{CacheEntry, CacheKey, CacheResult, CacheType, EntryMetadata};
use crate::context::RequestContext;
use crate::options::RequestOptions;
use crate::resource::{MediaType, Resource};

/// Suffix source for temp files, so concurrent writers never share one
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// `<file>.<pid>-<n>.tmp` next to `path`
fn temp_path(path: &Path) -> PathBuf {
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut name = path.file_name().map(|f| f.to_os_string()).unwrap_or_default();
    name.push(format!(".{}-{n}.tmp", std::process::id()));
    path.with_file_name(name)
}

#[derive(Debug, Clone)]
pub struct FileCache {
    cache_dir: PathBuf,
    ttl: Duration,
    initialized: Arc<AtomicBool>,
}

impl FileCache {
    /// Create a new file cache with the specified directory
    pub fn new(cache_dir: PathBuf, ttl: Duration) -> Self {
        Self {
            cache_dir,
            ttl,
            initialized: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Initialize the cache directory
    pub(crate) async fn ensure_initialized(&self) -> io::Result<()> {
        // Fast path - already initialized
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }

        // create_dir_all is idempotent, racing initializers are harmless
        fs::create_dir_all(&self.cache_dir).await?;
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    /// Get the path for a cached resource
    fn get_cache_path(&self, key: &CacheKey) -> PathBuf {
        self.cache_dir.join(key.to_filename())
    }

    /// Get the metadata path for a cached resource
    fn get_metadata_path(&self, key: &CacheKey) -> PathBuf {
        let mut path = self.get_cache_path(key);
        path.set_extension("meta");
        path
    }

    fn remove_in_background(data_path: PathBuf, meta_path: PathBuf) {
        tokio::spawn(async move {
            let _ = fs::remove_file(&data_path).await;
            let _ = fs::remove_file(&meta_path).await;
        });
    }

    /// Turn the raw contents of a metadata file and its data file into an entry
    fn entry_from_parts(
        &self,
        key: &CacheKey,
        metadata_bytes: &[u8],
        data: Vec<u8>,
    ) -> Option<CacheEntry> {
        let data_path = self.get_cache_path(key);
        let meta_path = self.get_metadata_path(key);

        let metadata: EntryMetadata = match serde_json::from_slice(metadata_bytes) {
            Ok(m) => m,
            Err(e) => {
                warn!(path = ?meta_path, error = %e, "Failed to parse cache metadata");
                Self::remove_in_background(data_path, meta_path);
                return None;
            }
        };

        if metadata.is_expired() {
            debug!(key = %key, "Disk cache entry expired");
            Self::remove_in_background(data_path, meta_path);
            return None;
        }

        Some(CacheEntry::disk(Bytes::from(data), metadata.transform_key))
    }

    async fn read_entry(&self, key: &CacheKey) -> CacheResult<Option<CacheEntry>> {
        let data_path = self.get_cache_path(key);
        let meta_path = self.get_metadata_path(key);

        let metadata_bytes = match fs::read(&meta_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                warn!(path = ?meta_path, error = %e, "Failed to read cache metadata file");
                return Err(e);
            }
        };

        let data = match fs::read(&data_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                warn!(path = ?data_path, error = %e, "Failed to read cache data file");
                return Err(e);
            }
        };

        Ok(self.entry_from_parts(key, &metadata_bytes, data))
    }

    /// Blocking variant of [`read_entry`](Self::read_entry), used for
    /// `QUERY_DISK_SYNC`.
    fn read_entry_sync(&self, key: &CacheKey) -> CacheResult<Option<CacheEntry>> {
        let data_path = self.get_cache_path(key);
        let meta_path = self.get_metadata_path(key);

        let metadata_bytes = match std::fs::read(&meta_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let data = match std::fs::read(&data_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        Ok(self.entry_from_parts(key, &metadata_bytes, data))
    }

    async fn write_entry(&self, key: &CacheKey, data: &Bytes, metadata: &EntryMetadata) -> CacheResult<()> {
        self.ensure_initialized().await?;

        let data_path = self.get_cache_path(key);
        let meta_path = self.get_metadata_path(key);

        let metadata_json = serde_json::to_vec(metadata).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Failed to serialize metadata: {e}"),
            )
        })?;

        // Write to temporary files first, then rename into place
        let temp_data_path = temp_path(&data_path);
        let temp_meta_path = temp_path(&meta_path);

        if let Err(e) = fs::write(&temp_data_path, data).await {
            warn!(path = ?temp_data_path, error = %e, "Failed to write cache data file");
            return Err(e);
        }

        if let Err(e) = fs::write(&temp_meta_path, &metadata_json).await {
            warn!(path = ?temp_meta_path, error = %e, "Failed to write cache metadata file");
            let _ = fs::remove_file(&temp_data_path).await;
            return Err(e);
        }

        if let Err(e) = fs::rename(&temp_data_path, &data_path).await {
            warn!(
                from = ?temp_data_path,
                to = ?data_path,
                error = %e,
                "Failed to rename temporary data file"
            );
            let _ = fs::remove_file(&temp_data_path).await;
            let _ = fs::remove_file(&temp_meta_path).await;
            return Err(e);
        }

        if let Err(e) = fs::rename(&temp_meta_path, &meta_path).await {
            warn!(
                from = ?temp_meta_path,
                to = ?meta_path,
                error = %e,
                "Failed to rename temporary metadata file"
            );
            // Data without metadata is unreadable, drop it
            let _ = fs::remove_file(&data_path).await;
            let _ = fs::remove_file(&temp_meta_path).await;
            return Err(e);
        }

        debug!(key = %key, size = data.len(), "Cached entry to file");
        Ok(())
    }

    /// Delete every entry whose metadata says it has expired.
    ///
    /// Returns the number of entries removed.
    pub async fn remove_expired(&self) -> CacheResult<usize> {
        self.ensure_initialized().await?;

        let mut entries = fs::read_dir(&self.cache_dir).await?;
        let mut removed = 0;

        while let Some(entry) = entries.next_entry().await? {
            let meta_path = entry.path();
            if meta_path.extension().is_none_or(|ext| ext != "meta") {
                continue;
            }

            let expired = match fs::read(&meta_path).await {
                Ok(bytes) => serde_json::from_slice::<EntryMetadata>(&bytes)
                    .map(|m| m.is_expired())
                    .unwrap_or(true),
                Err(_) => continue,
            };

            if expired {
                let data_path = meta_path.with_extension("");
                let _ = fs::remove_file(&data_path).await;
                let _ = fs::remove_file(&meta_path).await;
                removed += 1;
            }
        }

        debug!(count = removed, "Removed expired disk cache entries");
        Ok(removed)
    }
}

#[async_trait]
impl ResourceCache for FileCache {
    async fn query(
        &self,
        key: &CacheKey,
        options: RequestOptions,
        _context: &RequestContext,
        scope: CacheType,
    ) -> CacheResult<Option<CacheEntry>> {
        if !scope.includes_disk() {
            return Ok(None);
        }

        if options.contains(RequestOptions::QUERY_DISK_SYNC) {
            return self.read_entry_sync(key);
        }

        self.read_entry(key).await
    }

    async fn store(
        &self,
        key: &CacheKey,
        resource: Option<Resource>,
        data: Option<Bytes>,
        scope: CacheType,
    ) -> CacheResult<()> {
        if !scope.includes_disk() {
            return Ok(());
        }

        let transform_key = resource
            .as_ref()
            .and_then(|r| r.transform_key().map(str::to_owned));

        // Disk tiers persist bytes; fall back to the resource payload
        let Some(bytes) = data.or_else(|| resource.map(|r| r.payload().clone())) else {
            return Ok(());
        };

        let metadata = EntryMetadata::new(bytes.len() as u64)
            .with_expiration(self.ttl)
            .with_transform_key_option(transform_key)
            .with_content_type_option(MediaType::sniff(&bytes).mime().map(str::to_owned));

        self.write_entry(key, &bytes, &metadata).await
    }

    async fn remove(&self, key: &CacheKey, scope: CacheType) -> CacheResult<()> {
        if !scope.includes_disk() {
            return Ok(());
        }

        let data_path = self.get_cache_path(key);
        let meta_path = self.get_metadata_path(key);

        // Missing files are fine
        let data_result = fs::remove_file(&data_path).await;
        let meta_result = fs::remove_file(&meta_path).await;

        match (data_result, meta_result) {
            (Err(e), _) if e.kind() != io::ErrorKind::NotFound => {
                warn!(path = ?data_path, error = %e, "Failed to remove cache data file");
                Err(e)
            }
            (_, Err(e)) if e.kind() != io::ErrorKind::NotFound => {
                warn!(path = ?meta_path, error = %e, "Failed to remove cache metadata file");
                Err(e)
            }
            _ => Ok(()),
        }
    }

    async fn contains(&self, key: &CacheKey, scope: CacheType) -> CacheResult<CacheType> {
        if !scope.includes_disk() {
            return Ok(CacheType::None);
        }

        let data_exists = fs::try_exists(self.get_cache_path(key)).await?;
        let meta_exists = fs::try_exists(self.get_metadata_path(key)).await?;

        Ok(if data_exists && meta_exists {
            CacheType::Disk
        } else {
            CacheType::None
        })
    }

    async fn clear(&self, scope: CacheType) -> CacheResult<()> {
        if !scope.includes_disk() {
            return Ok(());
        }

        let mut entries = match fs::read_dir(&self.cache_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                warn!(dir = ?self.cache_dir, error = %e, "Failed to read cache directory");
                return Err(e);
            }
        };

        let mut entry_count = 0;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if let Err(e) = fs::remove_file(&path).await {
                warn!(path = ?path, error = %e, "Failed to remove cache file");
            } else {
                entry_count += 1;
            }
        }

        debug!(count = entry_count, "Cleared disk cache entries");
        Ok(())
    }
}
