//! # Cache Provider
//!
//! This module defines the trait every cache tier, and the aggregator over
//! several tiers, implements.

use async_trait::async_trait;
use bytes::Bytes;

use crate::cache::types::{CacheEntry, CacheKey, CacheResult, CacheType};
use crate::context::RequestContext;
use crate::options::RequestOptions;
use crate::resource::Resource;

/// A cache tier that can store and retrieve resources.
///
/// Every operation takes a `scope`; a tier ignores requests whose scope
/// does not include it. Dropping a returned future cancels the operation.
#[async_trait]
pub trait ResourceCache: Send + Sync {
    /// Look up an entry
    async fn query(
        &self,
        key: &CacheKey,
        options: RequestOptions,
        context: &RequestContext,
        scope: CacheType,
    ) -> CacheResult<Option<CacheEntry>>;

    /// Store a decoded resource and/or its raw bytes
    async fn store(
        &self,
        key: &CacheKey,
        resource: Option<Resource>,
        data: Option<Bytes>,
        scope: CacheType,
    ) -> CacheResult<()>;

    /// Remove an entry
    async fn remove(&self, key: &CacheKey, scope: CacheType) -> CacheResult<()>;

    /// Which tier holds the key, `CacheType::None` if none does
    async fn contains(&self, key: &CacheKey, scope: CacheType) -> CacheResult<CacheType>;

    /// Remove every entry
    async fn clear(&self, scope: CacheType) -> CacheResult<()>;
}
