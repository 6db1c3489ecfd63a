//! # Caches Aggregator
//!
//! Presents an ordered list of cache tiers as a single [`ResourceCache`].
//! Later entries in the list have higher priority. Each aggregate call works
//! on a snapshot of the list taken when the call starts, so the list may be
//! changed at any time.

use std::future::Future;
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::cache::providers::ResourceCache;
use crate::cache::types::{CacheEntry, CacheKey, CacheResult, CacheType};
use crate::context::RequestContext;
use crate::options::RequestOptions;
use crate::resource::Resource;

/// How an aggregate operation fans out over the tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum AggregationPolicy {
    /// One tier at a time, highest priority first
    #[default]
    Serial,
    /// Every tier at once
    Concurrent,
    /// Only the highest priority tier
    HighestOnly,
    /// Only the lowest priority tier
    LowestOnly,
}

/// Aggregation policy per operation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicies {
    pub query: AggregationPolicy,
    pub store: AggregationPolicy,
    pub remove: AggregationPolicy,
    pub contains: AggregationPolicy,
    pub clear: AggregationPolicy,
}

impl Default for CachePolicies {
    fn default() -> Self {
        Self {
            query: AggregationPolicy::Serial,
            store: AggregationPolicy::HighestOnly,
            remove: AggregationPolicy::Concurrent,
            contains: AggregationPolicy::Serial,
            clear: AggregationPolicy::Concurrent,
        }
    }
}

#[derive(Default)]
pub struct CachesAggregator {
    caches: RwLock<Vec<Arc<dyn ResourceCache>>>,
    policies: RwLock<CachePolicies>,
}

impl CachesAggregator {
    pub fn new(caches: Vec<Arc<dyn ResourceCache>>) -> Self {
        Self {
            caches: RwLock::new(caches),
            policies: RwLock::new(CachePolicies::default()),
        }
    }

    pub fn with_policies(self, policies: CachePolicies) -> Self {
        *self.policies.write() = policies;
        self
    }

    /// Snapshot of the tiers, lowest priority first
    pub fn caches(&self) -> Vec<Arc<dyn ResourceCache>> {
        self.caches.read().clone()
    }

    pub fn set_caches(&self, caches: Vec<Arc<dyn ResourceCache>>) {
        *self.caches.write() = caches;
    }

    /// Add a tier with the highest priority
    pub fn add_cache(&self, cache: Arc<dyn ResourceCache>) {
        self.caches.write().push(cache);
    }

    /// Remove a tier by identity. Returns whether it was present.
    pub fn remove_cache(&self, cache: &Arc<dyn ResourceCache>) -> bool {
        let mut caches = self.caches.write();
        let before = caches.len();
        caches.retain(|c| !Arc::ptr_eq(c, cache));
        caches.len() != before
    }

    pub fn len(&self) -> usize {
        self.caches.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.read().is_empty()
    }

    pub fn policies(&self) -> CachePolicies {
        *self.policies.read()
    }

    pub fn set_policies(&self, policies: CachePolicies) {
        *self.policies.write() = policies;
    }

    pub fn set_query_policy(&self, policy: AggregationPolicy) {
        self.policies.write().query = policy;
    }

    pub fn set_store_policy(&self, policy: AggregationPolicy) {
        self.policies.write().store = policy;
    }

    pub fn set_remove_policy(&self, policy: AggregationPolicy) {
        self.policies.write().remove = policy;
    }

    pub fn set_contains_policy(&self, policy: AggregationPolicy) {
        self.policies.write().contains = policy;
    }

    pub fn set_clear_policy(&self, policy: AggregationPolicy) {
        self.policies.write().clear = policy;
    }

    /// Tiers an operation under `policy` touches, highest priority first
    fn targets(&self, policy: AggregationPolicy) -> Vec<Arc<dyn ResourceCache>> {
        let caches = self.caches.read();
        match policy {
            AggregationPolicy::HighestOnly => caches.last().cloned().into_iter().collect(),
            AggregationPolicy::LowestOnly => caches.first().cloned().into_iter().collect(),
            AggregationPolicy::Serial | AggregationPolicy::Concurrent => {
                caches.iter().rev().cloned().collect()
            }
        }
    }

    /// Run a mutating operation on every target, collecting failures
    async fn run_all<F, Fut>(&self, operation: &str, policy: AggregationPolicy, op: F) -> CacheResult<()>
    where
        F: Fn(Arc<dyn ResourceCache>) -> Fut,
        Fut: Future<Output = CacheResult<()>> + Send,
    {
        let targets = self.targets(policy);
        let total = targets.len();
        let mut failures = Vec::new();

        if policy == AggregationPolicy::Concurrent {
            let results = futures::future::join_all(targets.into_iter().map(&op)).await;
            for (index, result) in results.into_iter().enumerate() {
                if let Err(e) = result {
                    failures.push(format!("tier {index}: {e}"));
                }
            }
        } else {
            for (index, cache) in targets.into_iter().enumerate() {
                if let Err(e) = op(cache).await {
                    failures.push(format!("tier {index}: {e}"));
                }
            }
        }

        if failures.is_empty() {
            return Ok(());
        }

        warn!(
            operation,
            failed = failures.len(),
            total,
            "Cache tiers failed"
        );
        Err(io::Error::other(format!(
            "{operation} failed on {} of {total} cache tiers ({})",
            failures.len(),
            failures.join("; ")
        )))
    }
}

#[async_trait]
impl ResourceCache for CachesAggregator {
    async fn query(
        &self,
        key: &CacheKey,
        options: RequestOptions,
        context: &RequestContext,
        scope: CacheType,
    ) -> CacheResult<Option<CacheEntry>> {
        let policy = self.policies.read().query;
        let targets = self.targets(policy);

        if policy == AggregationPolicy::Concurrent {
            let mut pending: FuturesUnordered<_> = targets
                .iter()
                .map(|cache| cache.query(key, options, context, scope))
                .collect();

            // The first positive answer wins; dropping `pending` cancels the rest
            while let Some(result) = pending.next().await {
                match result {
                    Ok(Some(entry)) => return Ok(Some(entry)),
                    Ok(None) => {}
                    Err(e) => warn!(key = %key, error = %e, "Cache tier query failed"),
                }
            }
            return Ok(None);
        }

        for cache in targets {
            match cache.query(key, options, context, scope).await {
                Ok(Some(entry)) => return Ok(Some(entry)),
                Ok(None) => {}
                Err(e) => warn!(key = %key, error = %e, "Cache tier query failed"),
            }
        }

        debug!(key = %key, "Cache miss on every tier");
        Ok(None)
    }

    async fn store(
        &self,
        key: &CacheKey,
        resource: Option<Resource>,
        data: Option<Bytes>,
        scope: CacheType,
    ) -> CacheResult<()> {
        let policy = self.policies.read().store;
        self.run_all("store", policy, |cache| {
            let resource = resource.clone();
            let data = data.clone();
            async move { cache.store(key, resource, data, scope).await }
        })
        .await
    }

    async fn remove(&self, key: &CacheKey, scope: CacheType) -> CacheResult<()> {
        let policy = self.policies.read().remove;
        self.run_all("remove", policy, |cache| async move {
            cache.remove(key, scope).await
        })
        .await
    }

    async fn contains(&self, key: &CacheKey, scope: CacheType) -> CacheResult<CacheType> {
        let policy = self.policies.read().contains;
        let targets = self.targets(policy);

        if policy == AggregationPolicy::Concurrent {
            let mut pending: FuturesUnordered<_> = targets
                .iter()
                .map(|cache| cache.contains(key, scope))
                .collect();

            while let Some(result) = pending.next().await {
                match result {
                    Ok(CacheType::None) => {}
                    Ok(found) => return Ok(found),
                    Err(e) => warn!(key = %key, error = %e, "Cache tier contains failed"),
                }
            }
            return Ok(CacheType::None);
        }

        for cache in targets {
            match cache.contains(key, scope).await {
                Ok(CacheType::None) => {}
                Ok(found) => return Ok(found),
                Err(e) => warn!(key = %key, error = %e, "Cache tier contains failed"),
            }
        }
        Ok(CacheType::None)
    }

    async fn clear(&self, scope: CacheType) -> CacheResult<()> {
        let policy = self.policies.read().clear;
        self.run_all("clear", policy, |cache| async move { cache.clear(scope).await })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::test_utils::{QueryLog, StubCache, init_tracing};

    fn ctx() -> RequestContext {
        RequestContext::new()
    }

    async fn query(aggregator: &CachesAggregator, key: &str) -> Option<CacheEntry> {
        aggregator
            .query(&CacheKey::new(key), RequestOptions::empty(), &ctx(), CacheType::All)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_serial_query_asks_highest_priority_first() {
        init_tracing();
        let log = QueryLog::default();
        let c1 = Arc::new(StubCache::new("C1", &log));
        let c2 = Arc::new(StubCache::new("C2", &log));
        let c3 = Arc::new(StubCache::new("C3", &log));
        c1.insert("k", Bytes::from_static(b"from-c1"));

        let aggregator = CachesAggregator::new(vec![c1, c2, c3]);
        let entry = query(&aggregator, "k").await.expect("hit in C1");

        assert_eq!(entry.data.as_deref(), Some(&b"from-c1"[..]));
        assert_eq!(log.take(), vec!["C3", "C2", "C1"]);
    }

    #[tokio::test]
    async fn test_serial_query_stops_at_first_hit() {
        let log = QueryLog::default();
        let c1 = Arc::new(StubCache::new("C1", &log));
        let c2 = Arc::new(StubCache::new("C2", &log));
        c1.insert("k", Bytes::from_static(b"low"));
        c2.insert("k", Bytes::from_static(b"high"));

        let aggregator = CachesAggregator::new(vec![c1, c2]);
        let entry = query(&aggregator, "k").await.unwrap();
        assert_eq!(entry.data.as_deref(), Some(&b"high"[..]));
        assert_eq!(log.take(), vec!["C2"]);
    }

    #[tokio::test]
    async fn test_concurrent_query_returns_first_completed_hit() {
        let log = QueryLog::default();
        let slow = Arc::new(StubCache::new("slow", &log).with_delay(Duration::from_millis(300)));
        let fast = Arc::new(StubCache::new("fast", &log).with_delay(Duration::from_millis(10)));
        slow.insert("k", Bytes::from_static(b"slow"));
        fast.insert("k", Bytes::from_static(b"fast"));

        // `slow` has the higher priority but answers later
        let aggregator = CachesAggregator::new(vec![fast, slow]);
        aggregator.set_query_policy(AggregationPolicy::Concurrent);

        let started = tokio::time::Instant::now();
        let entry = query(&aggregator, "k").await.unwrap();
        assert_eq!(entry.data.as_deref(), Some(&b"fast"[..]));
        assert!(started.elapsed() < Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_empty_list_is_a_miss() {
        let aggregator = CachesAggregator::default();
        assert!(query(&aggregator, "k").await.is_none());
        assert_eq!(
            aggregator
                .contains(&CacheKey::new("k"), CacheType::All)
                .await
                .unwrap(),
            CacheType::None
        );
        aggregator
            .store(&CacheKey::new("k"), None, Some(Bytes::from_static(b"v")), CacheType::All)
            .await
            .unwrap();
        aggregator.clear(CacheType::All).await.unwrap();
    }

    #[tokio::test]
    async fn test_store_defaults_to_highest_only() {
        let log = QueryLog::default();
        let low = Arc::new(StubCache::new("low", &log));
        let high = Arc::new(StubCache::new("high", &log));
        let aggregator = CachesAggregator::new(vec![low.clone(), high.clone()]);

        aggregator
            .store(&CacheKey::new("k"), None, Some(Bytes::from_static(b"v")), CacheType::All)
            .await
            .unwrap();
        assert!(high.has("k"));
        assert!(!low.has("k"));

        aggregator.set_store_policy(AggregationPolicy::LowestOnly);
        aggregator
            .store(&CacheKey::new("j"), None, Some(Bytes::from_static(b"v")), CacheType::All)
            .await
            .unwrap();
        assert!(low.has("j"));
        assert!(!high.has("j"));
    }

    #[tokio::test]
    async fn test_store_then_query_round_trip() {
        let log = QueryLog::default();
        let aggregator = CachesAggregator::new(vec![Arc::new(StubCache::new("C1", &log))]);
        let key = CacheKey::new("http://x/a.png");

        aggregator
            .store(&key, None, Some(Bytes::from_static(b"PNGDATA")), CacheType::All)
            .await
            .unwrap();
        let first = query(&aggregator, key.as_str()).await.unwrap();
        let second = query(&aggregator, key.as_str()).await.unwrap();
        assert_eq!(first.data.as_deref(), Some(&b"PNGDATA"[..]));
        assert_eq!(first.data, second.data);
    }

    #[tokio::test]
    async fn test_failing_tier_is_a_miss_for_queries() {
        let log = QueryLog::default();
        let broken = Arc::new(StubCache::new("broken", &log).failing());
        let healthy = Arc::new(StubCache::new("healthy", &log));
        healthy.insert("k", Bytes::from_static(b"ok"));

        let aggregator = CachesAggregator::new(vec![healthy, broken]);
        let entry = query(&aggregator, "k").await.unwrap();
        assert_eq!(entry.data.as_deref(), Some(&b"ok"[..]));
    }

    #[tokio::test]
    async fn test_mutation_errors_are_aggregated_after_all_tiers_ran() {
        let log = QueryLog::default();
        let broken = Arc::new(StubCache::new("broken", &log).failing());
        let healthy = Arc::new(StubCache::new("healthy", &log));
        healthy.insert("k", Bytes::from_static(b"ok"));

        let aggregator = CachesAggregator::new(vec![healthy.clone(), broken]);
        let err = aggregator
            .remove(&CacheKey::new("k"), CacheType::All)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("1 of 2"));
        assert!(!healthy.has("k"));
    }

    #[tokio::test]
    async fn test_list_mutation() {
        let log = QueryLog::default();
        let c1: Arc<dyn ResourceCache> = Arc::new(StubCache::new("C1", &log));
        let c2: Arc<dyn ResourceCache> = Arc::new(StubCache::new("C2", &log));

        let aggregator = CachesAggregator::default();
        aggregator.add_cache(c1.clone());
        aggregator.add_cache(c2.clone());
        assert_eq!(aggregator.len(), 2);

        let snapshot = aggregator.caches();
        assert!(aggregator.remove_cache(&c1));
        assert!(!aggregator.remove_cache(&c1));
        assert_eq!(aggregator.len(), 1);
        assert_eq!(snapshot.len(), 2);
        assert!(Arc::ptr_eq(&aggregator.caches()[0], &c2));

        aggregator.set_caches(Vec::new());
        assert!(aggregator.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_contains() {
        let log = QueryLog::default();
        let c1 = Arc::new(StubCache::new("C1", &log));
        let c2 = Arc::new(StubCache::new("C2", &log));
        c1.insert("k", Bytes::from_static(b"v"));

        let aggregator = CachesAggregator::new(vec![c1, c2]);
        aggregator.set_contains_policy(AggregationPolicy::Concurrent);
        assert_eq!(
            aggregator
                .contains(&CacheKey::new("k"), CacheType::All)
                .await
                .unwrap(),
            CacheType::Memory
        );
    }
}
