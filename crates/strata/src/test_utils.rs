//! Stub collaborators shared by the unit tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::cache::{CacheEntry, CacheKey, CacheResult, CacheType, ResourceCache};
use crate::context::RequestContext;
use crate::error::FetchError;
use crate::identifier::ResourceId;
use crate::loader::{LoadRequest, LoaderEvents, ResourceLoader};
use crate::options::RequestOptions;
use crate::resource::Resource;
use crate::transform::ResourceTransformer;

#[inline]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer() // Write to test output
        .try_init();
}

/// Order in which stub caches were queried
#[derive(Clone, Default)]
pub struct QueryLog(Arc<Mutex<Vec<&'static str>>>);

impl QueryLog {
    pub fn record(&self, name: &'static str) {
        self.0.lock().push(name);
    }

    pub fn take(&self) -> Vec<&'static str> {
        std::mem::take(&mut *self.0.lock())
    }
}

/// A recorded store call
#[derive(Debug, Clone)]
pub struct StoreRecord {
    pub key: CacheKey,
    pub scope: CacheType,
    pub transform_key: Option<String>,
    pub data: Option<Bytes>,
}

/// Map-backed cache that answers every scope except `None`
pub struct StubCache {
    name: &'static str,
    log: QueryLog,
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
    stores: Mutex<Vec<StoreRecord>>,
    queries: AtomicUsize,
    delay: Duration,
    failing: bool,
    answer: CacheType,
}

impl StubCache {
    pub fn new(name: &'static str, log: &QueryLog) -> Self {
        Self {
            name,
            log: log.clone(),
            entries: Mutex::new(HashMap::new()),
            stores: Mutex::new(Vec::new()),
            queries: AtomicUsize::new(0),
            delay: Duration::ZERO,
            failing: false,
            answer: CacheType::Memory,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Every operation fails with an I/O error
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    /// Tier reported for hits
    pub fn answering(mut self, cache_type: CacheType) -> Self {
        self.answer = cache_type;
        self
    }

    /// Seed raw bytes under `key`
    pub fn insert(&self, key: &str, data: Bytes) {
        self.entries.lock().insert(
            CacheKey::new(key),
            CacheEntry {
                resource: None,
                data: Some(data),
                cache_type: self.answer,
                transform_key: None,
            },
        );
    }

    /// Seed a resource under `key`
    pub fn insert_resource(&self, key: &str, resource: Resource) {
        let transform_key = resource.transform_key().map(str::to_owned);
        self.entries.lock().insert(
            CacheKey::new(key),
            CacheEntry {
                resource: Some(resource),
                data: None,
                cache_type: self.answer,
                transform_key,
            },
        );
    }

    pub fn has(&self, key: &str) -> bool {
        self.entries.lock().contains_key(&CacheKey::new(key))
    }

    pub fn entry(&self, key: &str) -> Option<CacheEntry> {
        self.entries.lock().get(&CacheKey::new(key)).cloned()
    }

    pub fn stores(&self) -> Vec<StoreRecord> {
        self.stores.lock().clone()
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    fn check(&self) -> CacheResult<()> {
        if self.failing {
            return Err(std::io::Error::other(format!("{} is broken", self.name)));
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceCache for StubCache {
    async fn query(
        &self,
        key: &CacheKey,
        _options: RequestOptions,
        _context: &RequestContext,
        scope: CacheType,
    ) -> CacheResult<Option<CacheEntry>> {
        self.log.record(self.name);
        self.queries.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.check()?;
        if scope == CacheType::None {
            return Ok(None);
        }
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn store(
        &self,
        key: &CacheKey,
        resource: Option<Resource>,
        data: Option<Bytes>,
        scope: CacheType,
    ) -> CacheResult<()> {
        self.check()?;
        let transform_key = resource
            .as_ref()
            .and_then(|r| r.transform_key().map(str::to_owned));
        self.stores.lock().push(StoreRecord {
            key: key.clone(),
            scope,
            transform_key: transform_key.clone(),
            data: data.clone(),
        });
        if scope != CacheType::None {
            self.entries.lock().insert(
                key.clone(),
                CacheEntry {
                    resource,
                    data,
                    cache_type: self.answer,
                    transform_key,
                },
            );
        }
        Ok(())
    }

    async fn remove(&self, key: &CacheKey, _scope: CacheType) -> CacheResult<()> {
        self.check()?;
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn contains(&self, key: &CacheKey, _scope: CacheType) -> CacheResult<CacheType> {
        self.check()?;
        Ok(if self.entries.lock().contains_key(key) {
            self.answer
        } else {
            CacheType::None
        })
    }

    async fn clear(&self, _scope: CacheType) -> CacheResult<()> {
        self.check()?;
        self.entries.lock().clear();
        Ok(())
    }
}

/// Loader returning a canned response
pub struct StubLoader {
    response: Mutex<Result<Bytes, FetchError>>,
    calls: AtomicUsize,
    delay: Duration,
    scheme: Option<&'static str>,
    partials: Vec<Bytes>,
}

impl StubLoader {
    pub fn returning(data: Bytes) -> Self {
        Self::with_response(Ok(data))
    }

    pub fn failing(error: FetchError) -> Self {
        Self::with_response(Err(error))
    }

    fn with_response(response: Result<Bytes, FetchError>) -> Self {
        Self {
            response: Mutex::new(response),
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            scheme: None,
            partials: Vec::new(),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Only claim identifiers with this URL scheme
    pub fn with_scheme(mut self, scheme: &'static str) -> Self {
        self.scheme = Some(scheme);
        self
    }

    /// Emit these partial payloads before completing
    pub fn with_partials(mut self, partials: Vec<Bytes>) -> Self {
        self.partials = partials;
        self
    }

    pub fn set_response(&self, response: Result<Bytes, FetchError>) {
        *self.response.lock() = response;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResourceLoader for StubLoader {
    fn can_load(&self, identifier: &ResourceId) -> bool {
        match self.scheme {
            Some(scheme) => identifier.scheme().as_deref() == Some(scheme),
            None => true,
        }
    }

    async fn load(&self, request: LoadRequest, events: LoaderEvents) -> Result<Bytes, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        for partial in &self.partials {
            events.progress(partial.len() as u64, None);
            events.partial(partial.clone());
            tokio::task::yield_now().await;
        }

        if !self.delay.is_zero() {
            tokio::select! {
                _ = request.cancel.cancelled() => return Err(FetchError::Cancelled),
                _ = tokio::time::sleep(self.delay) => {}
            }
        }

        let response = self.response.lock().clone();
        if let Ok(data) = &response {
            events.progress(data.len() as u64, Some(data.len() as u64));
        }
        response
    }
}

/// Appends `+<tag>` to the payload
pub struct TagTransformer {
    tag: String,
    decline: bool,
    calls: AtomicUsize,
}

impl TagTransformer {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            decline: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// A transformer that always returns `None`
    pub fn declining(tag: &str) -> Self {
        Self {
            decline: true,
            ..Self::new(tag)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ResourceTransformer for TagTransformer {
    fn key(&self) -> &str {
        &self.tag
    }

    fn transform(&self, resource: &Resource, _cache_key: &CacheKey) -> Option<Resource> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.decline {
            return None;
        }
        let mut payload = resource.payload().to_vec();
        payload.push(b'+');
        payload.extend_from_slice(self.tag.as_bytes());
        Some(resource.clone().with_payload(Bytes::from(payload)))
    }
}
