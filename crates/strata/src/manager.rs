//! # Resource Manager
//!
//! Drives each request through the cache, blacklist, loader, decode,
//! post-processing and store stages. Every request runs on its own tokio task
//! and is controlled through the [`CombinedOperation`] returned to the caller.
//!
//! Callbacks for one operation are strictly ordered (progress, then the
//! terminal completion) and the terminal completion is delivered at most
//! once. A cancelled operation never delivers anything again.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::{CacheEntry, CacheKey, CacheSerializer, CacheType, CachesAggregator, ResourceCache};
use crate::config::{ManagerConfig, StoreBackPolicy};
use crate::context::{RequestContext, keys};
use crate::decode::{DefaultDecoder, ResourceDecoder};
use crate::decrypt::DataDecryptor;
use crate::error::{DecodeError, FetchError, LoadError};
use crate::failed::{BlockPolicy, FailedKeyRegistry};
use crate::identifier::ResourceId;
use crate::key::{CacheKeyFilter, original_cache_key, resolve_cache_key};
use crate::loader::{LoadRequest, LoaderEvent, LoaderEvents, LoadersAggregator, ResourceLoader};
use crate::operation::{CombinedOperation, OperationState};
use crate::options::RequestOptions;
use crate::processor::OptionsProcessor;
use crate::resource::Resource;
use crate::transform::ResourceTransformer;

/// Bytes received so far for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadProgress {
    pub identifier: ResourceId,
    pub received: u64,
    pub expected: Option<u64>,
}

/// A successfully produced resource
#[derive(Debug, Clone)]
pub struct LoadedResource {
    pub resource: Resource,
    /// The bytes the resource was decoded from, when available
    pub data: Option<Bytes>,
}

/// Delivered to the completion callback
#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub identifier: ResourceId,
    pub result: Result<LoadedResource, LoadError>,
    /// Tier that answered, `None` for loader results
    pub cache_type: CacheType,
    /// `false` for progressive partials and the cached copy of a refresh
    pub finished: bool,
}

pub type OnProgress = Arc<dyn Fn(LoadProgress) + Send + Sync>;
pub type OnComplete = Arc<dyn Fn(LoadOutcome) + Send + Sync>;

/// Last word on whether a cache miss may go to the network
pub trait ManagerDelegate: Send + Sync {
    fn should_load(&self, _identifier: &ResourceId) -> bool {
        true
    }
}

struct ManagerInner {
    caches: Arc<CachesAggregator>,
    loaders: Arc<LoadersAggregator>,
    failed: Arc<FailedKeyRegistry>,
    decoder: RwLock<Arc<dyn ResourceDecoder>>,
    transformer: RwLock<Option<Arc<dyn ResourceTransformer>>>,
    cache_key_filter: RwLock<Option<Arc<dyn CacheKeyFilter>>>,
    cache_serializer: RwLock<Option<Arc<dyn CacheSerializer>>>,
    decryptor: RwLock<Option<Arc<dyn DataDecryptor>>>,
    options_processor: RwLock<Option<Arc<dyn OptionsProcessor>>>,
    delegate: RwLock<Option<Arc<dyn ManagerDelegate>>>,
    running: Mutex<HashMap<u64, CombinedOperation>>,
    next_id: AtomicU64,
    config: ManagerConfig,
}

/// Entry point for loading resources through caches and loaders
#[derive(Clone)]
pub struct ResourceManager {
    inner: Arc<ManagerInner>,
}

impl ResourceManager {
    /// Manager over the given aggregators with default settings
    pub fn new(caches: Arc<CachesAggregator>, loaders: Arc<LoadersAggregator>) -> Self {
        Self::with_parts(
            caches,
            loaders,
            Arc::new(FailedKeyRegistry::default()),
            ManagerConfig::default(),
        )
    }

    pub fn builder() -> crate::builder::ResourceManagerBuilder {
        crate::builder::ResourceManagerBuilder::new()
    }

    pub(crate) fn with_parts(
        caches: Arc<CachesAggregator>,
        loaders: Arc<LoadersAggregator>,
        failed: Arc<FailedKeyRegistry>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                caches,
                loaders,
                failed,
                decoder: RwLock::new(Arc::new(DefaultDecoder::new())),
                transformer: RwLock::new(None),
                cache_key_filter: RwLock::new(None),
                cache_serializer: RwLock::new(None),
                decryptor: RwLock::new(None),
                options_processor: RwLock::new(None),
                delegate: RwLock::new(None),
                running: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                config,
            }),
        }
    }

    /// Start loading `identifier`.
    ///
    /// Returns immediately. An empty identifier completes with
    /// `InvalidIdentifier` before this function returns; everything else runs
    /// on a spawned task, so this must be called within a tokio runtime.
    pub fn load_resource(
        &self,
        identifier: impl Into<ResourceId>,
        options: RequestOptions,
        context: RequestContext,
        on_progress: Option<OnProgress>,
        on_complete: Option<OnComplete>,
    ) -> CombinedOperation {
        let identifier = identifier.into();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let operation = CombinedOperation::new(id, identifier.clone());

        let request = Request {
            operation: operation.clone(),
            identifier,
            options,
            context,
            on_progress,
            on_complete,
        };

        if request.identifier.is_empty() {
            debug!(id, "Rejecting empty identifier");
            let error = LoadError::InvalidIdentifier(request.identifier.to_string());
            request.report(Err(error), CacheType::None, true);
            return operation;
        }

        self.inner.running.lock().insert(id, operation.clone());
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let _registration = Registration {
                inner: inner.clone(),
                id,
            };
            inner.run(request).await;
        });

        operation
    }

    /// Load `identifier` and wait for the terminal outcome.
    ///
    /// Dropping the returned future cancels the request.
    pub async fn load(
        &self,
        identifier: impl Into<ResourceId>,
        options: RequestOptions,
        context: RequestContext,
    ) -> Result<LoadedResource, LoadError> {
        let (sender, receiver) = oneshot::channel();
        let sender = Mutex::new(Some(sender));
        let on_complete: OnComplete = Arc::new(move |outcome: LoadOutcome| {
            if !outcome.finished {
                return;
            }
            if let Some(sender) = sender.lock().take() {
                let _ = sender.send(outcome.result);
            }
        });

        let operation = self.load_resource(identifier, options, context, None, Some(on_complete));
        let _guard = CancelOnDrop(operation);

        // The sender is dropped without a value only when the operation was cancelled
        receiver.await.unwrap_or(Err(LoadError::Cancelled))
    }

    /// Cancel every running operation
    pub fn cancel_all(&self) {
        let operations: Vec<CombinedOperation> =
            self.inner.running.lock().drain().map(|(_, op)| op).collect();
        if !operations.is_empty() {
            debug!(count = operations.len(), "Cancelling all running operations");
        }
        for operation in operations {
            operation.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        !self.inner.running.lock().is_empty()
    }

    pub fn running_count(&self) -> usize {
        self.inner.running.lock().len()
    }

    pub fn remove_failed_key(&self, identifier: &ResourceId) -> bool {
        self.inner.failed.remove(identifier)
    }

    pub fn remove_all_failed_keys(&self) {
        self.inner.failed.remove_all();
    }

    /// Key a request for `identifier` with `context` would be cached under
    pub fn cache_key(&self, identifier: &ResourceId, context: &RequestContext) -> Option<CacheKey> {
        let context = self.inner.with_manager_defaults(context.clone());
        resolve_cache_key(identifier, &context)
    }

    pub fn caches(&self) -> &Arc<CachesAggregator> {
        &self.inner.caches
    }

    pub fn loaders(&self) -> &Arc<LoadersAggregator> {
        &self.inner.loaders
    }

    pub fn failed_keys(&self) -> &Arc<FailedKeyRegistry> {
        &self.inner.failed
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    pub fn set_options_processor(&self, processor: Option<Arc<dyn OptionsProcessor>>) {
        *self.inner.options_processor.write() = processor;
    }

    pub fn set_block_policy(&self, policy: Arc<dyn BlockPolicy>) {
        self.inner.failed.set_policy(policy);
    }

    pub fn set_delegate(&self, delegate: Option<Arc<dyn ManagerDelegate>>) {
        *self.inner.delegate.write() = delegate;
    }

    pub fn set_decoder(&self, decoder: Arc<dyn ResourceDecoder>) {
        *self.inner.decoder.write() = decoder;
    }

    /// Transformer applied to requests whose context has none
    pub fn set_transformer(&self, transformer: Option<Arc<dyn ResourceTransformer>>) {
        *self.inner.transformer.write() = transformer;
    }

    pub fn set_cache_key_filter(&self, filter: Option<Arc<dyn CacheKeyFilter>>) {
        *self.inner.cache_key_filter.write() = filter;
    }

    pub fn set_cache_serializer(&self, serializer: Option<Arc<dyn CacheSerializer>>) {
        *self.inner.cache_serializer.write() = serializer;
    }

    /// Decryptor for requests whose context does not carry one
    pub fn set_decryptor(&self, decryptor: Option<Arc<dyn DataDecryptor>>) {
        *self.inner.decryptor.write() = decryptor;
    }
}

/// Removes a finished operation from the running set, even on panic
struct Registration {
    inner: Arc<ManagerInner>,
    id: u64,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.inner.running.lock().remove(&self.id);
    }
}

struct CancelOnDrop(CombinedOperation);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// One request as seen by its task
struct Request {
    operation: CombinedOperation,
    identifier: ResourceId,
    options: RequestOptions,
    context: RequestContext,
    on_progress: Option<OnProgress>,
    on_complete: Option<OnComplete>,
}

impl Request {
    fn report(&self, result: Result<LoadedResource, LoadError>, cache_type: CacheType, finished: bool) {
        let terminal = finished.then(|| {
            if result.is_ok() {
                OperationState::Done
            } else {
                OperationState::Failed
            }
        });
        let outcome = LoadOutcome {
            identifier: self.identifier.clone(),
            result,
            cache_type,
            finished,
        };
        self.operation.deliver(terminal, || {
            if let Some(on_complete) = &self.on_complete {
                on_complete(outcome);
            }
        });
    }

    fn progress(&self, received: u64, expected: Option<u64>) {
        let Some(on_progress) = &self.on_progress else {
            return;
        };
        self.operation.deliver(None, || {
            on_progress(LoadProgress {
                identifier: self.identifier.clone(),
                received,
                expected,
            })
        });
    }

    fn advance(&self, state: OperationState) -> Result<(), LoadError> {
        if self.operation.advance(state) {
            Ok(())
        } else {
            Err(LoadError::Cancelled)
        }
    }

    /// Key handed to transformers when caching is disabled for the request
    fn transformer_cache_key(&self, key: Option<&CacheKey>) -> CacheKey {
        key.cloned()
            .unwrap_or_else(|| CacheKey::new(self.identifier.as_str()))
    }

    fn store_scope(&self) -> CacheType {
        let scope = self.context.cache_type(keys::STORE_CACHE_TYPE, CacheType::All);
        if self.options.contains(RequestOptions::AVOID_DISK_STORE) {
            scope.without_disk()
        } else {
            scope
        }
    }
}

/// Run `future` unless `token` fires first
async fn until_cancelled<F: Future>(
    token: &CancellationToken,
    future: F,
) -> Result<F::Output, LoadError> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(LoadError::Cancelled),
        output = future => Ok(output),
    }
}

impl ManagerInner {
    async fn run(&self, mut request: Request) {
        let id = request.operation.id();
        match self.drive(&mut request).await {
            Ok((loaded, cache_type)) => {
                debug!(id, identifier = %request.identifier, ?cache_type, "Request completed");
                request.report(Ok(loaded), cache_type, true);
            }
            Err(LoadError::Cancelled) => {
                debug!(id, identifier = %request.identifier, "Request stopped after cancellation");
            }
            Err(error) => {
                debug!(id, identifier = %request.identifier, %error, "Request failed");
                request.report(Err(error), CacheType::None, true);
            }
        }
    }

    async fn drive(&self, request: &mut Request) -> Result<(LoadedResource, CacheType), LoadError> {
        request.advance(OperationState::ResolvingOptions)?;
        let (options, context) = self
            .resolve_options(&request.identifier, request.options, request.context.clone())
            .ok_or_else(|| LoadError::ProcessingRejected(request.identifier.clone()))?;
        request.options = options;
        request.context = context;

        if options.contains(RequestOptions::FROM_CACHE_ONLY | RequestOptions::FROM_LOADER_ONLY) {
            return Err(LoadError::NotCached(request.identifier.clone()));
        }

        let request = &*request;
        let key = resolve_cache_key(&request.identifier, &request.context);
        let cache: Arc<dyn ResourceCache> = match request.context.cache() {
            Some(cache) => cache,
            None => self.caches.clone(),
        };

        if !options.contains(RequestOptions::FROM_LOADER_ONLY) {
            if let Some(key) = &key {
                if let Some((loaded, cache_type)) = self.query_caches(request, &cache, key).await? {
                    let refresh = options.contains(RequestOptions::REFRESH_CACHED)
                        && !options.contains(RequestOptions::FROM_CACHE_ONLY);
                    if !refresh {
                        return Ok((loaded, cache_type));
                    }
                    debug!(identifier = %request.identifier, "Delivering cached copy before refresh");
                    request.report(Ok(loaded), cache_type, false);
                }
            }
        }

        if options.contains(RequestOptions::FROM_CACHE_ONLY) {
            return Err(LoadError::NotCached(request.identifier.clone()));
        }

        request.advance(OperationState::CheckingBlacklist)?;
        if !options.contains(RequestOptions::RETRY_FAILED) && self.failed.is_failed(&request.identifier)
        {
            return Err(LoadError::Blacklisted(request.identifier.clone()));
        }
        let delegate = self.delegate.read().clone();
        if let Some(delegate) = delegate {
            if !delegate.should_load(&request.identifier) {
                return Err(LoadError::LoadDisallowed(request.identifier.clone()));
            }
        }

        request.advance(OperationState::Loading)?;
        let data = self.run_loader(request, key.as_ref()).await?;
        if options.contains(RequestOptions::RETRY_FAILED) {
            self.failed.remove(&request.identifier);
        }
        let data = match request.context.decryptor() {
            Some(decryptor) => self.decrypt(request, decryptor, data).await?,
            None => data,
        };

        let transformer = request.context.transformer();
        if transformer.is_some() {
            self.store_original(request, &cache, key.as_ref(), &data).await?;
        }

        let resource = if options.contains(RequestOptions::AVOID_DECODE) {
            Resource::raw(data.clone())
        } else {
            request.advance(OperationState::Decoding)?;
            match self.decode(request, data.clone()).await {
                Ok(resource) => resource,
                Err(error) => {
                    if let LoadError::DecodeFailed { source, .. } = &error {
                        self.record_failure(request, &FetchError::BadData(source.to_string()));
                    }
                    return Err(error);
                }
            }
        };

        request.advance(OperationState::PostProcessing)?;
        let transform_key = request.transformer_cache_key(key.as_ref());
        let transformed = match &transformer {
            Some(transformer) => {
                self.transform(request, transformer, &resource, &transform_key)
                    .await?
            }
            None => None,
        };
        let (resource, transformed) = match transformed {
            Some(transformed) => (transformed, true),
            None => (resource, false),
        };

        request.advance(OperationState::Storing)?;
        if let Some(key) = key {
            let scope = request.store_scope();
            if scope != CacheType::None {
                let disk = self.disk_bytes(request, &resource, Some(&data), scope, transformed);
                self.store(request, &cache, key, Some(resource.clone()), disk, scope)
                    .await?;
            }
        }

        Ok((
            LoadedResource {
                resource,
                data: Some(data),
            },
            CacheType::None,
        ))
    }

    fn resolve_options(
        &self,
        identifier: &ResourceId,
        options: RequestOptions,
        context: RequestContext,
    ) -> Option<(RequestOptions, RequestContext)> {
        let context = self.with_manager_defaults(context);
        let processor = self.options_processor.read().clone();
        match processor {
            Some(processor) => processor
                .process(identifier, options, &context)
                .map(|result| (result.options, result.context)),
            None => Some((options, context)),
        }
    }

    /// Fill in manager-level collaborators the context does not override
    fn with_manager_defaults(&self, mut context: RequestContext) -> RequestContext {
        if !context.contains(keys::TRANSFORMER) {
            let transformer = self.transformer.read().clone();
            if let Some(transformer) = transformer {
                context = context.with_transformer(transformer);
            }
        }
        if !context.contains(keys::CACHE_KEY_FILTER) {
            let filter = self.cache_key_filter.read().clone();
            if let Some(filter) = filter {
                context = context.with_cache_key_filter(filter);
            }
        }
        if !context.contains(keys::CACHE_SERIALIZER) {
            let serializer = self.cache_serializer.read().clone();
            if let Some(serializer) = serializer {
                context = context.with_cache_serializer(serializer);
            }
        }
        if !context.contains(keys::DECRYPTOR) {
            let decryptor = self.decryptor.read().clone();
            if let Some(decryptor) = decryptor {
                context = context.with_decryptor(decryptor);
            }
        }
        context
    }

    /// Query the full key, then the original key when post-processing could
    /// rebuild the result from it.
    async fn query_caches(
        &self,
        request: &Request,
        cache: &Arc<dyn ResourceCache>,
        key: &CacheKey,
    ) -> Result<Option<(LoadedResource, CacheType)>, LoadError> {
        let scope = request
            .context
            .cache_type(keys::QUERY_CACHE_TYPE, CacheType::All);
        if scope != CacheType::None {
            request.advance(OperationState::QueryingCache)?;
            if let Some(entry) = self.query(request, cache, key, scope).await? {
                if let Some(hit) = self.resolve_hit(request, cache, key, entry).await? {
                    return Ok(Some(hit));
                }
            }
        }

        let post_processed =
            request.context.transformer().is_some() || request.context.thumbnail_size().is_some();
        if !post_processed {
            return Ok(None);
        }

        let original_scope = request
            .context
            .cache_type(keys::ORIGINAL_QUERY_CACHE_TYPE, CacheType::Disk);
        let Some(original_key) = original_cache_key(&request.identifier, &request.context) else {
            return Ok(None);
        };
        if original_scope == CacheType::None || original_key == *key {
            return Ok(None);
        }

        request.advance(OperationState::QueryingCache)?;
        debug!(key = %original_key, "Querying original data");
        match self.query(request, cache, &original_key, original_scope).await? {
            Some(entry) => self.resolve_hit(request, cache, key, entry).await,
            None => Ok(None),
        }
    }

    async fn query(
        &self,
        request: &Request,
        cache: &Arc<dyn ResourceCache>,
        key: &CacheKey,
        scope: CacheType,
    ) -> Result<Option<CacheEntry>, LoadError> {
        let token = request.operation.begin_cache_operation();
        let result = until_cancelled(
            &token,
            cache.query(key, request.options, &request.context, scope),
        )
        .await;
        request.operation.end_cache_operation();

        match result? {
            Ok(Some(entry)) if entry.has_content() => Ok(Some(entry)),
            Ok(_) => Ok(None),
            Err(error) => {
                warn!(key = %key, %error, "Cache query failed, treating as a miss");
                Ok(None)
            }
        }
    }

    /// Turn a cache entry into a deliverable resource, post-processing and
    /// storing back under `key` when the entry predates the transformer.
    ///
    /// `None` means the entry was unusable and the request should continue
    /// as a miss.
    async fn resolve_hit(
        &self,
        request: &Request,
        cache: &Arc<dyn ResourceCache>,
        key: &CacheKey,
        entry: CacheEntry,
    ) -> Result<Option<(LoadedResource, CacheType)>, LoadError> {
        let avoid_decode = request.options.contains(RequestOptions::AVOID_DECODE);
        let CacheEntry {
            resource,
            data,
            cache_type,
            transform_key,
        } = entry;

        let mut resource = match resource {
            Some(resource) if avoid_decode || resource.is_decoded() => resource,
            resource => {
                let Some(bytes) = data
                    .clone()
                    .or_else(|| resource.map(|r| r.payload().clone()))
                else {
                    return Ok(None);
                };
                if avoid_decode {
                    Resource::raw(bytes)
                } else {
                    match self.decode(request, bytes).await {
                        Ok(resource) => resource,
                        Err(LoadError::Cancelled) => return Err(LoadError::Cancelled),
                        Err(error) => {
                            warn!(key = %key, %error, "Discarding undecodable cache entry");
                            return Ok(None);
                        }
                    }
                }
            }
        };
        if resource.transform_key().is_none() {
            if let Some(tag) = transform_key {
                resource = resource.with_transform_key(tag);
            }
        }

        request.advance(OperationState::PostProcessing)?;
        if let Some(transformer) = request.context.transformer() {
            if resource.transform_key() != Some(transformer.key()) {
                let transformed = self.transform(request, &transformer, &resource, key).await?;
                if let Some(transformed) = transformed {
                    resource = transformed;
                    self.store_back(request, cache, key, &resource).await?;
                }
            }
        }

        Ok(Some((LoadedResource { resource, data }, cache_type)))
    }

    async fn store_back(
        &self,
        request: &Request,
        cache: &Arc<dyn ResourceCache>,
        key: &CacheKey,
        resource: &Resource,
    ) -> Result<(), LoadError> {
        let scope = request.store_scope();
        let allowed = match self.config.store_back {
            StoreBackPolicy::Always => true,
            StoreBackPolicy::RequireDisk => scope.includes_disk(),
            StoreBackPolicy::Never => false,
        };
        if !allowed || scope == CacheType::None {
            debug!(key = %key, ?scope, "Skipping store-back");
            return Ok(());
        }

        let disk = self.disk_bytes(request, resource, None, scope, true);
        self.store(request, cache, key.clone(), Some(resource.clone()), disk, scope)
            .await
    }

    /// Keep the undecoded download under the original key so other
    /// post-processing variants can be built without refetching
    async fn store_original(
        &self,
        request: &Request,
        cache: &Arc<dyn ResourceCache>,
        key: Option<&CacheKey>,
        data: &Bytes,
    ) -> Result<(), LoadError> {
        let Some(original_key) = original_cache_key(&request.identifier, &request.context) else {
            return Ok(());
        };
        if key == Some(&original_key) {
            return Ok(());
        }

        let mut scope = request
            .context
            .cache_type(keys::ORIGINAL_STORE_CACHE_TYPE, CacheType::Disk);
        if request.options.contains(RequestOptions::AVOID_DISK_STORE) {
            scope = scope.without_disk();
        }
        if scope == CacheType::None {
            return Ok(());
        }

        self.store(request, cache, original_key, None, Some(data.clone()), scope)
            .await
    }

    /// Bytes persisted by disk tiers for `resource`
    fn disk_bytes(
        &self,
        request: &Request,
        resource: &Resource,
        original: Option<&Bytes>,
        scope: CacheType,
        transformed: bool,
    ) -> Option<Bytes> {
        if !scope.includes_disk() {
            return None;
        }
        if let Some(serializer) = request.context.cache_serializer() {
            if let Some(bytes) = serializer.serialize(resource, original, &request.identifier) {
                return Some(bytes);
            }
        }
        match original {
            Some(data) if !transformed => Some(data.clone()),
            _ => Some(resource.payload().clone()),
        }
    }

    async fn store(
        &self,
        request: &Request,
        cache: &Arc<dyn ResourceCache>,
        key: CacheKey,
        resource: Option<Resource>,
        data: Option<Bytes>,
        scope: CacheType,
    ) -> Result<(), LoadError> {
        if request.options.contains(RequestOptions::DETACH_STORE) {
            let cache = cache.clone();
            tokio::spawn(async move {
                if let Err(error) = cache.store(&key, resource, data, scope).await {
                    warn!(key = %key, %error, "Detached cache store failed");
                }
            });
            return Ok(());
        }

        let result = until_cancelled(
            request.operation.token(),
            cache.store(&key, resource, data, scope),
        )
        .await?;
        if let Err(error) = result {
            warn!(key = %key, %error, "Cache store failed");
        }
        Ok(())
    }

    async fn run_loader(&self, request: &Request, key: Option<&CacheKey>) -> Result<Bytes, LoadError> {
        let loader: Arc<dyn ResourceLoader> = match request.context.loader() {
            Some(loader) => loader,
            None => self.loaders.clone(),
        };

        let token = request.operation.begin_loader_operation();
        let (events, mut receiver) = LoaderEvents::channel();
        let load_request = LoadRequest::new(
            request.identifier.clone(),
            request.options,
            request.context.clone(),
        )
        .with_cancel(token.clone());

        let load = loader.load(load_request, events);
        tokio::pin!(load);

        let result = loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    request.operation.end_loader_operation();
                    return Err(LoadError::Cancelled);
                }
                Some(event) = receiver.recv() => {
                    self.handle_loader_event(request, key, event).await;
                }
                result = &mut load => break result,
            }
        };
        request.operation.end_loader_operation();

        // Progress sent right before completion is still reported
        while let Ok(event) = receiver.try_recv() {
            if let LoaderEvent::Progress { received, expected } = event {
                request.progress(received, expected);
            }
        }

        match result {
            Ok(data) => {
                debug!(identifier = %request.identifier, bytes = data.len(), "Loader finished");
                Ok(data)
            }
            Err(_) if token.is_cancelled() => Err(LoadError::Cancelled),
            Err(error) => {
                self.record_failure(request, &error);
                Err(LoadError::from_fetch(&request.identifier, error))
            }
        }
    }

    async fn handle_loader_event(&self, request: &Request, key: Option<&CacheKey>, event: LoaderEvent) {
        match event {
            LoaderEvent::Progress { received, expected } => request.progress(received, expected),
            LoaderEvent::Partial(data) => {
                // Partials cannot be decrypted
                if !request.options.is_progressive() || request.context.decryptor().is_some() {
                    return;
                }
                if let Some(resource) = self.render_partial(request, key, data.clone()).await {
                    request.report(
                        Ok(LoadedResource {
                            resource,
                            data: Some(data),
                        }),
                        CacheType::None,
                        false,
                    );
                }
            }
        }
    }

    async fn render_partial(
        &self,
        request: &Request,
        key: Option<&CacheKey>,
        data: Bytes,
    ) -> Option<Resource> {
        if request.options.contains(RequestOptions::AVOID_DECODE) {
            return Some(Resource::raw(data).with_partial(true));
        }

        let decoder = self.decoder.read().clone();
        let transformer = request.context.transformer();
        let transform_key = request.transformer_cache_key(key);
        let options = request.options;
        let context = request.context.clone();

        let task = tokio::task::spawn_blocking(move || {
            let partial = decoder.decode_partial(&data, options, &context)?;
            let Some(transformer) = transformer else {
                return Some(partial);
            };
            match transformer.transform(&partial, &transform_key) {
                Some(transformed) => Some(
                    transformed
                        .with_transform_key(transformer.key())
                        .with_partial(true),
                ),
                None => Some(partial),
            }
        });

        match task.await {
            Ok(resource) => resource,
            Err(error) => {
                warn!(identifier = %request.identifier, %error, "Partial decode panicked");
                None
            }
        }
    }

    /// Rejected payloads fail the request and count as bad data
    async fn decrypt(
        &self,
        request: &Request,
        decryptor: Arc<dyn DataDecryptor>,
        data: Bytes,
    ) -> Result<Bytes, LoadError> {
        let identifier = request.identifier.clone();
        let task = tokio::task::spawn_blocking(move || decryptor.decrypt(&data, &identifier));

        let decrypted = match until_cancelled(request.operation.token(), task).await? {
            Ok(decrypted) => decrypted,
            Err(error) => {
                warn!(identifier = %request.identifier, %error, "Decryptor panicked");
                None
            }
        };
        match decrypted {
            Some(data) => Ok(data),
            None => {
                debug!(identifier = %request.identifier, "Decryptor rejected the download");
                let error = DecodeError::Decryption;
                self.record_failure(request, &FetchError::BadData(error.to_string()));
                Err(LoadError::DecodeFailed {
                    identifier: request.identifier.clone(),
                    source: error,
                })
            }
        }
    }

    async fn decode(&self, request: &Request, data: Bytes) -> Result<Resource, LoadError> {
        let decoder = self.decoder.read().clone();
        let options = request.options;
        let context = request.context.clone();
        let task = tokio::task::spawn_blocking(move || decoder.decode(&data, options, &context));

        let decoded = match until_cancelled(request.operation.token(), task).await? {
            Ok(decoded) => decoded,
            Err(error) => Err(DecodeError::Malformed(format!("decoder panicked: {error}"))),
        };
        decoded.map_err(|source| LoadError::DecodeFailed {
            identifier: request.identifier.clone(),
            source,
        })
    }

    /// Apply `transformer`, tagging the result with its key. `None` when
    /// the transformer declines.
    async fn transform(
        &self,
        request: &Request,
        transformer: &Arc<dyn ResourceTransformer>,
        resource: &Resource,
        key: &CacheKey,
    ) -> Result<Option<Resource>, LoadError> {
        let transformer = transformer.clone();
        let resource = resource.clone();
        let key = key.clone();
        let task = tokio::task::spawn_blocking(move || {
            transformer
                .transform(&resource, &key)
                .map(|transformed| transformed.with_transform_key(transformer.key()))
        });

        match until_cancelled(request.operation.token(), task).await? {
            Ok(transformed) => Ok(transformed),
            Err(error) => {
                warn!(identifier = %request.identifier, %error, "Transformer panicked");
                Ok(None)
            }
        }
    }

    fn record_failure(&self, request: &Request, error: &FetchError) {
        if self.failed.should_block(&request.identifier, error) {
            self.failed.mark_failed(&request.identifier);
        }
    }
}
