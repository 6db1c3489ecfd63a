//! # Builders
//!
//! Fluent construction of [`ResourceManager`] and [`HttpLoaderConfig`].
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use strata_engine::{CacheConfig, HttpLoaderConfig, ResourceManager};
//!
//! # async fn run() -> Result<(), strata_engine::BuildError> {
//! let manager = ResourceManager::builder()
//!     .with_cache_config(CacheConfig::memory_only())
//!     .with_http_config(
//!         HttpLoaderConfig::builder()
//!             .with_timeout(Duration::from_secs(60))
//!             .with_user_agent("MyApp/1.0")
//!             .with_header("X-Api-Key", "my-secret-key")
//!             .build(),
//!     )
//!     .build()
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::cache::{CacheConfig, CachePolicies, CacheSerializer, CachesAggregator, ResourceCache, TieredCache};
use crate::config::{HttpLoaderConfig, ManagerConfig, StoreBackPolicy};
use crate::decode::ResourceDecoder;
use crate::decrypt::DataDecryptor;
use crate::error::BuildError;
use crate::failed::{BlockPolicy, FailedKeyRegistry};
use crate::key::CacheKeyFilter;
use crate::loader::{HttpLoader, LoadersAggregator, ResourceLoader};
use crate::manager::{ManagerDelegate, ResourceManager};
use crate::processor::OptionsProcessor;
use crate::transform::ResourceTransformer;

/// Builder for [`ResourceManager`].
///
/// Unless explicit lists are given, the manager gets one [`TieredCache`]
/// built from the cache config (none when caching is disabled) and one
/// [`HttpLoader`] built from the HTTP config.
#[derive(Default)]
pub struct ResourceManagerBuilder {
    cache_config: CacheConfig,
    http_config: HttpLoaderConfig,
    caches: Option<Vec<Arc<dyn ResourceCache>>>,
    loaders: Option<Vec<Arc<dyn ResourceLoader>>>,
    policies: CachePolicies,
    config: ManagerConfig,
    failed_keys: Option<Arc<FailedKeyRegistry>>,
    block_policy: Option<Arc<dyn BlockPolicy>>,
    decoder: Option<Arc<dyn ResourceDecoder>>,
    transformer: Option<Arc<dyn ResourceTransformer>>,
    cache_key_filter: Option<Arc<dyn CacheKeyFilter>>,
    cache_serializer: Option<Arc<dyn CacheSerializer>>,
    decryptor: Option<Arc<dyn DataDecryptor>>,
    options_processor: Option<Arc<dyn OptionsProcessor>>,
    delegate: Option<Arc<dyn ManagerDelegate>>,
}

impl ResourceManagerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration of the default tiered cache
    pub fn with_cache_config(mut self, cache_config: CacheConfig) -> Self {
        self.cache_config = cache_config;
        self
    }

    /// Configuration of the default HTTP loader
    pub fn with_http_config(mut self, http_config: HttpLoaderConfig) -> Self {
        self.http_config = http_config;
        self
    }

    /// Replace the default cache with these tiers, lowest priority first
    pub fn with_caches(mut self, caches: Vec<Arc<dyn ResourceCache>>) -> Self {
        self.caches = Some(caches);
        self
    }

    /// Replace the default loader with these, lowest priority first
    pub fn with_loaders(mut self, loaders: Vec<Arc<dyn ResourceLoader>>) -> Self {
        self.loaders = Some(loaders);
        self
    }

    pub fn with_cache_policies(mut self, policies: CachePolicies) -> Self {
        self.policies = policies;
        self
    }

    pub fn with_store_back(mut self, store_back: StoreBackPolicy) -> Self {
        self.config = self.config.with_store_back(store_back);
        self
    }

    /// Share a failed-key registry with other managers
    pub fn with_failed_keys(mut self, failed_keys: Arc<FailedKeyRegistry>) -> Self {
        self.failed_keys = Some(failed_keys);
        self
    }

    pub fn with_block_policy(mut self, policy: Arc<dyn BlockPolicy>) -> Self {
        self.block_policy = Some(policy);
        self
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn ResourceDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    pub fn with_transformer(mut self, transformer: Arc<dyn ResourceTransformer>) -> Self {
        self.transformer = Some(transformer);
        self
    }

    pub fn with_cache_key_filter(mut self, filter: Arc<dyn CacheKeyFilter>) -> Self {
        self.cache_key_filter = Some(filter);
        self
    }

    pub fn with_cache_serializer(mut self, serializer: Arc<dyn CacheSerializer>) -> Self {
        self.cache_serializer = Some(serializer);
        self
    }

    pub fn with_decryptor(mut self, decryptor: Arc<dyn DataDecryptor>) -> Self {
        self.decryptor = Some(decryptor);
        self
    }

    pub fn with_options_processor(mut self, processor: Arc<dyn OptionsProcessor>) -> Self {
        self.options_processor = Some(processor);
        self
    }

    pub fn with_delegate(mut self, delegate: Arc<dyn ManagerDelegate>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    /// Build the manager, creating the default collaborators where needed
    pub async fn build(self) -> Result<ResourceManager, BuildError> {
        let caches = match self.caches {
            Some(caches) => caches,
            None if self.cache_config.enabled => {
                let cache: Arc<dyn ResourceCache> = Arc::new(TieredCache::new(self.cache_config).await?);
                vec![cache]
            }
            None => Vec::new(),
        };
        let loaders = match self.loaders {
            Some(loaders) => loaders,
            None => {
                let loader: Arc<dyn ResourceLoader> = Arc::new(HttpLoader::new(self.http_config)?);
                vec![loader]
            }
        };

        let failed_keys = self.failed_keys.unwrap_or_default();
        if let Some(policy) = self.block_policy {
            failed_keys.set_policy(policy);
        }

        let manager = ResourceManager::with_parts(
            Arc::new(CachesAggregator::new(caches).with_policies(self.policies)),
            Arc::new(LoadersAggregator::new(loaders)),
            failed_keys,
            self.config,
        );
        if let Some(decoder) = self.decoder {
            manager.set_decoder(decoder);
        }
        manager.set_transformer(self.transformer);
        manager.set_cache_key_filter(self.cache_key_filter);
        manager.set_cache_serializer(self.cache_serializer);
        manager.set_decryptor(self.decryptor);
        manager.set_options_processor(self.options_processor);
        manager.set_delegate(self.delegate);

        Ok(manager)
    }
}

/// Builder for creating [`HttpLoaderConfig`] instances with a fluent API
#[derive(Debug, Clone, Default)]
pub struct HttpLoaderConfigBuilder {
    /// Internal config being built
    config: HttpLoaderConfig,
}

impl HttpLoaderConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the overall timeout for the entire HTTP request
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the connection timeout (time to establish initial connection)
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn with_pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.pool_idle_timeout = timeout;
        self
    }

    /// Set whether to follow redirects
    pub fn with_follow_redirects(mut self, follow: bool) -> Self {
        self.config.follow_redirects = follow;
        self
    }

    /// Set the user agent string
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Add a custom HTTP header. Invalid names or values are ignored.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        if let (Ok(name), Ok(value)) = (
            name.as_ref().parse::<HeaderName>(),
            HeaderValue::from_str(value.as_ref()),
        ) {
            self.config.headers.insert(name, value);
        }
        self
    }

    /// Set all HTTP headers, replacing any existing headers
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.config.headers = headers;
        self
    }

    /// Route every request through this proxy
    pub fn with_proxy(mut self, proxy_url: impl Into<String>) -> Self {
        self.config.proxy_url = Some(proxy_url.into());
        self.config.use_system_proxy = false; // Explicit proxy overrides system proxy
        self
    }

    /// Set whether to use system proxy settings if available
    pub fn with_system_proxy(mut self, use_system_proxy: bool) -> Self {
        // Only set system proxy if no explicit proxy is configured
        if self.config.proxy_url.is_none() {
            self.config.use_system_proxy = use_system_proxy;
        }
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay_base(mut self, delay: Duration) -> Self {
        self.config.retry_delay_base = delay;
        self
    }

    pub fn with_coalescing(mut self, coalesce: bool) -> Self {
        self.config.coalesce = coalesce;
        self
    }

    pub fn with_partial_threshold(mut self, bytes: usize) -> Self {
        self.config.partial_threshold = bytes;
        self
    }

    /// Build the HttpLoaderConfig instance
    pub fn build(self) -> HttpLoaderConfig {
        self.config
    }
}
