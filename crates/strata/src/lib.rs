//! # Strata
//!
//! A resource loading engine. Requests are answered from an ordered list of
//! cache tiers when possible and fetched by the highest priority capable
//! loader otherwise; every request is a single cancellable operation with
//! exactly-once completion.
//!
//! ## Features
//!
//! - Layered caches with serial, concurrent, highest-only or lowest-only fan-out
//! - Pluggable loaders, with a default reqwest-based HTTP loader
//! - Failed-key blacklist with a configurable block policy
//! - Per-request options and context overrides
//! - Post-processing (transformers) with tagged store-back
//! - Decryptors that rewrite downloads before decoding
//! - Progressive delivery of partial payloads

pub mod builder;
pub mod cache;
pub mod config;
pub mod context;
pub mod decode;
pub mod decrypt;
pub mod error;
pub mod failed;
pub mod identifier;
pub mod key;
pub mod loader;
pub mod manager;
pub mod operation;
pub mod options;
pub mod processor;
pub mod resource;
pub mod transform;

#[cfg(test)]
mod test_utils;

pub use builder::{HttpLoaderConfigBuilder, ResourceManagerBuilder};
pub use cache::{
    AggregationPolicy, CacheConfig, CacheEntry, CacheKey, CachePolicies, CacheSerializer,
    CacheType, CachesAggregator, FileCache, MemoryCache, PayloadSerializer, ResourceCache,
    TieredCache,
};
pub use config::{HttpLoaderConfig, ManagerConfig, StoreBackPolicy};
pub use context::{ContextValue, RequestContext, keys};
pub use decode::{DefaultDecoder, ResourceDecoder};
pub use decrypt::{Base64Decryptor, DataDecryptor, FnDecryptor};
pub use error::{BuildError, DecodeError, FetchError, FetchErrorKind, LoadError};
pub use failed::{BlockPolicy, DefaultBlockPolicy, FailedKeyRegistry};
pub use identifier::ResourceId;
pub use key::{CacheKeyFilter, original_cache_key, resolve_cache_key};
pub use loader::http::create_client;
pub use loader::{
    HttpLoader, LoadRequest, LoaderEvent, LoaderEvents, LoadersAggregator, ResourceLoader,
};
pub use manager::{
    LoadOutcome, LoadProgress, LoadedResource, ManagerDelegate, OnComplete, OnProgress,
    ResourceManager,
};
pub use operation::{CombinedOperation, OperationState};
pub use options::RequestOptions;
pub use processor::{FnOptionsProcessor, OptionsProcessor, OptionsResult};
pub use resource::{MediaType, PixelSize, Resource};
pub use transform::{FnTransformer, PipelineTransformer, ResourceTransformer};
