//! # Request Context
//!
//! An immutable key/value map that travels with a single request. Values are
//! shared behind an `Arc`, so cloning a context is cheap; `with` and
//! `without` copy the map only when it is shared.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::cache::{CacheSerializer, CacheType, ResourceCache};
use crate::decrypt::DataDecryptor;
use crate::key::CacheKeyFilter;
use crate::loader::ResourceLoader;
use crate::resource::PixelSize;
use crate::transform::ResourceTransformer;

/// Well-known context keys
pub mod keys {
    /// `ContextValue::Transformer` applied after decoding
    pub const TRANSFORMER: &str = "transformer";
    /// `ContextValue::PixelSize` requested thumbnail size
    pub const THUMBNAIL_SIZE: &str = "thumbnail_size";
    /// `ContextValue::Flag`, defaults to `true`
    pub const PRESERVE_ASPECT_RATIO: &str = "preserve_aspect_ratio";
    /// `ContextValue::Cache` replacing the manager's caches for this request
    pub const CACHE: &str = "cache";
    /// `ContextValue::Loader` replacing the manager's loaders for this request
    pub const LOADER: &str = "loader";
    /// `ContextValue::CacheKeyFilter`
    pub const CACHE_KEY_FILTER: &str = "cache_key_filter";
    /// `ContextValue::CacheSerializer`
    pub const CACHE_SERIALIZER: &str = "cache_serializer";
    /// `ContextValue::Decryptor` applied to downloads before decoding
    pub const DECRYPTOR: &str = "decryptor";
    /// `ContextValue::CacheType` scope of the cache query, defaults to `All`
    pub const QUERY_CACHE_TYPE: &str = "query_cache_type";
    /// `ContextValue::CacheType` scope of the final store, defaults to `All`
    pub const STORE_CACHE_TYPE: &str = "store_cache_type";
    /// `ContextValue::CacheType` scope of the original-data query, defaults to `Disk`
    pub const ORIGINAL_QUERY_CACHE_TYPE: &str = "original_query_cache_type";
    /// `ContextValue::CacheType` scope of the original-data store, defaults to `Disk`
    pub const ORIGINAL_STORE_CACHE_TYPE: &str = "original_store_cache_type";
    /// `ContextValue::Headers` sent by network loaders
    pub const HEADERS: &str = "headers";
}

/// A value stored in a [`RequestContext`]
#[derive(Clone)]
pub enum ContextValue {
    Transformer(Arc<dyn ResourceTransformer>),
    PixelSize(PixelSize),
    Cache(Arc<dyn ResourceCache>),
    Loader(Arc<dyn ResourceLoader>),
    CacheKeyFilter(Arc<dyn CacheKeyFilter>),
    CacheSerializer(Arc<dyn CacheSerializer>),
    Decryptor(Arc<dyn DataDecryptor>),
    CacheType(CacheType),
    Headers(HashMap<String, String>),
    Text(String),
    Number(f64),
    Flag(bool),
    Custom(Arc<dyn Any + Send + Sync>),
}

impl fmt::Debug for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextValue::Transformer(t) => f.debug_tuple("Transformer").field(&t.key()).finish(),
            ContextValue::PixelSize(size) => f.debug_tuple("PixelSize").field(size).finish(),
            ContextValue::Cache(_) => f.write_str("Cache(..)"),
            ContextValue::Loader(_) => f.write_str("Loader(..)"),
            ContextValue::CacheKeyFilter(_) => f.write_str("CacheKeyFilter(..)"),
            ContextValue::CacheSerializer(_) => f.write_str("CacheSerializer(..)"),
            ContextValue::Decryptor(_) => f.write_str("Decryptor(..)"),
            ContextValue::CacheType(t) => f.debug_tuple("CacheType").field(t).finish(),
            ContextValue::Headers(h) => f.debug_tuple("Headers").field(h).finish(),
            ContextValue::Text(s) => f.debug_tuple("Text").field(s).finish(),
            ContextValue::Number(n) => f.debug_tuple("Number").field(n).finish(),
            ContextValue::Flag(b) => f.debug_tuple("Flag").field(b).finish(),
            ContextValue::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Immutable per-request key/value map
#[derive(Clone, Default)]
pub struct RequestContext {
    entries: Arc<HashMap<String, ContextValue>>,
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.iter()).finish()
    }
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// A context with `key` set to `value`
    pub fn with(mut self, key: impl Into<String>, value: ContextValue) -> Self {
        Arc::make_mut(&mut self.entries).insert(key.into(), value);
        self
    }

    /// A context without `key`
    pub fn without(mut self, key: &str) -> Self {
        if self.entries.contains_key(key) {
            Arc::make_mut(&mut self.entries).remove(key);
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&ContextValue> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn with_transformer(self, transformer: Arc<dyn ResourceTransformer>) -> Self {
        self.with(keys::TRANSFORMER, ContextValue::Transformer(transformer))
    }

    pub fn with_thumbnail_size(self, size: PixelSize, preserve_aspect_ratio: bool) -> Self {
        self.with(keys::THUMBNAIL_SIZE, ContextValue::PixelSize(size))
            .with(
                keys::PRESERVE_ASPECT_RATIO,
                ContextValue::Flag(preserve_aspect_ratio),
            )
    }

    pub fn with_cache(self, cache: Arc<dyn ResourceCache>) -> Self {
        self.with(keys::CACHE, ContextValue::Cache(cache))
    }

    pub fn with_loader(self, loader: Arc<dyn ResourceLoader>) -> Self {
        self.with(keys::LOADER, ContextValue::Loader(loader))
    }

    pub fn with_cache_key_filter(self, filter: Arc<dyn CacheKeyFilter>) -> Self {
        self.with(keys::CACHE_KEY_FILTER, ContextValue::CacheKeyFilter(filter))
    }

    pub fn with_cache_serializer(self, serializer: Arc<dyn CacheSerializer>) -> Self {
        self.with(
            keys::CACHE_SERIALIZER,
            ContextValue::CacheSerializer(serializer),
        )
    }

    pub fn with_decryptor(self, decryptor: Arc<dyn DataDecryptor>) -> Self {
        self.with(keys::DECRYPTOR, ContextValue::Decryptor(decryptor))
    }

    /// Set one of the `*_cache_type` scopes
    pub fn with_cache_type(self, key: &'static str, cache_type: CacheType) -> Self {
        self.with(key, ContextValue::CacheType(cache_type))
    }

    pub fn with_headers(self, headers: HashMap<String, String>) -> Self {
        self.with(keys::HEADERS, ContextValue::Headers(headers))
    }

    pub fn transformer(&self) -> Option<Arc<dyn ResourceTransformer>> {
        match self.get(keys::TRANSFORMER) {
            Some(ContextValue::Transformer(t)) => Some(t.clone()),
            _ => None,
        }
    }

    pub fn thumbnail_size(&self) -> Option<PixelSize> {
        match self.get(keys::THUMBNAIL_SIZE) {
            Some(ContextValue::PixelSize(size)) => Some(*size),
            _ => None,
        }
    }

    pub fn preserve_aspect_ratio(&self) -> bool {
        self.flag(keys::PRESERVE_ASPECT_RATIO).unwrap_or(true)
    }

    pub fn cache(&self) -> Option<Arc<dyn ResourceCache>> {
        match self.get(keys::CACHE) {
            Some(ContextValue::Cache(c)) => Some(c.clone()),
            _ => None,
        }
    }

    pub fn loader(&self) -> Option<Arc<dyn ResourceLoader>> {
        match self.get(keys::LOADER) {
            Some(ContextValue::Loader(l)) => Some(l.clone()),
            _ => None,
        }
    }

    pub fn cache_key_filter(&self) -> Option<Arc<dyn CacheKeyFilter>> {
        match self.get(keys::CACHE_KEY_FILTER) {
            Some(ContextValue::CacheKeyFilter(f)) => Some(f.clone()),
            _ => None,
        }
    }

    pub fn cache_serializer(&self) -> Option<Arc<dyn CacheSerializer>> {
        match self.get(keys::CACHE_SERIALIZER) {
            Some(ContextValue::CacheSerializer(s)) => Some(s.clone()),
            _ => None,
        }
    }

    pub fn decryptor(&self) -> Option<Arc<dyn DataDecryptor>> {
        match self.get(keys::DECRYPTOR) {
            Some(ContextValue::Decryptor(d)) => Some(d.clone()),
            _ => None,
        }
    }

    /// Scope stored under `key`, or `default` when absent
    pub fn cache_type(&self, key: &str, default: CacheType) -> CacheType {
        match self.get(key) {
            Some(ContextValue::CacheType(t)) => *t,
            _ => default,
        }
    }

    pub fn headers(&self) -> Option<&HashMap<String, String>> {
        match self.get(keys::HEADERS) {
            Some(ContextValue::Headers(h)) => Some(h),
            _ => None,
        }
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        match self.get(key) {
            Some(ContextValue::Text(s)) => Some(s),
            _ => None,
        }
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        match self.get(key) {
            Some(ContextValue::Number(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn flag(&self, key: &str) -> Option<bool> {
        match self.get(key) {
            Some(ContextValue::Flag(b)) => Some(*b),
            _ => None,
        }
    }

    /// Downcast a `Custom` value
    pub fn custom<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        match self.get(key) {
            Some(ContextValue::Custom(value)) => value.clone().downcast::<T>().ok(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_does_not_mutate_shared_context() {
        let base = RequestContext::new().with("quality", ContextValue::Number(0.8));
        let derived = base.clone().with("quality", ContextValue::Number(0.5));
        let stripped = base.clone().without("quality");

        assert_eq!(base.number("quality"), Some(0.8));
        assert_eq!(derived.number("quality"), Some(0.5));
        assert!(stripped.is_empty());
        assert_eq!(base.len(), 1);
    }

    #[test]
    fn test_typed_getters() {
        let ctx = RequestContext::new()
            .with_thumbnail_size(PixelSize::new(64, 32), false)
            .with_cache_type(keys::QUERY_CACHE_TYPE, CacheType::Memory)
            .with("label", ContextValue::Text("avatar".into()))
            .with("owner", ContextValue::Custom(Arc::new(42u32)));

        assert_eq!(ctx.thumbnail_size(), Some(PixelSize::new(64, 32)));
        assert!(!ctx.preserve_aspect_ratio());
        assert_eq!(
            ctx.cache_type(keys::QUERY_CACHE_TYPE, CacheType::All),
            CacheType::Memory
        );
        assert_eq!(
            ctx.cache_type(keys::STORE_CACHE_TYPE, CacheType::All),
            CacheType::All
        );
        assert_eq!(ctx.text("label"), Some("avatar"));
        assert_eq!(ctx.custom::<u32>("owner").as_deref(), Some(&42));
        assert!(ctx.custom::<String>("owner").is_none());
        assert!(ctx.transformer().is_none());
    }

    #[test]
    fn test_mismatched_value_type_is_absent() {
        let ctx = RequestContext::new().with(keys::THUMBNAIL_SIZE, ContextValue::Flag(true));
        assert!(ctx.thumbnail_size().is_none());
        assert!(ctx.preserve_aspect_ratio());
    }
}
