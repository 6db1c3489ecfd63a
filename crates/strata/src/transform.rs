//! # Transformers
//!
//! Post-processing applied to a decoded resource before it is delivered and
//! stored. The transformer key takes part in the cache key, so two
//! transformers with the same key must produce the same output.

use std::sync::Arc;

use crate::cache::CacheKey;
use crate::resource::Resource;

pub trait ResourceTransformer: Send + Sync {
    /// Stable identifier of this transformation
    fn key(&self) -> &str;

    /// Transform `resource`. `None` means "leave it as it is".
    fn transform(&self, resource: &Resource, cache_key: &CacheKey) -> Option<Resource>;
}

type TransformFn = dyn Fn(&Resource, &CacheKey) -> Option<Resource> + Send + Sync;

/// Transformer backed by a closure
pub struct FnTransformer {
    key: String,
    func: Box<TransformFn>,
}

impl FnTransformer {
    pub fn new<F>(key: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Resource, &CacheKey) -> Option<Resource> + Send + Sync + 'static,
    {
        Self {
            key: key.into(),
            func: Box::new(func),
        }
    }
}

impl ResourceTransformer for FnTransformer {
    fn key(&self) -> &str {
        &self.key
    }

    fn transform(&self, resource: &Resource, cache_key: &CacheKey) -> Option<Resource> {
        (self.func)(resource, cache_key)
    }
}

/// Applies several transformers in order.
///
/// A member that declines leaves the intermediate result as it is; the
/// pipeline declines only if every member declines.
pub struct PipelineTransformer {
    key: String,
    transformers: Vec<Arc<dyn ResourceTransformer>>,
}

impl PipelineTransformer {
    pub fn new(transformers: Vec<Arc<dyn ResourceTransformer>>) -> Self {
        let key = transformers
            .iter()
            .map(|t| t.key())
            .collect::<Vec<_>>()
            .join("-");
        Self { key, transformers }
    }

    pub fn transformers(&self) -> &[Arc<dyn ResourceTransformer>] {
        &self.transformers
    }
}

impl ResourceTransformer for PipelineTransformer {
    fn key(&self) -> &str {
        &self.key
    }

    fn transform(&self, resource: &Resource, cache_key: &CacheKey) -> Option<Resource> {
        let mut current: Option<Resource> = None;
        for transformer in &self.transformers {
            let input = current.as_ref().unwrap_or(resource);
            if let Some(output) = transformer.transform(input, cache_key) {
                current = Some(output);
            }
        }
        current
    }
}
