//! # Loaders Aggregator
//!
//! Routes each load to the highest priority loader that claims the
//! identifier. Later entries in the list have higher priority.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::FetchError;
use crate::identifier::ResourceId;
use crate::loader::provider::{LoadRequest, LoaderEvents, ResourceLoader};

#[derive(Default)]
pub struct LoadersAggregator {
    loaders: RwLock<Vec<Arc<dyn ResourceLoader>>>,
}

impl LoadersAggregator {
    pub fn new(loaders: Vec<Arc<dyn ResourceLoader>>) -> Self {
        Self {
            loaders: RwLock::new(loaders),
        }
    }

    /// Snapshot of the loaders, lowest priority first
    pub fn loaders(&self) -> Vec<Arc<dyn ResourceLoader>> {
        self.loaders.read().clone()
    }

    pub fn set_loaders(&self, loaders: Vec<Arc<dyn ResourceLoader>>) {
        *self.loaders.write() = loaders;
    }

    /// Add a loader with the highest priority
    pub fn add_loader(&self, loader: Arc<dyn ResourceLoader>) {
        self.loaders.write().push(loader);
    }

    /// Remove a loader by identity. Returns whether it was present.
    pub fn remove_loader(&self, loader: &Arc<dyn ResourceLoader>) -> bool {
        let mut loaders = self.loaders.write();
        let before = loaders.len();
        loaders.retain(|l| !Arc::ptr_eq(l, loader));
        loaders.len() != before
    }

    pub fn len(&self) -> usize {
        self.loaders.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaders.read().is_empty()
    }

    /// Highest priority loader claiming `identifier`
    fn select(&self, identifier: &ResourceId) -> Option<Arc<dyn ResourceLoader>> {
        self.loaders
            .read()
            .iter()
            .rev()
            .find(|loader| loader.can_load(identifier))
            .cloned()
    }
}

#[async_trait]
impl ResourceLoader for LoadersAggregator {
    fn can_load(&self, identifier: &ResourceId) -> bool {
        self.select(identifier).is_some()
    }

    async fn load(&self, request: LoadRequest, events: LoaderEvents) -> Result<Bytes, FetchError> {
        let Some(loader) = self.select(&request.identifier) else {
            debug!(identifier = %request.identifier, "No loader claims identifier");
            return Err(FetchError::Unsupported(request.identifier.to_string()));
        };
        loader.load(request, events).await
    }
}
