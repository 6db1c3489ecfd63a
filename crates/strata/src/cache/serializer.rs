use bytes::Bytes;

use crate::identifier::ResourceId;
use crate::resource::Resource;

/// Produces the bytes a disk tier persists for a resource.
///
/// `data` is the payload the resource was decoded from, if it is still
/// available. Returning `None` falls back to the default choice.
pub trait CacheSerializer: Send + Sync {
    fn serialize(
        &self,
        resource: &Resource,
        data: Option<&Bytes>,
        identifier: &ResourceId,
    ) -> Option<Bytes>;
}

impl<F> CacheSerializer for F
where
    F: Fn(&Resource, Option<&Bytes>, &ResourceId) -> Option<Bytes> + Send + Sync,
{
    fn serialize(
        &self,
        resource: &Resource,
        data: Option<&Bytes>,
        identifier: &ResourceId,
    ) -> Option<Bytes> {
        self(resource, data, identifier)
    }
}

/// Always persists the resource's own payload, even when original bytes
/// are available
#[derive(Debug, Clone, Copy, Default)]
pub struct PayloadSerializer;

impl CacheSerializer for PayloadSerializer {
    fn serialize(&self, resource: &Resource, _: Option<&Bytes>, _: &ResourceId) -> Option<Bytes> {
        Some(resource.payload().clone())
    }
}
