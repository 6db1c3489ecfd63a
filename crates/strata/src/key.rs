//! # Cache Key Resolution
//!
//! Turns an identifier plus request context into the key every cache tier
//! sees. Resolution is deterministic and side-effect free.

use crate::cache::CacheKey;
use crate::context::RequestContext;
use crate::identifier::ResourceId;

/// Maps an identifier to the base string of its cache key.
///
/// Returning `None` disables caching for the request.
pub trait CacheKeyFilter: Send + Sync {
    fn cache_key(&self, identifier: &ResourceId) -> Option<String>;
}

impl<F> CacheKeyFilter for F
where
    F: Fn(&ResourceId) -> Option<String> + Send + Sync,
{
    fn cache_key(&self, identifier: &ResourceId) -> Option<String> {
        self(identifier)
    }
}

/// Base key: the context's filter, else the identifier itself.
///
/// The manager injects its own filter into contexts that carry none.
pub fn original_cache_key(identifier: &ResourceId, context: &RequestContext) -> Option<CacheKey> {
    if identifier.is_empty() {
        return None;
    }

    let base = match context.cache_key_filter() {
        Some(filter) => filter.cache_key(identifier),
        None => Some(identifier.as_str().to_string()),
    }?;

    Some(CacheKey::new(base))
}

/// Full key, including thumbnail and transformer decorations.
pub fn resolve_cache_key(identifier: &ResourceId, context: &RequestContext) -> Option<CacheKey> {
    let base = original_cache_key(identifier, context)?;
    let mut key = base.as_str().to_string();

    if let Some(size) = context.thumbnail_size() {
        key = format!(
            "{key}-Thumbnail({}x{},{})",
            size.width,
            size.height,
            context.preserve_aspect_ratio()
        );
    }

    if let Some(transformer) = context.transformer() {
        let transformer_key = transformer.key();
        if !transformer_key.is_empty() {
            key = transformed_key(&key, &transformer_key);
        }
    }

    Some(CacheKey::new(key))
}

/// Insert `-<transformer key>` before the path extension of URL-like keys,
/// append it otherwise.
fn transformed_key(key: &str, transformer_key: &str) -> String {
    if let Some(pos) = extension_position(key) {
        let (head, tail) = key.split_at(pos);
        return format!("{head}-{transformer_key}{tail}");
    }
    format!("{key}-{transformer_key}")
}

/// Byte offset of the `.` that starts the path extension of a URL-like key
fn extension_position(key: &str) -> Option<usize> {
    let authority_start = key.find("://")? + 3;
    let path_end = key[authority_start..]
        .find(['?', '#'])
        .map_or(key.len(), |i| i + authority_start);
    let path = &key[authority_start..path_end];

    let last_slash = path.rfind('/')?;
    let file_name = &path[last_slash + 1..];
    let dot = file_name.rfind('.')?;
    if dot == 0 || dot + 1 == file_name.len() {
        return None;
    }

    Some(authority_start + last_slash + 1 + dot)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::resource::PixelSize;
    use crate::test_utils::TagTransformer;

    fn id(s: &str) -> ResourceId {
        ResourceId::from(s)
    }

    #[test]
    fn test_plain_identifier_is_the_key() {
        let key = resolve_cache_key(&id("http://x/a.png"), &RequestContext::new());
        assert_eq!(key, Some(CacheKey::new("http://x/a.png")));
    }

    #[test]
    fn test_empty_identifier_has_no_key() {
        assert_eq!(resolve_cache_key(&id(""), &RequestContext::new()), None);
    }

    #[test]
    fn test_transformer_inserted_before_extension() {
        let ctx = RequestContext::new().with_transformer(Arc::new(TagTransformer::new("round")));
        assert_eq!(
            resolve_cache_key(&id("http://x/a.png"), &ctx).unwrap().as_str(),
            "http://x/a-round.png"
        );
        assert_eq!(
            resolve_cache_key(&id("http://x/a.png?v=2"), &ctx).unwrap().as_str(),
            "http://x/a-round.png?v=2"
        );
        assert_eq!(
            resolve_cache_key(&id("http://x/dir.d/file"), &ctx).unwrap().as_str(),
            "http://x/dir.d/file-round"
        );
        assert_eq!(
            resolve_cache_key(&id("avatar-17"), &ctx).unwrap().as_str(),
            "avatar-17-round"
        );
    }

    #[test]
    fn test_thumbnail_then_transformer() {
        let ctx = RequestContext::new()
            .with_thumbnail_size(PixelSize::new(100, 50), true)
            .with_transformer(Arc::new(TagTransformer::new("blur")));
        assert_eq!(
            resolve_cache_key(&id("key"), &ctx).unwrap().as_str(),
            "key-Thumbnail(100x50,true)-blur"
        );
    }

    #[test]
    fn test_context_filter_replaces_identifier() {
        let filter: Arc<dyn CacheKeyFilter> =
            Arc::new(|id: &ResourceId| Some(format!("ctx:{id}")));
        let ctx = RequestContext::new().with_cache_key_filter(filter);
        let key = resolve_cache_key(&id("a"), &ctx);
        assert_eq!(key.unwrap().as_str(), "ctx:a");
    }

    #[test]
    fn test_filter_may_disable_caching() {
        let filter: Arc<dyn CacheKeyFilter> = Arc::new(|_: &ResourceId| None);
        let ctx = RequestContext::new().with_cache_key_filter(filter);
        assert_eq!(resolve_cache_key(&id("a"), &ctx), None);
    }

    #[test]
    fn test_headers_do_not_affect_key() {
        let ctx = RequestContext::new().with_headers(
            [("Authorization".to_string(), "Bearer t".to_string())]
                .into_iter()
                .collect(),
        );
        assert_eq!(
            resolve_cache_key(&id("http://x/a.png"), &ctx),
            resolve_cache_key(&id("http://x/a.png"), &RequestContext::new())
        );
    }

    #[test]
    fn test_original_key_ignores_decorations() {
        let ctx = RequestContext::new().with_transformer(Arc::new(TagTransformer::new("t")));
        assert_eq!(
            original_cache_key(&id("http://x/a.png"), &ctx).unwrap().as_str(),
            "http://x/a.png"
        );
    }
}
