//! # Failed-Key Registry
//!
//! Identifiers whose last load failed in a way that will not fix itself.
//! Requests for them fail fast with `Blacklisted` until the caller clears
//! the entry or passes `RETRY_FAILED`.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::error::{FetchError, FetchErrorKind};
use crate::identifier::ResourceId;

/// Decides whether a load failure blacklists its identifier
pub trait BlockPolicy: Send + Sync {
    fn should_block(&self, identifier: &ResourceId, error: &FetchError) -> bool;
}

/// Blocks errors whose kind is in a configurable set.
///
/// `Timeout`, `Cancelled` and `Connectivity` are never blocked, whatever the
/// set contains.
#[derive(Debug, Clone)]
pub struct DefaultBlockPolicy {
    blockable: HashSet<FetchErrorKind>,
}

const NEVER_BLOCKED: [FetchErrorKind; 3] = [
    FetchErrorKind::Timeout,
    FetchErrorKind::Cancelled,
    FetchErrorKind::Connectivity,
];

impl Default for DefaultBlockPolicy {
    fn default() -> Self {
        Self::new([
            FetchErrorKind::NotFound,
            FetchErrorKind::ClientError,
            FetchErrorKind::BadData,
        ])
    }
}

impl DefaultBlockPolicy {
    pub fn new(kinds: impl IntoIterator<Item = FetchErrorKind>) -> Self {
        Self {
            blockable: kinds.into_iter().collect(),
        }
    }

    pub fn with_kind(mut self, kind: FetchErrorKind) -> Self {
        self.blockable.insert(kind);
        self
    }

    pub fn without_kind(mut self, kind: FetchErrorKind) -> Self {
        self.blockable.remove(&kind);
        self
    }

    pub fn blocks(&self, kind: FetchErrorKind) -> bool {
        !NEVER_BLOCKED.contains(&kind) && self.blockable.contains(&kind)
    }
}

impl BlockPolicy for DefaultBlockPolicy {
    fn should_block(&self, _identifier: &ResourceId, error: &FetchError) -> bool {
        self.blocks(error.kind())
    }
}

/// Thread-safe set of blacklisted identifiers
pub struct FailedKeyRegistry {
    failed: Mutex<HashSet<ResourceId>>,
    policy: RwLock<Arc<dyn BlockPolicy>>,
}

impl Default for FailedKeyRegistry {
    fn default() -> Self {
        Self::new(Arc::new(DefaultBlockPolicy::default()))
    }
}

impl FailedKeyRegistry {
    pub fn new(policy: Arc<dyn BlockPolicy>) -> Self {
        Self {
            failed: Mutex::new(HashSet::new()),
            policy: RwLock::new(policy),
        }
    }

    pub fn set_policy(&self, policy: Arc<dyn BlockPolicy>) {
        *self.policy.write() = policy;
    }

    pub fn should_block(&self, identifier: &ResourceId, error: &FetchError) -> bool {
        let policy = self.policy.read().clone();
        policy.should_block(identifier, error)
    }

    pub fn mark_failed(&self, identifier: &ResourceId) {
        if self.failed.lock().insert(identifier.clone()) {
            debug!(identifier = %identifier, "Identifier added to failed-key registry");
        }
    }

    pub fn is_failed(&self, identifier: &ResourceId) -> bool {
        self.failed.lock().contains(identifier)
    }

    /// Returns whether the identifier was present
    pub fn remove(&self, identifier: &ResourceId) -> bool {
        self.failed.lock().remove(identifier)
    }

    pub fn remove_all(&self) {
        self.failed.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.failed.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.failed.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> FetchError {
        FetchError::Status {
            code,
            url: "http://x/a.png".into(),
        }
    }

    #[test]
    fn test_default_policy() {
        let registry = FailedKeyRegistry::default();
        let id = ResourceId::from("http://x/a.png");

        assert!(registry.should_block(&id, &status(404)));
        assert!(registry.should_block(&id, &status(403)));
        assert!(registry.should_block(&id, &FetchError::BadData("truncated".into())));
        assert!(!registry.should_block(&id, &status(503)));
        assert!(!registry.should_block(&id, &FetchError::Timeout("slow".into())));
        assert!(!registry.should_block(&id, &FetchError::Cancelled));
        assert!(!registry.should_block(&id, &FetchError::Connectivity("reset".into())));
    }

    #[test]
    fn test_transient_kinds_cannot_be_configured_in() {
        let policy = DefaultBlockPolicy::new([FetchErrorKind::Timeout, FetchErrorKind::ServerError]);
        assert!(!policy.blocks(FetchErrorKind::Timeout));
        assert!(policy.blocks(FetchErrorKind::ServerError));
        assert!(!policy.blocks(FetchErrorKind::NotFound));

        let policy = DefaultBlockPolicy::default().without_kind(FetchErrorKind::ClientError);
        assert!(!policy.blocks(FetchErrorKind::ClientError));
    }

    #[test]
    fn test_membership() {
        let registry = FailedKeyRegistry::default();
        let a = ResourceId::from("a");
        let b = ResourceId::from("b");

        registry.mark_failed(&a);
        registry.mark_failed(&a);
        registry.mark_failed(&b);
        assert_eq!(registry.len(), 2);
        assert!(registry.is_failed(&a));

        assert!(registry.remove(&a));
        assert!(!registry.remove(&a));
        assert!(!registry.is_failed(&a));

        registry.remove_all();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_custom_policy_replaces_default() {
        struct BlockEverything;
        impl BlockPolicy for BlockEverything {
            fn should_block(&self, _: &ResourceId, _: &FetchError) -> bool {
                true
            }
        }

        let registry = FailedKeyRegistry::default();
        let id = ResourceId::from("a");
        assert!(!registry.should_block(&id, &FetchError::Timeout("t".into())));

        registry.set_policy(Arc::new(BlockEverything));
        assert!(registry.should_block(&id, &FetchError::Timeout("t".into())));
    }
}
