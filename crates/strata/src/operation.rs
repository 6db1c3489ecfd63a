//! # Combined Operation
//!
//! The cancellable handle returned for every load request. It spans the
//! cache query and the loader fetch; at most one of each is registered as
//! a live sub-operation at any time.

use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::identifier::ResourceId;

/// Progress of an operation through the request state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationState {
    Created,
    ResolvingOptions,
    QueryingCache,
    CheckingBlacklist,
    Loading,
    Decoding,
    PostProcessing,
    Storing,
    Done,
    Failed,
    Cancelled,
}

impl OperationState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OperationState::Done | OperationState::Failed | OperationState::Cancelled
        )
    }
}

struct OperationInner {
    id: u64,
    identifier: ResourceId,
    token: CancellationToken,
    state: watch::Sender<OperationState>,
    /// Held while a callback runs, so `cancel` never interleaves with one
    delivery: ReentrantMutex<()>,
    cache_operation: Mutex<Option<CancellationToken>>,
    loader_operation: Mutex<Option<CancellationToken>>,
}

/// Handle to one in-flight request
#[derive(Clone)]
pub struct CombinedOperation {
    inner: Arc<OperationInner>,
}

impl std::fmt::Debug for CombinedOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CombinedOperation")
            .field("id", &self.inner.id)
            .field("identifier", &self.inner.identifier)
            .field("state", &self.state())
            .finish()
    }
}

impl CombinedOperation {
    pub(crate) fn new(id: u64, identifier: ResourceId) -> Self {
        let (state, _) = watch::channel(OperationState::Created);
        Self {
            inner: Arc::new(OperationInner {
                id,
                identifier,
                token: CancellationToken::new(),
                state,
                delivery: ReentrantMutex::new(()),
                cache_operation: Mutex::new(None),
                loader_operation: Mutex::new(None),
            }),
        }
    }

    /// Manager-unique operation number
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn identifier(&self) -> &ResourceId {
        &self.inner.identifier
    }

    pub fn state(&self) -> OperationState {
        *self.inner.state.borrow()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    /// Cancel the operation and whichever sub-operation is live.
    ///
    /// Has no effect once the operation reached a terminal state; the
    /// completion callback is never invoked after a successful cancel.
    pub fn cancel(&self) {
        let _delivery = self.inner.delivery.lock();
        if !self.finish(OperationState::Cancelled) {
            return;
        }

        debug!(id = self.inner.id, identifier = %self.inner.identifier, "Operation cancelled");
        self.inner.token.cancel();
        if let Some(token) = self.inner.cache_operation.lock().take() {
            token.cancel();
        }
        if let Some(token) = self.inner.loader_operation.lock().take() {
            token.cancel();
        }
    }

    /// Wait until the operation reaches a terminal state and return it
    pub async fn finished(&self) -> OperationState {
        let mut receiver = self.inner.state.subscribe();
        match receiver.wait_for(|state| state.is_terminal()).await {
            Ok(state) => *state,
            // The sender lives in `inner`, which we hold
            Err(_) => self.state(),
        }
    }

    /// Root token; sub-operation tokens are its children
    pub(crate) fn token(&self) -> &CancellationToken {
        &self.inner.token
    }

    /// Move to a non-terminal state. Returns `false` if the operation has
    /// already finished.
    pub(crate) fn advance(&self, next: OperationState) -> bool {
        debug_assert!(!next.is_terminal());
        self.inner.state.send_if_modified(|state| {
            if state.is_terminal() {
                return false;
            }
            *state = next;
            true
        })
    }

    /// Move to a terminal state. Only the first caller wins.
    pub(crate) fn finish(&self, terminal: OperationState) -> bool {
        debug_assert!(terminal.is_terminal());
        self.inner.state.send_if_modified(|state| {
            if state.is_terminal() {
                return false;
            }
            *state = terminal;
            true
        })
    }

    /// Run a caller callback unless the operation already finished.
    ///
    /// With `terminal` set, the operation moves to that state first and the
    /// callback runs only for the caller that made the transition.
    pub(crate) fn deliver(&self, terminal: Option<OperationState>, callback: impl FnOnce()) -> bool {
        let _delivery = self.inner.delivery.lock();
        let accepted = match terminal {
            Some(state) => self.finish(state),
            None => !self.is_finished(),
        };
        if accepted {
            callback();
        }
        accepted
    }

    /// Register a fresh cache sub-operation
    pub(crate) fn begin_cache_operation(&self) -> CancellationToken {
        let token = self.inner.token.child_token();
        *self.inner.cache_operation.lock() = Some(token.clone());
        token
    }

    pub(crate) fn end_cache_operation(&self) {
        self.inner.cache_operation.lock().take();
    }

    /// Register a fresh loader sub-operation
    pub(crate) fn begin_loader_operation(&self) -> CancellationToken {
        let token = self.inner.token.child_token();
        *self.inner.loader_operation.lock() = Some(token.clone());
        token
    }

    pub(crate) fn end_loader_operation(&self) {
        self.inner.loader_operation.lock().take();
    }

    #[cfg(test)]
    pub(crate) fn has_cache_operation(&self) -> bool {
        self.inner.cache_operation.lock().is_some()
    }

    #[cfg(test)]
    pub(crate) fn has_loader_operation(&self) -> bool {
        self.inner.loader_operation.lock().is_some()
    }
}
