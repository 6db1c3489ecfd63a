use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::context::RequestContext;
use crate::error::FetchError;
use crate::identifier::ResourceId;
use crate::options::RequestOptions;

/// Everything a loader needs to know about one fetch
#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub identifier: ResourceId,
    pub options: RequestOptions,
    pub context: RequestContext,
    /// Cancelled when the owning operation is cancelled
    pub cancel: CancellationToken,
}

impl LoadRequest {
    pub fn new(identifier: ResourceId, options: RequestOptions, context: RequestContext) -> Self {
        Self {
            identifier,
            options,
            context,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Intermediate notifications emitted while a load is running
#[derive(Debug, Clone)]
pub enum LoaderEvent {
    Progress { received: u64, expected: Option<u64> },
    /// Everything received so far
    Partial(Bytes),
}

/// Sender side of a loader's event stream.
///
/// Sending never blocks and never fails; events sent after the receiver is
/// gone are dropped.
#[derive(Debug, Clone, Default)]
pub struct LoaderEvents {
    sender: Option<mpsc::UnboundedSender<LoaderEvent>>,
}

impl LoaderEvents {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<LoaderEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    /// Events that go nowhere
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn progress(&self, received: u64, expected: Option<u64>) {
        self.send(LoaderEvent::Progress { received, expected });
    }

    pub fn partial(&self, data: Bytes) {
        self.send(LoaderEvent::Partial(data));
    }

    fn send(&self, event: LoaderEvent) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(event);
        }
    }
}

/// A source of resource bytes
#[async_trait]
pub trait ResourceLoader: Send + Sync {
    /// Whether this loader handles the identifier at all
    fn can_load(&self, identifier: &ResourceId) -> bool;

    /// Fetch the complete payload. Implementations should stop early and
    /// return `FetchError::Cancelled` once `request.cancel` fires.
    async fn load(&self, request: LoadRequest, events: LoaderEvents) -> Result<Bytes, FetchError>;
}
