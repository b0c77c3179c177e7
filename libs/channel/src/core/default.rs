//! Default (manual) core
//!
//! No background I/O. Application code pushes envelopes in through
//! [`DefaultCore::send`] and observes delivered envelopes through an optional
//! [`ReceiveHandler`].

use super::{CommunicationCore, ConnectionDirection, CoreLink, PipeLink};
use crate::error::{ChannelError, Result, TransportError};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use types::{DataContext, DataOperation, Payload};

/// Application callback for envelopes the pipeline delivers to a default core
#[async_trait]
pub trait ReceiveHandler: Send + Sync + 'static {
    async fn handle(&self, ctx: DataContext) -> std::result::Result<(), TransportError>;
}

#[async_trait]
impl ReceiveHandler for mpsc::UnboundedSender<DataContext> {
    async fn handle(&self, ctx: DataContext) -> std::result::Result<(), TransportError> {
        self.send(ctx)
            .map_err(|_| TransportError::Closed("receive handler channel dropped".to_string()))
    }
}

/// Endpoint driven entirely by application code
pub struct DefaultCore {
    direction: ConnectionDirection,
    link: CoreLink,
    handler: RwLock<Option<Arc<dyn ReceiveHandler>>>,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
}

impl DefaultCore {
    pub fn new() -> Self {
        Self {
            direction: ConnectionDirection::InputAndOutput,
            link: CoreLink::new(),
            handler: RwLock::new(None),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
        }
    }

    /// Restrict the directions this instance is configured for
    pub fn with_direction(mut self, direction: ConnectionDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_handler(self, handler: impl ReceiveHandler) -> Self {
        self.set_handler(handler);
        self
    }

    /// Default core that forwards every delivered envelope into a channel
    pub fn with_channel() -> (Self, mpsc::UnboundedReceiver<DataContext>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new().with_handler(tx), rx)
    }

    pub fn set_handler(&self, handler: impl ReceiveHandler) {
        *self.handler.write() = Some(Arc::new(handler));
    }

    /// Push a payload into the pipeline from this side
    pub async fn send(&self, data: impl Into<Payload>) -> Result<()> {
        let ctx = self
            .link
            .create_data_with(DataOperation::Custom, data)
            .ok_or(ChannelError::Detached)?;
        self.send_context(ctx).await
    }

    /// Push a fully built envelope into the pipeline
    pub async fn send_context(&self, ctx: DataContext) -> Result<()> {
        self.link.send_data(ctx).await?;
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn is_attached(&self) -> bool {
        self.link.is_attached()
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }
}

impl Default for DefaultCore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommunicationCore for DefaultCore {
    fn name(&self) -> &str {
        "DefaultCore"
    }

    fn metadata(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "default",
            "direction": self.direction,
            "attached": self.link.is_attached(),
            "messages_sent": self.messages_sent.load(Ordering::Relaxed),
            "messages_received": self.messages_received.load(Ordering::Relaxed),
        })
    }

    fn supported_direction(&self) -> ConnectionDirection {
        ConnectionDirection::InputAndOutput
    }

    fn configured_direction(&self) -> ConnectionDirection {
        self.direction
    }

    async fn init(
        &self,
        link: PipeLink,
        _cancel: CancellationToken,
    ) -> std::result::Result<(), TransportError> {
        self.link.attach(link);
        Ok(())
    }

    async fn dispose(&self) -> std::result::Result<(), TransportError> {
        self.link.detach();
        Ok(())
    }

    async fn receive_data(&self, ctx: DataContext) -> std::result::Result<(), TransportError> {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        let handler = self.handler.read().clone();
        match handler {
            Some(handler) => handler.handle(ctx).await,
            None => {
                debug!(operation = %ctx.operation(), "Default core has no handler, dropping envelope");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_requires_attachment() {
        let core = DefaultCore::new();
        assert!(!core.is_attached());
        assert!(matches!(core.send("x").await, Err(ChannelError::Detached)));
    }

    #[tokio::test]
    async fn test_handler_receives_delivery() {
        let (core, mut rx) = DefaultCore::with_channel();
        let ctx = DataContext::from_side(types::DataSource::Inner, DataOperation::Publish, "hi");

        core.receive_data(ctx).await.unwrap();

        let delivered = rx.recv().await.unwrap();
        assert_eq!(delivered.data().as_text(), Some("hi"));
        assert_eq!(core.messages_received(), 1);
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_closed_error() {
        let (core, rx) = DefaultCore::with_channel();
        drop(rx);
        let ctx = DataContext::from_side(types::DataSource::Inner, DataOperation::Get, "x");
        assert!(matches!(core.receive_data(ctx).await, Err(TransportError::Closed(_))));
    }
}
