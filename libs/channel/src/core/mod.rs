//! Transport core contract
//!
//! A [`CommunicationCore`] bridges one protocol to a pipeline. The pipeline
//! pushes outbound envelopes into it through [`CommunicationCore::receive_data`];
//! the core pushes inbound envelopes up through the [`PipeLink`] handed to it
//! at init time.

use crate::error::{ChannelError, Result, TransportError};
use crate::pipeline::DataPipeline;
use crate::routes::DynamicHostConfig;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Weak;
use tokio_util::sync::CancellationToken;
use types::{DataContext, DataOperation, DataSource, Payload};

pub mod default;

pub use default::DefaultCore;

/// Flow directions an endpoint can carry
///
/// `Input` means data arriving from the endpoint's external side into the
/// pipeline; `Output` means the pipeline delivering data to the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionDirection {
    Input,
    Output,
    InputAndOutput,
}

impl ConnectionDirection {
    pub fn allows_input(self) -> bool {
        matches!(self, Self::Input | Self::InputAndOutput)
    }

    pub fn allows_output(self) -> bool {
        matches!(self, Self::Output | Self::InputAndOutput)
    }

    /// Check that every flow in `other` is also allowed by `self`
    pub fn covers(self, other: ConnectionDirection) -> bool {
        (!other.allows_input() || self.allows_input())
            && (!other.allows_output() || self.allows_output())
    }
}

impl Default for ConnectionDirection {
    fn default() -> Self {
        Self::InputAndOutput
    }
}

/// Protocol adapter owned by a pipeline as its inner or outer endpoint
#[async_trait]
pub trait CommunicationCore: Send + Sync + 'static {
    /// Type name shown in introspection
    fn name(&self) -> &str;

    /// Adapter-reported configuration and state for diagnostics
    fn metadata(&self) -> serde_json::Value {
        serde_json::json!({})
    }

    /// Directions this adapter implements
    fn supported_direction(&self) -> ConnectionDirection;

    /// Directions this instance was configured for
    fn configured_direction(&self) -> ConnectionDirection {
        self.supported_direction()
    }

    /// Acquire transport resources and start background loops
    ///
    /// Loops must stop when `cancel` fires or when [`dispose`](Self::dispose) runs.
    async fn init(
        &self,
        link: PipeLink,
        cancel: CancellationToken,
    ) -> std::result::Result<(), TransportError>;

    /// Release everything `init` acquired; a no-op when nothing is held
    async fn dispose(&self) -> std::result::Result<(), TransportError>;

    /// Deliver an envelope from the pipeline to this endpoint's external side
    async fn receive_data(&self, ctx: DataContext) -> std::result::Result<(), TransportError>;

    /// Hook for registering HTTP routes at build time
    fn as_host_config(&self) -> Option<&dyn DynamicHostConfig> {
        None
    }
}

/// An endpoint's handle back into its owning pipeline
///
/// The reference is weak so an endpoint never keeps a disposed pipeline alive.
#[derive(Clone)]
pub struct PipeLink {
    pipeline: Weak<DataPipeline>,
    side: DataSource,
}

impl PipeLink {
    pub(crate) fn new(pipeline: Weak<DataPipeline>, side: DataSource) -> Self {
        Self { pipeline, side }
    }

    /// Side of the pipeline this endpoint sits on
    pub fn side(&self) -> DataSource {
        self.side
    }

    /// Envelope entering at this endpoint's side with a `Custom` operation
    pub fn create_data(&self, data: impl Into<Payload>) -> DataContext {
        self.create_data_with(DataOperation::Custom, data)
    }

    pub fn create_data_with(&self, operation: DataOperation, data: impl Into<Payload>) -> DataContext {
        DataContext::from_side(self.side, operation, data)
    }

    /// Push an envelope into the pipeline from this endpoint
    pub async fn send_data(&self, ctx: DataContext) -> Result<()> {
        let pipeline = self.pipeline.upgrade().ok_or(ChannelError::Detached)?;
        pipeline.push_from(self.side, ctx).await
    }

    pub fn is_attached(&self) -> bool {
        self.pipeline.strong_count() > 0
    }
}

impl std::fmt::Debug for PipeLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeLink")
            .field("side", &self.side)
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// Slot holding the link an adapter received at init
///
/// Adapters keep one of these next to their socket state and clear it on
/// dispose.
#[derive(Debug, Default)]
pub struct CoreLink {
    link: RwLock<Option<PipeLink>>,
}

impl CoreLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, link: PipeLink) {
        *self.link.write() = Some(link);
    }

    pub fn detach(&self) -> Option<PipeLink> {
        self.link.write().take()
    }

    pub fn get(&self) -> Option<PipeLink> {
        self.link.read().clone()
    }

    pub fn is_attached(&self) -> bool {
        self.link.read().as_ref().is_some_and(PipeLink::is_attached)
    }

    /// Build an envelope for this side, or `None` when detached
    pub fn create_data_with(&self, operation: DataOperation, data: impl Into<Payload>) -> Option<DataContext> {
        self.link.read().as_ref().map(|link| link.create_data_with(operation, data))
    }

    /// Push an envelope through the attached pipeline
    pub async fn send_data(&self, ctx: DataContext) -> Result<()> {
        let link = self.get().ok_or(ChannelError::Detached)?;
        link.send_data(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_covers() {
        use ConnectionDirection::*;
        assert!(InputAndOutput.covers(Input));
        assert!(InputAndOutput.covers(Output));
        assert!(InputAndOutput.covers(InputAndOutput));
        assert!(Input.covers(Input));
        assert!(!Input.covers(Output));
        assert!(!Output.covers(InputAndOutput));
    }

    #[tokio::test]
    async fn test_detached_link_rejects_send() {
        let link = PipeLink::new(Weak::new(), DataSource::Outer);
        assert!(!link.is_attached());

        let ctx = link.create_data("x");
        assert_eq!(ctx.entrance(), DataSource::Outer);
        assert_eq!(ctx.operation(), DataOperation::Custom);
        assert!(matches!(link.send_data(ctx).await, Err(ChannelError::Detached)));

        let slot = CoreLink::new();
        assert!(slot.create_data_with(DataOperation::Publish, "y").is_none());
        slot.attach(link);
        assert!(!slot.is_attached());
        assert!(slot.create_data_with(DataOperation::Publish, "y").is_some());
    }
}
