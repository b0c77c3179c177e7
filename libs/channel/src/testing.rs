//! Test doubles for pipelines
//!
//! Enabled for this crate's tests and for downstream crates through the
//! `testing` feature.

use crate::core::{CommunicationCore, ConnectionDirection, CoreLink, PipeLink};
use crate::error::{ChannelError, Result, TransportError};
use crate::middleware::{PipeMiddleware, TransformMiddleware};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;
use types::{DataContext, Payload};

/// Lifecycle call observed by a [`RecordingCore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreEvent {
    Init,
    Dispose,
}

/// Endpoint that records lifecycle calls and delivered envelopes
#[derive(Debug)]
pub struct RecordingCore {
    label: String,
    supported: ConnectionDirection,
    configured: ConnectionDirection,
    fail_init: AtomicBool,
    fail_receive: AtomicBool,
    events: Mutex<Vec<CoreEvent>>,
    received: Mutex<Vec<DataContext>>,
    link: CoreLink,
}

impl RecordingCore {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            supported: ConnectionDirection::InputAndOutput,
            configured: ConnectionDirection::InputAndOutput,
            fail_init: AtomicBool::new(false),
            fail_receive: AtomicBool::new(false),
            events: Mutex::new(Vec::new()),
            received: Mutex::new(Vec::new()),
            link: CoreLink::new(),
        }
    }

    /// Every `init` call fails until [`set_fail_init`](Self::set_fail_init) clears it
    pub fn failing_init(self) -> Self {
        self.fail_init.store(true, Ordering::Relaxed);
        self
    }

    /// Every delivery fails
    pub fn failing_receive(self) -> Self {
        self.fail_receive.store(true, Ordering::Relaxed);
        self
    }

    pub fn with_direction(mut self, direction: ConnectionDirection) -> Self {
        self.configured = direction;
        self
    }

    pub fn with_supported(mut self, direction: ConnectionDirection) -> Self {
        self.supported = direction;
        self
    }

    pub fn set_fail_init(&self, fail: bool) {
        self.fail_init.store(fail, Ordering::Relaxed);
    }

    pub fn events(&self) -> Vec<CoreEvent> {
        self.events.lock().clone()
    }

    pub fn init_count(&self) -> usize {
        self.events.lock().iter().filter(|e| **e == CoreEvent::Init).count()
    }

    pub fn dispose_count(&self) -> usize {
        self.events.lock().iter().filter(|e| **e == CoreEvent::Dispose).count()
    }

    pub fn received(&self) -> Vec<DataContext> {
        self.received.lock().clone()
    }

    /// Simulate data arriving from this endpoint's external side
    pub async fn push(&self, data: impl Into<Payload>) -> Result<()> {
        let link = self.link.get().ok_or(ChannelError::Detached)?;
        link.send_data(link.create_data(data)).await
    }
}

#[async_trait]
impl CommunicationCore for RecordingCore {
    fn name(&self) -> &str {
        "RecordingCore"
    }

    fn metadata(&self) -> serde_json::Value {
        serde_json::json!({
            "label": self.label,
            "events": self.events.lock().len(),
            "received": self.received.lock().len(),
        })
    }

    fn supported_direction(&self) -> ConnectionDirection {
        self.supported
    }

    fn configured_direction(&self) -> ConnectionDirection {
        self.configured
    }

    async fn init(
        &self,
        link: PipeLink,
        _cancel: CancellationToken,
    ) -> std::result::Result<(), TransportError> {
        self.events.lock().push(CoreEvent::Init);
        if self.fail_init.load(Ordering::Relaxed) {
            return Err(TransportError::configuration(
                format!("{} refused to initialize", self.label),
                None,
            ));
        }
        self.link.attach(link);
        Ok(())
    }

    async fn dispose(&self) -> std::result::Result<(), TransportError> {
        self.events.lock().push(CoreEvent::Dispose);
        self.link.detach();
        Ok(())
    }

    async fn receive_data(&self, ctx: DataContext) -> std::result::Result<(), TransportError> {
        if self.fail_receive.load(Ordering::Relaxed) {
            return Err(TransportError::Closed(format!("{} rejects deliveries", self.label)));
        }
        self.received.lock().push(ctx);
        Ok(())
    }
}

/// Labels visited by an envelope, in visiting order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Trail(pub Vec<String>);

/// Transform that appends its label to the envelope's [`Trail`]
#[derive(Debug, Clone)]
pub struct TraceMiddleware {
    label: String,
}

impl TraceMiddleware {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl PipeMiddleware for TraceMiddleware {
    fn name(&self) -> &str {
        "TraceMiddleware"
    }

    fn metadata(&self) -> serde_json::Value {
        serde_json::json!({ "name": self.name(), "label": self.label })
    }

    fn as_transform(&self) -> Option<&dyn TransformMiddleware> {
        Some(self)
    }
}

#[async_trait]
impl TransformMiddleware for TraceMiddleware {
    async fn pass(&self, mut ctx: DataContext) -> Result<DataContext> {
        ctx.metadata
            .get_or_insert_with(Trail::default)
            .0
            .push(self.label.clone());
        Ok(ctx)
    }
}
