//! Pipeline orchestrator
//!
//! A [`DataPipeline`] binds one inner and one outer endpoint through an ordered
//! middleware chain.
//!
//! ## Traversal
//!
//! Transform middleware run in registration order for outer→inner traffic and
//! in reverse registration order for inner→outer traffic. Each envelope visits
//! every transform exactly once before it reaches the opposite endpoint.
//!
//! ## Lifecycle
//!
//! `Uninitialized → Initializing → Initialized → Disposing → Uninitialized`.
//! `init`, `dispose` and `re_initialize` are serialized per pipeline, so a
//! re-init can never overlap an init in flight.

use crate::core::{CommunicationCore, ConnectionDirection, PipeLink};
use crate::error::{ChannelError, Result};
use crate::exceptions::ExceptionPool;
use crate::middleware::PipeMiddleware;
use crate::routes::RouteTable;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use types::{DataContext, DataSource};

/// Lifecycle state of a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Uninitialized,
    Initializing,
    Initialized,
    Disposing,
}

/// Kind of a pipeline component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    InnerEndpoint,
    OuterEndpoint,
    Middleware,
}

/// Read-only description of one component
#[derive(Debug, Clone, Serialize)]
pub struct ComponentInfo {
    pub kind: ComponentKind,
    pub name: String,
    pub metadata: serde_json::Value,
}

/// Whether an envelope travels towards the inner endpoint
///
/// Envelopes re-tagged as `Middleware` follow their entrance; envelopes that
/// also entered at a middleware travel inward.
pub fn is_inbound(ctx: &DataContext) -> bool {
    match ctx.source {
        DataSource::Outer => true,
        DataSource::Inner => false,
        DataSource::Middleware => ctx.entrance() != DataSource::Inner,
    }
}

/// Weak handle given to middleware with pipeline access
#[derive(Clone)]
pub struct PipelineHandle {
    id: Arc<str>,
    pipeline: Weak<DataPipeline>,
}

impl PipelineHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn upgrade(&self) -> Option<Arc<DataPipeline>> {
        self.pipeline.upgrade()
    }
}

impl std::fmt::Debug for PipelineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineHandle").field("id", &self.id).finish()
    }
}

/// Aggregate root binding two endpoints and a middleware chain
pub struct DataPipeline {
    id: String,
    group_id: Option<String>,
    inner: Arc<dyn CommunicationCore>,
    outer: Arc<dyn CommunicationCore>,
    middlewares: Vec<Arc<dyn PipeMiddleware>>,
    state: Mutex<PipelineState>,
    not_available: AtomicBool,
    gate: tokio::sync::Mutex<()>,
    exceptions: ExceptionPool,
    this: Weak<DataPipeline>,
}

impl DataPipeline {
    /// Assemble a pipeline; use [`DataPipelineBuilder`](crate::DataPipelineBuilder)
    /// for validated construction
    pub(crate) fn new(
        id: String,
        group_id: Option<String>,
        inner: Arc<dyn CommunicationCore>,
        outer: Arc<dyn CommunicationCore>,
        middlewares: Vec<Arc<dyn PipeMiddleware>>,
        exceptions_to_keep: usize,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            exceptions: ExceptionPool::new(id.clone(), exceptions_to_keep),
            id,
            group_id,
            inner,
            outer,
            middlewares,
            state: Mutex::new(PipelineState::Uninitialized),
            not_available: AtomicBool::new(false),
            gate: tokio::sync::Mutex::new(()),
            this: this.clone(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn group_id(&self) -> Option<&str> {
        self.group_id.as_deref()
    }

    pub fn handle(&self) -> PipelineHandle {
        PipelineHandle {
            id: Arc::from(self.id.as_str()),
            pipeline: self.this.clone(),
        }
    }

    pub fn state(&self) -> PipelineState {
        *self.state.lock()
    }

    pub fn is_initialized(&self) -> bool {
        self.state() == PipelineState::Initialized
    }

    pub fn is_initializing(&self) -> bool {
        self.state() == PipelineState::Initializing
    }

    /// Set when the last init failed; cleared by a successful init
    pub fn is_not_available(&self) -> bool {
        self.not_available.load(Ordering::Acquire)
    }

    pub fn exceptions(&self) -> &ExceptionPool {
        &self.exceptions
    }

    pub fn has_exceptions(&self) -> bool {
        !self.exceptions.is_empty()
    }

    pub fn inner(&self) -> &Arc<dyn CommunicationCore> {
        &self.inner
    }

    pub fn outer(&self) -> &Arc<dyn CommunicationCore> {
        &self.outer
    }

    pub fn middlewares(&self) -> &[Arc<dyn PipeMiddleware>] {
        &self.middlewares
    }

    fn endpoint(&self, side: DataSource) -> Option<&Arc<dyn CommunicationCore>> {
        match side {
            DataSource::Inner => Some(&self.inner),
            DataSource::Outer => Some(&self.outer),
            DataSource::Middleware => None,
        }
    }

    /// Endpoints, inner first
    pub fn get_endpoints(&self) -> Vec<ComponentInfo> {
        vec![
            ComponentInfo {
                kind: ComponentKind::InnerEndpoint,
                name: self.inner.name().to_string(),
                metadata: self.inner.metadata(),
            },
            ComponentInfo {
                kind: ComponentKind::OuterEndpoint,
                name: self.outer.name().to_string(),
                metadata: self.outer.metadata(),
            },
        ]
    }

    /// Middleware in registration order
    pub fn get_middlewares(&self) -> Vec<ComponentInfo> {
        self.middlewares
            .iter()
            .map(|m| ComponentInfo {
                kind: ComponentKind::Middleware,
                name: m.name().to_string(),
                metadata: m.metadata(),
            })
            .collect()
    }

    /// Endpoints followed by middleware
    pub fn get_components(&self) -> Vec<ComponentInfo> {
        let mut components = self.get_endpoints();
        components.extend(self.get_middlewares());
        components
    }

    /// Record a failure against this pipeline
    pub fn collect_exception(
        &self,
        source_type: &str,
        source_description: &str,
        error: &dyn std::fmt::Display,
    ) {
        self.exceptions.record(source_type, source_description, error);
    }

    /// Give pipeline-access middleware their handle
    pub(crate) fn attach_handles(&self) {
        let handle = self.handle();
        for access in self.middlewares.iter().filter_map(|m| m.as_pipeline_access()) {
            access.attach(handle.clone());
        }
    }

    /// Run endpoint-configuration middleware once, at registration
    pub(crate) fn configure_endpoints(&self) -> Result<()> {
        for configurer in self.middlewares.iter().filter_map(|m| m.as_endpoint_config()) {
            configurer.configure(self)?;
        }
        Ok(())
    }

    /// Let components register webhook routes
    pub fn configure_host(&self, routes: &mut RouteTable) -> Result<()> {
        for endpoint in [&self.inner, &self.outer] {
            if let Some(host) = endpoint.as_host_config() {
                host.configure_host(routes)?;
            }
        }
        for middleware in &self.middlewares {
            if let Some(host) = middleware.as_host_config() {
                host.configure_host(routes)?;
            }
        }
        Ok(())
    }

    /// Push an envelope through the chain to the opposite endpoint
    ///
    /// Failures are recorded in the exception pool and returned.
    pub async fn send_data(&self, ctx: DataContext) -> Result<()> {
        let inbound = is_inbound(&ctx);
        let target = match (ctx.source, ctx.entrance()) {
            (DataSource::Outer, _) => Some(DataSource::Inner),
            (DataSource::Inner, _) => Some(DataSource::Outer),
            (DataSource::Middleware, DataSource::Outer) => Some(DataSource::Inner),
            (DataSource::Middleware, DataSource::Inner) => Some(DataSource::Outer),
            (DataSource::Middleware, DataSource::Middleware) => None,
        };

        let mut ctx = ctx;
        if inbound {
            for middleware in &self.middlewares {
                ctx = self.run_transform(middleware.as_ref(), ctx).await?;
            }
        } else {
            for middleware in self.middlewares.iter().rev() {
                ctx = self.run_transform(middleware.as_ref(), ctx).await?;
            }
        }

        let Some(side) = target else {
            debug!(channel = %self.id, "Envelope without endpoint entrance consumed by chain");
            return Ok(());
        };
        let endpoint = match side {
            DataSource::Inner => &self.inner,
            _ => &self.outer,
        };

        let configured = endpoint.configured_direction();
        if !configured.allows_output() {
            let err = ChannelError::DirectionNotSupported {
                endpoint: endpoint.name().to_string(),
                side,
                required: ConnectionDirection::Output,
                allowed: configured,
            };
            self.collect_exception("endpoint", endpoint.name(), &err);
            return Err(err);
        }

        if let Err(e) = endpoint.receive_data(ctx).await {
            let err = ChannelError::transport(endpoint.name(), e);
            self.collect_exception("endpoint", endpoint.name(), &err);
            return Err(err);
        }
        Ok(())
    }

    async fn run_transform(
        &self,
        middleware: &dyn PipeMiddleware,
        ctx: DataContext,
    ) -> Result<DataContext> {
        let Some(transform) = middleware.as_transform() else {
            return Ok(ctx);
        };
        transform.pass(ctx).await.map_err(|e| {
            self.collect_exception("middleware", middleware.name(), &e);
            e
        })
    }

    /// Entry point for envelopes arriving from an endpoint's external side
    pub(crate) async fn push_from(&self, side: DataSource, ctx: DataContext) -> Result<()> {
        if let Some(endpoint) = self.endpoint(side) {
            let configured = endpoint.configured_direction();
            if !configured.allows_input() {
                let err = ChannelError::DirectionNotSupported {
                    endpoint: endpoint.name().to_string(),
                    side,
                    required: ConnectionDirection::Input,
                    allowed: configured,
                };
                self.collect_exception("endpoint", endpoint.name(), &err);
                return Err(err);
            }
        }
        self.send_data(ctx).await
    }

    /// Initialize both endpoints; a no-op when already initialized
    ///
    /// Failures are recorded, logged and mark the pipeline not available.
    pub async fn init(&self, cancel: &CancellationToken) -> Result<()> {
        let _gate = self.gate.lock().await;
        self.init_locked(cancel).await
    }

    /// Release endpoint resources
    pub async fn dispose(&self) {
        let _gate = self.gate.lock().await;
        self.dispose_locked().await;
    }

    /// Dispose followed immediately by init
    pub async fn re_initialize(&self, cancel: &CancellationToken) -> Result<()> {
        let _gate = self.gate.lock().await;
        info!(channel = %self.id, "Re-initializing pipeline");
        self.dispose_locked().await;
        self.init_locked(cancel).await
    }

    async fn init_locked(&self, cancel: &CancellationToken) -> Result<()> {
        if self.state() == PipelineState::Initialized {
            debug!(channel = %self.id, "Pipeline already initialized");
            return Ok(());
        }
        *self.state.lock() = PipelineState::Initializing;
        self.attach_handles();

        let mut initialized: Vec<&Arc<dyn CommunicationCore>> = Vec::with_capacity(2);
        for (side, endpoint) in [(DataSource::Inner, &self.inner), (DataSource::Outer, &self.outer)] {
            match self.init_endpoint(side, endpoint, cancel).await {
                Ok(()) => initialized.push(endpoint),
                Err(err) => {
                    self.collect_exception("endpoint", endpoint.name(), &err);
                    error!(
                        channel = %self.id,
                        endpoint = endpoint.name(),
                        error = %err,
                        "Pipeline initialization failed"
                    );
                    for done in initialized {
                        if let Err(e) = done.dispose().await {
                            warn!(channel = %self.id, endpoint = done.name(), error = %e, "Rollback dispose failed");
                        }
                    }
                    self.not_available.store(true, Ordering::Release);
                    *self.state.lock() = PipelineState::Uninitialized;
                    return Err(match err {
                        ChannelError::Cancelled => ChannelError::Cancelled,
                        other => ChannelError::init_failed(&self.id, other.to_string()),
                    });
                }
            }
        }

        self.not_available.store(false, Ordering::Release);
        *self.state.lock() = PipelineState::Initialized;
        info!(
            channel = %self.id,
            inner = self.inner.name(),
            outer = self.outer.name(),
            middlewares = self.middlewares.len(),
            "Pipeline initialized"
        );
        Ok(())
    }

    async fn init_endpoint(
        &self,
        side: DataSource,
        endpoint: &Arc<dyn CommunicationCore>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(ChannelError::Cancelled);
        }

        let supported = endpoint.supported_direction();
        let configured = endpoint.configured_direction();
        if !supported.covers(configured) {
            return Err(ChannelError::DirectionNotSupported {
                endpoint: endpoint.name().to_string(),
                side,
                required: configured,
                allowed: supported,
            });
        }

        let link = PipeLink::new(self.this.clone(), side);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ChannelError::Cancelled),
            result = endpoint.init(link, cancel.child_token()) => {
                result.map_err(|e| ChannelError::transport(endpoint.name(), e))
            }
        }
    }

    async fn dispose_locked(&self) {
        *self.state.lock() = PipelineState::Disposing;
        for endpoint in [&self.inner, &self.outer] {
            if let Err(e) = endpoint.dispose().await {
                let err = ChannelError::transport(endpoint.name(), e);
                warn!(channel = %self.id, error = %err, "Endpoint dispose failed");
                self.collect_exception("endpoint", endpoint.name(), &err);
            }
        }
        *self.state.lock() = PipelineState::Uninitialized;
        debug!(channel = %self.id, "Pipeline disposed");
    }
}

impl std::fmt::Debug for DataPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataPipeline")
            .field("id", &self.id)
            .field("group_id", &self.group_id)
            .field("inner", &self.inner.name())
            .field("outer", &self.outer.name())
            .field("middlewares", &self.middlewares.len())
            .field("state", &self.state())
            .finish()
    }
}
