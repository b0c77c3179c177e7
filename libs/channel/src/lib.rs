//! Data Channel Pipeline Engine
//!
//! Bidirectional pipelines connecting an inner endpoint (the application) to
//! an outer endpoint (a transport) through an ordered middleware chain.
//! Inbound envelopes visit middlewares in registration order, outbound
//! envelopes in reverse. Pipelines live in a [`ChannelRegistry`] keyed by id.

pub mod builder;
pub mod core;
pub mod error;
pub mod exceptions;
pub mod middleware;
pub mod pipeline;
pub mod registry;
pub mod routes;
pub mod settings;

// Test doubles, also used by the end-to-end crate
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export commonly used types
pub use builder::{CoreFactory, DataPipelineBuilder};
pub use core::default::ReceiveHandler;
pub use core::{CommunicationCore, ConnectionDirection, CoreLink, DefaultCore, PipeLink};
pub use error::{ChannelError, Result, TransportError};
pub use exceptions::{ExceptionPool, ExceptionSummary, PipelineException};
pub use middleware::{
    EndpointConfigMiddleware, MiddlewareConfig, PipeMiddleware, PipelineAccess,
    TransformMiddleware,
};
pub use pipeline::{ComponentInfo, ComponentKind, DataPipeline, PipelineHandle, PipelineState};
pub use registry::{ChannelRegistry, DataChannel, InitHandle, InitReport};
pub use routes::{DynamicHostConfig, RouteTable, WebhookHandler, WebhookRequest};
pub use settings::ChannelSettings;

pub use types::{DataContext, DataOperation, DataSource, DataType, Extensions, Payload};
