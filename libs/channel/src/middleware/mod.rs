//! Middleware chain components
//!
//! A middleware declares its capabilities by overriding the `as_*` accessors
//! of [`PipeMiddleware`]. The pipeline checks them once when it is built:
//!
//! - [`TransformMiddleware`]: runs on every envelope in flight
//! - [`PipelineAccess`]: receives a weak handle to the owning pipeline
//! - [`EndpointConfigMiddleware`]: configures endpoints at registration time
//! - [`DynamicHostConfig`]: registers HTTP routes at build time

use crate::error::Result;
use crate::pipeline::{DataPipeline, PipelineHandle};
use crate::routes::DynamicHostConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use types::DataContext;

pub mod codec;
pub mod counter;
pub mod debugger;

pub use codec::{JsonCodec, TextCodec};
pub use counter::{ErrorMark, MessageCounter};
pub use debugger::{DebugMessage, MessageDebugger};

/// A link in a pipeline's middleware chain
pub trait PipeMiddleware: Send + Sync + 'static {
    /// Type name shown in introspection
    fn name(&self) -> &str;

    fn metadata(&self) -> serde_json::Value {
        serde_json::json!({ "name": self.name() })
    }

    fn as_transform(&self) -> Option<&dyn TransformMiddleware> {
        None
    }

    fn as_pipeline_access(&self) -> Option<&dyn PipelineAccess> {
        None
    }

    fn as_endpoint_config(&self) -> Option<&dyn EndpointConfigMiddleware> {
        None
    }

    fn as_host_config(&self) -> Option<&dyn DynamicHostConfig> {
        None
    }
}

/// Data transformation applied to every envelope in flight
#[async_trait]
pub trait TransformMiddleware: Send + Sync {
    async fn pass(&self, ctx: DataContext) -> Result<DataContext> {
        Ok(ctx)
    }
}

/// Capability of middleware that inspects its owning pipeline
pub trait PipelineAccess: Send + Sync {
    fn attach(&self, pipeline: PipelineHandle);
}

/// Middleware that configures endpoints instead of touching envelopes
pub trait EndpointConfigMiddleware: Send + Sync {
    /// Called once when the pipeline is built; failing rejects the topology
    fn configure(&self, pipeline: &DataPipeline) -> Result<()>;
}

/// Config-file description of a built-in middleware
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MiddlewareConfig {
    MessageCounter,
    MessageDebugger {
        #[serde(default = "default_debugger_capacity")]
        capacity: usize,
        #[serde(default)]
        filter: String,
        #[serde(default = "default_true")]
        active: bool,
    },
    TextCodec,
    JsonCodec,
}

fn default_debugger_capacity() -> usize {
    debugger::DEFAULT_CAPACITY
}

fn default_true() -> bool {
    true
}

impl MiddlewareConfig {
    pub fn build(&self) -> Arc<dyn PipeMiddleware> {
        match self {
            MiddlewareConfig::MessageCounter => Arc::new(MessageCounter::new()),
            MiddlewareConfig::MessageDebugger {
                capacity,
                filter,
                active,
            } => {
                let debugger = MessageDebugger::with_capacity(*capacity);
                debugger.set_filter(filter.clone());
                debugger.set_active(*active);
                Arc::new(debugger)
            }
            MiddlewareConfig::TextCodec => Arc::new(TextCodec),
            MiddlewareConfig::JsonCodec => Arc::new(JsonCodec),
        }
    }
}
