//! Dynamic host configuration
//!
//! Pipeline components that need inbound HTTP (webhooks) register handlers
//! into a [`RouteTable`] once, while the registry builds its pipelines. The
//! host then serves every registered path.

use crate::error::{ChannelError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Inbound HTTP request handed to a webhook handler
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    pub path: String,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl WebhookRequest {
    pub fn new(path: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            path: path.into(),
            content_type: None,
            body: body.into(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Whether the declared content type is JSON
    pub fn is_json(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("json"))
    }
}

/// Handler for one registered webhook path
#[async_trait]
pub trait WebhookHandler: Send + Sync + 'static {
    async fn handle(&self, request: WebhookRequest) -> Result<()>;
}

/// Capability of a component that adds routes to the host at build time
pub trait DynamicHostConfig: Send + Sync {
    fn configure_host(&self, routes: &mut RouteTable) -> Result<()>;
}

/// Build-time registry of webhook routes
#[derive(Default, Clone)]
pub struct RouteTable {
    routes: BTreeMap<String, Arc<dyn WebhookHandler>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Leading and trailing slashes are ignored
    pub fn normalize(path: &str) -> String {
        path.trim_matches('/').to_string()
    }

    /// Register a handler; a path can only be claimed once
    pub fn add_route(&mut self, path: &str, handler: Arc<dyn WebhookHandler>) -> Result<()> {
        let key = Self::normalize(path);
        if key.is_empty() {
            return Err(ChannelError::InvalidTopology(
                "webhook route path must not be empty".to_string(),
            ));
        }
        if self.routes.contains_key(&key) {
            return Err(ChannelError::InvalidTopology(format!(
                "webhook route '/{key}' is already registered"
            )));
        }
        tracing::info!(route = %key, "Registered webhook route");
        self.routes.insert(key, handler);
        Ok(())
    }

    /// Fails if any path of `other` is already claimed here
    pub fn check_disjoint(&self, other: &RouteTable) -> Result<()> {
        match other.routes.keys().find(|key| self.routes.contains_key(*key)) {
            Some(key) => Err(ChannelError::InvalidTopology(format!(
                "webhook route '/{key}' is already registered"
            ))),
            None => Ok(()),
        }
    }

    /// Move every route of `other` into this table
    ///
    /// All or nothing: nothing is added when any path collides.
    pub fn merge(&mut self, other: RouteTable) -> Result<()> {
        self.check_disjoint(&other)?;
        self.routes.extend(other.routes);
        Ok(())
    }

    pub fn get(&self, path: &str) -> Option<Arc<dyn WebhookHandler>> {
        self.routes.get(&Self::normalize(path)).cloned()
    }

    pub fn paths(&self) -> Vec<String> {
        self.routes.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Dispatch a request to its handler
    pub async fn dispatch(&self, request: WebhookRequest) -> Option<Result<()>> {
        let handler = self.get(&request.path)?;
        Some(handler.handle(request).await)
    }
}

impl std::fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteTable").field("paths", &self.paths()).finish()
    }
}
