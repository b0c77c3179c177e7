//! Pub/sub binding core
//!
//! Outbound `Publish` envelopes invoke an output binding through the sidecar's
//! HTTP API (`POST {sidecar}/v1.0/bindings/{name}`). Inbound deliveries arrive
//! as webhook calls on a route this core registers on the host at build time.

use async_trait::async_trait;
use channel::{
    ChannelError, CommunicationCore, ConnectionDirection, CoreLink, DynamicHostConfig, PipeLink,
    RouteTable, TransportError, WebhookHandler, WebhookRequest,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use types::{DataContext, DataOperation, Payload};

/// Sidecar binding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BindingConfig {
    /// Base URL of the sidecar HTTP API
    pub sidecar_url: String,
    pub binding_name: String,
    /// Operation passed to the output binding
    pub binding_operation: String,
    /// Metadata passed with every invocation
    pub metadata: BTreeMap<String, String>,
    /// Inbound webhook path; defaults to the binding name
    pub webhook_route: Option<String>,
    pub timeout_ms: u64,
    pub direction: ConnectionDirection,
}

impl Default for BindingConfig {
    fn default() -> Self {
        Self {
            sidecar_url: "http://127.0.0.1:3500".to_string(),
            binding_name: String::new(),
            binding_operation: "create".to_string(),
            metadata: BTreeMap::new(),
            webhook_route: None,
            timeout_ms: 10_000,
            direction: ConnectionDirection::InputAndOutput,
        }
    }
}

impl BindingConfig {
    pub fn new(binding_name: impl Into<String>) -> Self {
        Self {
            binding_name: binding_name.into(),
            ..Default::default()
        }
    }

    pub fn with_sidecar(mut self, sidecar_url: impl Into<String>) -> Self {
        self.sidecar_url = sidecar_url.into();
        self
    }

    pub fn route(&self) -> String {
        self.webhook_route
            .clone()
            .unwrap_or_else(|| self.binding_name.clone())
    }

    pub fn invoke_url(&self) -> String {
        format!(
            "{}/v1.0/bindings/{}",
            self.sidecar_url.trim_end_matches('/'),
            self.binding_name
        )
    }

    pub fn validate(&self) -> Result<(), TransportError> {
        if self.binding_name.trim().is_empty() {
            return Err(TransportError::configuration(
                "binding name must not be empty",
                Some("binding_name"),
            ));
        }
        reqwest::Url::parse(&self.sidecar_url).map_err(|e| {
            TransportError::configuration(
                format!("invalid sidecar url '{}': {e}", self.sidecar_url),
                Some("sidecar_url"),
            )
        })?;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct InvokeRequest<'a> {
    data: serde_json::Value,
    metadata: &'a BTreeMap<String, String>,
    operation: &'a str,
}

/// Render a payload as the JSON `data` field of a binding invocation
fn payload_json(payload: &Payload) -> Result<serde_json::Value, TransportError> {
    match payload {
        Payload::Empty => Ok(serde_json::Value::Null),
        Payload::Object(value) => Ok(value.clone()),
        Payload::Text(text) => Ok(serde_json::Value::String(text.clone())),
        other => {
            let bytes = other.to_wire_bytes()?;
            String::from_utf8(bytes.to_vec())
                .map(serde_json::Value::String)
                .map_err(|_| TransportError::protocol("binary payload is not valid UTF-8"))
        }
    }
}

/// Webhook route pushing deliveries into the pipeline as `Publish` envelopes
struct BindingWebhook {
    link: Arc<CoreLink>,
    received: Arc<AtomicU64>,
}

#[async_trait]
impl WebhookHandler for BindingWebhook {
    async fn handle(&self, request: WebhookRequest) -> channel::Result<()> {
        let payload = match serde_json::from_slice::<serde_json::Value>(&request.body) {
            Ok(value) if request.is_json() || request.content_type.is_none() => Payload::Object(value),
            _ => Payload::Bytes(request.body.clone()),
        };
        let ctx = self
            .link
            .create_data_with(DataOperation::Publish, payload)
            .ok_or(ChannelError::Detached)?;
        self.received.fetch_add(1, Ordering::Relaxed);
        debug!(route = %request.path, "Binding webhook delivery");
        self.link.send_data(ctx).await
    }
}

/// Sidecar binding endpoint
pub struct BindingCore {
    config: BindingConfig,
    link: Arc<CoreLink>,
    client: RwLock<Option<reqwest::Client>>,
    published: AtomicU64,
    received: Arc<AtomicU64>,
}

impl BindingCore {
    pub fn new(config: BindingConfig) -> Self {
        Self {
            config,
            link: Arc::new(CoreLink::new()),
            client: RwLock::new(None),
            published: AtomicU64::new(0),
            received: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn config(&self) -> &BindingConfig {
        &self.config
    }
}

#[async_trait]
impl CommunicationCore for BindingCore {
    fn name(&self) -> &str {
        "BindingCore"
    }

    fn metadata(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "binding",
            "binding_name": self.config.binding_name,
            "sidecar_url": self.config.sidecar_url,
            "webhook_route": self.config.route(),
            "direction": self.config.direction,
            "published": self.published.load(Ordering::Relaxed),
            "received": self.received.load(Ordering::Relaxed),
        })
    }

    fn supported_direction(&self) -> ConnectionDirection {
        ConnectionDirection::InputAndOutput
    }

    fn configured_direction(&self) -> ConnectionDirection {
        self.config.direction
    }

    async fn init(&self, link: PipeLink, _cancel: CancellationToken) -> Result<(), TransportError> {
        self.config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(self.config.timeout_ms))
            .build()
            .map_err(|e| TransportError::http(format!("Failed to build HTTP client: {e}"), None))?;
        *self.client.write() = Some(client);
        self.link.attach(link);
        info!(
            binding = %self.config.binding_name,
            sidecar = %self.config.sidecar_url,
            "Binding core initialized"
        );
        Ok(())
    }

    async fn dispose(&self) -> Result<(), TransportError> {
        self.client.write().take();
        self.link.detach();
        Ok(())
    }

    async fn receive_data(&self, ctx: DataContext) -> Result<(), TransportError> {
        if ctx.operation() != DataOperation::Publish {
            return Err(TransportError::unsupported(self.name(), ctx.operation_str()));
        }
        let client = self
            .client
            .read()
            .clone()
            .ok_or_else(|| TransportError::not_initialized(self.name()))?;

        let body = InvokeRequest {
            data: payload_json(ctx.data())?,
            metadata: &self.config.metadata,
            operation: &self.config.binding_operation,
        };
        let url = self.config.invoke_url();
        let response = client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| TransportError::http(format!("Binding invoke to {url} failed: {e}"), e.status().map(|s| s.as_u16())))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(TransportError::http(
                format!("Binding {} rejected invoke: {detail}", self.config.binding_name),
                Some(status.as_u16()),
            ));
        }
        self.published.fetch_add(1, Ordering::Relaxed);
        debug!(binding = %self.config.binding_name, "Published through binding");
        Ok(())
    }

    fn as_host_config(&self) -> Option<&dyn DynamicHostConfig> {
        Some(self)
    }
}

impl DynamicHostConfig for BindingCore {
    fn configure_host(&self, routes: &mut RouteTable) -> channel::Result<()> {
        routes.add_route(
            &self.config.route(),
            Arc::new(BindingWebhook {
                link: Arc::clone(&self.link),
                received: Arc::clone(&self.received),
            }),
        )
    }
}
