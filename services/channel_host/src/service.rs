//! Management operations behind the HTTP surface

use crate::error::Result;
use channel::{ChannelError, ChannelRegistry, ComponentInfo, DataChannel, ExceptionSummary, PipelineException};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Outcome marker of an [`ApiResponse`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseCode {
    Ok,
    Fail,
}

/// JSON envelope of every management response
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse {
    pub code: ResponseCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ApiResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            code: ResponseCode::Ok,
            message: message.into(),
            data: None,
        }
    }

    pub fn ok_with<T: Serialize>(message: impl Into<String>, data: &T) -> Self {
        Self {
            code: ResponseCode::Ok,
            message: message.into(),
            data: serde_json::to_value(data).ok(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            code: ResponseCode::Fail,
            message: message.into(),
            data: None,
        }
    }
}

/// Component as listed by `GET /channels`
#[derive(Debug, Clone, Serialize)]
pub struct ComponentView {
    pub name: String,
    pub metadata: serde_json::Value,
}

impl From<ComponentInfo> for ComponentView {
    fn from(info: ComponentInfo) -> Self {
        Self {
            name: info.name,
            metadata: info.metadata,
        }
    }
}

/// Channel as listed by `GET /channels`
#[derive(Debug, Clone, Serialize)]
pub struct ChannelView {
    pub id: String,
    pub group_id: Option<String>,
    pub middlewares: Vec<ComponentView>,
    pub inner_endpoint: ComponentView,
    pub outer_endpoint: ComponentView,
    pub is_initialized: bool,
    pub is_initializing: bool,
    pub is_not_available: bool,
    pub has_exceptions: bool,
    pub exception_count: usize,
    pub total_exception_count: u64,
}

impl ChannelView {
    fn of(channel: &DataChannel) -> Self {
        let pipeline = channel.pipeline();
        let mut endpoints = pipeline.get_endpoints().into_iter().map(ComponentView::from);
        let unknown = || ComponentView {
            name: String::new(),
            metadata: serde_json::Value::Null,
        };
        let inner_endpoint = endpoints.next().unwrap_or_else(unknown);
        let outer_endpoint = endpoints.next().unwrap_or_else(unknown);
        Self {
            id: pipeline.id().to_string(),
            group_id: pipeline.group_id().map(str::to_string),
            middlewares: pipeline
                .get_middlewares()
                .into_iter()
                .map(ComponentView::from)
                .collect(),
            inner_endpoint,
            outer_endpoint,
            is_initialized: pipeline.is_initialized(),
            is_initializing: pipeline.is_initializing(),
            is_not_available: pipeline.is_not_available(),
            has_exceptions: pipeline.has_exceptions(),
            exception_count: pipeline.exceptions().len(),
            total_exception_count: pipeline.exceptions().total_count(),
        }
    }
}

/// Recent exceptions of one channel
#[derive(Debug, Clone, Serialize)]
pub struct ChannelExceptions {
    pub summary: ExceptionSummary,
    pub exceptions: Vec<PipelineException>,
}

/// Exception totals across every channel
#[derive(Debug, Clone, Serialize)]
pub struct ExceptionsOverview {
    pub channels: usize,
    pub channels_with_exceptions: usize,
    pub exception_count: usize,
    pub total_exception_count: u64,
    pub summaries: Vec<ExceptionSummary>,
}

/// Management operations over a registry
#[derive(Debug, Clone)]
pub struct ManagementService {
    registry: Arc<ChannelRegistry>,
}

impl ManagementService {
    pub fn new(registry: Arc<ChannelRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    fn channel(&self, id: &str) -> Result<Arc<DataChannel>> {
        self.registry
            .fetch(id)
            .ok_or_else(|| ChannelError::ChannelNotFound(id.to_string()).into())
    }

    pub async fn re_initialize(&self, id: &str) -> Result<ApiResponse> {
        self.registry.re_initialize(id).await?;
        info!(channel = %id, "Channel re-initialized on request");
        Ok(ApiResponse::ok(format!("Channel {id} re-initialized")))
    }

    pub fn channels(&self) -> Vec<ChannelView> {
        self.registry
            .fetch_all()
            .iter()
            .map(|c| ChannelView::of(c))
            .collect()
    }

    pub fn exceptions(&self, id: &str, count: usize) -> Result<ChannelExceptions> {
        let channel = self.channel(id)?;
        let pool = channel.pipeline().exceptions();
        Ok(ChannelExceptions {
            summary: pool.summary(),
            exceptions: pool.recent(count),
        })
    }

    pub fn exceptions_overview(&self) -> ExceptionsOverview {
        let summaries: Vec<_> = self
            .registry
            .fetch_all()
            .iter()
            .map(|c| c.pipeline().exceptions().summary())
            .collect();
        ExceptionsOverview {
            channels: summaries.len(),
            channels_with_exceptions: summaries.iter().filter(|s| s.count > 0).count(),
            exception_count: summaries.iter().map(|s| s.count).sum(),
            total_exception_count: summaries.iter().map(|s| s.total_count).sum(),
            summaries,
        }
    }

    pub fn clear_exceptions(&self, id: &str) -> Result<()> {
        self.channel(id)?.pipeline().exceptions().clear();
        info!(channel = %id, "Cleared channel exceptions");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HostError;
    use channel::testing::RecordingCore;
    use channel::{ChannelSettings, DataPipelineBuilder};

    fn service() -> (ManagementService, Arc<RecordingCore>) {
        let registry = Arc::new(ChannelRegistry::with_settings(ChannelSettings::default()));
        let outer = Arc::new(RecordingCore::new("outer"));
        DataPipelineBuilder::new("alpha")
            .group("g1")
            .outer(outer.clone())
            .middleware(Arc::new(channel::middleware::MessageCounter::new()))
            .register(&registry)
            .unwrap();
        (ManagementService::new(registry), outer)
    }

    #[test]
    fn test_channel_views() {
        let (service, _) = service();
        let views = service.channels();
        assert_eq!(views.len(), 1);
        let view = &views[0];
        assert_eq!(view.id, "alpha");
        assert_eq!(view.group_id.as_deref(), Some("g1"));
        assert_eq!(view.inner_endpoint.name, "DefaultCore");
        assert_eq!(view.outer_endpoint.name, "RecordingCore");
        assert_eq!(view.middlewares[0].name, "MessageCounter");
        assert!(!view.is_initialized);
        assert!(!view.has_exceptions);
    }

    #[tokio::test]
    async fn test_re_initialize_unknown_is_not_found() {
        let (service, outer) = service();
        let err = service.re_initialize("missing").await.unwrap_err();
        assert!(matches!(err, HostError::Channel(ref e) if e.is_not_found()));
        assert!(outer.events().is_empty());

        service.re_initialize("alpha").await.unwrap();
        assert_eq!(outer.init_count(), 1);
    }

    #[tokio::test]
    async fn test_exception_views() {
        let (service, outer) = service();
        outer.set_fail_init(true);
        assert!(service.re_initialize("alpha").await.is_err());

        let exceptions = service.exceptions("alpha", 10).unwrap();
        assert_eq!(exceptions.summary.count, 1);
        assert_eq!(exceptions.exceptions.len(), 1);

        let overview = service.exceptions_overview();
        assert_eq!(overview.channels_with_exceptions, 1);
        assert_eq!(overview.total_exception_count, 1);

        service.clear_exceptions("alpha").unwrap();
        let exceptions = service.exceptions("alpha", 10).unwrap();
        assert_eq!(exceptions.summary.count, 0);
        assert_eq!(exceptions.summary.total_count, 1);
        assert!(service.clear_exceptions("missing").is_err());
    }

    #[test]
    fn test_api_response_shape() {
        let json = serde_json::to_value(ApiResponse::fail("nope")).unwrap();
        assert_eq!(json, serde_json::json!({ "code": "fail", "message": "nope" }));
    }
}
