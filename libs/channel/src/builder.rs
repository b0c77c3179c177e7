//! Declarative pipeline construction

use crate::core::{CommunicationCore, DefaultCore};
use crate::error::{ChannelError, Result};
use crate::middleware::PipeMiddleware;
use crate::pipeline::DataPipeline;
use crate::registry::{ChannelRegistry, DataChannel};
use crate::settings::ChannelSettings;
use std::sync::Arc;

/// Deferred endpoint construction, run when the builder executes
pub type CoreFactory = Box<dyn FnOnce() -> Result<Arc<dyn CommunicationCore>> + Send>;

enum EndpointSpec {
    Instance(Arc<dyn CommunicationCore>),
    Factory(CoreFactory),
}

impl EndpointSpec {
    fn resolve(self) -> Result<Arc<dyn CommunicationCore>> {
        match self {
            EndpointSpec::Instance(core) => Ok(core),
            EndpointSpec::Factory(factory) => factory(),
        }
    }
}

/// Topology description of one pipeline
///
/// The inner endpoint defaults to a [`DefaultCore`]; the outer endpoint is
/// required.
pub struct DataPipelineBuilder {
    id: String,
    group_id: Option<String>,
    inner: Option<EndpointSpec>,
    outer: Option<EndpointSpec>,
    middlewares: Vec<Arc<dyn PipeMiddleware>>,
}

impl DataPipelineBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            group_id: None,
            inner: None,
            outer: None,
            middlewares: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn inner(mut self, core: Arc<dyn CommunicationCore>) -> Self {
        self.inner = Some(EndpointSpec::Instance(core));
        self
    }

    pub fn outer(mut self, core: Arc<dyn CommunicationCore>) -> Self {
        self.outer = Some(EndpointSpec::Instance(core));
        self
    }

    /// Construct the inner endpoint only when the builder runs
    pub fn inner_with<F>(mut self, factory: F) -> Self
    where
        F: FnOnce() -> Result<Arc<dyn CommunicationCore>> + Send + 'static,
    {
        self.inner = Some(EndpointSpec::Factory(Box::new(factory)));
        self
    }

    /// Construct the outer endpoint only when the builder runs
    pub fn outer_with<F>(mut self, factory: F) -> Self
    where
        F: FnOnce() -> Result<Arc<dyn CommunicationCore>> + Send + 'static,
    {
        self.outer = Some(EndpointSpec::Factory(Box::new(factory)));
        self
    }

    /// Append a middleware; registration order is chain order
    pub fn middleware(mut self, middleware: Arc<dyn PipeMiddleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn middlewares<I>(mut self, middlewares: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn PipeMiddleware>>,
    {
        self.middlewares.extend(middlewares);
        self
    }

    pub fn build(self) -> Result<Arc<DataPipeline>> {
        self.build_with(&ChannelSettings::default())
    }

    pub fn build_with(self, settings: &ChannelSettings) -> Result<Arc<DataPipeline>> {
        if self.id.trim().is_empty() {
            return Err(ChannelError::InvalidTopology(
                "pipeline id must not be empty".to_string(),
            ));
        }
        let outer = self
            .outer
            .ok_or_else(|| {
                ChannelError::InvalidTopology(format!("pipeline '{}' has no outer endpoint", self.id))
            })?
            .resolve()?;
        let inner = match self.inner {
            Some(spec) => spec.resolve()?,
            None => Arc::new(DefaultCore::new()),
        };

        let pipeline = DataPipeline::new(
            self.id,
            self.group_id,
            inner,
            outer,
            self.middlewares,
            settings.recent_exceptions_to_keep,
        );
        pipeline.attach_handles();
        pipeline.configure_endpoints()?;
        Ok(pipeline)
    }

    /// Build and register into `registry` right away
    pub fn register(self, registry: &ChannelRegistry) -> Result<Arc<DataChannel>> {
        let pipeline = self.build_with(registry.settings())?;
        registry.register_pipeline(pipeline)
    }
}

impl std::fmt::Debug for DataPipelineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataPipelineBuilder")
            .field("id", &self.id)
            .field("group_id", &self.group_id)
            .field("has_inner", &self.inner.is_some())
            .field("has_outer", &self.outer.is_some())
            .field("middlewares", &self.middlewares.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::EndpointConfigMiddleware;
    use crate::testing::RecordingCore;
    use parking_lot::Mutex;

    struct EndpointAudit {
        seen: Mutex<Vec<String>>,
        reject: bool,
    }

    impl PipeMiddleware for EndpointAudit {
        fn name(&self) -> &str {
            "EndpointAudit"
        }

        fn as_endpoint_config(&self) -> Option<&dyn EndpointConfigMiddleware> {
            Some(self)
        }
    }

    impl EndpointConfigMiddleware for EndpointAudit {
        fn configure(&self, pipeline: &DataPipeline) -> Result<()> {
            if self.reject {
                return Err(ChannelError::InvalidTopology("audit rejected".into()));
            }
            let mut seen = self.seen.lock();
            seen.push(pipeline.inner().name().to_string());
            seen.push(pipeline.outer().name().to_string());
            Ok(())
        }
    }

    #[test]
    fn test_outer_is_required() {
        let err = DataPipelineBuilder::new("x").build().unwrap_err();
        assert!(matches!(err, ChannelError::InvalidTopology(_)));

        let err = DataPipelineBuilder::new(" ")
            .outer(Arc::new(RecordingCore::new("o")))
            .build()
            .unwrap_err();
        assert!(matches!(err, ChannelError::InvalidTopology(_)));
    }

    #[test]
    fn test_defaults_and_factories() {
        let pipeline = DataPipelineBuilder::new("orders")
            .group("trading")
            .outer_with(|| Ok(Arc::new(RecordingCore::new("lazy")) as Arc<dyn CommunicationCore>))
            .build()
            .unwrap();

        assert_eq!(pipeline.id(), "orders");
        assert_eq!(pipeline.group_id(), Some("trading"));
        assert_eq!(pipeline.inner().name(), "DefaultCore");
        assert_eq!(pipeline.outer().name(), "RecordingCore");
    }

    #[test]
    fn test_factory_error_propagates() {
        let err = DataPipelineBuilder::new("bad")
            .outer_with(|| Err(ChannelError::InvalidTopology("no address".into())))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("no address"));
    }

    #[test]
    fn test_endpoint_config_runs_at_build() {
        let audit = Arc::new(EndpointAudit {
            seen: Mutex::new(Vec::new()),
            reject: false,
        });
        DataPipelineBuilder::new("audited")
            .outer(Arc::new(RecordingCore::new("o")))
            .middleware(audit.clone())
            .build()
            .unwrap();
        assert_eq!(*audit.seen.lock(), vec!["DefaultCore", "RecordingCore"]);

        let rejecting = Arc::new(EndpointAudit {
            seen: Mutex::new(Vec::new()),
            reject: true,
        });
        assert!(DataPipelineBuilder::new("rejected")
            .outer(Arc::new(RecordingCore::new("o")))
            .middleware(rejecting)
            .build()
            .is_err());
    }
}
