//! Message counting monitor

use super::{PipeMiddleware, PipelineAccess, TransformMiddleware};
use crate::error::Result;
use crate::pipeline::PipelineHandle;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use types::{DataContext, DataSource};

/// Extension marking an envelope as an error report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMark(pub String);

/// Counts envelopes passing through a pipeline
///
/// Envelopes produced by the outer side count as input, those produced by the
/// inner side as output.
#[derive(Default)]
pub struct MessageCounter {
    total: AtomicU64,
    input: AtomicU64,
    output: AtomicU64,
    errors: AtomicU64,
    last_processed: RwLock<Option<DateTime<Utc>>>,
    reset_at: RwLock<Option<DateTime<Utc>>>,
    pipeline: RwLock<Option<PipelineHandle>>,
}

impl MessageCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn input(&self) -> u64 {
        self.input.load(Ordering::Relaxed)
    }

    pub fn output(&self) -> u64 {
        self.output.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn last_processed(&self) -> Option<DateTime<Utc>> {
        *self.last_processed.read()
    }

    pub fn reset(&self) {
        self.total.store(0, Ordering::Relaxed);
        self.input.store(0, Ordering::Relaxed);
        self.output.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        *self.reset_at.write() = Some(Utc::now());
    }

    fn is_error_message(ctx: &DataContext) -> bool {
        ctx.metadata.contains::<ErrorMark>()
            || ctx.data().render().to_ascii_lowercase().contains("error")
    }
}

impl PipeMiddleware for MessageCounter {
    fn name(&self) -> &str {
        "MessageCounter"
    }

    fn metadata(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name(),
            "channel": self.pipeline.read().as_ref().map(|p| p.id().to_string()),
            "total": self.total(),
            "input": self.input(),
            "output": self.output(),
            "errors": self.errors(),
            "last_processed": self.last_processed(),
            "reset_at": *self.reset_at.read(),
        })
    }

    fn as_transform(&self) -> Option<&dyn TransformMiddleware> {
        Some(self)
    }

    fn as_pipeline_access(&self) -> Option<&dyn PipelineAccess> {
        Some(self)
    }
}

#[async_trait]
impl TransformMiddleware for MessageCounter {
    async fn pass(&self, ctx: DataContext) -> Result<DataContext> {
        self.total.fetch_add(1, Ordering::Relaxed);
        match ctx.source {
            DataSource::Outer => {
                self.input.fetch_add(1, Ordering::Relaxed);
            }
            DataSource::Inner => {
                self.output.fetch_add(1, Ordering::Relaxed);
            }
            DataSource::Middleware => {}
        }
        if Self::is_error_message(&ctx) {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        *self.last_processed.write() = Some(Utc::now());
        Ok(ctx)
    }
}

impl PipelineAccess for MessageCounter {
    fn attach(&self, pipeline: PipelineHandle) {
        *self.pipeline.write() = Some(pipeline);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::DataOperation;

    #[tokio::test]
    async fn test_counts_by_source() {
        let counter = MessageCounter::new();
        let inbound = DataContext::from_side(DataSource::Outer, DataOperation::Publish, "tick");
        let outbound = DataContext::from_side(DataSource::Inner, DataOperation::Publish, "order");
        let failure = DataContext::from_side(DataSource::Outer, DataOperation::Publish, "ERROR: feed down");
        let marked = DataContext::from_side(DataSource::Middleware, DataOperation::Custom, "x")
            .with_metadata(ErrorMark("upstream".into()));

        for ctx in [inbound, outbound, failure, marked] {
            counter.pass(ctx).await.unwrap();
        }

        assert_eq!(counter.total(), 4);
        assert_eq!(counter.input(), 2);
        assert_eq!(counter.output(), 1);
        assert_eq!(counter.errors(), 2);
        assert!(counter.last_processed().is_some());

        let meta = counter.metadata();
        assert_eq!(meta["total"], 4);
        assert!(meta["channel"].is_null());

        counter.reset();
        assert_eq!(counter.total(), 0);
        assert_eq!(counter.errors(), 0);
    }
}
