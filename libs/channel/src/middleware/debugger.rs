//! Capturing debugger monitor

use super::{PipeMiddleware, PipelineAccess, TransformMiddleware};
use crate::error::Result;
use crate::pipeline::PipelineHandle;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use types::{DataContext, DataOperation, DataSource, DataType};

pub const DEFAULT_CAPACITY: usize = 100;

/// Snapshot of one captured envelope
#[derive(Debug, Clone, Serialize)]
pub struct DebugMessage {
    pub timestamp: DateTime<Utc>,
    pub source: DataSource,
    pub operation: DataOperation,
    pub data_type: DataType,
    pub content: String,
    pub metadata: Vec<&'static str>,
}

/// Captures envelopes whose rendered content matches a keyword
///
/// Inactive debuggers pass envelopes through without looking at them.
pub struct MessageDebugger {
    active: AtomicBool,
    filter: RwLock<String>,
    capacity: AtomicUsize,
    messages: Mutex<VecDeque<DebugMessage>>,
    pipeline: RwLock<Option<PipelineHandle>>,
}

impl MessageDebugger {
    /// Active debugger capturing everything
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            active: AtomicBool::new(true),
            filter: RwLock::new(String::new()),
            capacity: AtomicUsize::new(capacity.max(1)),
            messages: Mutex::new(VecDeque::new()),
            pipeline: RwLock::new(None),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }

    pub fn filter(&self) -> String {
        self.filter.read().clone()
    }

    /// Empty keyword captures everything; matching ignores case
    pub fn set_filter(&self, keyword: impl Into<String>) {
        *self.filter.write() = keyword.into();
    }

    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Relaxed)
    }

    /// Shrinking drops the oldest captured messages
    pub fn set_capacity(&self, capacity: usize) {
        let capacity = capacity.max(1);
        self.capacity.store(capacity, Ordering::Relaxed);
        let mut messages = self.messages.lock();
        while messages.len() > capacity {
            messages.pop_front();
        }
    }

    /// Captured messages, oldest first
    pub fn messages(&self) -> Vec<DebugMessage> {
        self.messages.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.messages.lock().clear();
    }

    fn should_capture(&self, content: &str) -> bool {
        let filter = self.filter.read();
        let keyword = filter.trim();
        keyword.is_empty() || content.to_lowercase().contains(&keyword.to_lowercase())
    }

    fn capture(&self, ctx: &DataContext) {
        let content = ctx.data().render();
        if !self.should_capture(&content) {
            return;
        }
        let message = DebugMessage {
            timestamp: Utc::now(),
            source: ctx.source,
            operation: ctx.operation(),
            data_type: ctx.data_type(),
            content,
            metadata: ctx.metadata.type_names(),
        };
        let capacity = self.capacity();
        let mut messages = self.messages.lock();
        messages.push_back(message);
        while messages.len() > capacity {
            messages.pop_front();
        }
    }
}

impl Default for MessageDebugger {
    fn default() -> Self {
        Self::new()
    }
}

impl PipeMiddleware for MessageDebugger {
    fn name(&self) -> &str {
        "MessageDebugger"
    }

    fn metadata(&self) -> serde_json::Value {
        let messages = self.messages.lock();
        serde_json::json!({
            "name": self.name(),
            "channel": self.pipeline.read().as_ref().map(|p| p.id().to_string()),
            "active": self.is_active(),
            "filter": self.filter(),
            "capacity": self.capacity(),
            "captured": messages.len(),
            "last_captured": messages.back().map(|m| m.timestamp),
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
impl TransformMiddleware for MessageDebugger {
    async fn pass(&self, ctx: DataContext) -> Result<DataContext> {
        if self.is_active() {
            self.capture(&ctx);
        }
        Ok(ctx)
    }
}

impl PipelineAccess for MessageDebugger {
    fn attach(&self, pipeline: PipelineHandle) {
        *self.pipeline.write() = Some(pipeline);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(text: &str) -> DataContext {
        DataContext::from_side(DataSource::Outer, DataOperation::Publish, text)
    }

    #[tokio::test]
    async fn test_filter_and_capacity() {
        let debugger = MessageDebugger::with_capacity(2);
        debugger.set_filter("Order");

        for text in ["order 1", "quote 1", "ORDER 2", "order 3"] {
            debugger.pass(ctx(text)).await.unwrap();
        }

        let captured: Vec<String> = debugger.messages().into_iter().map(|m| m.content).collect();
        assert_eq!(captured, vec!["ORDER 2", "order 3"]);

        debugger.set_capacity(0);
        assert_eq!(debugger.capacity(), 1);
        assert_eq!(debugger.messages()[0].content, "order 3");
    }

    #[tokio::test]
    async fn test_inactive_captures_nothing() {
        let debugger = MessageDebugger::new();
        debugger.set_active(false);
        let passed = debugger.pass(ctx("payload")).await.unwrap();

        assert_eq!(passed.data().as_text(), Some("payload"));
        assert!(debugger.messages().is_empty());

        debugger.set_active(true);
        debugger.pass(ctx("payload")).await.unwrap();
        assert_eq!(debugger.messages()[0].data_type, DataType::String);

        debugger.clear();
        assert_eq!(debugger.metadata()["captured"], 0);
    }
}
