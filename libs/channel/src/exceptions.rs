//! Bounded per-pipeline exception history

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};

/// One recorded failure
#[derive(Debug, Clone, Serialize)]
pub struct PipelineException {
    pub timestamp: DateTime<Utc>,
    /// Kind of component that failed (`endpoint`, `middleware`, `pipeline`)
    pub source_type: String,
    /// Name of the failing component
    pub source_description: String,
    pub message: String,
}

/// Counters for the management surface
#[derive(Debug, Clone, Serialize)]
pub struct ExceptionSummary {
    pub channel_id: String,
    pub count: usize,
    pub total_count: u64,
    pub capacity: usize,
    pub latest: Option<DateTime<Utc>>,
}

/// Ring of the most recent exceptions of one pipeline
///
/// The total counter keeps counting evicted and cleared entries.
#[derive(Debug)]
pub struct ExceptionPool {
    channel_id: String,
    capacity: usize,
    entries: Mutex<VecDeque<PipelineException>>,
    total: AtomicU64,
}

impl ExceptionPool {
    /// Capacity is clamped to at least one entry
    pub fn new(channel_id: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            channel_id: channel_id.into(),
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            total: AtomicU64::new(0),
        }
    }

    pub fn record(
        &self,
        source_type: impl Into<String>,
        source_description: impl Into<String>,
        error: &dyn Display,
    ) {
        let exception = PipelineException {
            timestamp: Utc::now(),
            source_type: source_type.into(),
            source_description: source_description.into(),
            message: error.to_string(),
        };

        let mut entries = self.entries.lock();
        entries.push_back(exception);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn total_count(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Up to `count` entries, newest first
    pub fn recent(&self, count: usize) -> Vec<PipelineException> {
        self.entries.lock().iter().rev().take(count).cloned().collect()
    }

    /// Every retained entry, newest first
    pub fn all(&self) -> Vec<PipelineException> {
        self.recent(self.capacity)
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn summary(&self) -> ExceptionSummary {
        let entries = self.entries.lock();
        ExceptionSummary {
            channel_id: self.channel_id.clone(),
            count: entries.len(),
            total_count: self.total.load(Ordering::Relaxed),
            capacity: self.capacity,
            latest: entries.back().map(|e| e.timestamp),
        }
    }
}
