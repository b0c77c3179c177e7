//! Channel registry
//!
//! Owns every pipeline of a host under its id. Builders are collected while
//! the host is being configured and executed by [`ChannelRegistry::start_build`]
//! once the route table exists. Initialization then runs either sequentially
//! ([`ChannelRegistry::init_all`]) or in a delayed background task
//! ([`ChannelRegistry::spawn_background_init`]) the host can await.

use crate::builder::DataPipelineBuilder;
use crate::error::{ChannelError, Result};
use crate::pipeline::DataPipeline;
use crate::routes::RouteTable;
use crate::settings::ChannelSettings;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Registered channel wrapping one pipeline
#[derive(Debug)]
pub struct DataChannel {
    pipeline: Arc<DataPipeline>,
    registered_at: DateTime<Utc>,
    sequence: u64,
}

impl DataChannel {
    pub fn id(&self) -> &str {
        self.pipeline.id()
    }

    pub fn pipeline(&self) -> &Arc<DataPipeline> {
        &self.pipeline
    }

    pub fn registered_at(&self) -> DateTime<Utc> {
        self.registered_at
    }
}

/// Outcome of a batch initialization
#[derive(Debug, Clone, Default, Serialize)]
pub struct InitReport {
    pub succeeded: Vec<String>,
    /// Channel id and failure reason
    pub failed: Vec<(String, String)>,
    /// Set when the wait gave up before every channel finished
    pub timed_out: bool,
}

impl InitReport {
    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty() && !self.timed_out
    }

    fn record(&mut self, id: String, result: Result<()>) {
        match result {
            Ok(()) => self.succeeded.push(id),
            Err(e) => self.failed.push((id, e.to_string())),
        }
    }
}

/// Handle to a background initialization task
#[derive(Debug)]
pub struct InitHandle {
    task: JoinHandle<InitReport>,
}

impl InitHandle {
    /// Wait for the task, giving up after `timeout`
    ///
    /// The task keeps running in the background when the wait times out.
    pub async fn wait(self, timeout: Duration) -> Result<InitReport> {
        match tokio::time::timeout(timeout, self.task).await {
            Ok(Ok(report)) => Ok(report),
            Ok(Err(join)) => Err(ChannelError::init_failed("*", join.to_string())),
            Err(_) => Err(ChannelError::InitTimeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}

/// Process-wide map from channel id to pipeline
///
/// Duplicate ids are rejected; the first registration stays in place.
#[derive(Default)]
pub struct ChannelRegistry {
    settings: OnceCell<ChannelSettings>,
    channels: DashMap<String, Arc<DataChannel>>,
    sequence: AtomicU64,
    builders: Mutex<Vec<DataPipelineBuilder>>,
}

impl ChannelRegistry {
    /// Registry whose settings fall back to defaults on first access
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: ChannelSettings) -> Self {
        let registry = Self::default();
        let _ = registry.settings.set(settings);
        registry
    }

    /// Settings, installing the fallback console logger if never configured
    pub fn settings(&self) -> &ChannelSettings {
        self.settings.get_or_init(ChannelSettings::fallback)
    }

    /// Queue a builder for [`start_build`](Self::start_build)
    pub fn add_builder(&self, builder: DataPipelineBuilder) {
        self.builders.lock().push(builder);
    }

    pub fn pending_builders(&self) -> usize {
        self.builders.lock().len()
    }

    pub fn register_pipeline(&self, pipeline: Arc<DataPipeline>) -> Result<Arc<DataChannel>> {
        let id = pipeline.id().to_string();
        match self.channels.entry(id.clone()) {
            Entry::Occupied(_) => {
                warn!(channel = %id, "Rejected duplicate channel registration");
                Err(ChannelError::DuplicateChannel(id))
            }
            Entry::Vacant(slot) => {
                let channel = Arc::new(DataChannel {
                    pipeline,
                    registered_at: Utc::now(),
                    sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
                });
                slot.insert(channel.clone());
                info!(channel = %id, "Registered channel");
                Ok(channel)
            }
        }
    }

    pub fn fetch(&self, id: &str) -> Option<Arc<DataChannel>> {
        self.channels.get(id).map(|entry| entry.value().clone())
    }

    /// Every channel, in registration order
    pub fn fetch_all(&self) -> Vec<Arc<DataChannel>> {
        let mut channels: Vec<_> = self.channels.iter().map(|e| e.value().clone()).collect();
        channels.sort_by_key(|c| c.sequence);
        channels
    }

    pub fn fetch_group(&self, group_id: &str) -> Vec<Arc<DataChannel>> {
        self.fetch_all()
            .into_iter()
            .filter(|c| c.pipeline.group_id() == Some(group_id))
            .collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.fetch_all().iter().map(|c| c.id().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Execute queued builders and let their components register routes
    ///
    /// Stops at the first builder that fails; pipelines built before it stay
    /// registered. A rejected pipeline leaves no routes behind.
    pub fn start_build(&self, routes: &mut RouteTable) -> Result<Vec<String>> {
        let builders: Vec<_> = std::mem::take(&mut *self.builders.lock());
        let mut built = Vec::with_capacity(builders.len());
        for builder in builders {
            let id = builder.id().to_string();
            if self.channels.contains_key(&id) {
                warn!(channel = %id, "Rejected duplicate channel registration");
                return Err(ChannelError::DuplicateChannel(id));
            }
            let pipeline = builder.build_with(self.settings()).map_err(|e| {
                error!(channel = %id, error = %e, "Failed to build pipeline");
                e
            })?;

            let mut claimed = RouteTable::new();
            pipeline.configure_host(&mut claimed)?;
            routes.check_disjoint(&claimed)?;
            self.register_pipeline(pipeline)?;
            routes.merge(claimed)?;
            built.push(id);
        }
        info!(channels = built.len(), routes = routes.len(), "Channel build finished");
        Ok(built)
    }

    /// Snapshot of an initialization the caller stopped waiting for
    ///
    /// Initialized channels count as succeeded; every other channel is
    /// reported failed with `reason`.
    pub fn timed_out_report(&self, reason: &str) -> InitReport {
        let mut report = InitReport {
            timed_out: true,
            ..InitReport::default()
        };
        for channel in self.fetch_all() {
            let id = channel.id().to_string();
            if channel.pipeline.is_initialized() {
                report.succeeded.push(id);
            } else {
                report.failed.push((id, reason.to_string()));
            }
        }
        report
    }

    /// Dispose then init one channel
    pub async fn re_initialize(&self, id: &str) -> Result<()> {
        let channel = self
            .fetch(id)
            .ok_or_else(|| ChannelError::ChannelNotFound(id.to_string()))?;
        channel
            .pipeline
            .re_initialize(&CancellationToken::new())
            .await
            .map_err(|e| {
                error!(channel = %id, error = %e, "Channel re-initialization failed");
                e
            })
    }

    /// Initialize every channel one after another, continuing past failures
    pub async fn init_all(&self, cancel: &CancellationToken) -> InitReport {
        let mut report = InitReport::default();
        for channel in self.fetch_all() {
            let id = channel.id().to_string();
            let result = channel.pipeline.init(cancel).await;
            if let Err(e) = &result {
                error!(channel = %id, error = %e, "Channel initialization failed");
            }
            report.record(id, result);
        }
        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "Sequential channel initialization finished"
        );
        report
    }

    /// Initialize every channel with at most `concurrency` in flight
    pub async fn init_all_concurrent(
        &self,
        concurrency: usize,
        cancel: &CancellationToken,
    ) -> InitReport {
        let results: Vec<(String, Result<()>)> = stream::iter(self.fetch_all())
            .map(|channel| {
                let cancel = cancel.clone();
                async move {
                    let id = channel.id().to_string();
                    let result = channel.pipeline.init(&cancel).await;
                    if let Err(e) = &result {
                        error!(channel = %id, error = %e, "Channel initialization failed");
                    }
                    (id, result)
                }
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        let mut report = InitReport::default();
        for (id, result) in results {
            report.record(id, result);
        }
        report
    }

    /// Start initialization after `delay` on a background task
    pub fn spawn_background_init(
        self: &Arc<Self>,
        delay: Duration,
        concurrency: usize,
        cancel: CancellationToken,
    ) -> InitHandle {
        let registry = Arc::clone(self);
        let task = tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    warn!("Background channel initialization cancelled before start");
                    let mut report = InitReport::default();
                    for id in registry.ids() {
                        report.failed.push((id, "initialization cancelled".to_string()));
                    }
                    return report;
                }
                _ = tokio::time::sleep(delay) => {}
            }
            let report = registry.init_all_concurrent(concurrency, &cancel).await;
            info!(
                succeeded = report.succeeded.len(),
                failed = report.failed.len(),
                "Background channel initialization finished"
            );
            report
        });
        InitHandle { task }
    }

    /// Dispose every channel; failures are logged by the pipelines
    pub async fn dispose_all(&self) {
        for channel in self.fetch_all() {
            channel.pipeline.dispose().await;
        }
        info!(channels = self.len(), "Disposed all channels");
    }
}

impl std::fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("channels", &self.ids())
            .field("pending_builders", &self.pending_builders())
            .finish()
    }
}
