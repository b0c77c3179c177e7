//! Channel host lifecycle
//!
//! Build every configured pipeline, serve the management surface, initialize
//! channels, then dispose everything once the shutdown signal fires.

use crate::config::HostConfig;
use crate::error::{HostError, Result};
use crate::server::ManagementServer;
use crate::service::ManagementService;
use channel::{ChannelRegistry, InitReport, RouteTable};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Hosts the channels of one [`HostConfig`]
pub struct ChannelHost {
    config: HostConfig,
    registry: Arc<ChannelRegistry>,
    routes: Arc<RouteTable>,
}

impl ChannelHost {
    /// Build every configured channel and collect their webhook routes
    pub fn build(config: HostConfig) -> Result<Self> {
        let registry = Arc::new(ChannelRegistry::with_settings(config.channel_settings()));
        for channel in &config.channels {
            registry.add_builder(channel.builder());
        }

        let mut routes = RouteTable::new();
        let built = registry.start_build(&mut routes)?;
        info!(channels = built.len(), routes = routes.len(), "Channel host built");

        Ok(Self {
            config,
            registry,
            routes: Arc::new(routes),
        })
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    pub fn routes(&self) -> &Arc<RouteTable> {
        &self.routes
    }

    pub fn server(&self) -> ManagementServer {
        ManagementServer::new(ManagementService::new(self.registry.clone()), self.routes.clone())
    }

    /// Initialize channels as configured
    ///
    /// Background initialization that outlives the configured timeout keeps
    /// running; the host only stops waiting for it.
    pub async fn initialize(&self, cancel: &CancellationToken) -> InitReport {
        let settings = self.registry.settings();
        if self.config.sequential_init {
            return self.registry.init_all(cancel).await;
        }

        let handle = self.registry.spawn_background_init(
            settings.init_delay(),
            settings.init_concurrency,
            cancel.clone(),
        );
        let waited = handle.wait(settings.init_delay() + settings.init_timeout()).await;
        self.report_of(waited)
    }

    fn report_of(&self, waited: channel::Result<InitReport>) -> InitReport {
        match waited {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "Channel initialization did not finish in time");
                self.registry.timed_out_report(&e.to_string())
            }
        }
    }

    /// Serve and initialize until `shutdown` resolves, then dispose every channel
    pub async fn run(self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        let addr = self
            .config
            .socket_addr()
            .map_err(|e| HostError::configuration(format!("{e:#}")))?;
        self.run_on(addr, shutdown).await
    }

    /// Like [`run`](Self::run) on an explicit address
    pub async fn run_on(
        self,
        addr: SocketAddr,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let cancel = CancellationToken::new();
        let stop = cancel.clone();
        let (bound, server) = self.server().spawn(addr, async move {
            shutdown.await;
            stop.cancel();
        })?;
        info!(address = %bound, "Channel host serving");

        let report = self.initialize(&cancel).await;
        if report.is_complete_success() {
            info!(channels = report.succeeded.len(), "All channels initialized");
        } else {
            if report.timed_out {
                warn!(
                    succeeded = report.succeeded.len(),
                    pending = report.failed.len(),
                    "Serving before channel initialization finished"
                );
            }
            for (id, reason) in &report.failed {
                error!(channel = %id, reason = %reason, "Channel unavailable after startup");
            }
        }

        if let Err(e) = server.await {
            error!(error = %e, "Management server task failed");
        }
        cancel.cancel();
        self.registry.dispose_all().await;
        info!("Channel host stopped");
        Ok(())
    }
}

impl std::fmt::Debug for ChannelHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelHost")
            .field("registry", &self.registry)
            .field("routes", &self.routes)
            .finish()
    }
}
