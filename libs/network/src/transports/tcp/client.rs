//! TCP client core
//!
//! Connects to a remote address from a background task and reconnects after
//! every disconnect until disposed. Outbound envelopes are written to the
//! current connection; inbound frames become envelopes from the outer side.

use super::{read_frames, spawn_heartbeat, PeerConnection, StreamSettings};
use async_trait::async_trait;
use bytes::Bytes;
use channel::{CommunicationCore, ConnectionDirection, CoreLink, PipeLink, TransportError};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use types::DataContext;

/// TCP client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpClientConfig {
    /// Remote `host:port`
    pub address: String,
    pub connect_timeout_ms: u64,
    /// Pause between a disconnect (or failed attempt) and the next attempt
    pub reconnect_interval_ms: u64,
    #[serde(flatten)]
    pub stream: StreamSettings,
    pub direction: ConnectionDirection,
}

impl Default for TcpClientConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            connect_timeout_ms: crate::DEFAULT_CONNECT_TIMEOUT_MS,
            reconnect_interval_ms: 2000,
            stream: StreamSettings::default(),
            direction: ConnectionDirection::InputAndOutput,
        }
    }
}

impl TcpClientConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Default::default()
        }
    }

    /// Reject addresses that can never connect
    pub fn validate(&self) -> Result<(), TransportError> {
        let valid = self
            .address
            .rsplit_once(':')
            .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
        if valid {
            Ok(())
        } else {
            Err(TransportError::configuration(
                format!("invalid TCP address '{}', expected host:port", self.address),
                Some("address"),
            ))
        }
    }
}

struct ClientTask {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

/// Reconnecting TCP client endpoint
pub struct TcpClientCore {
    config: TcpClientConfig,
    link: CoreLink,
    connection: Arc<RwLock<Option<Arc<PeerConnection>>>>,
    task: Mutex<Option<ClientTask>>,
    connects: Arc<AtomicU64>,
    frames_received: Arc<AtomicU64>,
}

impl TcpClientCore {
    pub fn new(config: TcpClientConfig) -> Self {
        Self {
            config,
            link: CoreLink::new(),
            connection: Arc::new(RwLock::new(None)),
            task: Mutex::new(None),
            connects: Arc::new(AtomicU64::new(0)),
            frames_received: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn config(&self) -> &TcpClientConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.connection.read().is_some()
    }

    /// Wait until a connection is established, up to `timeout`
    pub async fn wait_connected(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.is_connected() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.is_connected()
    }

    fn current(&self) -> Option<Arc<PeerConnection>> {
        self.connection.read().clone()
    }
}

#[async_trait]
impl CommunicationCore for TcpClientCore {
    fn name(&self) -> &str {
        "TcpClientCore"
    }

    fn metadata(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "tcp_client",
            "address": self.config.address,
            "framing": self.config.stream.framing,
            "direction": self.config.direction,
            "connected": self.is_connected(),
            "connection": self.current().map(|c| c.stats()),
            "connects": self.connects.load(Ordering::Relaxed),
            "frames_received": self.frames_received.load(Ordering::Relaxed),
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
        self.link.attach(link.clone());

        let stop = CancellationToken::new();
        let handle = tokio::spawn(connect_loop(
            self.config.clone(),
            link,
            Arc::clone(&self.connection),
            Arc::clone(&self.connects),
            Arc::clone(&self.frames_received),
            stop.clone(),
        ));
        if let Some(previous) = self.task.lock().replace(ClientTask { stop, handle }) {
            previous.stop.cancel();
        }
        info!(address = %self.config.address, "TCP client started");
        Ok(())
    }

    async fn dispose(&self) -> Result<(), TransportError> {
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.stop.cancel();
            if let Err(e) = task.handle.await {
                warn!(address = %self.config.address, error = %e, "TCP client task ended abnormally");
            }
        }
        let connection = self.connection.write().take();
        if let Some(connection) = connection {
            connection.close().await;
        }
        self.link.detach();
        Ok(())
    }

    async fn receive_data(&self, ctx: DataContext) -> Result<(), TransportError> {
        let frame: Bytes = ctx.data().to_wire_bytes()?;
        let connection = self.current().ok_or_else(|| {
            TransportError::Closed(format!("not connected to {}", self.config.address))
        })?;
        connection.send(frame).await
    }
}

async fn connect_loop(
    config: TcpClientConfig,
    link: PipeLink,
    slot: Arc<RwLock<Option<Arc<PeerConnection>>>>,
    connects: Arc<AtomicU64>,
    frames_received: Arc<AtomicU64>,
    stop: CancellationToken,
) {
    let connect_timeout = Duration::from_millis(config.connect_timeout_ms);
    let reconnect_interval = Duration::from_millis(config.reconnect_interval_ms);

    while !stop.is_cancelled() {
        let attempt = tokio::select! {
            _ = stop.cancelled() => break,
            attempt = tokio::time::timeout(connect_timeout, TcpStream::connect(&config.address)) => attempt,
        };
        match attempt {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    warn!("Failed to set TCP_NODELAY: {}", e);
                }
                let peer = stream
                    .peer_addr()
                    .map(|a| a.to_string())
                    .unwrap_or_else(|_| config.address.clone());
                let (read, write) = stream.into_split();
                let connection = Arc::new(PeerConnection::new(peer.clone(), write, config.stream.codec()));
                *slot.write() = Some(Arc::clone(&connection));
                connects.fetch_add(1, Ordering::Relaxed);
                info!(peer = %peer, "Connected to TCP peer");

                let session = stop.child_token();
                let heartbeat = config.stream.heartbeat_interval().map(|interval| {
                    spawn_heartbeat(
                        Arc::clone(&connection),
                        interval,
                        Bytes::from(config.stream.heartbeat_payload.clone()),
                        session.clone(),
                    )
                });

                let result = read_frames(
                    read,
                    config.stream.codec(),
                    link.clone(),
                    None,
                    &frames_received,
                    session.clone(),
                )
                .await;
                session.cancel();
                if let Some(heartbeat) = heartbeat {
                    let _ = heartbeat.await;
                }
                slot.write().take();
                connection.close().await;

                match result {
                    Ok(()) => info!(peer = %peer, "TCP connection closed"),
                    Err(e) => warn!(peer = %peer, error = %e, "TCP connection failed"),
                }
                if !link.is_attached() {
                    break;
                }
            }
            Ok(Err(e)) => warn!(address = %config.address, error = %e, "Failed to connect to TCP peer"),
            Err(_) => warn!(
                address = %config.address,
                timeout_ms = config.connect_timeout_ms,
                "TCP connect timed out"
            ),
        }

        tokio::select! {
            _ = stop.cancelled() => break,
            _ = tokio::time::sleep(reconnect_interval) => {}
        }
        debug!(address = %config.address, "Reconnecting to TCP peer");
    }
}
