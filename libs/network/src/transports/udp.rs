//! UDP transport core
//!
//! Binds one datagram socket at init and runs a receive loop on a background
//! task until disposed. Every datagram becomes a `Bytes` envelope tagged with
//! the sender's [`PeerAddr`].

use async_trait::async_trait;
use channel::{ChannelError, CommunicationCore, ConnectionDirection, CoreLink, PipeLink, TransportError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use types::{DataContext, Payload};

/// Largest payload a single UDP datagram can carry
pub const MAX_DATAGRAM_SIZE: usize = 65507;

/// Pause after the first failed receive, doubled per consecutive failure
const RECV_RETRY_MIN: Duration = Duration::from_millis(10);
const RECV_RETRY_MAX: Duration = Duration::from_secs(1);

fn next_retry(current: Duration) -> Duration {
    (current * 2).min(RECV_RETRY_MAX)
}

/// Sender of an inbound datagram, or destination of an outbound one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerAddr(pub SocketAddr);

/// UDP transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UdpConfig {
    /// Local IP address to bind
    pub host: String,
    pub port: u16,
    /// Destination for outbound envelopes without a [`PeerAddr`]
    pub remote_address: Option<String>,
    /// Receive buffer size
    pub buffer_size: usize,
    pub direction: ConnectionDirection,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 0,
            remote_address: None,
            buffer_size: crate::DEFAULT_UDP_BUFFER_SIZE,
            direction: ConnectionDirection::InputAndOutput,
        }
    }
}

impl UdpConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    pub fn with_remote(mut self, remote: impl Into<String>) -> Self {
        self.remote_address = Some(remote.into());
        self
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, TransportError> {
        let ip: IpAddr = self.host.parse().map_err(|_| {
            TransportError::configuration(format!("invalid UDP host '{}'", self.host), Some("host"))
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }

    pub fn remote_addr(&self) -> Result<Option<SocketAddr>, TransportError> {
        self.remote_address
            .as_deref()
            .map(|remote| {
                remote.parse().map_err(|_| {
                    TransportError::configuration(
                        format!("invalid UDP remote address '{remote}'"),
                        Some("remote_address"),
                    )
                })
            })
            .transpose()
    }
}

struct UdpState {
    socket: Arc<UdpSocket>,
    remote: Option<SocketAddr>,
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

/// Datagram endpoint
pub struct UdpCore {
    config: UdpConfig,
    link: CoreLink,
    state: Mutex<Option<UdpState>>,
    datagrams_sent: AtomicU64,
    datagrams_received: Arc<AtomicU64>,
}

impl UdpCore {
    pub fn new(config: UdpConfig) -> Self {
        Self {
            config,
            link: CoreLink::new(),
            state: Mutex::new(None),
            datagrams_sent: AtomicU64::new(0),
            datagrams_received: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Address actually bound, available after a successful init
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.state
            .lock()
            .as_ref()
            .and_then(|s| s.socket.local_addr().ok())
    }

    pub fn is_bound(&self) -> bool {
        self.state.lock().is_some()
    }
}

#[async_trait]
impl CommunicationCore for UdpCore {
    fn name(&self) -> &str {
        "UdpCore"
    }

    fn metadata(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "udp",
            "host": self.config.host,
            "port": self.config.port,
            "local_addr": self.local_addr().map(|a| a.to_string()),
            "remote_address": self.config.remote_address,
            "direction": self.config.direction,
            "datagrams_sent": self.datagrams_sent.load(Ordering::Relaxed),
            "datagrams_received": self.datagrams_received.load(Ordering::Relaxed),
        })
    }

    fn supported_direction(&self) -> ConnectionDirection {
        ConnectionDirection::InputAndOutput
    }

    fn configured_direction(&self) -> ConnectionDirection {
        self.config.direction
    }

    async fn init(&self, link: PipeLink, _cancel: CancellationToken) -> Result<(), TransportError> {
        let bind = self.config.bind_addr()?;
        let remote = self.config.remote_addr()?;
        let socket = UdpSocket::bind(bind)
            .await
            .map(Arc::new)
            .map_err(|e| TransportError::network(format!("Failed to bind UDP socket on {bind}"), e))?;
        let local = socket
            .local_addr()
            .map_err(|e| TransportError::network("Failed to read UDP socket address", e))?;
        self.link.attach(link.clone());

        let stop = CancellationToken::new();
        let handle = tokio::spawn(receive_loop(
            Arc::clone(&socket),
            self.config.buffer_size.clamp(1, MAX_DATAGRAM_SIZE + 1),
            link,
            Arc::clone(&self.datagrams_received),
            stop.clone(),
        ));
        let previous = self.state.lock().replace(UdpState {
            socket,
            remote,
            stop,
            handle,
        });
        if let Some(previous) = previous {
            previous.stop.cancel();
        }
        info!(local = %local, "UDP transport listening");
        Ok(())
    }

    async fn dispose(&self) -> Result<(), TransportError> {
        let state = self.state.lock().take();
        if let Some(state) = state {
            state.stop.cancel();
            if let Err(e) = state.handle.await {
                warn!(host = %self.config.host, error = %e, "UDP receive task ended abnormally");
            }
        }
        self.link.detach();
        Ok(())
    }

    async fn receive_data(&self, ctx: DataContext) -> Result<(), TransportError> {
        let datagram = ctx.data().to_wire_bytes()?;
        if datagram.len() > MAX_DATAGRAM_SIZE {
            return Err(TransportError::protocol(format!(
                "Datagram size {} exceeds maximum {}",
                datagram.len(),
                MAX_DATAGRAM_SIZE
            )));
        }

        let (socket, default_remote) = {
            let state = self.state.lock();
            let state = state
                .as_ref()
                .ok_or_else(|| TransportError::not_initialized(self.name()))?;
            (Arc::clone(&state.socket), state.remote)
        };
        let target = ctx
            .metadata
            .get::<PeerAddr>()
            .map(|p| p.0)
            .or(default_remote)
            .ok_or_else(|| TransportError::protocol("UDP envelope has no destination address"))?;

        socket
            .send_to(&datagram, target)
            .await
            .map_err(|e| TransportError::network(format!("Failed to send UDP datagram to {target}"), e))?;
        self.datagrams_sent.fetch_add(1, Ordering::Relaxed);
        debug!(peer = %target, bytes = datagram.len(), "Sent UDP datagram");
        Ok(())
    }
}

async fn receive_loop(
    socket: Arc<UdpSocket>,
    buffer_size: usize,
    link: PipeLink,
    received: Arc<AtomicU64>,
    stop: CancellationToken,
) {
    let mut buffer = vec![0u8; buffer_size];
    let mut retry = RECV_RETRY_MIN;
    loop {
        let result = tokio::select! {
            _ = stop.cancelled() => break,
            result = socket.recv_from(&mut buffer) => result,
        };
        let (len, peer) = match result {
            Ok(datagram) => {
                retry = RECV_RETRY_MIN;
                datagram
            }
            Err(e) => {
                warn!(error = %e, retry_ms = retry.as_millis() as u64, "UDP receive failed");
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(retry) => {}
                }
                retry = next_retry(retry);
                continue;
            }
        };
        received.fetch_add(1, Ordering::Relaxed);

        let payload = Payload::Bytes(bytes::Bytes::copy_from_slice(&buffer[..len]));
        let ctx = link.create_data(payload).with_metadata(PeerAddr(peer));
        match link.send_data(ctx).await {
            Ok(()) => {}
            Err(ChannelError::Detached) => break,
            Err(e) => warn!(peer = %peer, error = %e, "Inbound UDP datagram rejected by pipeline"),
        }
    }
    debug!("UDP receive loop stopped");
}
