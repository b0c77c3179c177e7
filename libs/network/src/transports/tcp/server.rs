//! TCP server core
//!
//! Binds a listener at init and accepts peers from a background task. Each
//! peer gets its own read loop; inbound envelopes carry the peer's
//! [`PeerName`]. Outbound envelopes go to the named peer, or to every
//! connected peer when no name is set.

use super::{read_frames, spawn_heartbeat, PeerConnection, PeerName, StreamSettings};
use async_trait::async_trait;
use bytes::Bytes;
use channel::{CommunicationCore, ConnectionDirection, CoreLink, PipeLink, TransportError};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use types::DataContext;

/// TCP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpServerConfig {
    /// Local `ip:port` to listen on
    pub bind_address: String,
    #[serde(flatten)]
    pub stream: StreamSettings,
    pub direction: ConnectionDirection,
}

impl Default for TcpServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:0".to_string(),
            stream: StreamSettings::default(),
            direction: ConnectionDirection::InputAndOutput,
        }
    }
}

impl TcpServerConfig {
    pub fn new(bind_address: impl Into<String>) -> Self {
        Self {
            bind_address: bind_address.into(),
            ..Default::default()
        }
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, TransportError> {
        self.bind_address.parse().map_err(|_| {
            TransportError::configuration(
                format!("invalid bind address '{}', expected ip:port", self.bind_address),
                Some("bind_address"),
            )
        })
    }
}

type PeerMap = DashMap<String, Arc<PeerConnection>>;

struct AcceptTask {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

/// Multi-peer TCP server endpoint
pub struct TcpServerCore {
    config: TcpServerConfig,
    link: CoreLink,
    peers: Arc<PeerMap>,
    local_addr: RwLock<Option<SocketAddr>>,
    task: Mutex<Option<AcceptTask>>,
    accepted: Arc<AtomicU64>,
    frames_received: Arc<AtomicU64>,
}

impl TcpServerCore {
    pub fn new(config: TcpServerConfig) -> Self {
        Self {
            config,
            link: CoreLink::new(),
            peers: Arc::new(DashMap::new()),
            local_addr: RwLock::new(None),
            task: Mutex::new(None),
            accepted: Arc::new(AtomicU64::new(0)),
            frames_received: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Address actually bound, available after a successful init
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.read()
    }

    /// Names of the currently connected peers
    pub fn peers(&self) -> Vec<String> {
        let mut names: Vec<_> = self.peers.iter().map(|p| p.key().clone()).collect();
        names.sort();
        names
    }

    /// Write to every connected peer; fails when there is nobody to write to
    async fn broadcast(&self, frame: Bytes) -> Result<(), TransportError> {
        if self.local_addr().is_none() {
            return Err(TransportError::not_initialized(self.name()));
        }
        let peers: Vec<_> = self.peers.iter().map(|p| Arc::clone(p.value())).collect();
        if peers.is_empty() {
            debug!(bind = %self.config.bind_address, "No TCP peers connected, frame dropped");
            return Err(TransportError::Closed(format!(
                "no TCP peers connected to {}",
                self.config.bind_address
            )));
        }
        for peer in peers {
            match peer.send(frame.clone()).await {
                Ok(()) => {}
                Err(e @ TransportError::Protocol { .. }) => return Err(e),
                Err(e) => {
                    warn!(peer = %peer.name(), error = %e, "Dropping unreachable TCP peer");
                    self.peers.remove(peer.name());
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CommunicationCore for TcpServerCore {
    fn name(&self) -> &str {
        "TcpServerCore"
    }

    fn metadata(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "tcp_server",
            "bind_address": self.config.bind_address,
            "local_addr": self.local_addr().map(|a| a.to_string()),
            "framing": self.config.stream.framing,
            "direction": self.config.direction,
            "peers": self.peers.iter().map(|p| p.value().stats()).collect::<Vec<_>>(),
            "accepted": self.accepted.load(Ordering::Relaxed),
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
        let addr = self.config.socket_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::network(format!("Failed to bind TCP listener on {addr}"), e))?;
        let local = listener
            .local_addr()
            .map_err(|e| TransportError::network("Failed to read listener address", e))?;
        *self.local_addr.write() = Some(local);
        self.link.attach(link.clone());

        let stop = CancellationToken::new();
        let handle = tokio::spawn(accept_loop(
            listener,
            self.config.stream.clone(),
            link,
            Arc::clone(&self.peers),
            Arc::clone(&self.accepted),
            Arc::clone(&self.frames_received),
            stop.clone(),
        ));
        if let Some(previous) = self.task.lock().replace(AcceptTask { stop, handle }) {
            previous.stop.cancel();
        }
        info!(local = %local, "TCP server listening");
        Ok(())
    }

    async fn dispose(&self) -> Result<(), TransportError> {
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.stop.cancel();
            if let Err(e) = task.handle.await {
                warn!(bind = %self.config.bind_address, error = %e, "TCP accept task ended abnormally");
            }
        }
        let peers: Vec<_> = self.peers.iter().map(|p| Arc::clone(p.value())).collect();
        self.peers.clear();
        for peer in peers {
            peer.close().await;
        }
        self.local_addr.write().take();
        self.link.detach();
        Ok(())
    }

    async fn receive_data(&self, ctx: DataContext) -> Result<(), TransportError> {
        let frame = ctx.data().to_wire_bytes()?;
        match ctx.metadata.get::<PeerName>() {
            Some(PeerName(name)) => {
                let peer = self
                    .peers
                    .get(name)
                    .map(|p| Arc::clone(p.value()))
                    .ok_or_else(|| TransportError::Closed(format!("TCP peer {name} is not connected")))?;
                peer.send(frame).await
            }
            None => self.broadcast(frame).await,
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    settings: StreamSettings,
    link: PipeLink,
    peers: Arc<PeerMap>,
    accepted: Arc<AtomicU64>,
    frames_received: Arc<AtomicU64>,
    stop: CancellationToken,
) {
    let mut sessions = Vec::new();
    loop {
        let accept = tokio::select! {
            _ = stop.cancelled() => break,
            accept = listener.accept() => accept,
        };
        match accept {
            Ok((stream, addr)) => {
                accepted.fetch_add(1, Ordering::Relaxed);
                info!(peer = %addr, "Accepted TCP connection");
                sessions.retain(|s: &JoinHandle<()>| !s.is_finished());
                sessions.push(tokio::spawn(serve_peer(
                    stream,
                    addr,
                    settings.clone(),
                    link.clone(),
                    Arc::clone(&peers),
                    Arc::clone(&frames_received),
                    stop.child_token(),
                )));
            }
            Err(e) => warn!(error = %e, "Failed to accept TCP connection"),
        }
    }
    for session in sessions {
        let _ = session.await;
    }
}

async fn serve_peer(
    stream: TcpStream,
    addr: SocketAddr,
    settings: StreamSettings,
    link: PipeLink,
    peers: Arc<PeerMap>,
    frames_received: Arc<AtomicU64>,
    stop: CancellationToken,
) {
    if let Err(e) = stream.set_nodelay(true) {
        warn!("Failed to set TCP_NODELAY: {}", e);
    }
    let name = addr.to_string();
    let (read, write) = stream.into_split();
    let connection = Arc::new(PeerConnection::new(name.clone(), write, settings.codec()));
    peers.insert(name.clone(), Arc::clone(&connection));

    let heartbeat = settings.heartbeat_interval().map(|interval| {
        spawn_heartbeat(
            Arc::clone(&connection),
            interval,
            Bytes::from(settings.heartbeat_payload.clone()),
            stop.clone(),
        )
    });

    let result = read_frames(
        read,
        settings.codec(),
        link,
        Some(PeerName(name.clone())),
        &frames_received,
        stop.clone(),
    )
    .await;
    stop.cancel();
    if let Some(heartbeat) = heartbeat {
        let _ = heartbeat.await;
    }
    peers.remove(&name);
    connection.close().await;

    match result {
        Ok(()) => info!(peer = %name, "TCP peer disconnected"),
        Err(e) => warn!(peer = %name, error = %e, "TCP peer connection failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use channel::{DataPipelineBuilder, DefaultCore};
    use std::collections::HashSet;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use types::{DataOperation, DataSource};

    async fn wait_for_peers(server: &TcpServerCore, count: usize) {
        for _ in 0..200 {
            if server.peers().len() == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {count} peers, found {:?}", server.peers());
    }

    #[tokio::test]
    async fn test_invalid_bind_address_fails_init() {
        let server = Arc::new(TcpServerCore::new(TcpServerConfig::new("not-an-ip:80")));
        let pipeline = DataPipelineBuilder::new("bad-tcp")
            .outer(server.clone())
            .build()
            .unwrap();
        assert!(pipeline.init(&CancellationToken::new()).await.is_err());
        assert!(pipeline.is_not_available());
        assert!(server.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_routes_by_peer_and_broadcasts() {
        let (inner, mut inbound) = DefaultCore::with_channel();
        let inner = Arc::new(inner);
        let server = Arc::new(TcpServerCore::new(TcpServerConfig::new("127.0.0.1:0")));
        let pipeline = DataPipelineBuilder::new("tcp-server")
            .inner(inner.clone())
            .outer(server.clone())
            .build()
            .unwrap();
        pipeline.init(&CancellationToken::new()).await.unwrap();
        let addr = server.local_addr().unwrap();

        let (a_read, mut a_write) = TcpStream::connect(addr).await.unwrap().into_split();
        let (b_read, _b_write) = TcpStream::connect(addr).await.unwrap().into_split();
        let mut a_lines = BufReader::new(a_read).lines();
        let mut b_lines = BufReader::new(b_read).lines();
        wait_for_peers(&server, 2).await;

        a_write.write_all(b"ping\n").await.unwrap();
        let request = inbound.recv().await.unwrap();
        assert_eq!(request.data().as_text(), Some("ping"));
        let peer = request.metadata.get::<PeerName>().cloned().unwrap();

        let reply = DataContext::from_side(DataSource::Inner, DataOperation::Response, "pong")
            .with_metadata(peer);
        inner.send_context(reply).await.unwrap();
        assert_eq!(a_lines.next_line().await.unwrap().as_deref(), Some("pong"));

        inner.send("all").await.unwrap();
        assert_eq!(a_lines.next_line().await.unwrap().as_deref(), Some("all"));
        assert_eq!(b_lines.next_line().await.unwrap().as_deref(), Some("all"));

        pipeline.dispose().await;
        assert!(server.peers().is_empty());
        assert_eq!(b_lines.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_broadcast_without_peers_is_an_error() {
        let server = Arc::new(TcpServerCore::new(TcpServerConfig::new("127.0.0.1:0")));
        let ctx = DataContext::from_side(DataSource::Inner, DataOperation::Publish, "x");
        let err = server.receive_data(ctx.clone()).await.unwrap_err();
        assert!(matches!(err, TransportError::NotInitialized { .. }));

        let pipeline = DataPipelineBuilder::new("lonely-server")
            .outer(server.clone())
            .build()
            .unwrap();
        pipeline.init(&CancellationToken::new()).await.unwrap();
        let err = server.receive_data(ctx).await.unwrap_err();
        assert!(matches!(err, TransportError::Closed(_)));
        pipeline.dispose().await;
    }

    #[tokio::test]
    async fn test_concurrent_sends_arrive_intact() {
        let (inner, _inbound) = DefaultCore::with_channel();
        let inner = Arc::new(inner);
        let server = Arc::new(TcpServerCore::new(TcpServerConfig::new("127.0.0.1:0")));
        let pipeline = DataPipelineBuilder::new("tcp-fanin")
            .inner(inner.clone())
            .outer(server.clone())
            .build()
            .unwrap();
        pipeline.init(&CancellationToken::new()).await.unwrap();

        let stream = TcpStream::connect(server.local_addr().unwrap()).await.unwrap();
        let mut lines = BufReader::new(stream).lines();
        wait_for_peers(&server, 1).await;

        let expected: HashSet<String> = (0..64).map(|i| format!("{i:03}-{}", "x".repeat(512))).collect();
        let sends = expected.iter().map(|text| {
            let inner = inner.clone();
            let text = text.clone();
            tokio::spawn(async move { inner.send(text).await })
        });
        for result in futures::future::join_all(sends).await {
            result.unwrap().unwrap();
        }

        let mut received = HashSet::new();
        for _ in 0..expected.len() {
            let line = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            received.insert(line);
        }
        assert_eq!(received, expected);

        let err = inner.send("two\nlines").await.unwrap_err();
        assert!(err.to_string().contains("embedded newline"), "{err}");
        assert_eq!(server.peers().len(), 1);
        pipeline.dispose().await;
    }

    #[tokio::test]
    async fn test_unknown_peer_is_an_error() {
        let server = TcpServerCore::new(TcpServerConfig::new("127.0.0.1:0"));
        let ctx = DataContext::from_side(DataSource::Inner, DataOperation::Custom, "x")
            .with_metadata(PeerName("10.0.0.1:1".into()));
        let err = server.receive_data(ctx).await.unwrap_err();
        assert!(matches!(err, TransportError::Closed(_)));
    }
}
