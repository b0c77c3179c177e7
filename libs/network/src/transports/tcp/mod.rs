//! TCP transport cores
//!
//! Shared connection plumbing for the client and server cores: a framed
//! writer serialized behind an async mutex, an idle heartbeat and the read
//! loop that turns frames into envelopes.

use super::framing::{FrameCodec, Framing, DEFAULT_MAX_FRAME_LEN};
use bytes::Bytes;
use channel::{ChannelError, PipeLink, TransportError};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub mod client;
pub mod server;

pub use client::{TcpClientConfig, TcpClientCore};
pub use server::{TcpServerConfig, TcpServerCore};

/// Remote peer an envelope came from, or should be sent to
///
/// Set by the server core on inbound envelopes; outbound envelopes carrying
/// it are written to that peer only.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerName(pub String);

/// Stream settings shared by both TCP cores
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    pub framing: Framing,
    pub max_frame_len: usize,
    /// Idle time after which a heartbeat frame is written; 0 disables it
    pub heartbeat_interval_ms: u64,
    pub heartbeat_payload: String,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            framing: Framing::Lines,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            heartbeat_interval_ms: 0,
            heartbeat_payload: "heartbeat".to_string(),
        }
    }
}

impl StreamSettings {
    pub(crate) fn codec(&self) -> FrameCodec {
        FrameCodec::new(self.framing, self.max_frame_len)
    }

    pub(crate) fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_ms > 0).then(|| Duration::from_millis(self.heartbeat_interval_ms))
    }
}

/// Write side of one TCP connection
pub(crate) struct PeerConnection {
    name: String,
    writer: Mutex<FramedWrite<OwnedWriteHalf, FrameCodec>>,
    last_send: parking_lot::Mutex<Instant>,
    connected_at: DateTime<Utc>,
    frames_sent: AtomicU64,
}

impl PeerConnection {
    pub(crate) fn new(name: String, write: OwnedWriteHalf, codec: FrameCodec) -> Self {
        Self {
            name,
            writer: Mutex::new(FramedWrite::new(write, codec)),
            last_send: parking_lot::Mutex::new(Instant::now()),
            connected_at: Utc::now(),
            frames_sent: AtomicU64::new(0),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Write one frame; concurrent callers are serialized
    pub(crate) async fn send(&self, frame: Bytes) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        writer.send(frame).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::InvalidInput => {
                TransportError::protocol(format!("Cannot frame envelope for {}: {e}", self.name))
            }
            _ => TransportError::network(format!("Failed to write to {}", self.name), e),
        })?;
        *self.last_send.lock() = Instant::now();
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub(crate) fn idle_for(&self) -> Duration {
        self.last_send.lock().elapsed()
    }

    /// Flush and shut down the write half
    pub(crate) async fn close(&self) {
        if let Err(e) = self.writer.lock().await.close().await {
            debug!(peer = %self.name, error = %e, "Error shutting down TCP connection");
        }
    }

    pub(crate) fn stats(&self) -> serde_json::Value {
        serde_json::json!({
            "peer": self.name,
            "connected_at": self.connected_at.to_rfc3339(),
            "frames_sent": self.frames_sent.load(Ordering::Relaxed),
        })
    }
}

/// Write `payload` whenever the connection was idle for `interval`
pub(crate) fn spawn_heartbeat(
    peer: Arc<PeerConnection>,
    interval: Duration,
    payload: Bytes,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval / 2);
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if peer.idle_for() < interval {
                continue;
            }
            if let Err(e) = peer.send(payload.clone()).await {
                warn!(peer = %peer.name(), error = %e, "Heartbeat failed");
                break;
            }
            debug!(peer = %peer.name(), "Sent heartbeat");
        }
    })
}

/// Push every frame read from `read` into the pipeline until the stream ends
///
/// Pipeline failures are logged and the loop continues; the pipeline has
/// already recorded them. Returns once the peer closes, `stop` fires or the
/// pipeline is gone.
pub(crate) async fn read_frames(
    read: OwnedReadHalf,
    codec: FrameCodec,
    link: PipeLink,
    peer: Option<PeerName>,
    frames_received: &AtomicU64,
    stop: CancellationToken,
) -> std::io::Result<()> {
    let mut frames = FramedRead::new(read, codec);
    loop {
        let frame = tokio::select! {
            _ = stop.cancelled() => return Ok(()),
            frame = frames.next() => frame,
        };
        let payload = match frame {
            Some(Ok(payload)) => payload,
            Some(Err(e)) => return Err(e),
            None => return Ok(()),
        };
        frames_received.fetch_add(1, Ordering::Relaxed);

        let mut ctx = link.create_data(payload);
        if let Some(peer) = &peer {
            ctx.metadata.insert(peer.clone());
        }
        match link.send_data(ctx).await {
            Ok(()) => {}
            Err(ChannelError::Detached) => return Ok(()),
            Err(e) => warn!(error = %e, "Inbound TCP frame rejected by pipeline"),
        }
    }
}
