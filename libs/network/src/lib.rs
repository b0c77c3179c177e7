//! Network Transports
//!
//! Transport cores that connect data channel pipelines to the outside world:
//! TCP client and server, UDP, and sidecar pub/sub bindings. Endpoints are
//! usually built from an [`EndpointConfig`] through [`EndpointFactory`].

pub mod transports;

// Re-export commonly used types
pub use transports::{
    BindingConfig, BindingCore, DefaultConfig, EndpointConfig, EndpointFactory, FrameCodec, Framing,
    PeerAddr, PeerName, StreamSettings, TcpClientConfig, TcpClientCore, TcpServerConfig,
    TcpServerCore, UdpConfig, UdpCore,
};

// Constants for configuration
pub const DEFAULT_UDP_BUFFER_SIZE: usize = 64 * 1024; // 64KB
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;
