//! Transport cores
//!
//! Concrete [`CommunicationCore`] adapters and the config-driven factory that
//! builds them.

use channel::{CommunicationCore, ConnectionDirection, DefaultCore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub mod binding;
pub mod framing;
pub mod tcp;
pub mod udp;

// Re-export transport types
pub use binding::{BindingConfig, BindingCore};
pub use framing::{FrameCodec, Framing};
pub use tcp::{PeerName, StreamSettings, TcpClientConfig, TcpClientCore, TcpServerConfig, TcpServerCore};
pub use udp::{PeerAddr, UdpConfig, UdpCore};

/// Default core configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultConfig {
    pub direction: ConnectionDirection,
}

/// Endpoint configuration enum
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EndpointConfig {
    /// Manual core driven by application code
    Default(DefaultConfig),
    TcpClient(TcpClientConfig),
    TcpServer(TcpServerConfig),
    Udp(UdpConfig),
    Binding(BindingConfig),
}

impl Default for EndpointConfig {
    fn default() -> Self {
        EndpointConfig::Default(DefaultConfig::default())
    }
}

impl EndpointConfig {
    /// Configuration tag, as written in config files
    pub fn kind(&self) -> &'static str {
        match self {
            EndpointConfig::Default(_) => "default",
            EndpointConfig::TcpClient(_) => "tcp_client",
            EndpointConfig::TcpServer(_) => "tcp_server",
            EndpointConfig::Udp(_) => "udp",
            EndpointConfig::Binding(_) => "binding",
        }
    }

    pub fn direction(&self) -> ConnectionDirection {
        match self {
            EndpointConfig::Default(c) => c.direction,
            EndpointConfig::TcpClient(c) => c.direction,
            EndpointConfig::TcpServer(c) => c.direction,
            EndpointConfig::Udp(c) => c.direction,
            EndpointConfig::Binding(c) => c.direction,
        }
    }
}

/// Endpoint factory for creating cores from configuration
///
/// Construction never touches the network; address problems surface when
/// the owning pipeline initializes.
pub struct EndpointFactory;

impl EndpointFactory {
    pub fn create(config: EndpointConfig) -> Arc<dyn CommunicationCore> {
        match config {
            EndpointConfig::Default(c) => Arc::new(DefaultCore::new().with_direction(c.direction)),
            EndpointConfig::TcpClient(c) => Arc::new(TcpClientCore::new(c)),
            EndpointConfig::TcpServer(c) => Arc::new(TcpServerCore::new(c)),
            EndpointConfig::Udp(c) => Arc::new(UdpCore::new(c)),
            EndpointConfig::Binding(c) => Arc::new(BindingCore::new(c)),
        }
    }

    /// Deferred constructor for a pipeline builder
    pub fn factory(config: EndpointConfig) -> impl FnOnce() -> channel::Result<Arc<dyn CommunicationCore>> + Send + 'static {
        move || Ok(Self::create(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_config_from_toml() {
        let config: EndpointConfig = toml::from_str(
            r#"
            type = "udp"
            host = "127.0.0.1"
            port = 9000
            direction = "input"
            "#,
        )
        .unwrap();
        assert_eq!(config.kind(), "udp");
        assert_eq!(config.direction(), ConnectionDirection::Input);

        let config: EndpointConfig = toml::from_str(
            r#"
            type = "tcp_client"
            address = "10.0.0.5:7000"
            framing = "length_prefixed"
            heartbeat_interval_ms = 5000
            "#,
        )
        .unwrap();
        match config {
            EndpointConfig::TcpClient(c) => {
                assert_eq!(c.address, "10.0.0.5:7000");
                assert_eq!(c.stream.framing, Framing::LengthPrefixed);
                assert_eq!(c.stream.heartbeat_interval_ms, 5000);
                assert_eq!(c.reconnect_interval_ms, 2000);
            }
            other => panic!("unexpected config: {other:?}"),
        }
    }

    #[test]
    fn test_factory_names() {
        let cases = [
            (EndpointConfig::default(), "DefaultCore"),
            (EndpointConfig::TcpClient(TcpClientConfig::new("127.0.0.1:1")), "TcpClientCore"),
            (EndpointConfig::TcpServer(TcpServerConfig::new("127.0.0.1:0")), "TcpServerCore"),
            (EndpointConfig::Udp(UdpConfig::new("127.0.0.1", 0)), "UdpCore"),
            (EndpointConfig::Binding(BindingConfig::new("b")), "BindingCore"),
        ];
        for (config, name) in cases {
            assert_eq!(EndpointFactory::create(config).name(), name);
        }
    }

    #[test]
    fn test_default_direction_is_applied() {
        let core = EndpointFactory::create(EndpointConfig::Default(DefaultConfig {
            direction: ConnectionDirection::Output,
        }));
        assert_eq!(core.configured_direction(), ConnectionDirection::Output);
    }
}
