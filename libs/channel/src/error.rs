//! Error types for transports, pipelines and the channel registry

use crate::core::ConnectionDirection;
use thiserror::Error;
use types::{DataSource, EnvelopeError};

/// Failures raised by a transport core
#[derive(Error, Debug)]
pub enum TransportError {
    /// Adapter was configured with values it cannot use
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// Socket level failure
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// Peer sent or expects something the adapter cannot handle
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Operation requires a successful `init` first
    #[error("{component} is not initialized")]
    NotInitialized { component: String },

    /// Operation is not supported by this adapter
    #[error("Operation '{operation}' not supported by {component}")]
    Unsupported { component: String, operation: String },

    /// Sidecar or webhook HTTP failure
    #[error("HTTP error: {message}")]
    Http { message: String, status: Option<u16> },

    #[error("Timeout error: {operation} exceeded {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Connection or socket was closed underneath the adapter
    #[error("Transport closed: {0}")]
    Closed(String),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
}

impl TransportError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>, field: Option<&str>) -> Self {
        Self::Configuration {
            message: message.into(),
            field: field.map(|s| s.to_string()),
        }
    }

    /// Create a network error from an I/O source
    pub fn network(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Network {
            message: message.into(),
            source,
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn not_initialized(component: impl Into<String>) -> Self {
        Self::NotInitialized {
            component: component.into(),
        }
    }

    pub fn unsupported(component: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Unsupported {
            component: component.into(),
            operation: operation.into(),
        }
    }

    pub fn http(message: impl Into<String>, status: Option<u16>) -> Self {
        Self::Http {
            message: message.into(),
            status,
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Check if retrying the same operation later could succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TransportError::Network { .. }
                | TransportError::Timeout { .. }
                | TransportError::Closed(_)
                | TransportError::Http { .. }
        )
    }
}

/// Failures raised by pipelines and the channel registry
#[derive(Error, Debug)]
pub enum ChannelError {
    /// An endpoint failed while initializing, disposing or delivering
    #[error("Endpoint {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: TransportError,
    },

    /// A middleware rejected or failed to transform an envelope
    #[error("Middleware {middleware} failed: {message}")]
    Middleware { middleware: String, message: String },

    /// Endpoint cannot carry data in the requested direction
    #[error("Endpoint {endpoint} on the {side} side does not support {required:?} (allowed {allowed:?})")]
    DirectionNotSupported {
        endpoint: String,
        side: DataSource,
        required: ConnectionDirection,
        allowed: ConnectionDirection,
    },

    #[error("Channel '{0}' is already registered")]
    DuplicateChannel(String),

    #[error("Channel '{0}' not found")]
    ChannelNotFound(String),

    /// Builder was given an incomplete or inconsistent topology
    #[error("Invalid pipeline topology: {0}")]
    InvalidTopology(String),

    #[error("Channel '{channel}' failed to initialize: {reason}")]
    InitFailed { channel: String, reason: String },

    #[error("Channel initialization did not finish within {timeout_ms}ms")]
    InitTimeout { timeout_ms: u64 },

    #[error("Operation cancelled")]
    Cancelled,

    /// The pipeline an endpoint was attached to no longer exists
    #[error("Endpoint is not attached to a live pipeline")]
    Detached,

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
}

impl ChannelError {
    /// Wrap a transport failure with the endpoint it came from
    pub fn transport(endpoint: impl Into<String>, source: TransportError) -> Self {
        Self::Transport {
            endpoint: endpoint.into(),
            source,
        }
    }

    pub fn middleware(middleware: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Middleware {
            middleware: middleware.into(),
            message: message.into(),
        }
    }

    pub fn init_failed(channel: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InitFailed {
            channel: channel.into(),
            reason: reason.into(),
        }
    }

    /// Check if this error means the requested channel does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, ChannelError::ChannelNotFound(_))
    }
}

/// Result type alias for pipeline and registry operations
pub type Result<T> = std::result::Result<T, ChannelError>;
