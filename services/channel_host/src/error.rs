//! Error types for the channel host

use channel::ChannelError;
use thiserror::Error;
use warp::http::StatusCode;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl HostError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// HTTP status reported by the management surface
    pub fn status(&self) -> StatusCode {
        match self {
            HostError::Channel(e) if e.is_not_found() => StatusCode::NOT_FOUND,
            HostError::Channel(ChannelError::Detached) => StatusCode::SERVICE_UNAVAILABLE,
            HostError::Channel(ChannelError::Envelope(_)) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type Result<T> = std::result::Result<T, HostError>;
