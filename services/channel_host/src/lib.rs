//! Data channel host
//!
//! Builds the channels described by a [`HostConfig`], initializes them and
//! exposes the HTTP management surface plus every webhook route the channel
//! components registered at build time.

pub mod config;
pub mod error;
pub mod host;
pub mod logging;
pub mod server;
pub mod service;

pub use config::{ChannelConfig, HostConfig};
pub use error::{HostError, Result};
pub use host::ChannelHost;
pub use server::ManagementServer;
pub use service::{ApiResponse, ChannelView, ManagementService, ResponseCode};
