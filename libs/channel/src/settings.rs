//! Registry-wide settings

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings shared by every pipeline of a registry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSettings {
    /// Exceptions kept per pipeline
    pub recent_exceptions_to_keep: usize,
    /// Delay before background initialization starts
    pub init_delay_ms: u64,
    /// Channels initialized concurrently by the background task
    pub init_concurrency: usize,
    /// Upper bound the host waits for background initialization
    pub init_timeout_secs: u64,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            recent_exceptions_to_keep: 10,
            init_delay_ms: 1000,
            init_concurrency: 10,
            init_timeout_secs: 30,
        }
    }
}

impl ChannelSettings {
    /// Settings used when the host never configured the registry
    ///
    /// Installs a console subscriber if no global subscriber exists yet.
    pub fn fallback() -> Self {
        if tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .try_init()
            .is_ok()
        {
            tracing::debug!("Installed fallback console logger for data channels");
        }
        Self::default()
    }

    pub fn init_delay(&self) -> Duration {
        Duration::from_millis(self.init_delay_ms)
    }

    pub fn init_timeout(&self) -> Duration {
        Duration::from_secs(self.init_timeout_secs)
    }
}
