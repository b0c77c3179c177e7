//! Host configuration
//!
//! Loaded from an optional TOML file, then overridden by `CHANNEL_HOST_*`
//! environment variables (`__` separates nested keys).

use anyhow::{Context, Result};
use channel::{ChannelSettings, DataPipelineBuilder, MiddlewareConfig};
use config::{Config, Environment, File, FileFormat};
use network::{EndpointConfig, EndpointFactory};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Channel host configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Management server bind address
    pub bind_address: String,
    pub port: u16,
    /// Delay before background channel initialization starts
    pub init_delay_ms: u64,
    /// Upper bound the host waits for background initialization
    pub init_timeout_secs: u64,
    pub init_concurrency: usize,
    /// Initialize channels one by one before serving instead of in the background
    pub sequential_init: bool,
    pub recent_exceptions_to_keep: usize,
    pub channels: Vec<ChannelConfig>,
}

impl Default for HostConfig {
    fn default() -> Self {
        let settings = ChannelSettings::default();
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8080,
            init_delay_ms: settings.init_delay_ms,
            init_timeout_secs: settings.init_timeout_secs,
            init_concurrency: settings.init_concurrency,
            sequential_init: false,
            recent_exceptions_to_keep: settings.recent_exceptions_to_keep,
            channels: Vec::new(),
        }
    }
}

impl HostConfig {
    /// Load configuration from an optional file with environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            info!("Loading host config: {:?}", path);
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix("CHANNEL_HOST")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;
        config
            .try_deserialize()
            .context("Failed to deserialize host configuration")
    }

    /// Parse a TOML document directly
    pub fn from_toml(contents: &str) -> Result<Self> {
        Config::builder()
            .add_source(File::from_str(contents, FileFormat::Toml))
            .build()
            .context("Failed to parse configuration")?
            .try_deserialize()
            .context("Failed to deserialize host configuration")
    }

    pub fn channel_settings(&self) -> ChannelSettings {
        ChannelSettings {
            recent_exceptions_to_keep: self.recent_exceptions_to_keep,
            init_delay_ms: self.init_delay_ms,
            init_concurrency: self.init_concurrency,
            init_timeout_secs: self.init_timeout_secs,
        }
    }

    pub fn socket_addr(&self) -> Result<std::net::SocketAddr> {
        format!("{}:{}", self.bind_address, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.bind_address, self.port))
    }
}

/// One configured channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub id: String,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub inner: EndpointConfig,
    pub outer: EndpointConfig,
    #[serde(default)]
    pub middlewares: Vec<MiddlewareConfig>,
}

impl ChannelConfig {
    /// Pipeline builder for this channel; endpoints are created when it runs
    pub fn builder(&self) -> DataPipelineBuilder {
        let mut builder = DataPipelineBuilder::new(self.id.clone())
            .inner_with(EndpointFactory::factory(self.inner.clone()))
            .outer_with(EndpointFactory::factory(self.outer.clone()))
            .middlewares(self.middlewares.iter().map(MiddlewareConfig::build));
        if let Some(group) = &self.group_id {
            builder = builder.group(group.clone());
        }
        builder
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
        port = 9100
        sequential_init = true
        recent_exceptions_to_keep = 5

        [[channels]]
        id = "telemetry"
        group_id = "sensors"
        middlewares = [{ type = "text_codec" }, { type = "message_counter" }]

        [channels.outer]
        type = "udp"
        host = "127.0.0.1"
        port = 0

        [[channels]]
        id = "orders"

        [channels.inner]
        type = "default"
        direction = "input_and_output"

        [channels.outer]
        type = "binding"
        binding_name = "orders"
    "#;

    #[test]
    fn test_defaults() {
        let config = HostConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.init_delay_ms, 1000);
        assert_eq!(config.init_concurrency, 10);
        assert_eq!(config.recent_exceptions_to_keep, 10);
        assert!(!config.sequential_init);
        assert!(config.channels.is_empty());
    }

    #[test]
    fn test_parse_channels() {
        let config = HostConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.port, 9100);
        assert!(config.sequential_init);
        assert_eq!(config.bind_address, "127.0.0.1");
        assert_eq!(config.channel_settings().recent_exceptions_to_keep, 5);

        assert_eq!(config.channels.len(), 2);
        let telemetry = &config.channels[0];
        assert_eq!(telemetry.group_id.as_deref(), Some("sensors"));
        assert_eq!(telemetry.inner.kind(), "default");
        assert_eq!(telemetry.outer.kind(), "udp");
        assert_eq!(
            telemetry.middlewares,
            vec![MiddlewareConfig::TextCodec, MiddlewareConfig::MessageCounter]
        );
        assert_eq!(config.channels[1].outer.kind(), "binding");
    }

    #[test]
    fn test_builder_from_config() {
        let config = HostConfig::from_toml(SAMPLE).unwrap();
        let pipeline = config.channels[0].builder().build().unwrap();
        assert_eq!(pipeline.id(), "telemetry");
        assert_eq!(pipeline.group_id(), Some("sensors"));
        assert_eq!(pipeline.outer().name(), "UdpCore");
        let names: Vec<_> = pipeline.get_middlewares().into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["TextCodec", "MessageCounter"]);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = HostConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.channels.len(), 2);
        assert_eq!(config.socket_addr().unwrap().port(), 9100);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(HostConfig::load(Some(&dir.path().join("absent.toml"))).is_err());
    }
}
