//! End-to-end fixtures for data channel pipelines
//!
//! Shared helpers for the scenario tests under `tests/`: a transforming
//! middleware and registry setup.

use async_trait::async_trait;
use channel::{
    ChannelRegistry, ChannelSettings, DataContext, PipeMiddleware, Payload, TransformMiddleware,
};
use once_cell::sync::Lazy;
use std::sync::Arc;

static TRACING: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
});

/// Install a test log writer once per test binary
pub fn init_test_tracing() {
    Lazy::force(&TRACING);
}

/// Uppercases text payloads travelling in either direction
#[derive(Debug, Default)]
pub struct UppercaseMiddleware;

impl PipeMiddleware for UppercaseMiddleware {
    fn name(&self) -> &str {
        "UppercaseMiddleware"
    }

    fn as_transform(&self) -> Option<&dyn TransformMiddleware> {
        Some(self)
    }
}

#[async_trait]
impl TransformMiddleware for UppercaseMiddleware {
    async fn pass(&self, mut ctx: DataContext) -> channel::Result<DataContext> {
        if let Some(text) = ctx.data().as_text() {
            let upper = text.to_uppercase();
            ctx.set_data(Payload::Text(upper));
        }
        Ok(ctx)
    }
}

/// Registry with no background start delay
pub fn registry() -> Arc<ChannelRegistry> {
    init_test_tracing();
    Arc::new(ChannelRegistry::with_settings(ChannelSettings {
        init_delay_ms: 0,
        ..ChannelSettings::default()
    }))
}
