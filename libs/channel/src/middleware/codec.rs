//! Direction-aware payload codecs
//!
//! Inbound traffic (towards the inner endpoint) is decoded, outbound traffic
//! is encoded. Shapes a codec does not handle pass through untouched.

use super::{PipeMiddleware, TransformMiddleware};
use crate::error::{ChannelError, Result};
use crate::pipeline::is_inbound;
use async_trait::async_trait;
use bytes::Bytes;
use types::{DataContext, Payload};

/// Bytes to UTF-8 text on the way in, text to bytes on the way out
#[derive(Debug, Default, Clone, Copy)]
pub struct TextCodec;

impl PipeMiddleware for TextCodec {
    fn name(&self) -> &str {
        "TextCodec"
    }

    fn as_transform(&self) -> Option<&dyn TransformMiddleware> {
        Some(self)
    }
}

#[async_trait]
impl TransformMiddleware for TextCodec {
    async fn pass(&self, mut ctx: DataContext) -> Result<DataContext> {
        if is_inbound(&ctx) {
            if let Payload::Bytes(bytes) = ctx.data() {
                let text = String::from_utf8(bytes.to_vec()).map_err(|e| {
                    ChannelError::middleware(self.name(), format!("payload is not UTF-8: {e}"))
                })?;
                ctx.set_data(text);
            }
        } else if let Payload::Text(text) = ctx.data() {
            let bytes = Bytes::copy_from_slice(text.as_bytes());
            ctx.set_data(bytes);
        }
        Ok(ctx)
    }
}

/// JSON parsing on the way in, JSON text on the way out
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl PipeMiddleware for JsonCodec {
    fn name(&self) -> &str {
        "JsonCodec"
    }

    fn as_transform(&self) -> Option<&dyn TransformMiddleware> {
        Some(self)
    }
}

#[async_trait]
impl TransformMiddleware for JsonCodec {
    async fn pass(&self, mut ctx: DataContext) -> Result<DataContext> {
        let invalid = |e: serde_json::Error| {
            ChannelError::middleware("JsonCodec", format!("invalid JSON payload: {e}"))
        };

        if is_inbound(&ctx) {
            let value: Option<serde_json::Value> = match ctx.data() {
                Payload::Bytes(bytes) => Some(serde_json::from_slice(bytes).map_err(invalid)?),
                Payload::Text(text) => Some(serde_json::from_str(text).map_err(invalid)?),
                _ => None,
            };
            if let Some(value) = value {
                ctx.set_data(Payload::Object(value));
            }
        } else if let Payload::Object(value) = ctx.data() {
            let text = serde_json::to_string(value).map_err(invalid)?;
            ctx.set_data(text);
        }
        Ok(ctx)
    }
}
