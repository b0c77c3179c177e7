//! Error types for envelope payload conversion

use crate::payload::DataType;
use thiserror::Error;

/// Errors raised while converting or interpreting an envelope payload
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// Structured payload could not be (de)serialized
    #[error("JSON conversion failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Byte payload was not valid UTF-8
    #[error("Payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// Payload has a different shape than the caller required
    #[error("Unexpected payload shape: expected {expected:?}, found {found:?}")]
    UnexpectedShape { expected: DataType, found: DataType },

    /// Strict parsing of an operation string failed
    #[error("Unknown data operation: '{0}'")]
    UnknownOperation(String),

    /// Opaque in-process payloads have no wire representation
    #[error("Opaque payload of type {type_name} cannot be serialized")]
    OpaquePayload { type_name: &'static str },
}

/// Result alias for envelope operations
pub type Result<T> = std::result::Result<T, EnvelopeError>;
