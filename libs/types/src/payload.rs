//! Opaque payload carried by a [`DataContext`](crate::DataContext)
//!
//! A payload is either raw bytes, text, a structured (JSON) object, an opaque
//! in-process value, or nothing at all. The envelope's [`DataType`] is inferred
//! from the variant, so the two can never disagree.

use crate::error::{EnvelopeError, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Shape of the data currently held by an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// Unclassified data left for the application to interpret
    Custom,
    /// Raw binary data
    Bytes,
    /// Text data
    String,
    /// Structured object; see the envelope's specified type
    Poco,
}

/// Data flowing through a pipeline
#[derive(Clone, Default)]
pub enum Payload {
    /// No data
    #[default]
    Empty,
    /// Raw bytes, typically straight off a socket
    Bytes(Bytes),
    /// UTF-8 text
    Text(String),
    /// Structured object in its JSON form
    Object(serde_json::Value),
    /// In-process value never meant to leave the process
    Opaque(Arc<dyn Any + Send + Sync>),
}

impl Payload {
    /// Wrap an arbitrary in-process value
    pub fn opaque<T: Any + Send + Sync>(value: T) -> Self {
        Payload::Opaque(Arc::new(value))
    }

    /// Serialize a value into a structured payload
    pub fn from_object<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(Payload::Object(serde_json::to_value(value)?))
    }

    /// Infer the data type from the payload shape
    ///
    /// Total and deterministic: bytes map to `Bytes`, text to `String`, objects
    /// to `Poco`, and empty, null or opaque payloads to `Custom`.
    pub fn data_type(&self) -> DataType {
        match self {
            Payload::Bytes(_) => DataType::Bytes,
            Payload::Text(_) => DataType::String,
            Payload::Object(serde_json::Value::Null) => DataType::Custom,
            Payload::Object(_) => DataType::Poco,
            Payload::Empty | Payload::Opaque(_) => DataType::Custom,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Payload::Empty)
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Payload::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&serde_json::Value> {
        match self {
            Payload::Object(value) => Some(value),
            _ => None,
        }
    }

    /// Downcast an opaque payload
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Payload::Opaque(value) => value.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Bytes to put on the wire for this payload
    ///
    /// Text is UTF-8 encoded and objects are serialized as compact JSON.
    pub fn to_wire_bytes(&self) -> Result<Bytes> {
        match self {
            Payload::Empty => Ok(Bytes::new()),
            Payload::Bytes(bytes) => Ok(bytes.clone()),
            Payload::Text(text) => Ok(Bytes::copy_from_slice(text.as_bytes())),
            Payload::Object(value) => Ok(Bytes::from(serde_json::to_vec(value)?)),
            Payload::Opaque(_) => Err(EnvelopeError::OpaquePayload {
                type_name: "dyn Any",
            }),
        }
    }

    /// Text rendering for diagnostics; bytes are decoded lossily
    pub fn render(&self) -> String {
        match self {
            Payload::Empty => String::new(),
            Payload::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            Payload::Text(text) => text.clone(),
            Payload::Object(value) => value.to_string(),
            Payload::Opaque(_) => "<opaque>".to_string(),
        }
    }

    /// Size in bytes of the wire form, zero for opaque values
    pub fn len(&self) -> usize {
        match self {
            Payload::Empty | Payload::Opaque(_) => 0,
            Payload::Bytes(bytes) => bytes.len(),
            Payload::Text(text) => text.len(),
            Payload::Object(value) => value.to_string().len(),
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Empty => f.write_str("Empty"),
            Payload::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Payload::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Payload::Object(value) => f.debug_tuple("Object").field(value).finish(),
            Payload::Opaque(_) => f.write_str("Opaque(..)"),
        }
    }
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self {
        Payload::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Bytes(Bytes::from(bytes))
    }
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Self {
        Payload::Bytes(Bytes::copy_from_slice(bytes))
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Payload::Object(value)
    }
}

impl<T: Into<Payload>> From<Option<T>> for Payload {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or_default()
    }
}
