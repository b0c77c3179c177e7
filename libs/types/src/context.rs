//! The `DataContext` envelope
//!
//! Provenance (`entrance`) is fixed at construction. Everything else may be
//! rewritten by middleware while the envelope traverses a pipeline.

use crate::error::{EnvelopeError, Result};
use crate::extensions::Extensions;
use crate::payload::{DataType, Payload};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::str::FromStr;

/// Side of a pipeline an envelope belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    /// Application logic side
    Inner,
    /// External system side (socket, broker)
    Outer,
    /// Produced by a middleware in the chain
    Middleware,
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DataSource::Inner => "inner",
            DataSource::Outer => "outer",
            DataSource::Middleware => "middleware",
        })
    }
}

/// Intent of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataOperation {
    #[default]
    Custom,
    Get,
    Publish,
    Response,
}

impl DataOperation {
    /// Normalized lowercase wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            DataOperation::Custom => "custom",
            DataOperation::Get => "get",
            DataOperation::Publish => "publish",
            DataOperation::Response => "response",
        }
    }

    /// Parse case-insensitively, falling back to `Custom` for anything unknown
    pub fn parse_lenient(value: &str) -> Self {
        value.parse().unwrap_or(DataOperation::Custom)
    }
}

impl FromStr for DataOperation {
    type Err = EnvelopeError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "custom" => Ok(DataOperation::Custom),
            "get" => Ok(DataOperation::Get),
            "publish" => Ok(DataOperation::Publish),
            "response" => Ok(DataOperation::Response),
            _ => Err(EnvelopeError::UnknownOperation(value.to_string())),
        }
    }
}

impl fmt::Display for DataOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unit of data in transit through a pipeline
///
/// The envelope is routed by value through the middleware chain; equality is
/// intentionally not defined.
#[derive(Debug, Clone)]
pub struct DataContext {
    entrance: DataSource,
    /// Side that produced this instance; middleware may re-tag it
    pub source: DataSource,
    operation: String,
    data: Payload,
    specified_type: Option<String>,
    /// Typed signaling bag shared by the middleware chain
    pub metadata: Extensions,
}

impl DataContext {
    pub fn new(
        entrance: DataSource,
        source: DataSource,
        operation: DataOperation,
        data: impl Into<Payload>,
    ) -> Self {
        Self {
            entrance,
            source,
            operation: operation.as_str().to_string(),
            data: data.into(),
            specified_type: None,
            metadata: Extensions::new(),
        }
    }

    /// Envelope entering and produced at the same side
    pub fn from_side(side: DataSource, operation: DataOperation, data: impl Into<Payload>) -> Self {
        Self::new(side, side, operation, data)
    }

    /// Envelope carrying a structured object
    pub fn with_object<T: Serialize>(
        entrance: DataSource,
        source: DataSource,
        operation: DataOperation,
        value: &T,
    ) -> Result<Self> {
        let mut ctx = Self::new(entrance, source, operation, Payload::Empty);
        ctx.set_object(value)?;
        Ok(ctx)
    }

    pub fn entrance(&self) -> DataSource {
        self.entrance
    }

    /// Typed operation; unknown stored strings read as `Custom`
    pub fn operation(&self) -> DataOperation {
        DataOperation::parse_lenient(&self.operation)
    }

    /// Raw normalized operation string
    pub fn operation_str(&self) -> &str {
        &self.operation
    }

    pub fn set_operation(&mut self, operation: DataOperation) {
        self.operation = operation.as_str().to_string();
    }

    /// Store an operation received from a string-typed system
    pub fn set_operation_str(&mut self, operation: &str) {
        self.operation = operation.trim().to_ascii_lowercase();
    }

    pub fn data(&self) -> &Payload {
        &self.data
    }

    /// Replace the payload; the data type follows the new shape
    pub fn set_data(&mut self, data: impl Into<Payload>) {
        self.data = data.into();
        self.specified_type = None;
    }

    /// Take the payload out, leaving `Empty`
    pub fn take_data(&mut self) -> Payload {
        self.specified_type = None;
        std::mem::take(&mut self.data)
    }

    /// Replace the payload with a serialized object and remember its type
    pub fn set_object<T: Serialize>(&mut self, value: &T) -> Result<()> {
        self.data = Payload::from_object(value)?;
        self.specified_type = Some(std::any::type_name::<T>().to_string());
        Ok(())
    }

    pub fn data_type(&self) -> DataType {
        self.data.data_type()
    }

    /// Concrete type name recorded for `Poco` payloads
    pub fn specified_type(&self) -> Option<&str> {
        self.specified_type.as_deref()
    }

    /// Deserialize a structured payload, or a text/byte payload holding JSON
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        match &self.data {
            Payload::Object(value) => Ok(T::deserialize(value)?),
            Payload::Text(text) => Ok(serde_json::from_str(text)?),
            Payload::Bytes(bytes) => Ok(serde_json::from_slice(bytes)?),
            other => Err(EnvelopeError::UnexpectedShape {
                expected: DataType::Poco,
                found: other.data_type(),
            }),
        }
    }

    /// Builder-style metadata insertion
    pub fn with_metadata<T: Any + Clone + Send + Sync>(mut self, value: T) -> Self {
        self.metadata.insert(value);
        self
    }
}
