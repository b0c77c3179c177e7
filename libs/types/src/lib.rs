//! # Data Channel Envelope Types
//!
//! The unit of transit for every data channel pipeline.
//!
//! ## Design
//!
//! - **Immutable provenance**: a [`DataContext`] records where it entered the
//!   system once, at construction
//! - **Mutable payload**: middleware may replace the [`Payload`]; the reported
//!   [`DataType`] is always derived from the payload currently held
//! - **Interoperable operation**: the [`DataOperation`] is stored as a normalized
//!   lowercase string and parsed leniently, so string-typed systems can round-trip it
//! - **Typed metadata**: middleware signal each other through [`Extensions`], a bag
//!   keyed by Rust type instead of by string
//!
//! ## Quick Start
//!
//! ```rust
//! use types::{DataContext, DataOperation, DataSource, DataType};
//!
//! let mut ctx = DataContext::new(
//!     DataSource::Inner,
//!     DataSource::Inner,
//!     DataOperation::Publish,
//!     "hello",
//! );
//! assert_eq!(ctx.data_type(), DataType::String);
//!
//! ctx.set_data(b"raw".to_vec());
//! assert_eq!(ctx.data_type(), DataType::Bytes);
//! ```

pub mod context;
pub mod error;
pub mod extensions;
pub mod payload;

pub use context::{DataContext, DataOperation, DataSource};
pub use error::{EnvelopeError, Result};
pub use extensions::Extensions;
pub use payload::{DataType, Payload};
