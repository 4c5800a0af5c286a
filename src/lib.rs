//! Type-directed JSON codecs.
//!
//! A `Type` and a `Registry` of class descriptions are compiled into a data
//! model, then into an encoder (a flat instruction list) or a decode plan.
//! Decoding splits the input into member boundaries and reads each member
//! only when it is needed, eagerly or through lazily initialized objects.
pub mod cache;
pub mod codec;
pub mod config;
pub mod decode;
pub mod error;
pub mod formatter;
pub mod hash;
pub mod hooks;
pub mod instantiate;
pub mod json;
pub mod metadata;
pub mod model;
pub mod registry;
pub mod resource;
pub mod serializer;
pub mod splitter;
pub mod types;
pub mod value;

pub use config::{Config, JsonFlags};
pub use decode::DecodeOutcome;
pub use error::{ConfigurationError, Error, Result};
pub use registry::{ClassDescriptor, Directive, EnumDescriptor, Registry};
pub use resource::{FileResource, MemoryResource, Resource};
pub use serializer::Serializer;
pub use types::Type;
pub use value::{Object, Value};
