//! Resource schemas and the registry that maps kinds to them.

pub mod builtin;
mod registry;
mod types;

pub use registry::{SchemaRegistry, SchemaRegistryBuilder, global, install_global};
pub use types::{FieldSpec, FieldType, Mutability, ResourceSchema};
