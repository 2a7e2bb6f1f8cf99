//! Schema registry keyed by resource kind.
//!
//! Schemas are registered on a [`SchemaRegistryBuilder`] and frozen by
//! [`SchemaRegistryBuilder::build`]. A built registry is immutable and is
//! shared behind an `Arc`. One registry may also be installed process-wide.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use tracing::debug;

use crate::error::{Result, SchemaError};

use super::builtin;
use super::types::ResourceSchema;

static GLOBAL_REGISTRY: OnceLock<Arc<SchemaRegistry>> = OnceLock::new();

/// Builder collecting schemas before the registry is frozen.
#[derive(Debug, Default)]
pub struct SchemaRegistryBuilder {
    schemas: BTreeMap<String, Arc<ResourceSchema>>,
}

/// Immutable mapping from resource kind to schema.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: BTreeMap<String, Arc<ResourceSchema>>,
}

impl SchemaRegistryBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a schema under `kind`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSchema` if the kind is already registered, if the
    /// schema's own kind does not match, or if the schema fails validation.
    pub fn register(mut self, kind: &str, schema: ResourceSchema) -> Result<Self> {
        if schema.kind != kind {
            return Err(SchemaError::invalid(
                kind,
                format!("schema declares kind '{}'", schema.kind),
            )
            .into());
        }
        if self.schemas.contains_key(kind) {
            return Err(SchemaError::invalid(kind, "kind is already registered").into());
        }
        schema.validate()?;

        debug!(kind, fields = schema.fields.len(), "Registered schema");
        self.schemas.insert(kind.to_string(), Arc::new(schema));
        Ok(self)
    }

    /// Freezes the registry.
    #[must_use]
    pub fn build(self) -> SchemaRegistry {
        SchemaRegistry {
            schemas: self.schemas,
        }
    }
}

impl SchemaRegistry {
    /// Starts a new builder.
    #[must_use]
    pub fn builder() -> SchemaRegistryBuilder {
        SchemaRegistryBuilder::new()
    }

    /// Builds a registry holding the built-in resource kinds.
    ///
    /// # Errors
    ///
    /// Returns an error if a built-in schema is invalid.
    pub fn builtin() -> Result<Self> {
        builtin::all()
            .into_iter()
            .try_fold(Self::builder(), |builder, schema| {
                let kind = schema.kind.clone();
                builder.register(&kind, schema)
            })
            .map(SchemaRegistryBuilder::build)
    }

    /// Looks up the schema for `kind`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownKind` if no schema is registered.
    pub fn lookup(&self, kind: &str) -> Result<Arc<ResourceSchema>> {
        self.schemas.get(kind).cloned().ok_or_else(|| {
            SchemaError::UnknownKind {
                kind: kind.to_string(),
            }
            .into()
        })
    }

    /// Returns true if `kind` is registered.
    #[must_use]
    pub fn contains(&self, kind: &str) -> bool {
        self.schemas.contains_key(kind)
    }

    /// Returns the registered kinds in sorted order.
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }

    /// Returns the registered schemas in kind order.
    pub fn schemas(&self) -> impl Iterator<Item = &ResourceSchema> {
        self.schemas.values().map(AsRef::as_ref)
    }

    /// Returns the number of registered kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

/// Installs `registry` as the process-wide registry.
///
/// # Errors
///
/// Returns `AlreadyInstalled` on a second call.
pub fn install_global(registry: SchemaRegistry) -> Result<Arc<SchemaRegistry>> {
    let registry = Arc::new(registry);
    GLOBAL_REGISTRY
        .set(Arc::clone(&registry))
        .map_err(|_| SchemaError::AlreadyInstalled)?;
    Ok(registry)
}

/// Returns the process-wide registry, if installed.
#[must_use]
pub fn global() -> Option<Arc<SchemaRegistry>> {
    GLOBAL_REGISTRY.get().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConvergentError;
    use crate::schema::{FieldSpec, FieldType};

    fn schema(kind: &str) -> ResourceSchema {
        ResourceSchema::new(kind, "things/{id}")
            .with_field(FieldSpec::immutable("id", FieldType::String))
            .with_field(FieldSpec::updatable("description", FieldType::String))
    }

    #[test]
    fn test_lookup_registered_kind() {
        let registry = SchemaRegistry::builder()
            .register("thing", schema("thing"))
            .unwrap()
            .build();

        let found = registry.lookup("thing").unwrap();
        assert_eq!(found.fields.len(), 2);
        assert_eq!(registry.kinds().collect::<Vec<_>>(), vec!["thing"]);
    }

    #[test]
    fn test_lookup_unknown_kind() {
        let registry = SchemaRegistry::builder().build();
        let err = registry.lookup("widget").unwrap_err();
        assert!(matches!(
            err,
            ConvergentError::Schema(SchemaError::UnknownKind { ref kind }) if kind == "widget"
        ));
    }

    #[test]
    fn test_duplicate_kind_rejected() {
        let result = SchemaRegistry::builder()
            .register("thing", schema("thing"))
            .unwrap()
            .register("thing", schema("thing"));
        assert!(result.is_err());
    }

    #[test]
    fn test_kind_must_match_schema() {
        let result = SchemaRegistry::builder().register("widget", schema("thing"));
        assert!(result.is_err());
    }

    #[test]
    fn test_builtin_registry() {
        let registry = SchemaRegistry::builtin().unwrap();
        assert!(registry.contains("dataplex_datascan"));
        assert!(registry.contains("model_armor_template"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_global_install_once() {
        let first = install_global(SchemaRegistry::builtin().unwrap());
        let second = install_global(SchemaRegistry::builder().build());

        // Other tests in this binary never install, so the first call wins.
        assert!(first.is_ok());
        assert!(matches!(
            second,
            Err(ConvergentError::Schema(SchemaError::AlreadyInstalled))
        ));
        assert!(global().is_some_and(|r| r.contains("dataplex_datascan")));
    }
}
