//! Resource schema types.
//!
//! A [`ResourceSchema`] declares, in order, every field a desired-state
//! document for one resource kind may contain, together with the field's
//! type, how it may change, and whether import reconstructs it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

use crate::error::SchemaError;
use crate::state::{Document, PATH_SEPARATOR};

/// Declared value type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// UTF-8 string.
    String,
    /// Whole number.
    Integer,
    /// Any number.
    Number,
    /// Boolean.
    Bool,
    /// Ordered list, compared element by element.
    List,
    /// Nested object compared as one value.
    Object,
    /// Any JSON value.
    Any,
}

/// How a field may change once the resource exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mutability {
    /// Changing the field requires destroying and recreating the resource.
    Immutable,
    /// The field can be patched in place.
    Updatable,
    /// The field is set by the server and never triggers drift on its own.
    ComputedOnly,
}

/// Declaration of a single field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Dotted field path.
    pub path: String,
    /// Declared type.
    pub field_type: FieldType,
    /// Mutability class.
    pub mutability: Mutability,
    /// Whether import copies this field from observed state.
    pub importable: bool,
    /// Value the remote assumes when the field is not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// Field schema for one resource kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSchema {
    /// Resource kind name.
    pub kind: String,
    /// Remote identifier template with `{field}` placeholders.
    pub identity: String,
    /// Query parameter carrying the leaf id on create, if the API uses one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_id_param: Option<String>,
    /// Fields in declaration order.
    pub fields: Vec<FieldSpec>,
}

impl FieldType {
    /// Returns true if `value` is acceptable for this type. `null` always is.
    #[must_use]
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null)
            | (Self::Any, _)
            | (Self::String, Value::String(_))
            | (Self::Bool, Value::Bool(_))
            | (Self::List, Value::Array(_))
            | (Self::Object, Value::Object(_))
            | (Self::Number, Value::Number(_)) => true,
            (Self::Integer, Value::Number(n)) => n.is_i64() || n.is_u64(),
            _ => false,
        }
    }
}

impl FieldSpec {
    /// Creates an importable field with the given mutability.
    #[must_use]
    pub fn new(path: impl Into<String>, field_type: FieldType, mutability: Mutability) -> Self {
        Self {
            path: path.into(),
            field_type,
            mutability,
            importable: true,
            default: None,
        }
    }

    /// Creates an importable field that is patched in place.
    #[must_use]
    pub fn updatable(path: impl Into<String>, field_type: FieldType) -> Self {
        Self::new(path, field_type, Mutability::Updatable)
    }

    /// Creates an importable field that forces replacement when changed.
    #[must_use]
    pub fn immutable(path: impl Into<String>, field_type: FieldType) -> Self {
        Self::new(path, field_type, Mutability::Immutable)
    }

    /// Creates a server-computed field that import does not copy.
    #[must_use]
    pub fn computed(path: impl Into<String>, field_type: FieldType) -> Self {
        Self::new(path, field_type, Mutability::ComputedOnly).not_importable()
    }

    /// Marks the field as not reconstructed by import.
    #[must_use]
    pub const fn not_importable(mut self) -> Self {
        self.importable = false;
        self
    }

    /// Sets the value assumed when the field is absent from desired state.
    #[must_use]
    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    /// Returns true if the field is server-computed.
    #[must_use]
    pub const fn is_computed(&self) -> bool {
        matches!(self.mutability, Mutability::ComputedOnly)
    }
}

impl ResourceSchema {
    /// Creates an empty schema for a kind.
    #[must_use]
    pub fn new(kind: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            identity: identity.into(),
            create_id_param: None,
            fields: Vec::new(),
        }
    }

    /// Sets the create-id query parameter.
    #[must_use]
    pub fn with_create_id_param(mut self, param: impl Into<String>) -> Self {
        self.create_id_param = Some(param.into());
        self
    }

    /// Appends a field declaration.
    #[must_use]
    pub fn with_field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    /// Looks up a declared field by exact path.
    #[must_use]
    pub fn field(&self, path: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.path == path)
    }

    /// Returns true if `path` is a strict ancestor of some declared field.
    #[must_use]
    pub fn is_intermediate(&self, path: &str) -> bool {
        self.fields.iter().any(|f| is_strict_ancestor(path, &f.path))
    }

    /// Returns the field paths referenced by the identity template, in order.
    #[must_use]
    pub fn identity_fields(&self) -> Vec<&str> {
        let mut fields = Vec::new();
        let mut rest = self.identity.as_str();
        while let Some(start) = rest.find('{') {
            let Some(len) = rest[start..].find('}') else {
                break;
            };
            fields.push(&rest[start + 1..start + len]);
            rest = &rest[start + len + 1..];
        }
        fields
    }

    /// Resolves the remote identifier for a document.
    ///
    /// # Errors
    ///
    /// Returns `SchemaMismatch` if a placeholder field is missing, is not a
    /// string or number, or holds a value that cannot be parsed back out of
    /// the identifier.
    pub fn resolve_identity(&self, document: &Document) -> Result<String, SchemaError> {
        let mut id = self.identity.clone();
        for field in self.identity_fields() {
            let value = match document.get(field) {
                Some(Value::String(s)) if s.contains(['/', '{', '}']) => {
                    return Err(SchemaError::mismatch(
                        &self.kind,
                        field,
                        format!("identity value '{s}' cannot contain '/', '{{' or '}}'"),
                    ));
                }
                Some(Value::String(s)) if !s.is_empty() => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                Some(_) => {
                    return Err(SchemaError::mismatch(
                        &self.kind,
                        field,
                        "identity field must be a non-empty string or number",
                    ));
                }
                None => {
                    return Err(SchemaError::mismatch(
                        &self.kind,
                        field,
                        "identity field is required",
                    ));
                }
            };
            id = id.replace(&format!("{{{field}}}"), &value);
        }
        Ok(id)
    }

    /// Recovers identity field values from a remote identifier.
    ///
    /// Returns `None` if `remote_id` does not match the identity template.
    #[must_use]
    pub fn parse_identity(&self, remote_id: &str) -> Option<Document> {
        let template: Vec<&str> = self.identity.split('/').collect();
        let segments: Vec<&str> = remote_id.split('/').collect();
        if template.len() != segments.len() {
            return None;
        }

        let mut document = Document::new();
        for (pattern, segment) in template.iter().zip(&segments) {
            if segment.is_empty() {
                return None;
            }
            match pattern.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                Some(field) => document.set(field, Value::String((*segment).to_string())),
                None if pattern == segment => {}
                None => return None,
            }
        }
        Some(document)
    }

    /// Checks structural invariants of the schema.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSchema` on empty or duplicate paths, on a declared path
    /// that is an ancestor of another, on a default of the wrong type, or on
    /// an identity placeholder that is not a declared field.
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.kind.is_empty() {
            return Err(SchemaError::invalid(&self.kind, "kind cannot be empty"));
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if field.path.is_empty() || field.path.split(PATH_SEPARATOR).any(str::is_empty) {
                return Err(SchemaError::invalid(
                    &self.kind,
                    format!("invalid field path '{}'", field.path),
                ));
            }
            if !seen.insert(field.path.as_str()) {
                return Err(SchemaError::invalid(
                    &self.kind,
                    format!("field '{}' declared twice", field.path),
                ));
            }
            if let Some(default) = &field.default
                && !field.field_type.accepts(default)
            {
                return Err(SchemaError::invalid(
                    &self.kind,
                    format!("default for '{}' does not match its type", field.path),
                ));
            }
        }

        for field in &self.fields {
            if let Some(child) = self
                .fields
                .iter()
                .find(|other| is_strict_ancestor(&field.path, &other.path))
            {
                return Err(SchemaError::invalid(
                    &self.kind,
                    format!("field '{}' overlaps '{}'", field.path, child.path),
                ));
            }
        }

        for placeholder in self.identity_fields() {
            if self.field(placeholder).is_none() {
                return Err(SchemaError::invalid(
                    &self.kind,
                    format!("identity placeholder '{placeholder}' is not a declared field"),
                ));
            }
        }

        Ok(())
    }
}

/// Returns true if `ancestor` is a strict path prefix of `path`.
fn is_strict_ancestor(ancestor: &str, path: &str) -> bool {
    path.len() > ancestor.len()
        && path.starts_with(ancestor)
        && path[ancestor.len()..].starts_with(PATH_SEPARATOR)
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Bool => "bool",
            Self::List => "list",
            Self::Object => "object",
            Self::Any => "any",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for Mutability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Immutable => "immutable",
            Self::Updatable => "updatable",
            Self::ComputedOnly => "computed",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scan_schema() -> ResourceSchema {
        ResourceSchema::new("scan", "projects/{project}/scans/{scan_id}")
            .with_field(FieldSpec::immutable("project", FieldType::String))
            .with_field(FieldSpec::immutable("scan_id", FieldType::String))
            .with_field(FieldSpec::updatable("spec.threshold", FieldType::Number))
    }

    #[test]
    fn test_identity_fields() {
        assert_eq!(scan_schema().identity_fields(), vec!["project", "scan_id"]);
    }

    #[test]
    fn test_resolve_identity() {
        let doc = Document::try_from(json!({ "project": "p1", "scan_id": "s1" })).unwrap();
        assert_eq!(scan_schema().resolve_identity(&doc).unwrap(), "projects/p1/scans/s1");
    }

    #[test]
    fn test_resolve_identity_missing_field() {
        let doc = Document::try_from(json!({ "project": "p1" })).unwrap();
        let err = scan_schema().resolve_identity(&doc).unwrap_err();
        assert!(matches!(err, SchemaError::SchemaMismatch { ref path, .. } if path == "scan_id"));
    }

    #[test]
    fn test_resolve_identity_rejects_separator_values() {
        let schema = scan_schema();
        for scan_id in ["s1/extra", "{scan_id}", "s}"] {
            let doc = Document::try_from(json!({ "project": "p1", "scan_id": scan_id })).unwrap();
            let err = schema.resolve_identity(&doc).unwrap_err();
            assert!(
                matches!(err, SchemaError::SchemaMismatch { ref path, .. } if path == "scan_id"),
                "{scan_id}: {err}"
            );
        }

        let doc = Document::try_from(json!({ "project": "p1", "scan_id": "s1" })).unwrap();
        let id = schema.resolve_identity(&doc).unwrap();
        assert_eq!(schema.parse_identity(&id).unwrap().get("scan_id"), Some(&json!("s1")));
    }

    #[test]
    fn test_parse_identity() {
        let schema = scan_schema();
        let doc = schema.parse_identity("projects/p1/scans/s1").unwrap();
        assert_eq!(doc.get("project"), Some(&json!("p1")));
        assert_eq!(doc.get("scan_id"), Some(&json!("s1")));

        assert!(schema.parse_identity("projects/p1/templates/s1").is_none());
        assert!(schema.parse_identity("projects/p1/scans").is_none());
        assert!(schema.parse_identity("projects//scans/s1").is_none());
    }

    #[test]
    fn test_validate_rejects_overlap() {
        let schema = scan_schema().with_field(FieldSpec::updatable("spec", FieldType::Object));
        assert!(matches!(schema.validate(), Err(SchemaError::InvalidSchema { .. })));
    }

    #[test]
    fn test_validate_rejects_duplicate() {
        let schema = scan_schema().with_field(FieldSpec::immutable("project", FieldType::String));
        assert!(schema.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_undeclared_placeholder() {
        let schema = ResourceSchema::new("scan", "scans/{id}")
            .with_field(FieldSpec::updatable("name", FieldType::String));
        assert!(schema.validate().is_err());
    }

    #[test]
    fn test_sibling_prefix_is_not_ancestor() {
        let schema = ResourceSchema::new("x", "x/{label}")
            .with_field(FieldSpec::immutable("label", FieldType::String))
            .with_field(FieldSpec::updatable("labels", FieldType::Object));
        assert!(schema.validate().is_ok());
        assert!(!schema.is_intermediate("label"));
    }

    #[test]
    fn test_integer_type() {
        assert!(FieldType::Integer.accepts(&json!(400)));
        assert!(!FieldType::Integer.accepts(&json!(0.5)));
        assert!(FieldType::Number.accepts(&json!(0.5)));
        assert!(FieldType::String.accepts(&Value::Null));
    }
}
