//! Diff engine for comparing desired vs observed state.
//!
//! The engine walks a resource schema in declaration order and produces a
//! field-level [`Delta`]. Every declared path is compared as one opaque
//! value; nested objects below a declared path are not diffed further.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use tracing::debug;

use crate::error::{Result, SchemaError};
use crate::schema::{Mutability, ResourceSchema};
use crate::state::{Document, PATH_SEPARATOR, json_type_name};

/// Engine for computing diffs between desired and observed states.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiffEngine;

/// Type of change for one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Desired sets a field the remote does not have.
    Add,
    /// Both sides have the field with different values.
    Change,
    /// The remote has a field desired no longer sets.
    Remove,
}

/// Difference for a single field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaEntry {
    /// Dotted field path.
    pub path: String,
    /// Type of change.
    pub kind: ChangeKind,
    /// Observed value.
    pub old: Option<Value>,
    /// Desired value.
    pub new: Option<Value>,
    /// Mutability class of the field.
    pub mutability: Mutability,
}

/// Ordered field-level differences, in schema declaration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Delta {
    /// Entries in schema order.
    pub entries: Vec<DeltaEntry>,
}

impl DiffEngine {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes the delta that would take `observed` to `desired`.
    ///
    /// # Errors
    ///
    /// Returns `SchemaMismatch` if `desired` contains a field the schema does
    /// not declare or a value of the wrong type.
    pub fn diff(
        &self,
        schema: &ResourceSchema,
        desired: impl AsRef<Document>,
        observed: impl AsRef<Document>,
    ) -> Result<Delta> {
        let desired = desired.as_ref();
        let observed = observed.as_ref();

        Self::validate(schema, desired)?;

        let mut entries = Vec::new();
        for field in &schema.fields {
            let want = desired.get(&field.path);
            let have = observed.get(&field.path);

            let entry = match (want, have) {
                (Some(new), None) => Some((ChangeKind::Add, None, Some(new.clone()))),
                (Some(new), Some(old)) if !values_equal(new, old) => {
                    Some((ChangeKind::Change, Some(old.clone()), Some(new.clone())))
                }
                (Some(_), Some(_)) => None,
                (None, _) if field.is_computed() => None,
                (None, have) => match (&field.default, have) {
                    (Some(default), Some(old)) if !values_equal(default, old) => Some((
                        ChangeKind::Change,
                        Some(old.clone()),
                        Some(default.clone()),
                    )),
                    (Some(_), _) => None,
                    (None, Some(old)) => Some((ChangeKind::Remove, Some(old.clone()), None)),
                    (None, None) => None,
                },
            };

            if let Some((kind, old, new)) = entry {
                debug!(kind = %schema.kind, path = %field.path, change = ?kind, "Field differs");
                entries.push(DeltaEntry {
                    path: field.path.clone(),
                    kind,
                    old,
                    new,
                    mutability: field.mutability,
                });
            }
        }

        Ok(Delta { entries })
    }

    /// Checks that every field reachable in `desired` is declared with a
    /// matching type.
    ///
    /// # Errors
    ///
    /// Returns `SchemaMismatch` naming the first offending path.
    pub fn validate(schema: &ResourceSchema, desired: &Document) -> Result<()> {
        Self::validate_map(schema, "", desired.as_map())
    }

    fn validate_map(schema: &ResourceSchema, prefix: &str, map: &Map<String, Value>) -> Result<()> {
        for (key, value) in map {
            if value.is_null() {
                continue;
            }

            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}{PATH_SEPARATOR}{key}")
            };

            if let Some(field) = schema.field(&path) {
                if !field.field_type.accepts(value) {
                    return Err(SchemaError::mismatch(
                        &schema.kind,
                        &path,
                        format!("expected {}, found {}", field.field_type, json_type_name(value)),
                    )
                    .into());
                }
            } else if schema.is_intermediate(&path) {
                let Value::Object(inner) = value else {
                    return Err(SchemaError::mismatch(
                        &schema.kind,
                        &path,
                        format!("expected object, found {}", json_type_name(value)),
                    )
                    .into());
                };
                Self::validate_map(schema, &path, inner)?;
            } else {
                return Err(SchemaError::mismatch(&schema.kind, &path, "field is not declared").into());
            }
        }
        Ok(())
    }
}

/// Compares two values with numbers compared by value and `null` object
/// members treated as absent.
#[must_use]
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
                x == y
            } else if let (Some(x), Some(y)) = (x.as_u64(), y.as_u64()) {
                x == y
            } else {
                x.as_f64() == y.as_f64()
            }
        }
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| values_equal(a, b))
        }
        (Value::Object(x), Value::Object(y)) => {
            let keys: BTreeSet<&String> = x
                .iter()
                .chain(y.iter())
                .filter(|(_, v)| !v.is_null())
                .map(|(k, _)| k)
                .collect();
            keys.into_iter().all(|k| match (x.get(k), y.get(k)) {
                (Some(a), Some(b)) => values_equal(a, b),
                (Some(v), None) | (None, Some(v)) => v.is_null(),
                (None, None) => true,
            })
        }
        _ => a == b,
    }
}

impl Delta {
    /// Returns true if there are no differences.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the number of differing fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns the differing paths in order.
    #[must_use]
    pub fn paths(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.path.as_str()).collect()
    }

    /// Returns true if any entry is on an immutable field.
    #[must_use]
    pub fn touches_immutable(&self) -> bool {
        self.entries
            .iter()
            .any(|e| e.mutability == Mutability::Immutable)
    }

    /// Drops entries whose path equals, or lies below, an ignored path.
    #[must_use]
    pub fn without<S: AsRef<str>>(&self, ignore: &[S]) -> Self {
        let entries = self
            .entries
            .iter()
            .filter(|e| !ignore.iter().any(|i| path_covers(i.as_ref(), &e.path)))
            .cloned()
            .collect();
        Self { entries }
    }
}

/// Returns true if `pattern` is `path` or one of its ancestors.
fn path_covers(pattern: &str, path: &str) -> bool {
    path == pattern
        || (path.starts_with(pattern) && path[pattern.len()..].starts_with(PATH_SEPARATOR))
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Add => "add",
            Self::Change => "change",
            Self::Remove => "remove",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for DeltaEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let show = |v: &Option<Value>| v.as_ref().map_or_else(|| String::from("<absent>"), Value::to_string);
        write!(f, "{} {}: {} -> {}", self.kind, self.path, show(&self.old), show(&self.new))
    }
}

impl std::fmt::Display for Delta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.entries.is_empty() {
            return write!(f, "no changes");
        }
        for (i, entry) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{entry}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConvergentError;
    use crate::schema::{FieldSpec, FieldType};
    use serde_json::json;

    fn schema() -> ResourceSchema {
        ResourceSchema::new("scan", "projects/{project}/locations/{location}/scans/{id}")
            .with_field(FieldSpec::immutable("project", FieldType::String))
            .with_field(FieldSpec::immutable("location", FieldType::String))
            .with_field(FieldSpec::immutable("id", FieldType::String))
            .with_field(FieldSpec::updatable("description", FieldType::String))
            .with_field(FieldSpec::updatable("spec.threshold", FieldType::Number))
            .with_field(
                FieldSpec::updatable("spec.publish", FieldType::Bool).with_default(json!(false)),
            )
            .with_field(FieldSpec::computed("create_time", FieldType::String))
    }

    fn doc(value: Value) -> Document {
        Document::try_from(value).unwrap()
    }

    #[test]
    fn test_identical_documents_have_empty_delta() {
        let d = doc(json!({ "project": "p", "location": "l", "id": "s", "spec": { "threshold": 0.9 } }));
        let delta = DiffEngine::new().diff(&schema(), &d, &d).unwrap();
        assert!(delta.is_empty());
    }

    #[test]
    fn test_threshold_change() {
        let desired = doc(json!({ "spec": { "threshold": 0.99 } }));
        let observed = doc(json!({ "spec": { "threshold": 0.9 } }));

        let delta = DiffEngine::new().diff(&schema(), &desired, &observed).unwrap();

        assert_eq!(
            delta.entries,
            vec![DeltaEntry {
                path: String::from("spec.threshold"),
                kind: ChangeKind::Change,
                old: Some(json!(0.9)),
                new: Some(json!(0.99)),
                mutability: Mutability::Updatable,
            }]
        );
    }

    #[test]
    fn test_add_and_remove() {
        let desired = doc(json!({ "description": "new" }));
        let observed = doc(json!({ "spec": { "threshold": 1 } }));

        let delta = DiffEngine::new().diff(&schema(), &desired, &observed).unwrap();

        assert_eq!(delta.paths(), vec!["description", "spec.threshold"]);
        assert_eq!(delta.entries[0].kind, ChangeKind::Add);
        assert_eq!(delta.entries[1].kind, ChangeKind::Remove);
        assert_eq!(delta.entries[1].new, None);
    }

    #[test]
    fn test_numbers_compare_by_value() {
        let desired = doc(json!({ "spec": { "threshold": 1 } }));
        let observed = doc(json!({ "spec": { "threshold": 1.0 } }));
        assert!(DiffEngine::new().diff(&schema(), &desired, &observed).unwrap().is_empty());
    }

    #[test]
    fn test_computed_fields_ignored_unless_desired() {
        let observed = doc(json!({ "create_time": "2024-01-01T00:00:00Z" }));
        let engine = DiffEngine::new();

        assert!(engine.diff(&schema(), Document::new(), &observed).unwrap().is_empty());

        let desired = doc(json!({ "create_time": "2025-01-01T00:00:00Z" }));
        let delta = engine.diff(&schema(), &desired, &observed).unwrap();
        assert_eq!(delta.paths(), vec!["create_time"]);
    }

    #[test]
    fn test_absent_field_compared_to_default() {
        let engine = DiffEngine::new();

        let at_default = doc(json!({ "spec": { "publish": false } }));
        assert!(engine.diff(&schema(), Document::new(), &at_default).unwrap().is_empty());

        let off_default = doc(json!({ "spec": { "publish": true } }));
        let delta = engine.diff(&schema(), Document::new(), &off_default).unwrap();
        assert_eq!(delta.entries[0].kind, ChangeKind::Change);
        assert_eq!(delta.entries[0].new, Some(json!(false)));
    }

    #[test]
    fn test_unknown_field_is_mismatch() {
        let desired = doc(json!({ "spec": { "unknown": 1 } }));
        let err = DiffEngine::new().diff(&schema(), &desired, Document::new()).unwrap_err();
        assert!(matches!(
            err,
            ConvergentError::Schema(SchemaError::SchemaMismatch { ref path, .. }) if path == "spec.unknown"
        ));
    }

    #[test]
    fn test_wrong_type_is_mismatch() {
        let desired = doc(json!({ "spec": { "threshold": "high" } }));
        assert!(DiffEngine::new().diff(&schema(), &desired, Document::new()).is_err());
    }

    #[test]
    fn test_immutable_entry_detected() {
        let desired = doc(json!({ "location": "us-east1", "description": "x" }));
        let observed = doc(json!({ "location": "us-central1", "description": "y" }));
        let delta = DiffEngine::new().diff(&schema(), &desired, &observed).unwrap();
        assert!(delta.touches_immutable());
    }

    #[test]
    fn test_without_ignores_paths_and_children() {
        let desired = doc(json!({ "description": "a", "spec": { "threshold": 2 } }));
        let delta = DiffEngine::new().diff(&schema(), &desired, Document::new()).unwrap();

        assert_eq!(delta.without(&["spec"]).paths(), vec!["description"]);
        assert_eq!(delta.without(&["spe"]).len(), 2);
    }

    #[test]
    fn test_object_equality_ignores_nulls() {
        assert!(values_equal(&json!({ "a": 1, "b": null }), &json!({ "a": 1.0 })));
        assert!(!values_equal(&json!([1, 2]), &json!([2, 1])));
    }
}
