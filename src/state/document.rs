//! Desired and observed state documents.
//!
//! A [`Document`] is a JSON object tree addressed by dotted field paths
//! (`data_quality_spec.sampling_percent`). `null` is treated as absent
//! everywhere, so a field explicitly set to `null` and a missing field
//! compare equal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Separator between path segments.
pub const PATH_SEPARATOR: char = '.';

/// A tree of field path to value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Map<String, Value>);

/// The caller's target configuration for one resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DesiredState {
    /// Field values.
    pub document: Document,
}

/// A resource's configuration as read from the remote system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedState {
    /// Remote identifier the document was read from.
    pub remote_id: String,
    /// Field values reported by the remote.
    pub document: Document,
    /// When the document was fetched.
    pub fetched_at: DateTime<Utc>,
}

impl Document {
    /// Creates an empty document.
    #[must_use]
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Returns the value at `path`, treating `null` as absent.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split(PATH_SEPARATOR);
        let first = segments.next()?;
        let mut current = self.0.get(first)?;

        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }

        if current.is_null() { None } else { Some(current) }
    }

    /// Returns true if a non-null value exists at `path`.
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Sets the value at `path`, creating intermediate objects as needed.
    ///
    /// A non-object intermediate value is replaced by an object.
    pub fn set(&mut self, path: &str, value: Value) {
        let segments: Vec<&str> = path.split(PATH_SEPARATOR).collect();
        let Some((last, parents)) = segments.split_last() else {
            return;
        };

        let mut current = &mut self.0;
        for segment in parents {
            let entry = current
                .entry((*segment).to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            let Value::Object(next) = entry else {
                return;
            };
            current = next;
        }

        current.insert((*last).to_string(), value);
    }

    /// Removes the value at `path`, returning it if present.
    pub fn remove(&mut self, path: &str) -> Option<Value> {
        let segments: Vec<&str> = path.split(PATH_SEPARATOR).collect();
        let (last, parents) = segments.split_last()?;

        let mut current = &mut self.0;
        for segment in parents {
            current = current.get_mut(*segment)?.as_object_mut()?;
        }

        current.remove(*last).filter(|v| !v.is_null())
    }

    /// Returns true if the document has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.values().all(Value::is_null)
    }

    /// Returns the top-level map.
    #[must_use]
    pub const fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Converts the document into a JSON value.
    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Returns the document as a JSON value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

impl TryFrom<Value> for Document {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Ok(Self::new()),
            other => Err(format!("expected a JSON object, found {}", json_type_name(&other))),
        }
    }
}

impl From<Map<String, Value>> for Document {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl AsRef<Self> for Document {
    fn as_ref(&self) -> &Self {
        self
    }
}

impl DesiredState {
    /// Creates a desired state from a document.
    #[must_use]
    pub const fn new(document: Document) -> Self {
        Self { document }
    }

    /// Returns the value at `path`.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        self.document.get(path)
    }
}

impl TryFrom<Value> for DesiredState {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Document::try_from(value).map(Self::new)
    }
}

impl AsRef<Document> for DesiredState {
    fn as_ref(&self) -> &Document {
        &self.document
    }
}

impl ObservedState {
    /// Creates an observed state fetched now.
    #[must_use]
    pub fn new(remote_id: impl Into<String>, document: Document) -> Self {
        Self {
            remote_id: remote_id.into(),
            document,
            fetched_at: Utc::now(),
        }
    }

    /// Returns the value at `path`.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        self.document.get(path)
    }
}

impl AsRef<Document> for ObservedState {
    fn as_ref(&self) -> &Document {
        &self.document
    }
}

/// Returns a short name for the JSON type of `value`.
#[must_use]
pub const fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        Document::try_from(value).expect("object")
    }

    #[test]
    fn test_get_nested_path() {
        let d = doc(json!({
            "data_quality_spec": { "sampling_percent": 5, "row_filter": "age > 10" }
        }));

        assert_eq!(d.get("data_quality_spec.sampling_percent"), Some(&json!(5)));
        assert_eq!(d.get("data_quality_spec.missing"), None);
        assert_eq!(d.get("data_quality_spec.row_filter.deeper"), None);
    }

    #[test]
    fn test_null_is_absent() {
        let d = doc(json!({ "description": null }));
        assert!(!d.contains("description"));
        assert!(d.is_empty());
    }

    #[test]
    fn test_set_creates_intermediates() {
        let mut d = Document::new();
        d.set("template_metadata.enforcement_type", json!("INSPECT_ONLY"));
        d.set("location", json!("us-central1"));

        assert_eq!(
            d.to_value(),
            json!({
                "template_metadata": { "enforcement_type": "INSPECT_ONLY" },
                "location": "us-central1"
            })
        );
    }

    #[test]
    fn test_set_replaces_scalar_intermediate() {
        let mut d = doc(json!({ "execution_spec": "on-demand" }));
        d.set("execution_spec.trigger", json!({ "on_demand": {} }));
        assert_eq!(d.get("execution_spec.trigger"), Some(&json!({ "on_demand": {} })));
    }

    #[test]
    fn test_remove_nested() {
        let mut d = doc(json!({ "labels": { "author": "billing" }, "description": "x" }));
        assert_eq!(d.remove("labels.author"), Some(json!("billing")));
        assert_eq!(d.remove("labels.author"), None);
        assert_eq!(d.remove("nope.deeper"), None);
        assert!(d.contains("description"));
    }

    #[test]
    fn test_non_object_rejected() {
        let err = Document::try_from(json!([1, 2])).unwrap_err();
        assert!(err.contains("list"));
    }
}
