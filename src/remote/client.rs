//! Remote client trait definition.
//!
//! This module defines the interface every remote backend implements:
//! CRUD on a resource identified by its remote id, plus polling of
//! long-running operations returned by mutations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ConvergentError, RemoteError, Result};
use crate::schema::ResourceSchema;
use crate::state::Document;

/// Address of one remote resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    /// Resource kind.
    pub kind: String,
    /// Full remote identifier, e.g. `projects/p/locations/l/dataScans/s`.
    pub remote_id: String,
    /// Query parameter carrying the leaf id on create.
    pub create_id_param: Option<String>,
}

/// Outcome of a mutating call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// The change is already in effect.
    Completed,
    /// The change runs asynchronously under the named operation.
    Pending {
        /// Operation name to poll.
        operation: String,
    },
}

/// Status of a long-running operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationStatus {
    /// Operation name.
    pub name: String,
    /// Whether the operation finished.
    pub done: bool,
    /// Error reported by a finished operation.
    pub error: Option<OperationFault>,
}

/// Error carried by a failed operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationFault {
    /// Numeric code.
    pub code: i64,
    /// Canonical status name, e.g. `INVALID_ARGUMENT`.
    pub status: String,
    /// Message from the remote.
    pub message: String,
}

/// Trait for remote API backends.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Creates the resource.
    async fn create(&self, resource: &ResourceRef, body: &Document) -> Result<Mutation>;

    /// Reads the resource.
    ///
    /// Returns `None` if it does not exist.
    async fn read(&self, resource: &ResourceRef) -> Result<Option<Document>>;

    /// Patches the fields named in `update_mask`.
    ///
    /// Fields in the mask but absent from `patch` are cleared.
    async fn update(
        &self,
        resource: &ResourceRef,
        patch: &Document,
        update_mask: &[String],
    ) -> Result<Mutation>;

    /// Deletes the resource.
    async fn delete(&self, resource: &ResourceRef) -> Result<Mutation>;

    /// Fetches the status of a long-running operation.
    async fn poll_operation(&self, operation: &str) -> Result<OperationStatus>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}

#[async_trait]
impl RemoteClient for Box<dyn RemoteClient> {
    async fn create(&self, resource: &ResourceRef, body: &Document) -> Result<Mutation> {
        (**self).create(resource, body).await
    }

    async fn read(&self, resource: &ResourceRef) -> Result<Option<Document>> {
        (**self).read(resource).await
    }

    async fn update(
        &self,
        resource: &ResourceRef,
        patch: &Document,
        update_mask: &[String],
    ) -> Result<Mutation> {
        (**self).update(resource, patch, update_mask).await
    }

    async fn delete(&self, resource: &ResourceRef) -> Result<Mutation> {
        (**self).delete(resource).await
    }

    async fn poll_operation(&self, operation: &str) -> Result<OperationStatus> {
        (**self).poll_operation(operation).await
    }

    fn backend_type(&self) -> &'static str {
        (**self).backend_type()
    }
}

impl ResourceRef {
    /// Creates a reference for a resource of `schema`'s kind.
    #[must_use]
    pub fn new(schema: &ResourceSchema, remote_id: impl Into<String>) -> Self {
        Self {
            kind: schema.kind.clone(),
            remote_id: remote_id.into(),
            create_id_param: schema.create_id_param.clone(),
        }
    }

    /// Splits the identifier into parent path, collection and leaf id.
    ///
    /// `projects/p/locations/l/dataScans/s` yields
    /// `("projects/p/locations/l", "dataScans", "s")`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidResponse` if the identifier has fewer than two segments.
    pub fn split(&self) -> Result<(&str, &str, &str)> {
        let mut parts = self.remote_id.rsplitn(3, '/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(leaf), Some(collection), parent) if !leaf.is_empty() && !collection.is_empty() => {
                Ok((parent.unwrap_or(""), collection, leaf))
            }
            _ => Err(RemoteError::InvalidResponse {
                message: format!("malformed remote identifier '{}'", self.remote_id),
            }
            .into()),
        }
    }
}

impl OperationFault {
    /// Converts the fault into a typed error.
    ///
    /// `ABORTED` and `ALREADY_EXISTS` are conflicts; everything else a
    /// finished operation reports is a permanent rejection.
    #[must_use]
    pub fn into_error(self) -> ConvergentError {
        match self.status.as_str() {
            "ABORTED" | "ALREADY_EXISTS" => RemoteError::RemoteConflict {
                message: format!("{}: {}", self.status, self.message),
            }
            .into(),
            _ => RemoteError::rejected(
                u16::try_from(self.code).unwrap_or(500),
                format!("{}: {}", self.status, self.message),
            )
            .into(),
        }
    }
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind, self.remote_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(id: &str) -> ResourceRef {
        ResourceRef {
            kind: String::from("dataplex_datascan"),
            remote_id: id.to_string(),
            create_id_param: Some(String::from("dataScanId")),
        }
    }

    #[test]
    fn test_split_identifier() {
        let r = reference("projects/p/locations/us-central1/dataScans/scan-1");
        assert_eq!(
            r.split().unwrap(),
            ("projects/p/locations/us-central1", "dataScans", "scan-1")
        );
    }

    #[test]
    fn test_split_without_parent() {
        assert_eq!(reference("things/t").split().unwrap(), ("", "things", "t"));
        assert!(reference("t").split().is_err());
        assert!(reference("things/").split().is_err());
    }

    #[test]
    fn test_aborted_fault_is_conflict() {
        let fault = OperationFault {
            code: 10,
            status: String::from("ABORTED"),
            message: String::from("concurrent modification"),
        };
        assert!(matches!(
            fault.into_error(),
            ConvergentError::Remote(RemoteError::RemoteConflict { .. })
        ));
    }

    #[test]
    fn test_other_fault_is_rejection() {
        let fault = OperationFault {
            code: 3,
            status: String::from("INVALID_ARGUMENT"),
            message: String::from("bad rule"),
        };
        let err = fault.into_error();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("INVALID_ARGUMENT"));
    }
}
