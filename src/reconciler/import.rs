//! Import of existing remote resources.
//!
//! An import reads a resource by its remote identifier and rebuilds the
//! desired-state document a manifest would need to adopt it.

use tracing::{debug, info};

use crate::error::{RemoteError, Result};
use crate::planner::ApplyExecutor;
use crate::state::{DesiredState, Document, ObservedState};

/// Reconstructs desired state from remote resources.
#[derive(Debug, Clone, Copy)]
pub struct Importer<'a> {
    executor: &'a ApplyExecutor,
}

impl<'a> Importer<'a> {
    /// Creates an importer reading through `executor`.
    #[must_use]
    pub const fn new(executor: &'a ApplyExecutor) -> Self {
        Self { executor }
    }

    /// Imports a resource of `kind` by remote identifier.
    ///
    /// Every importable field present remotely is copied. Identity fields are
    /// taken from `remote_id` itself. Everything else is left absent.
    ///
    /// # Errors
    ///
    /// Returns `UnknownKind` for unregistered kinds and `NotFound` if the
    /// resource does not exist.
    pub async fn import_by_id(&self, kind: &str, remote_id: &str) -> Result<DesiredState> {
        self.import_with_observed(kind, remote_id)
            .await
            .map(|(desired, _)| desired)
    }

    /// Imports a resource and also returns the observed state it came from.
    ///
    /// # Errors
    ///
    /// Same as [`Importer::import_by_id`].
    pub async fn import_with_observed(&self, kind: &str, remote_id: &str) -> Result<(DesiredState, ObservedState)> {
        let schema = self.executor.registry().lookup(kind)?;

        info!(kind, remote_id, "Importing resource");
        let observed = self
            .executor
            .observe(&schema, remote_id)
            .await?
            .ok_or_else(|| RemoteError::not_found(kind, remote_id))?;

        let mut document = Document::new();
        for field in schema.fields.iter().filter(|f| f.importable) {
            if let Some(value) = observed.get(&field.path).filter(|v| !v.is_null()) {
                document.set(&field.path, value.clone());
            }
        }

        if let Some(identity) = schema.parse_identity(remote_id) {
            for (field, value) in identity.as_map() {
                document.set(field, value.clone());
            }
        }

        debug!(kind, remote_id, fields = document.as_map().len(), "Import complete");
        Ok((DesiredState::new(document), observed))
    }
}
