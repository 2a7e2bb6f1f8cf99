//! Post-cycle verification.
//!
//! These checks turn the differ into assertions: after an apply the
//! resource must not drift, an import must reproduce what was applied, a
//! destroyed resource must be gone, and a plan must have the expected
//! classification. Paths in the ignore-set, and anything nested below
//! them, never count as drift.

use tracing::{debug, warn};

use crate::error::{ReconcileError, Result};
use crate::planner::{ApplyExecutor, ChangeKind, Delta, DiffEngine, PlanAction, ResourcePlan};
use crate::state::{DesiredState, Document, ObservedState};

use super::import::Importer;

/// Verification checks against the remote.
#[derive(Debug, Clone, Copy)]
pub struct Verifier<'a> {
    executor: &'a ApplyExecutor,
    ignore: &'a [String],
}

impl<'a> Verifier<'a> {
    /// Creates a verifier reading through `executor`.
    #[must_use]
    pub const fn new(executor: &'a ApplyExecutor, ignore: &'a [String]) -> Self {
        Self { executor, ignore }
    }

    /// Re-reads the resource and checks that `desired` has converged.
    ///
    /// A resource that does not exist is compared against an empty document.
    /// Returns the freshly observed state.
    ///
    /// # Errors
    ///
    /// Returns `DriftDetected` with the remaining delta outside the
    /// ignore-set, or the read error.
    pub async fn verify_stable(&self, kind: &str, desired: &DesiredState) -> Result<Option<ObservedState>> {
        let schema = self.executor.registry().lookup(kind)?;
        let remote_id = schema.resolve_identity(&desired.document)?;

        let observed = self.executor.observe(&schema, &remote_id).await?;
        let empty = Document::new();
        let current = observed.as_ref().map_or(&empty, |o| &o.document);

        let delta = DiffEngine::new().diff(&schema, desired, current)?.without(self.ignore);
        self.check(kind, &remote_id, delta)?;

        debug!(kind, %remote_id, "Resource is stable");
        Ok(observed)
    }

    /// Imports the resource and compares it with the applied desired state.
    ///
    /// Fields the applied document leaves unset are not compared.
    ///
    /// # Errors
    ///
    /// Returns `DriftDetected` listing mismatching fields, or the import
    /// error.
    pub async fn verify_import(&self, kind: &str, remote_id: &str, applied: &DesiredState) -> Result<()> {
        let schema = self.executor.registry().lookup(kind)?;
        let imported = Importer::new(self.executor).import_by_id(kind, remote_id).await?;

        let mut delta = DiffEngine::new().diff(&schema, applied, &imported)?.without(self.ignore);
        delta.entries.retain(|e| e.kind != ChangeKind::Remove);

        self.check(kind, remote_id, delta)?;
        debug!(kind, remote_id, "Import matches applied state");
        Ok(())
    }

    /// Checks that a resource no longer exists.
    ///
    /// # Errors
    ///
    /// Returns `NotDestroyed` if the resource can still be read.
    pub async fn verify_destroyed(&self, kind: &str, remote_id: &str) -> Result<()> {
        let schema = self.executor.registry().lookup(kind)?;
        if self.executor.observe(&schema, remote_id).await?.is_some() {
            warn!(kind, remote_id, "Resource still exists");
            return Err(ReconcileError::NotDestroyed {
                kind: kind.to_string(),
                remote_id: remote_id.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Checks that `plan` has the `expected` classification.
    ///
    /// # Errors
    ///
    /// Returns `UnexpectedPlan` when the classification differs.
    pub fn expect_action(plan: &ResourcePlan, expected: PlanAction) -> Result<()> {
        let actual = plan.plan.action();
        if actual == expected {
            return Ok(());
        }

        Err(ReconcileError::UnexpectedPlan {
            resource: if plan.name.is_empty() {
                plan.remote_id.clone()
            } else {
                plan.name.clone()
            },
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
        .into())
    }

    /// Filters a delta through the ignore-set.
    #[must_use]
    pub fn residual(&self, delta: &Delta) -> Delta {
        delta.without(self.ignore)
    }

    fn check(&self, kind: &str, remote_id: &str, delta: Delta) -> Result<()> {
        if delta.is_empty() {
            return Ok(());
        }

        warn!(kind, remote_id, fields = ?delta.paths(), "Drift detected");
        Err(ReconcileError::DriftDetected {
            kind: kind.to_string(),
            remote_id: remote_id.to_string(),
            delta,
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConvergentError;
    use crate::planner::Plan;
    use crate::remote::{InMemoryRemote, RemoteClient};
    use crate::schema::{SchemaRegistry, builtin};
    use serde_json::{Value, json};
    use std::sync::Arc;

    const TEMPLATE: &str = "projects/p/locations/us-central1/templates/basic";

    fn setup() -> (Arc<InMemoryRemote>, ApplyExecutor) {
        let remote = Arc::new(InMemoryRemote::new());
        let registry = Arc::new(SchemaRegistry::builtin().unwrap());
        let executor = ApplyExecutor::new(registry, Arc::clone(&remote) as Arc<dyn RemoteClient>);
        (remote, executor)
    }

    fn desired(extra: Value) -> DesiredState {
        let mut doc = Document::try_from(json!({
            "project": "p",
            "location": "us-central1",
            "template_id": "basic",
            "labels": { "env": "test" },
            "filter_config": {
                "rai_settings": { "rai_filters": [{ "filter_type": "HATE_SPEECH", "confidence_level": "HIGH" }] }
            }
        }))
        .unwrap();
        if let Value::Object(map) = extra {
            for (k, v) in map {
                doc.set(&k, v);
            }
        }
        DesiredState::new(doc)
    }

    async fn apply(executor: &ApplyExecutor, desired: &DesiredState) {
        let record = executor
            .apply(builtin::MODEL_ARMOR_TEMPLATE, &Plan::Create, desired, None)
            .await;
        assert!(record.success, "{record}");
    }

    #[tokio::test]
    async fn test_stable_after_apply() {
        let (_remote, executor) = setup();
        let desired = desired(json!({}));
        apply(&executor, &desired).await;

        let observed = Verifier::new(&executor, &[])
            .verify_stable(builtin::MODEL_ARMOR_TEMPLATE, &desired)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(observed.remote_id, TEMPLATE);
    }

    #[tokio::test]
    async fn test_out_of_band_change_is_drift() {
        let (remote, executor) = setup();
        let desired = desired(json!({}));
        apply(&executor, &desired).await;

        remote.mutate(TEMPLATE, |doc| doc.set("labels", json!({ "env": "prod" })));

        let err = Verifier::new(&executor, &[])
            .verify_stable(builtin::MODEL_ARMOR_TEMPLATE, &desired)
            .await
            .unwrap_err();
        match err {
            ConvergentError::Reconcile(ReconcileError::DriftDetected { delta, .. }) => {
                assert_eq!(delta.paths(), vec!["labels"]);
            }
            other => panic!("unexpected error: {other}"),
        }

        let ignore = vec![String::from("labels")];
        Verifier::new(&executor, &ignore)
            .verify_stable(builtin::MODEL_ARMOR_TEMPLATE, &desired)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_import_verify_needs_labels_ignored() {
        let (_remote, executor) = setup();
        let desired = desired(json!({}));
        apply(&executor, &desired).await;

        let strict = Verifier::new(&executor, &[])
            .verify_import(builtin::MODEL_ARMOR_TEMPLATE, TEMPLATE, &desired)
            .await;
        assert!(strict.is_err(), "labels are not importable");

        let ignore = vec![String::from("labels"), String::from("terraform_labels")];
        Verifier::new(&executor, &ignore)
            .verify_import(builtin::MODEL_ARMOR_TEMPLATE, TEMPLATE, &desired)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_verify_destroyed() {
        let (remote, executor) = setup();
        let desired = desired(json!({}));
        apply(&executor, &desired).await;

        let verifier = Verifier::new(&executor, &[]);
        let err = verifier
            .verify_destroyed(builtin::MODEL_ARMOR_TEMPLATE, TEMPLATE)
            .await
            .unwrap_err();
        assert!(matches!(err, ConvergentError::Reconcile(ReconcileError::NotDestroyed { .. })));

        remote.remove(TEMPLATE);
        verifier
            .verify_destroyed(builtin::MODEL_ARMOR_TEMPLATE, TEMPLATE)
            .await
            .unwrap();
    }

    #[test]
    fn test_expect_action() {
        let plan = ResourcePlan::new(
            "basic",
            builtin::MODEL_ARMOR_TEMPLATE,
            TEMPLATE,
            Plan::Replace {
                immutable_fields: vec![String::from("location")],
            },
            Delta::default(),
            "hash",
        );

        Verifier::expect_action(&plan, PlanAction::Replace).unwrap();
        let err = Verifier::expect_action(&plan, PlanAction::Update).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Reconciliation error: Expected plan 'update' for 'basic', got 'replace'"
        );
    }
}
