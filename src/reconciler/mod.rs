//! Reconciler for converging remote resources to desired state.
//!
//! A cycle observes the resource, diffs it against the desired document,
//! classifies the delta into a plan, applies the plan and re-diffs the
//! result to detect residual drift. Cycles for one remote identity are
//! serialized; cycles for distinct identities run on independent tasks.

mod import;
mod verify;

pub use import::Importer;
pub use verify::Verifier;

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ConfigHasher, EngineConfig, ResourceConfig};
use crate::error::{ConvergentError, ReconcileError, Result};
use crate::planner::{ApplyExecutor, Delta, DiffEngine, OperationRecord, Plan, PlanAction, ResourcePlan};
use crate::remote::{PollPolicy, RemoteClient};
use crate::retry::RetryConfig;
use crate::schema::SchemaRegistry;
use crate::state::{DesiredState, Document, ObservedState};

/// A named desired-state document of a given kind.
#[derive(Debug, Clone)]
pub struct ManagedResource {
    /// Manifest resource name.
    pub name: String,
    /// Registered resource kind.
    pub kind: String,
    /// Desired state.
    pub desired: DesiredState,
    /// Identifier the resource was last applied under.
    pub previous_remote_id: Option<String>,
}

impl ManagedResource {
    /// Creates a managed resource.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: impl Into<String>, desired: DesiredState) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            desired,
            previous_remote_id: None,
        }
    }

    /// Sets the identifier the resource was last applied under, so a change
    /// to an identity field plans a replacement of that resource.
    #[must_use]
    pub fn with_previous_remote_id(mut self, remote_id: impl Into<String>) -> Self {
        self.previous_remote_id = Some(remote_id.into());
        self
    }

    /// Returns the previous identifier if it differs from `remote_id`.
    fn moved_from(&self, remote_id: &str) -> Option<&str> {
        self.previous_remote_id.as_deref().filter(|previous| *previous != remote_id)
    }

    /// Builds a managed resource from a manifest entry.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the desired document is not a mapping.
    pub fn from_config(config: &ResourceConfig) -> Result<Self> {
        Ok(Self::new(&config.name, &config.kind, config.desired_state()?))
    }
}

/// Reconciler for maintaining desired state.
#[derive(Clone)]
pub struct Reconciler {
    /// Executor issuing remote calls.
    executor: ApplyExecutor,
    /// Diff engine.
    diff_engine: DiffEngine,
    /// Configuration hasher.
    hasher: ConfigHasher,
    /// Paths never reported as drift.
    ignore: Arc<[String]>,
    /// One async mutex per remote identity held or awaited.
    locks: Arc<LockMap>,
    /// Cancellation shared by every cycle.
    cancel: CancellationToken,
}

type LockMap = Mutex<HashMap<String, Arc<AsyncMutex<()>>>>;

/// Exclusive hold on one remote identity. Releasing the last holder removes
/// the identity from the lock map.
struct IdentityGuard {
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<LockMap>,
    remote_id: String,
}

impl Drop for IdentityGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks.get(&self.remote_id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&self.remote_id);
        }
    }
}

/// Result of one reconciliation cycle.
#[derive(Debug, Serialize)]
pub struct CycleReport {
    /// Unique cycle identifier.
    pub cycle_id: Uuid,
    /// Manifest resource name.
    pub name: String,
    /// Plan the cycle executed.
    pub plan: ResourcePlan,
    /// Outcome of the apply step.
    pub record: OperationRecord,
    /// Delta left after apply, outside the ignore-set. `None` if apply failed.
    pub drift: Option<Delta>,
}

/// Report of drift detection across resources.
#[derive(Debug, Serialize)]
pub struct DriftReport {
    /// Per-resource findings, in input order.
    pub resources: Vec<DriftEntry>,
}

/// Drift finding for one resource.
#[derive(Debug, Serialize)]
pub struct DriftEntry {
    /// Manifest resource name.
    pub name: String,
    /// Resource kind.
    pub kind: String,
    /// Remote identifier.
    pub remote_id: String,
    /// Action a cycle would take.
    pub action: PlanAction,
    /// Differing fields outside the ignore-set.
    pub delta: Delta,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("executor", &self.executor)
            .field("ignore", &self.ignore)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a reconciler with default polling and retry policies.
    #[must_use]
    pub fn new(registry: Arc<SchemaRegistry>, client: Arc<dyn RemoteClient>) -> Self {
        let cancel = CancellationToken::new();
        Self {
            executor: ApplyExecutor::new(registry, client).with_cancellation(cancel.clone()),
            diff_engine: DiffEngine::new(),
            hasher: ConfigHasher::new(),
            ignore: Arc::from(Vec::new()),
            locks: Arc::default(),
            cancel,
        }
    }

    /// Creates a reconciler using the polling, retry and verification
    /// settings of `config`.
    #[must_use]
    pub fn from_config(registry: Arc<SchemaRegistry>, client: Arc<dyn RemoteClient>, config: &EngineConfig) -> Self {
        Self::new(registry, client)
            .with_poll_policy(config.polling.policy())
            .with_retry(config.retry.clone())
            .with_ignore(config.verify.ignore.iter().cloned())
    }

    /// Sets the polling policy.
    #[must_use]
    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.executor = self.executor.with_poll_policy(poll);
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.executor = self.executor.with_retry(retry);
        self
    }

    /// Sets the paths excluded from drift checks.
    #[must_use]
    pub fn with_ignore<I, S>(mut self, ignore: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore = ignore.into_iter().map(Into::into).collect();
        self
    }

    /// Replaces the cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.executor = self.executor.with_cancellation(cancel.clone());
        self.cancel = cancel;
        self
    }

    /// Returns the cancellation token shared by every cycle.
    #[must_use]
    pub const fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Requests cancellation of in-flight cycles.
    pub fn cancel(&self) {
        info!("Cancellation requested");
        self.cancel.cancel();
    }

    /// Returns the executor.
    #[must_use]
    pub const fn executor(&self) -> &ApplyExecutor {
        &self.executor
    }

    /// Returns the ignore-set.
    #[must_use]
    pub fn ignore(&self) -> &[String] {
        &self.ignore
    }

    /// Returns a verifier using this reconciler's ignore-set.
    #[must_use]
    pub fn verifier(&self) -> Verifier<'_> {
        Verifier::new(&self.executor, &self.ignore)
    }

    /// Computes the plan for a resource without applying it.
    ///
    /// # Errors
    ///
    /// Returns an error if the kind is unknown, the desired document does not
    /// match the schema, or the resource cannot be read.
    pub async fn plan(&self, resource: &ManagedResource) -> Result<ResourcePlan> {
        self.plan_with_observed(resource).await.map(|(plan, _)| plan)
    }

    /// Plans every resource in order.
    ///
    /// # Errors
    ///
    /// Returns the first planning error.
    pub async fn plan_all(&self, resources: &[ManagedResource]) -> Result<Vec<ResourcePlan>> {
        let mut plans = Vec::with_capacity(resources.len());
        for resource in resources {
            plans.push(self.plan(resource).await?);
        }
        Ok(plans)
    }

    /// Runs one diff, plan, apply and verify cycle for a resource.
    ///
    /// Apply failures are reported inside the [`CycleReport`]; use
    /// [`CycleReport::into_result`] to turn them into errors.
    ///
    /// # Errors
    ///
    /// Returns an error if the cycle fails before anything is applied.
    pub async fn reconcile(&self, resource: &ManagedResource) -> Result<CycleReport> {
        let cycle_id = Uuid::new_v4();
        let remote_id = self.remote_id(resource)?;

        let _guards = self.lock_identities(&remote_id, resource.moved_from(&remote_id)).await;
        info!(%cycle_id, name = %resource.name, kind = %resource.kind, %remote_id, "Starting cycle");

        let (plan, observed) = self.plan_with_observed(resource).await?;
        let record = self
            .executor
            .apply(&resource.kind, &plan.plan, &resource.desired, observed.as_ref())
            .await;

        let drift = match (&record.observed, record.success) {
            (Some(after), true) => {
                let schema = self.executor.registry().lookup(&resource.kind)?;
                let delta = self
                    .diff_engine
                    .diff(&schema, &resource.desired, after)?
                    .without(&self.ignore);
                if !delta.is_empty() {
                    warn!(%cycle_id, %remote_id, fields = ?delta.paths(), "Resource did not converge");
                }
                Some(delta)
            }
            _ => None,
        };

        info!(
            %cycle_id,
            %remote_id,
            action = %record.action,
            success = record.success,
            converged = drift.as_ref().is_some_and(Delta::is_empty),
            "Cycle finished"
        );

        Ok(CycleReport {
            cycle_id,
            name: resource.name.clone(),
            plan,
            record,
            drift,
        })
    }

    /// Reconciles resources on independent tasks and returns their reports
    /// in input order.
    pub async fn reconcile_all(&self, resources: Vec<ManagedResource>) -> Vec<Result<CycleReport>> {
        let handles: Vec<_> = resources
            .into_iter()
            .map(|resource| {
                let reconciler = self.clone();
                tokio::spawn(async move { reconciler.reconcile(&resource).await })
            })
            .collect();

        let mut reports = Vec::with_capacity(handles.len());
        for handle in handles {
            let report = handle
                .await
                .unwrap_or_else(|e| Err(ConvergentError::internal(format!("Cycle task failed: {e}"))));
            reports.push(report);
        }
        reports
    }

    /// Imports a resource by remote identifier.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the resource does not exist.
    pub async fn import(&self, kind: &str, remote_id: &str) -> Result<DesiredState> {
        let _guard = self.lock_identity(remote_id).await;
        Importer::new(&self.executor).import_by_id(kind, remote_id).await
    }

    /// Deletes a managed resource and waits until it is gone.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote identifier cannot be resolved.
    pub async fn destroy(&self, resource: &ManagedResource) -> Result<OperationRecord> {
        let remote_id = self.remote_id(resource)?;
        Ok(self.destroy_by_id(&resource.kind, &remote_id).await)
    }

    /// Deletes a resource by remote identifier and waits until it is gone.
    pub async fn destroy_by_id(&self, kind: &str, remote_id: &str) -> OperationRecord {
        let _guard = self.lock_identity(remote_id).await;
        self.executor.destroy(kind, remote_id).await
    }

    /// Checks resources for drift without applying changes.
    ///
    /// # Errors
    ///
    /// Returns the first planning error.
    pub async fn check_drift(&self, resources: &[ManagedResource]) -> Result<DriftReport> {
        info!(resources = resources.len(), "Checking for drift");

        let mut entries = Vec::with_capacity(resources.len());
        for resource in resources {
            let plan = self.plan(resource).await?;
            entries.push(DriftEntry {
                name: plan.name,
                kind: plan.kind,
                remote_id: plan.remote_id,
                action: plan.plan.action(),
                delta: plan.delta.without(&self.ignore),
            });
        }

        Ok(DriftReport { resources: entries })
    }

    async fn plan_with_observed(&self, resource: &ManagedResource) -> Result<(ResourcePlan, Option<ObservedState>)> {
        let schema = self.executor.registry().lookup(&resource.kind)?;
        DiffEngine::validate(&schema, &resource.desired.document)?;
        let remote_id = schema.resolve_identity(&resource.desired.document)?;

        let mut observed = self.executor.observe(&schema, &remote_id).await?;
        if observed.is_none()
            && let Some(previous) = resource.moved_from(&remote_id)
        {
            observed = self.executor.observe(&schema, previous).await?;
            if observed.is_some() {
                info!(name = %resource.name, from = previous, to = %remote_id, "Identity changed");
            }
        }

        let empty = Document::new();
        let current = observed.as_ref().map_or(&empty, |o| &o.document);

        let delta = self.diff_engine.diff(&schema, &resource.desired, current)?;
        let plan = Plan::for_observed(observed.as_ref(), &delta);
        let config_hash = self.hasher.hash_document(&resource.desired.document);

        debug!(
            name = %resource.name,
            %remote_id,
            action = %plan.action(),
            changes = delta.len(),
            "Planned"
        );

        let mut plan = ResourcePlan::new(&resource.name, &resource.kind, remote_id, plan, delta, config_hash);
        if let Some(existing) = &observed {
            plan = plan.with_replaces(&existing.remote_id);
        }
        Ok((plan, observed))
    }

    fn remote_id(&self, resource: &ManagedResource) -> Result<String> {
        let schema = self.executor.registry().lookup(&resource.kind)?;
        Ok(schema.resolve_identity(&resource.desired.document)?)
    }

    async fn lock_identity(&self, remote_id: &str) -> IdentityGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(remote_id.to_string()).or_default())
        };
        IdentityGuard {
            guard: Some(lock.lock_owned().await),
            locks: Arc::clone(&self.locks),
            remote_id: remote_id.to_string(),
        }
    }

    /// Locks the current identity and, during an identity change, the
    /// previous one. Locks are taken in sorted order.
    async fn lock_identities(&self, remote_id: &str, previous: Option<&str>) -> Vec<IdentityGuard> {
        let mut ids: Vec<&str> = std::iter::once(remote_id).chain(previous).collect();
        ids.sort_unstable();

        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            guards.push(self.lock_identity(id).await);
        }
        guards
    }
}

impl CycleReport {
    /// Returns true if the plan was applied and nothing drifted afterwards.
    #[must_use]
    pub fn is_converged(&self) -> bool {
        self.record.success && self.drift.as_ref().is_some_and(Delta::is_empty)
    }

    /// Converts the report into the final observed state.
    ///
    /// # Errors
    ///
    /// Returns the apply error, or `DriftDetected` if the resource did not
    /// converge.
    pub fn into_result(self) -> Result<Option<ObservedState>> {
        let kind = self.record.kind.clone();
        let remote_id = self.record.remote_id.clone();
        let drift = self.drift;
        let observed = self.record.into_result()?;

        match drift {
            Some(delta) if !delta.is_empty() => Err(ReconcileError::DriftDetected {
                kind,
                remote_id,
                delta,
            }
            .into()),
            _ => Ok(observed),
        }
    }
}

impl DriftReport {
    /// Returns true if any resource differs from its desired state.
    #[must_use]
    pub fn has_drift(&self) -> bool {
        self.resources.iter().any(DriftEntry::has_drift)
    }

    /// Returns true if the state is converged (no drift).
    #[must_use]
    pub fn is_converged(&self) -> bool {
        !self.has_drift()
    }

    /// Returns the drifted entries.
    #[must_use]
    pub fn drifted(&self) -> Vec<&DriftEntry> {
        self.resources.iter().filter(|e| e.has_drift()).collect()
    }
}

impl DriftEntry {
    /// Returns true if the resource is missing or differs outside the
    /// ignore-set.
    #[must_use]
    pub fn has_drift(&self) -> bool {
        self.action == PlanAction::Create || !self.delta.is_empty()
    }
}

impl std::fmt::Display for CycleReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Cycle {} for '{}':", self.cycle_id, self.name)?;
        writeln!(f, "  Plan: {}", self.plan.description())?;
        writeln!(f, "  Result: {}", self.record)?;
        match &self.drift {
            Some(delta) if delta.is_empty() => write!(f, "  Converged"),
            Some(delta) => write!(f, "  Drift: {delta}"),
            None => write!(f, "  Not verified"),
        }
    }
}

impl std::fmt::Display for DriftReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let drifted = self.drifted();
        if drifted.is_empty() {
            return write!(f, "No drift detected - state is converged");
        }

        writeln!(f, "Drift detected:")?;
        for entry in drifted {
            writeln!(f, "  - {} ({}): {}", entry.name, entry.remote_id, entry.action)?;
            for change in &entry.delta.entries {
                writeln!(f, "      {change}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{InMemoryRemote, OperationMode, RemoteMethod};
    use crate::schema::builtin;
    use serde_json::{Value, json};
    use std::time::Duration;

    const SCAN: &str = "projects/p/locations/us-central1/dataScans/quality";

    fn remote() -> Arc<InMemoryRemote> {
        Arc::new(InMemoryRemote::new())
    }

    fn reconciler(remote: &Arc<InMemoryRemote>) -> Reconciler {
        let registry = Arc::new(SchemaRegistry::builtin().unwrap());
        Reconciler::new(registry, Arc::clone(remote) as Arc<dyn RemoteClient>)
            .with_poll_policy(PollPolicy::new(Duration::from_millis(1), Duration::from_millis(200)))
            .with_retry(RetryConfig {
                max_attempts: 3,
                initial_delay_ms: 1,
                max_delay_ms: 2,
                multiplier: 2.0,
            })
    }

    fn scan(id: &str, extra: &Value) -> ManagedResource {
        let mut desired = json!({
            "project": "p",
            "location": "us-central1",
            "data_scan_id": id,
            "description": "quality checks",
            "labels": { "team": "data" },
            "data": { "resource": "//bigquery.googleapis.com/projects/p/datasets/d/tables/t" },
            "data_quality_spec": {
                "sampling_percent": 5,
                "rules": [{ "column": "address", "dimension": "VALIDITY", "threshold": 0.99, "non_null_expectation": {} }]
            }
        });
        if let (Value::Object(base), Value::Object(extra)) = (&mut desired, extra) {
            for (k, v) in extra {
                base.insert(k.clone(), v.clone());
            }
        }
        ManagedResource::new(id, builtin::DATAPLEX_DATASCAN, DesiredState::try_from(desired).unwrap())
    }

    #[tokio::test]
    async fn test_second_cycle_is_noop() {
        let remote = remote();
        let reconciler = reconciler(&remote);
        let resource = scan("quality", &json!({}));

        let first = reconciler.reconcile(&resource).await.unwrap();
        assert_eq!(first.plan.plan, Plan::Create);
        assert!(first.is_converged(), "{first}");

        let mutations = remote.calls_of(RemoteMethod::Create) + remote.calls_of(RemoteMethod::Update);
        let second = reconciler.reconcile(&resource).await.unwrap();
        assert_eq!(second.plan.plan, Plan::NoOp);
        assert_eq!(second.record.remote_calls, 0);
        assert!(second.is_converged());
        assert_eq!(
            remote.calls_of(RemoteMethod::Create) + remote.calls_of(RemoteMethod::Update),
            mutations
        );
    }

    #[tokio::test]
    async fn test_threshold_change_is_in_place_update() {
        let remote = remote();
        let reconciler = reconciler(&remote);
        reconciler.reconcile(&scan("quality", &json!({}))).await.unwrap();

        let changed = scan(
            "quality",
            &json!({ "data_quality_spec": { "sampling_percent": 10, "rules": [] } }),
        );
        let plan = reconciler.plan(&changed).await.unwrap();
        Verifier::expect_action(&plan, PlanAction::Update).unwrap();
        assert_eq!(
            plan.plan,
            Plan::InPlaceUpdate {
                fields: vec![
                    String::from("data_quality_spec.sampling_percent"),
                    String::from("data_quality_spec.rules"),
                ]
            }
        );

        let report = reconciler.reconcile(&changed).await.unwrap();
        assert!(report.is_converged(), "{report}");
        assert_eq!(remote.get(SCAN).unwrap().get("data_quality_spec.sampling_percent"), Some(&json!(10)));
    }

    #[tokio::test]
    async fn test_immutable_change_replaces() {
        let remote = Arc::new(InMemoryRemote::new().with_operation_mode(OperationMode::Async { pending_polls: 1 }));
        let reconciler = reconciler(&remote);
        reconciler.reconcile(&scan("quality", &json!({}))).await.unwrap();

        let moved = scan(
            "quality",
            &json!({
                "description": "moved",
                "data": { "resource": "//bigquery.googleapis.com/projects/p/datasets/d/tables/other" }
            }),
        );
        let report = reconciler.reconcile(&moved).await.unwrap();

        assert_eq!(report.plan.plan.action(), PlanAction::Replace);
        assert!(report.is_converged(), "{report}");
        assert_eq!(remote.calls_of(RemoteMethod::Delete), 1);
        assert_eq!(remote.calls_of(RemoteMethod::Update), 0);
    }

    #[tokio::test]
    async fn test_location_change_replaces_previous_identity() {
        const MOVED: &str = "projects/p/locations/us-east1/dataScans/quality";
        let remote = remote();
        let reconciler = reconciler(&remote);
        let first = reconciler.reconcile(&scan("quality", &json!({}))).await.unwrap();
        assert!(first.is_converged(), "{first}");

        let moved = scan("quality", &json!({ "location": "us-east1" })).with_previous_remote_id(&first.record.remote_id);
        let plan = reconciler.plan(&moved).await.unwrap();
        assert_eq!(
            plan.plan,
            Plan::Replace {
                immutable_fields: vec![String::from("location")]
            }
        );
        assert_eq!(plan.remote_id, MOVED);
        assert_eq!(plan.existing_remote_id(), SCAN);

        let report = reconciler.reconcile(&moved).await.unwrap();
        assert!(report.is_converged(), "{report}");
        assert_eq!(report.record.remote_id, MOVED);
        assert!(!remote.contains(SCAN));
        assert!(remote.contains(MOVED));

        // Without the previous identifier the old resource is invisible.
        let unlinked = scan("quality", &json!({ "location": "europe-west1" }));
        assert_eq!(reconciler.plan(&unlinked).await.unwrap().plan, Plan::Create);
    }

    #[tokio::test]
    async fn test_identity_locks_are_released() {
        let remote = Arc::new(InMemoryRemote::new().with_latency(Duration::from_millis(5)));
        let reconciler = reconciler(&remote);

        let resources = vec![
            scan("quality", &json!({})),
            scan("quality", &json!({ "description": "second" })),
            scan("freshness", &json!({})),
        ];
        for report in reconciler.reconcile_all(resources).await {
            report.unwrap();
        }
        reconciler.destroy_by_id(builtin::DATAPLEX_DATASCAN, SCAN).await;

        assert!(reconciler.locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_server_filled_field_is_reported_as_drift() {
        let remote = Arc::new(
            InMemoryRemote::new().with_server_default(builtin::DATAPLEX_DATASCAN, "display_name", json!("generated")),
        );
        let reconciler = reconciler(&remote);

        let report = reconciler.reconcile(&scan("quality", &json!({}))).await.unwrap();
        assert!(report.record.success);
        assert!(!report.is_converged());

        let err = report.into_result().unwrap_err();
        assert!(matches!(err, ConvergentError::Reconcile(ReconcileError::DriftDetected { .. })));

        let tolerant = reconciler.clone().with_ignore(["display_name"]);
        let report = tolerant.reconcile(&scan("quality", &json!({}))).await.unwrap();
        assert!(report.is_converged(), "{report}");
    }

    #[tokio::test]
    async fn test_cycles_on_one_identity_are_serialized() {
        let remote = Arc::new(InMemoryRemote::new().with_latency(Duration::from_millis(10)));
        let reconciler = reconciler(&remote);

        let resources = vec![
            scan("quality", &json!({})),
            scan("quality", &json!({ "description": "second" })),
            scan("quality", &json!({ "description": "third" })),
        ];
        let reports = reconciler.reconcile_all(resources).await;

        assert!(reports.iter().all(Result::is_ok));
        assert_eq!(remote.peak_concurrency_for(SCAN), 1);
        assert_eq!(remote.calls_of(RemoteMethod::Create), 1);
    }

    #[tokio::test]
    async fn test_distinct_identities_run_in_parallel() {
        let remote = Arc::new(InMemoryRemote::new().with_latency(Duration::from_millis(10)));
        let reconciler = reconciler(&remote);

        let resources: Vec<ManagedResource> = ["alpha", "beta", "gamma"]
            .into_iter()
            .map(|id| scan(id, &json!({})))
            .collect();
        let reports = reconciler.reconcile_all(resources).await;

        let names: Vec<String> = reports
            .into_iter()
            .map(|r| r.unwrap().name)
            .collect();
        assert_eq!(names, vec!["alpha", "beta", "gamma"]);
        assert!(remote.peak_concurrency() > 1);
    }

    #[tokio::test]
    async fn test_cancelled_replace_is_partial() {
        let remote = remote();
        let reconciler = reconciler(&remote);
        reconciler.reconcile(&scan("quality", &json!({}))).await.unwrap();

        remote.set_operation_mode(OperationMode::Stuck);
        reconciler.cancel();

        let moved = scan(
            "quality",
            &json!({ "data": { "resource": "//bigquery.googleapis.com/projects/p/datasets/d/tables/other" } }),
        );
        let report = reconciler.reconcile(&moved).await.unwrap();
        assert!(report.drift.is_none());

        let err = report.into_result().unwrap_err();
        assert!(matches!(
            err,
            ConvergentError::Reconcile(ReconcileError::PartialReplace { .. })
        ));
        assert_eq!(remote.calls_of(RemoteMethod::Create), 1);
    }

    #[tokio::test]
    async fn test_check_drift_after_out_of_band_edit() {
        let remote = remote();
        let reconciler = reconciler(&remote).with_ignore(["labels"]);
        let resources = vec![scan("quality", &json!({})), scan("missing", &json!({}))];
        reconciler.reconcile(&resources[0]).await.unwrap();

        remote.mutate(SCAN, |doc| {
            doc.set("description", json!("edited in console"));
            doc.set("labels", json!({ "team": "other" }));
        });

        let report = reconciler.check_drift(&resources).await.unwrap();
        assert!(report.has_drift());

        let drifted = report.drifted();
        assert_eq!(drifted.len(), 2);
        assert_eq!(drifted[0].action, PlanAction::Update);
        assert_eq!(drifted[0].delta.paths(), vec!["description"]);
        assert_eq!(drifted[1].action, PlanAction::Create);
    }

    #[tokio::test]
    async fn test_import_round_trip_after_apply() {
        let remote = remote();
        let reconciler = reconciler(&remote).with_ignore(["labels"]);
        let resource = scan("quality", &json!({}));
        reconciler.reconcile(&resource).await.unwrap().into_result().unwrap();

        let imported = reconciler.import(builtin::DATAPLEX_DATASCAN, SCAN).await.unwrap();
        assert!(imported.get("labels").is_none());

        reconciler
            .verifier()
            .verify_import(builtin::DATAPLEX_DATASCAN, SCAN, &resource.desired)
            .await
            .unwrap();

        let adopted = ManagedResource::new("quality", builtin::DATAPLEX_DATASCAN, imported);
        let plan = reconciler.plan(&adopted).await.unwrap();
        assert_eq!(plan.delta.without(reconciler.ignore()), Delta::default());
    }

    #[tokio::test]
    async fn test_destroy_then_verify() {
        let remote = remote();
        let reconciler = reconciler(&remote);
        let resource = scan("quality", &json!({}));
        reconciler.reconcile(&resource).await.unwrap();

        let record = reconciler.destroy(&resource).await.unwrap();
        assert!(record.success, "{record}");
        reconciler
            .verifier()
            .verify_destroyed(builtin::DATAPLEX_DATASCAN, SCAN)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unknown_kind_fails_before_apply() {
        let remote = remote();
        let reconciler = reconciler(&remote);
        let resource = ManagedResource::new("x", "storage_bucket", DesiredState::new(Document::new()));

        assert!(reconciler.reconcile(&resource).await.is_err());
        assert_eq!(remote.call_count(), 0);
    }
}
