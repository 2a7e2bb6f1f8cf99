//! Apply executor for resource plans.
//!
//! This module issues the remote calls a [`Plan`] needs, waits for
//! long-running operations, and re-reads the resource afterwards. Failures
//! never escape as `Err`: they are captured in the [`OperationRecord`]
//! together with the last known observed state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{ConvergentError, ReconcileError, RemoteError, ReplacePhase, Result};
use crate::remote::{Mutation, OperationStatus, PollPolicy, Poller, RemoteClient, ResourceRef};
use crate::retry::{RetryConfig, retry_remote};
use crate::schema::{ResourceSchema, SchemaRegistry};
use crate::state::{DesiredState, Document, ObservedState};

use super::plan::{Plan, PlanAction};

/// Executor for resource plans.
#[derive(Clone)]
pub struct ApplyExecutor {
    /// Schema registry.
    registry: Arc<SchemaRegistry>,
    /// Remote client.
    client: Arc<dyn RemoteClient>,
    /// Operation polling bounds.
    poll: PollPolicy,
    /// Backoff for transient read and poll errors.
    retry: RetryConfig,
    /// Cooperative cancellation.
    cancel: CancellationToken,
}

/// Result of executing a plan.
#[derive(Debug, Serialize)]
pub struct OperationRecord {
    /// Resource kind.
    pub kind: String,
    /// Remote identifier, empty if it could not be resolved.
    pub remote_id: String,
    /// Action that was executed.
    pub action: PlanAction,
    /// Whether the plan was applied completely.
    pub success: bool,
    /// Names of awaited long-running operations.
    pub operations: Vec<String>,
    /// Final or last known observed state.
    pub observed: Option<ObservedState>,
    /// Error on failure.
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<ConvergentError>,
    /// Number of remote calls issued.
    pub remote_calls: usize,
    /// When execution started.
    pub started_at: DateTime<Utc>,
    /// When execution finished.
    pub finished_at: DateTime<Utc>,
}

impl std::fmt::Debug for ApplyExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplyExecutor")
            .field("backend", &self.client.backend_type())
            .field("poll", &self.poll)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl ApplyExecutor {
    /// Creates a new executor.
    #[must_use]
    pub fn new(registry: Arc<SchemaRegistry>, client: Arc<dyn RemoteClient>) -> Self {
        Self {
            registry,
            client,
            poll: PollPolicy::default(),
            retry: RetryConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Sets the polling policy.
    #[must_use]
    pub const fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the cancellation token checked between polls.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Returns the schema registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// Returns the remote client.
    #[must_use]
    pub fn client(&self) -> &dyn RemoteClient {
        self.client.as_ref()
    }

    /// Reads the current state of a resource.
    ///
    /// Identity fields encoded in the remote identifier are filled in when
    /// the response body does not carry them.
    ///
    /// # Errors
    ///
    /// Returns the first non-transient read error.
    pub async fn observe(&self, schema: &ResourceSchema, remote_id: &str) -> Result<Option<ObservedState>> {
        observe_with(self.client.as_ref(), &self.retry, schema, remote_id).await
    }

    /// Applies `plan` for a resource of `kind`.
    pub async fn apply(
        &self,
        kind: &str,
        plan: &Plan,
        desired: &DesiredState,
        last_observed: Option<&ObservedState>,
    ) -> OperationRecord {
        let client = CountingClient::new(self.client.as_ref());
        let mut record = OperationRecord::started(kind, plan.action(), last_observed.cloned());

        info!(kind, action = %plan.action(), "Applying plan");
        let result = self.run_plan(&client, kind, plan, desired, &mut record).await;
        record.finish(result, client.count());
        record
    }

    /// Deletes a resource and waits until it is gone.
    pub async fn destroy(&self, kind: &str, remote_id: &str) -> OperationRecord {
        let client = CountingClient::new(self.client.as_ref());
        let mut record = OperationRecord::started(kind, PlanAction::Delete, None);
        remote_id.clone_into(&mut record.remote_id);

        info!(kind, remote_id, "Destroying resource");
        let result: Result<()> = async {
            let schema = self.registry.lookup(kind)?;
            let resource = ResourceRef::new(&schema, remote_id);
            let poller = Poller::new(&client, self.poll, &self.retry, &self.cancel, remote_id);
            if let Some(operation) = delete_and_wait(&client, &poller, &resource).await? {
                record.operations.push(operation);
            }
            Ok(())
        }
        .await;

        record.finish(result, client.count());
        record
    }

    async fn run_plan(
        &self,
        client: &CountingClient<'_>,
        kind: &str,
        plan: &Plan,
        desired: &DesiredState,
        record: &mut OperationRecord,
    ) -> Result<()> {
        let schema = self.registry.lookup(kind)?;
        let remote_id = schema.resolve_identity(&desired.document)?;
        record.remote_id.clone_from(&remote_id);

        let resource = ResourceRef::new(&schema, &remote_id);
        let poller = Poller::new(client, self.poll, &self.retry, &self.cancel, &remote_id);

        match plan {
            Plan::NoOp => {
                debug!(%remote_id, "Nothing to apply");
                return Ok(());
            }
            Plan::Create => {
                let body = request_body(&schema, &desired.document);
                let mutation = client.create(&resource, &body).await?;
                record.push_operation(poller.settle(mutation).await?);
            }
            Plan::InPlaceUpdate { fields } => {
                let patch = update_patch(&schema, &desired.document, fields);
                let mutation = client.update(&resource, &patch, fields).await?;
                record.push_operation(poller.settle(mutation).await?);
            }
            Plan::Replace { immutable_fields } => {
                // A changed identity field moves the resource to a new identifier.
                let existing_id = record
                    .observed
                    .as_ref()
                    .map_or_else(|| remote_id.clone(), |o| o.remote_id.clone());
                info!(%remote_id, existing = %existing_id, fields = ?immutable_fields, "Replacing resource");

                let existing = ResourceRef::new(&schema, &existing_id);
                let delete_poller = Poller::new(client, self.poll, &self.retry, &self.cancel, &existing_id);
                match delete_and_wait(client, &delete_poller, &existing).await {
                    Ok(operation) => record.push_operation(operation),
                    Err(e) if e.is_cancelled() => {
                        return Err(partial_replace(&existing_id, ReplacePhase::Delete, &e));
                    }
                    Err(e) => return Err(e),
                }
                record.observed = None;

                let body = request_body(&schema, &desired.document);
                let created: Result<Option<String>> = async {
                    let mutation = client.create(&resource, &body).await?;
                    poller.settle(mutation).await
                }
                .await;
                match created {
                    Ok(operation) => record.push_operation(operation),
                    Err(e) => return Err(partial_replace(&remote_id, ReplacePhase::Create, &e)),
                }
            }
        }

        let observed = observe_with(client, &self.retry, &schema, &remote_id).await?;
        if observed.is_none() {
            return Err(RemoteError::InvalidResponse {
                message: format!("{remote_id} is missing after apply"),
            }
            .into());
        }
        record.observed = observed;
        Ok(())
    }
}

/// Reads a resource and fills in identity fields.
async fn observe_with(
    client: &dyn RemoteClient,
    retry: &RetryConfig,
    schema: &ResourceSchema,
    remote_id: &str,
) -> Result<Option<ObservedState>> {
    let resource = ResourceRef::new(schema, remote_id);
    let Some(mut document) = retry_remote(retry, "read", || client.read(&resource)).await? else {
        return Ok(None);
    };

    if let Some(identity) = schema.parse_identity(remote_id) {
        for (field, value) in identity.as_map() {
            if !document.contains(field) {
                document.set(field, value.clone());
            }
        }
    }

    Ok(Some(ObservedState::new(remote_id, document)))
}

/// Deletes a resource, awaits the operation, then waits until reads stop
/// returning it. A resource that is already gone counts as deleted.
async fn delete_and_wait(
    client: &dyn RemoteClient,
    poller: &Poller<'_>,
    resource: &ResourceRef,
) -> Result<Option<String>> {
    let operation = match client.delete(resource).await {
        Ok(mutation) => poller.settle(mutation).await?,
        Err(e) if e.is_not_found() => {
            debug!(remote_id = %resource.remote_id, "Resource already deleted");
            None
        }
        Err(e) => return Err(e),
    };
    poller.wait_gone(resource).await?;
    Ok(operation)
}

fn partial_replace(remote_id: &str, phase: ReplacePhase, cause: &ConvergentError) -> ConvergentError {
    warn!(remote_id, %phase, error = %cause, "Replace interrupted");
    ReconcileError::PartialReplace {
        remote_id: remote_id.to_string(),
        phase,
        reason: cause.to_string(),
    }
    .into()
}

/// Builds a create body: the desired document without the identity fields
/// that travel in the URL.
fn request_body(schema: &ResourceSchema, desired: &Document) -> Document {
    let mut body = desired.clone();
    for field in schema.identity_fields() {
        body.remove(field);
    }
    body
}

/// Builds a patch holding only the changed fields. Fields cleared in desired
/// state fall back to their default or are left out, so they appear in the
/// update mask only.
fn update_patch(schema: &ResourceSchema, desired: &Document, fields: &[String]) -> Document {
    let mut patch = Document::new();
    for path in fields {
        let value = desired
            .get(path)
            .cloned()
            .or_else(|| schema.field(path).and_then(|f| f.default.clone()));
        if let Some(value) = value {
            patch.set(path, value);
        }
    }
    patch
}

impl OperationRecord {
    fn started(kind: &str, action: PlanAction, observed: Option<ObservedState>) -> Self {
        let now = Utc::now();
        Self {
            kind: kind.to_string(),
            remote_id: String::new(),
            action,
            success: false,
            operations: Vec::new(),
            observed,
            error: None,
            remote_calls: 0,
            started_at: now,
            finished_at: now,
        }
    }

    fn push_operation(&mut self, operation: Option<String>) {
        self.operations.extend(operation);
    }

    fn finish(&mut self, result: Result<()>, remote_calls: usize) {
        self.remote_calls = remote_calls;
        self.finished_at = Utc::now();
        match result {
            Ok(()) => {
                self.success = true;
                info!(
                    kind = %self.kind,
                    remote_id = %self.remote_id,
                    action = %self.action,
                    remote_calls,
                    "Apply finished"
                );
            }
            Err(e) => {
                error!(
                    kind = %self.kind,
                    remote_id = %self.remote_id,
                    action = %self.action,
                    error = %e,
                    "Apply failed"
                );
                self.success = false;
                self.error = Some(e);
            }
        }
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }

    /// Returns the error as an owned result, consuming the record.
    ///
    /// # Errors
    ///
    /// Returns the captured error if execution failed.
    pub fn into_result(self) -> Result<Option<ObservedState>> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.observed),
        }
    }
}

impl std::fmt::Display for OperationRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} ({}): {} after {} remote calls",
            self.action,
            self.kind,
            self.remote_id,
            if self.success { "ok" } else { "failed" },
            self.remote_calls
        )?;
        if let Some(e) = &self.error {
            write!(f, ": {e}")?;
        }
        Ok(())
    }
}

fn serialize_error<S: Serializer>(error: &Option<ConvergentError>, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    match error {
        Some(e) => serializer.serialize_some(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

/// Client wrapper counting every call made through it.
struct CountingClient<'a> {
    inner: &'a dyn RemoteClient,
    calls: AtomicUsize,
}

impl<'a> CountingClient<'a> {
    const fn new(inner: &'a dyn RemoteClient) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn tick(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RemoteClient for CountingClient<'_> {
    async fn create(&self, resource: &ResourceRef, body: &Document) -> Result<Mutation> {
        self.tick();
        self.inner.create(resource, body).await
    }

    async fn read(&self, resource: &ResourceRef) -> Result<Option<Document>> {
        self.tick();
        self.inner.read(resource).await
    }

    async fn update(&self, resource: &ResourceRef, patch: &Document, update_mask: &[String]) -> Result<Mutation> {
        self.tick();
        self.inner.update(resource, patch, update_mask).await
    }

    async fn delete(&self, resource: &ResourceRef) -> Result<Mutation> {
        self.tick();
        self.inner.delete(resource).await
    }

    async fn poll_operation(&self, operation: &str) -> Result<OperationStatus> {
        self.tick();
        self.inner.poll_operation(operation).await
    }

    fn backend_type(&self) -> &'static str {
        self.inner.backend_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{Fault, InMemoryRemote, MockRemoteClient, OperationMode, RemoteMethod};
    use crate::schema::{FieldSpec, FieldType};
    use serde_json::{Value, json};
    use std::time::Duration;

    const ID: &str = "projects/p/locations/us-central1/scans/s1";

    fn registry() -> Arc<SchemaRegistry> {
        let schema = ResourceSchema::new("scan", "projects/{project}/locations/{location}/scans/{scan_id}")
            .with_create_id_param("scanId")
            .with_field(FieldSpec::immutable("project", FieldType::String).not_importable())
            .with_field(FieldSpec::immutable("location", FieldType::String).not_importable())
            .with_field(FieldSpec::immutable("scan_id", FieldType::String).not_importable())
            .with_field(FieldSpec::updatable("description", FieldType::String))
            .with_field(FieldSpec::updatable("spec.threshold", FieldType::Number))
            .with_field(FieldSpec::computed("name", FieldType::String));
        Arc::new(SchemaRegistry::builder().register("scan", schema).unwrap().build())
    }

    fn desired(value: Value) -> DesiredState {
        let mut doc = Document::try_from(value).unwrap();
        doc.set("project", json!("p"));
        doc.set("location", json!("us-central1"));
        doc.set("scan_id", json!("s1"));
        DesiredState::new(doc)
    }

    fn executor(remote: &Arc<InMemoryRemote>) -> ApplyExecutor {
        ApplyExecutor::new(registry(), Arc::clone(remote) as Arc<dyn RemoteClient>)
            .with_poll_policy(PollPolicy::new(Duration::from_millis(1), Duration::from_millis(100)))
            .with_retry(RetryConfig {
                max_attempts: 3,
                initial_delay_ms: 1,
                max_delay_ms: 2,
                multiplier: 2.0,
            })
    }

    #[tokio::test]
    async fn test_create_then_observe() {
        let remote = Arc::new(InMemoryRemote::new().with_operation_mode(OperationMode::Async { pending_polls: 2 }));
        let record = executor(&remote)
            .apply("scan", &Plan::Create, &desired(json!({ "description": "d" })), None)
            .await;

        assert!(record.success, "{record}");
        assert_eq!(record.remote_id, ID);
        assert_eq!(record.operations.len(), 1);
        let observed = record.observed.unwrap();
        assert_eq!(observed.get("description"), Some(&json!("d")));
        assert_eq!(observed.get("location"), Some(&json!("us-central1")));

        let stored = remote.get(ID).unwrap();
        assert!(!stored.contains("location"), "identity fields travel in the URL");
    }

    #[tokio::test]
    async fn test_noop_makes_no_calls() {
        let mut client = MockRemoteClient::new();
        client.expect_create().never();
        client.expect_read().never();
        client.expect_update().never();
        client.expect_delete().never();
        client.expect_poll_operation().never();
        client.expect_backend_type().return_const("mock");

        let executor = ApplyExecutor::new(registry(), Arc::new(client));
        let last = ObservedState::new(ID, Document::new());
        let record = executor
            .apply("scan", &Plan::NoOp, &desired(json!({})), Some(&last))
            .await;

        assert!(record.success);
        assert_eq!(record.remote_calls, 0);
        assert_eq!(record.observed.unwrap().remote_id, ID);
    }

    #[tokio::test]
    async fn test_update_sends_only_changed_fields() {
        let remote = Arc::new(InMemoryRemote::new());
        remote.insert(ID, Document::try_from(json!({ "description": "keep", "spec": { "threshold": 0.9 } })).unwrap());

        let plan = Plan::InPlaceUpdate {
            fields: vec![String::from("spec.threshold")],
        };
        let record = executor(&remote)
            .apply("scan", &plan, &desired(json!({ "description": "ignored", "spec": { "threshold": 0.99 } })), None)
            .await;

        assert!(record.success, "{record}");
        let stored = remote.get(ID).unwrap();
        assert_eq!(stored.get("spec.threshold"), Some(&json!(0.99)));
        assert_eq!(stored.get("description"), Some(&json!("keep")));
        assert_eq!(remote.calls_of(RemoteMethod::Update), 1);
    }

    #[tokio::test]
    async fn test_replace_deletes_before_create() {
        let remote = Arc::new(InMemoryRemote::new().with_operation_mode(OperationMode::Async { pending_polls: 1 }));
        remote.insert(ID, Document::try_from(json!({ "description": "old" })).unwrap());

        let plan = Plan::Replace {
            immutable_fields: vec![String::from("location")],
        };
        let record = executor(&remote)
            .apply("scan", &plan, &desired(json!({ "description": "new" })), None)
            .await;

        assert!(record.success, "{record}");
        assert_eq!(record.operations.len(), 2);

        let methods: Vec<RemoteMethod> = remote
            .calls()
            .into_iter()
            .map(|c| c.method)
            .filter(|m| matches!(m, RemoteMethod::Create | RemoteMethod::Delete))
            .collect();
        assert_eq!(methods, vec![RemoteMethod::Delete, RemoteMethod::Create]);
        assert_eq!(remote.get(ID).unwrap().get("description"), Some(&json!("new")));
    }

    #[tokio::test]
    async fn test_replace_removes_resource_under_old_identity() {
        const OLD: &str = "projects/p/locations/europe-west1/scans/s1";
        let remote = Arc::new(InMemoryRemote::new());
        remote.insert(OLD, Document::try_from(json!({ "description": "old" })).unwrap());
        let last = ObservedState::new(OLD, remote.get(OLD).unwrap());

        let plan = Plan::Replace {
            immutable_fields: vec![String::from("location")],
        };
        let record = executor(&remote)
            .apply("scan", &plan, &desired(json!({ "description": "moved" })), Some(&last))
            .await;

        assert!(record.success, "{record}");
        assert_eq!(record.remote_id, ID);
        assert!(!remote.contains(OLD));
        assert_eq!(remote.get(ID).unwrap().get("description"), Some(&json!("moved")));
    }

    #[tokio::test]
    async fn test_delete_timeout_never_creates() {
        let remote = Arc::new(InMemoryRemote::new().with_operation_mode(OperationMode::Stuck));
        remote.insert(ID, Document::new());

        let plan = Plan::Replace {
            immutable_fields: vec![String::from("location")],
        };
        let record = executor(&remote).apply("scan", &plan, &desired(json!({})), None).await;

        assert!(!record.success);
        assert!(matches!(
            record.error,
            Some(ConvergentError::Remote(RemoteError::OperationTimeout { .. }))
        ));
        assert_eq!(remote.calls_of(RemoteMethod::Create), 0);
        assert!(remote.contains(ID));
    }

    #[tokio::test]
    async fn test_create_failure_after_delete_is_partial_replace() {
        let remote = Arc::new(InMemoryRemote::new());
        remote.insert(ID, Document::new());
        remote.inject_fault(RemoteMethod::Create, Fault::Rejected(400, String::from("quota exceeded")));

        let plan = Plan::Replace {
            immutable_fields: vec![String::from("location")],
        };
        let record = executor(&remote).apply("scan", &plan, &desired(json!({})), None).await;

        assert!(matches!(
            record.error,
            Some(ConvergentError::Reconcile(ReconcileError::PartialReplace { phase: ReplacePhase::Create, .. }))
        ));
        assert!(record.observed.is_none());
        assert!(!remote.contains(ID));
    }

    #[tokio::test]
    async fn test_cancel_during_delete_is_partial_replace() {
        let remote = Arc::new(InMemoryRemote::new().with_operation_mode(OperationMode::Stuck));
        remote.insert(ID, Document::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let plan = Plan::Replace {
            immutable_fields: vec![String::from("location")],
        };
        let record = executor(&remote)
            .with_cancellation(cancel)
            .apply("scan", &plan, &desired(json!({})), None)
            .await;

        assert!(matches!(
            record.error,
            Some(ConvergentError::Reconcile(ReconcileError::PartialReplace { phase: ReplacePhase::Delete, .. }))
        ));
        assert_eq!(remote.calls_of(RemoteMethod::Create), 0);
    }

    #[tokio::test]
    async fn test_rejected_update_not_retried() {
        let remote = Arc::new(InMemoryRemote::new());
        remote.insert(ID, Document::new());
        remote.inject_fault(RemoteMethod::Update, Fault::Rejected(400, String::from("bad threshold")));

        let plan = Plan::InPlaceUpdate {
            fields: vec![String::from("spec.threshold")],
        };
        let record = executor(&remote)
            .apply("scan", &plan, &desired(json!({ "spec": { "threshold": 2 } })), None)
            .await;

        assert!(matches!(
            record.error,
            Some(ConvergentError::Remote(RemoteError::ApplyRejected { status: 400, .. }))
        ));
        assert_eq!(remote.calls_of(RemoteMethod::Update), 1);
    }

    #[tokio::test]
    async fn test_destroy_waits_until_gone() {
        let remote = Arc::new(InMemoryRemote::new().with_operation_mode(OperationMode::Async { pending_polls: 1 }));
        remote.insert(ID, Document::new());

        let record = executor(&remote).destroy("scan", ID).await;

        assert!(record.success, "{record}");
        assert_eq!(record.action, PlanAction::Delete);
        assert!(!remote.contains(ID));
    }

    #[tokio::test]
    async fn test_destroy_missing_resource_succeeds() {
        let remote = Arc::new(InMemoryRemote::new());
        let record = executor(&remote).destroy("scan", ID).await;
        assert!(record.success);
    }

    #[tokio::test]
    async fn test_unknown_kind_is_recorded() {
        let remote = Arc::new(InMemoryRemote::new());
        let record = executor(&remote).apply("widget", &Plan::Create, &desired(json!({})), None).await;
        assert!(!record.success);
        assert_eq!(record.remote_calls, 0);
    }
}
