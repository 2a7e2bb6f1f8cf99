//! In-memory simulated remote.
//!
//! Behaves like a Google-style REST API: server-computed fields, optional
//! long-running operations whose effects land when they complete, a call
//! log and one-shot fault injection. Used by the `memory` backend and by
//! engine-level tests.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::{ConvergentError, RemoteError, Result};
use crate::state::Document;

use super::client::{Mutation, OperationFault, OperationStatus, RemoteClient, ResourceRef};

/// Remote method names for the call log and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteMethod {
    /// `create`.
    Create,
    /// `read`.
    Read,
    /// `update`.
    Update,
    /// `delete`.
    Delete,
    /// `poll_operation`.
    PollOperation,
}

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCall {
    /// Method invoked.
    pub method: RemoteMethod,
    /// Remote id or operation name.
    pub target: String,
}

/// How mutations complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperationMode {
    /// Mutations take effect immediately.
    #[default]
    Synchronous,
    /// Mutations return an operation that reports `done` after the given
    /// number of unfinished polls.
    Async {
        /// Polls answered with `done: false` before completion.
        pending_polls: u32,
    },
    /// Mutations return an operation that never finishes.
    Stuck,
}

/// An injectable failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Transient network failure.
    Network(String),
    /// Permanent rejection with a status code.
    Rejected(u16, String),
    /// Conflicting concurrent write.
    Conflict(String),
}

#[derive(Debug)]
enum Effect {
    Create { remote_id: String, document: Document },
    Patch { remote_id: String, patch: Document, mask: Vec<String> },
    Delete { remote_id: String },
}

#[derive(Debug)]
struct PendingOperation {
    owner: String,
    remaining: Option<u32>,
    effect: Option<Effect>,
    error: Option<OperationFault>,
    done: bool,
}

#[derive(Debug, Default)]
struct Inner {
    resources: BTreeMap<String, Document>,
    operations: HashMap<String, PendingOperation>,
    next_operation: u64,
    mode: OperationMode,
    calls: Vec<RemoteCall>,
    faults: HashMap<RemoteMethod, VecDeque<Fault>>,
    operation_errors: VecDeque<OperationFault>,
    server_defaults: HashMap<String, Vec<(String, Value)>>,
    in_flight: HashMap<String, usize>,
    peak_per_target: HashMap<String, usize>,
    in_flight_total: usize,
    peak_total: usize,
}

/// Simulated remote API held entirely in memory.
#[derive(Debug, Default)]
pub struct InMemoryRemote {
    inner: Mutex<Inner>,
    latency: Duration,
}

impl InMemoryRemote {
    /// Creates an empty remote with synchronous mutations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every call by `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Sets how mutations complete.
    #[must_use]
    pub fn with_operation_mode(self, mode: OperationMode) -> Self {
        self.set_operation_mode(mode);
        self
    }

    /// Makes the server fill `path` with `value` on create when absent.
    #[must_use]
    pub fn with_server_default(self, kind: &str, path: &str, value: Value) -> Self {
        self.lock()
            .server_defaults
            .entry(kind.to_string())
            .or_default()
            .push((path.to_string(), value));
        self
    }

    /// Changes how subsequent mutations complete.
    pub fn set_operation_mode(&self, mode: OperationMode) {
        self.lock().mode = mode;
    }

    /// Queues a fault returned by the next call to `method`.
    pub fn inject_fault(&self, method: RemoteMethod, fault: Fault) {
        self.lock().faults.entry(method).or_default().push_back(fault);
    }

    /// Makes the next asynchronous operation finish with `fault`.
    pub fn inject_operation_error(&self, fault: OperationFault) {
        self.lock().operation_errors.push_back(fault);
    }

    /// Stores a resource directly, bypassing the API.
    pub fn insert(&self, remote_id: &str, document: Document) {
        self.lock().resources.insert(remote_id.to_string(), document);
    }

    /// Returns the stored document for a resource.
    #[must_use]
    pub fn get(&self, remote_id: &str) -> Option<Document> {
        self.lock().resources.get(remote_id).cloned()
    }

    /// Removes a resource directly, bypassing the API.
    pub fn remove(&self, remote_id: &str) -> Option<Document> {
        self.lock().resources.remove(remote_id)
    }

    /// Edits a stored resource out of band. Returns false if it is absent.
    pub fn mutate(&self, remote_id: &str, edit: impl FnOnce(&mut Document)) -> bool {
        self.lock().resources.get_mut(remote_id).map(edit).is_some()
    }

    /// Returns true if the resource exists.
    #[must_use]
    pub fn contains(&self, remote_id: &str) -> bool {
        self.lock().resources.contains_key(remote_id)
    }

    /// Returns the call log.
    #[must_use]
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.lock().calls.clone()
    }

    /// Returns the number of calls to `method`.
    #[must_use]
    pub fn calls_of(&self, method: RemoteMethod) -> usize {
        self.lock().calls.iter().filter(|c| c.method == method).count()
    }

    /// Returns the total number of calls.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    /// Clears the call log.
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Highest number of concurrent calls observed for one resource.
    #[must_use]
    pub fn peak_concurrency_for(&self, remote_id: &str) -> usize {
        self.lock().peak_per_target.get(remote_id).copied().unwrap_or(0)
    }

    /// Highest number of concurrent calls observed overall.
    #[must_use]
    pub fn peak_concurrency(&self) -> usize {
        self.lock().peak_total
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records the call, simulates latency, then runs `handler` unless a
    /// fault is queued for `method`.
    async fn call<T>(
        &self,
        method: RemoteMethod,
        target: &str,
        owner: &str,
        handler: impl FnOnce(&mut Inner) -> Result<T>,
    ) -> Result<T> {
        {
            let mut inner = self.lock();
            trace!(?method, call_target = target, "Simulated remote call");
            inner.calls.push(RemoteCall {
                method,
                target: target.to_string(),
            });
            inner.enter(owner);
        }

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut inner = self.lock();
        inner.leave(owner);
        if let Some(fault) = inner.faults.get_mut(&method).and_then(VecDeque::pop_front) {
            debug!(?method, call_target = target, ?fault, "Injected fault");
            return Err(fault.into_error());
        }
        handler(&mut inner)
    }
}

impl Inner {
    fn enter(&mut self, owner: &str) {
        let count = self.in_flight.entry(owner.to_string()).or_default();
        *count += 1;
        let current = *count;
        let peak = self.peak_per_target.entry(owner.to_string()).or_default();
        *peak = (*peak).max(current);

        self.in_flight_total += 1;
        self.peak_total = self.peak_total.max(self.in_flight_total);
    }

    fn leave(&mut self, owner: &str) {
        if let Some(count) = self.in_flight.get_mut(owner) {
            *count = count.saturating_sub(1);
        }
        self.in_flight_total = self.in_flight_total.saturating_sub(1);
    }

    /// Applies the effect now or parks it behind a new operation.
    fn submit(&mut self, owner: &str, effect: Effect) -> Mutation {
        let remaining = match self.mode {
            OperationMode::Synchronous => {
                self.apply(effect);
                return Mutation::Completed;
            }
            OperationMode::Async { pending_polls } => Some(pending_polls),
            OperationMode::Stuck => None,
        };

        self.next_operation += 1;
        let name = format!("{}/operations/op-{}", parent_of(owner), self.next_operation);
        let error = self.operation_errors.pop_front();
        self.operations.insert(
            name.clone(),
            PendingOperation {
                owner: owner.to_string(),
                remaining,
                effect: Some(effect),
                error,
                done: false,
            },
        );
        Mutation::Pending { operation: name }
    }

    fn apply(&mut self, effect: Effect) {
        let now = Value::String(Utc::now().to_rfc3339());
        match effect {
            Effect::Create { remote_id, mut document } => {
                document.set("name", Value::String(remote_id.clone()));
                document.set("create_time", now.clone());
                document.set("update_time", now);
                sync_labels(&mut document);
                self.resources.insert(remote_id, document);
            }
            Effect::Patch { remote_id, patch, mask } => {
                if let Some(document) = self.resources.get_mut(&remote_id) {
                    for path in &mask {
                        match patch.get(path) {
                            Some(value) => document.set(path, value.clone()),
                            None => {
                                document.remove(path);
                            }
                        }
                    }
                    document.set("update_time", now);
                    sync_labels(document);
                }
            }
            Effect::Delete { remote_id } => {
                self.resources.remove(&remote_id);
            }
        }
    }
}

/// Mirrors `labels` into the server-computed `terraform_labels`.
fn sync_labels(document: &mut Document) {
    match document.get("labels").cloned() {
        Some(labels) => document.set("terraform_labels", labels),
        None => {
            document.remove("terraform_labels");
        }
    }
}

/// Returns the location-level parent of a remote id.
fn parent_of(remote_id: &str) -> &str {
    remote_id
        .rsplitn(3, '/')
        .nth(2)
        .unwrap_or(remote_id)
}

impl Fault {
    fn into_error(self) -> ConvergentError {
        match self {
            Self::Network(message) => RemoteError::network(message).into(),
            Self::Rejected(status, message) => RemoteError::rejected(status, message).into(),
            Self::Conflict(message) => RemoteError::RemoteConflict { message }.into(),
        }
    }
}

#[async_trait]
impl RemoteClient for InMemoryRemote {
    async fn create(&self, resource: &ResourceRef, body: &Document) -> Result<Mutation> {
        let id = resource.remote_id.as_str();
        self.call(RemoteMethod::Create, id, id, |inner| {
            if inner.resources.contains_key(id) {
                return Err(RemoteError::RemoteConflict {
                    message: format!("ALREADY_EXISTS: {id}"),
                }
                .into());
            }

            let mut document = body.clone();
            if let Some(defaults) = inner.server_defaults.get(&resource.kind) {
                for (path, value) in defaults {
                    if !document.contains(path) {
                        document.set(path, value.clone());
                    }
                }
            }

            Ok(inner.submit(
                id,
                Effect::Create {
                    remote_id: id.to_string(),
                    document,
                },
            ))
        })
        .await
    }

    async fn read(&self, resource: &ResourceRef) -> Result<Option<Document>> {
        let id = resource.remote_id.as_str();
        self.call(RemoteMethod::Read, id, id, |inner| {
            Ok(inner.resources.get(id).cloned())
        })
        .await
    }

    async fn update(
        &self,
        resource: &ResourceRef,
        patch: &Document,
        update_mask: &[String],
    ) -> Result<Mutation> {
        let id = resource.remote_id.as_str();
        self.call(RemoteMethod::Update, id, id, |inner| {
            if !inner.resources.contains_key(id) {
                return Err(RemoteError::not_found(&resource.kind, id).into());
            }
            Ok(inner.submit(
                id,
                Effect::Patch {
                    remote_id: id.to_string(),
                    patch: patch.clone(),
                    mask: update_mask.to_vec(),
                },
            ))
        })
        .await
    }

    async fn delete(&self, resource: &ResourceRef) -> Result<Mutation> {
        let id = resource.remote_id.as_str();
        self.call(RemoteMethod::Delete, id, id, |inner| {
            if !inner.resources.contains_key(id) {
                return Err(RemoteError::not_found(&resource.kind, id).into());
            }
            Ok(inner.submit(
                id,
                Effect::Delete {
                    remote_id: id.to_string(),
                },
            ))
        })
        .await
    }

    async fn poll_operation(&self, operation: &str) -> Result<OperationStatus> {
        let owner = self
            .lock()
            .operations
            .get(operation)
            .map(|op| op.owner.clone())
            .unwrap_or_default();

        self.call(RemoteMethod::PollOperation, operation, &owner, |inner| {
            let Some(op) = inner.operations.get_mut(operation) else {
                return Err(RemoteError::not_found("operation", operation).into());
            };

            if !op.done {
                match op.remaining {
                    Some(0) => op.done = true,
                    Some(ref mut n) => *n -= 1,
                    None => {}
                }
            }

            let done = op.done;
            let error = op.error.clone();
            let effect = if done && error.is_none() { op.effect.take() } else { None };

            if let Some(effect) = effect {
                inner.apply(effect);
            }

            Ok(OperationStatus {
                name: operation.to_string(),
                done,
                error,
            })
        })
        .await
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
