//! Journal types.
//!
//! The journal records, per manifest resource, the remote identifier, the
//! hash of the last applied desired document and a short operation history.
//! Observed state is never cached here; every cycle re-reads the remote.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::planner::{OperationRecord, PlanAction};

/// Current version of the journal format.
pub const JOURNAL_VERSION: &str = "1.0";

/// Maximum history entries kept per resource.
pub const MAX_HISTORY: usize = 20;

/// The complete journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Journal {
    /// Journal format version.
    pub version: String,
    /// Hash of the last applied manifest.
    #[serde(default)]
    pub config_hash: String,
    /// Records keyed by manifest resource name.
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceRecord>,
    /// When the journal was last updated.
    pub last_updated: DateTime<Utc>,
}

/// Journal entry for one resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Manifest resource name.
    pub name: String,
    /// Resource kind.
    pub kind: String,
    /// Remote identifier.
    pub remote_id: String,
    /// Hash of the desired document when last applied.
    pub config_hash: String,
    /// Last action executed.
    pub last_action: PlanAction,
    /// Whether the last action succeeded.
    pub last_success: bool,
    /// When the record was last updated.
    pub updated_at: DateTime<Utc>,
    /// Recent operations, oldest first.
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

/// A single operation in a resource's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// When the operation finished.
    pub timestamp: DateTime<Utc>,
    /// Action executed.
    pub action: PlanAction,
    /// Desired document hash at the time.
    pub config_hash: String,
    /// Awaited long-running operations.
    #[serde(default)]
    pub operations: Vec<String>,
    /// Whether the operation succeeded.
    pub success: bool,
    /// Error message on failure.
    #[serde(default)]
    pub error: Option<String>,
}

impl Journal {
    /// Creates an empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: JOURNAL_VERSION.to_string(),
            config_hash: String::new(),
            resources: BTreeMap::new(),
            last_updated: Utc::now(),
        }
    }

    /// Gets a record by resource name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ResourceRecord> {
        self.resources.get(name)
    }

    /// Records the outcome of an operation on a named resource.
    ///
    /// A successful delete removes the record.
    pub fn record(&mut self, name: &str, config_hash: &str, outcome: &OperationRecord) {
        self.last_updated = Utc::now();

        if outcome.action == PlanAction::Delete && outcome.success {
            self.resources.remove(name);
            return;
        }

        let entry = HistoryEntry::from_outcome(config_hash, outcome);
        let record = self
            .resources
            .entry(name.to_string())
            .or_insert_with(|| ResourceRecord::new(name, &outcome.kind, &outcome.remote_id));

        if !outcome.remote_id.is_empty() {
            record.remote_id.clone_from(&outcome.remote_id);
        }
        if outcome.success {
            config_hash.clone_into(&mut record.config_hash);
        }
        record.last_action = outcome.action;
        record.last_success = outcome.success;
        record.updated_at = entry.timestamp;
        record.push_history(entry);
    }

    /// Removes a record by resource name.
    pub fn remove(&mut self, name: &str) -> Option<ResourceRecord> {
        let removed = self.resources.remove(name);
        if removed.is_some() {
            self.last_updated = Utc::now();
        }
        removed
    }

    /// Returns all resource names.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.resources.keys().map(String::as_str).collect()
    }
}

impl Default for Journal {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceRecord {
    /// Creates a record with no history.
    #[must_use]
    pub fn new(name: &str, kind: &str, remote_id: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: kind.to_string(),
            remote_id: remote_id.to_string(),
            config_hash: String::new(),
            last_action: PlanAction::NoOp,
            last_success: true,
            updated_at: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Appends a history entry, dropping the oldest beyond [`MAX_HISTORY`].
    pub fn push_history(&mut self, entry: HistoryEntry) {
        if self.history.len() >= MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(entry);
    }

    /// Returns true if `hash` matches the last successfully applied hash.
    #[must_use]
    pub fn is_current(&self, hash: &str) -> bool {
        !self.config_hash.is_empty() && self.config_hash == hash
    }
}

impl HistoryEntry {
    fn from_outcome(config_hash: &str, outcome: &OperationRecord) -> Self {
        Self {
            timestamp: outcome.finished_at,
            action: outcome.action,
            config_hash: config_hash.to_string(),
            operations: outcome.operations.clone(),
            success: outcome.success,
            error: outcome.error.as_ref().map(ToString::to_string),
        }
    }
}

impl std::fmt::Display for ResourceRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}) -> {} [{}{}]",
            self.name,
            self.kind,
            self.remote_id,
            self.last_action,
            if self.last_success { "" } else { ", failed" }
        )
    }
}
