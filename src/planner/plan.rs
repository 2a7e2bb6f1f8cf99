//! Plan types and construction.
//!
//! A [`Plan`] classifies the delta for one resource. [`ManifestPlan`]
//! collects the per-resource plans of a whole manifest for display.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::schema::Mutability;
use crate::state::ObservedState;

use super::diff::Delta;

/// Classification of the work needed to converge one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Plan {
    /// Desired and observed agree.
    NoOp,
    /// The resource does not exist yet.
    Create,
    /// Patch the listed fields in place.
    InPlaceUpdate {
        /// Changed field paths, in schema order.
        fields: Vec<String>,
    },
    /// Destroy and recreate because immutable fields changed.
    Replace {
        /// Changed immutable field paths, in schema order.
        immutable_fields: Vec<String>,
    },
}

/// Human-readable action name of a plan or operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlanAction {
    /// Nothing to do.
    NoOp,
    /// Create a new resource.
    Create,
    /// Update a resource in place.
    Update,
    /// Destroy and recreate a resource.
    Replace,
    /// Delete a resource.
    Delete,
}

/// Plan for a single resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcePlan {
    /// Resource name from the manifest.
    pub name: String,
    /// Resource kind.
    pub kind: String,
    /// Resolved remote identifier.
    pub remote_id: String,
    /// Classification.
    pub plan: Plan,
    /// Field-level differences the plan is based on.
    pub delta: Delta,
    /// Hash of the desired document.
    pub config_hash: String,
    /// Identifier of the existing resource, when it differs from
    /// `remote_id` because an identity field changed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replaces: Option<String>,
    /// When the plan was computed.
    pub created_at: DateTime<Utc>,
}

/// Plans for every resource of a manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestPlan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Hash of the whole manifest.
    pub config_hash: String,
    /// Per-resource plans in manifest order.
    pub resources: Vec<ResourcePlan>,
}

impl Plan {
    /// Classifies a delta against an existing resource.
    ///
    /// Any immutable change forces a replacement, even when updatable fields
    /// change at the same time.
    #[must_use]
    pub fn from_delta(delta: &Delta) -> Self {
        if delta.is_empty() {
            return Self::NoOp;
        }

        let immutable_fields: Vec<String> = delta
            .entries
            .iter()
            .filter(|e| e.mutability == Mutability::Immutable)
            .map(|e| e.path.clone())
            .collect();

        if immutable_fields.is_empty() {
            Self::InPlaceUpdate {
                fields: delta.entries.iter().map(|e| e.path.clone()).collect(),
            }
        } else {
            Self::Replace { immutable_fields }
        }
    }

    /// Classifies a delta, planning a create when nothing was observed.
    #[must_use]
    pub fn for_observed(observed: Option<&ObservedState>, delta: &Delta) -> Self {
        if observed.is_none() {
            Self::Create
        } else {
            Self::from_delta(delta)
        }
    }

    /// Returns the action name.
    #[must_use]
    pub const fn action(&self) -> PlanAction {
        match self {
            Self::NoOp => PlanAction::NoOp,
            Self::Create => PlanAction::Create,
            Self::InPlaceUpdate { .. } => PlanAction::Update,
            Self::Replace { .. } => PlanAction::Replace,
        }
    }

    /// Returns true if the plan requires no remote mutation.
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        matches!(self, Self::NoOp)
    }
}

impl ResourcePlan {
    /// Creates a resource plan computed now.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        kind: impl Into<String>,
        remote_id: impl Into<String>,
        plan: Plan,
        delta: Delta,
        config_hash: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            remote_id: remote_id.into(),
            plan,
            delta,
            config_hash: config_hash.into(),
            replaces: None,
            created_at: Utc::now(),
        }
    }

    /// Records the identifier of the existing resource this plan acts on.
    #[must_use]
    pub fn with_replaces(mut self, existing: impl Into<String>) -> Self {
        let existing = existing.into();
        self.replaces = (existing != self.remote_id).then_some(existing);
        self
    }

    /// Returns the identifier of the resource as it exists remotely now.
    #[must_use]
    pub fn existing_remote_id(&self) -> &str {
        self.replaces.as_deref().unwrap_or(&self.remote_id)
    }

    /// Returns a human-readable description of the plan.
    #[must_use]
    pub fn description(&self) -> String {
        match &self.plan {
            Plan::NoOp => format!("No change for '{}'", self.name),
            Plan::Create => format!("Create {} '{}'", self.kind, self.name),
            Plan::InPlaceUpdate { fields } => {
                format!("Update '{}' in place ({})", self.name, fields.join(", "))
            }
            Plan::Replace { immutable_fields } => match &self.replaces {
                Some(existing) => format!(
                    "Replace '{}' (immutable: {}), removing {existing}",
                    self.name,
                    immutable_fields.join(", ")
                ),
                None => format!(
                    "Replace '{}' (immutable: {})",
                    self.name,
                    immutable_fields.join(", ")
                ),
            },
        }
    }
}

impl ManifestPlan {
    /// Creates a manifest plan from per-resource plans.
    #[must_use]
    pub fn new(config_hash: impl Into<String>, resources: Vec<ResourcePlan>) -> Self {
        Self {
            created_at: Utc::now(),
            config_hash: config_hash.into(),
            resources,
        }
    }

    /// Returns true if no resource needs a change.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.iter().all(|r| r.plan.is_noop())
    }

    /// Counts resources with the given action.
    #[must_use]
    pub fn count(&self, action: PlanAction) -> usize {
        self.resources
            .iter()
            .filter(|r| r.plan.action() == action)
            .count()
    }

    /// Returns plans that require remote changes.
    #[must_use]
    pub fn actionable(&self) -> Vec<&ResourcePlan> {
        self.resources.iter().filter(|r| !r.plan.is_noop()).collect()
    }
}

impl std::fmt::Display for PlanAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NoOp => "no-op",
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
        };
        write!(f, "{s}")
    }
}

impl FromStr for PlanAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "no-op" | "noop" | "none" => Ok(Self::NoOp),
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "replace" => Ok(Self::Replace),
            "delete" | "destroy" => Ok(Self::Delete),
            other => Err(format!("unknown plan action '{other}'")),
        }
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoOp | Self::Create => write!(f, "{}", self.action()),
            Self::InPlaceUpdate { fields } => write!(f, "update [{}]", fields.join(", ")),
            Self::Replace { immutable_fields } => {
                write!(f, "replace [{}]", immutable_fields.join(", "))
            }
        }
    }
}

impl std::fmt::Display for ResourcePlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} ({})", self.plan.action(), self.name, self.remote_id)
    }
}

impl std::fmt::Display for ManifestPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let actionable = self.actionable();
        if actionable.is_empty() {
            return write!(f, "No changes required");
        }

        writeln!(f, "Plan ({} actions):", actionable.len())?;
        for (i, plan) in actionable.iter().enumerate() {
            writeln!(f, "  {i}. {}", plan.description())?;
            for entry in &plan.delta.entries {
                writeln!(f, "       {entry}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::{ChangeKind, DeltaEntry};
    use serde_json::json;

    fn entry(path: &str, mutability: Mutability) -> DeltaEntry {
        DeltaEntry {
            path: path.to_string(),
            kind: ChangeKind::Change,
            old: Some(json!("a")),
            new: Some(json!("b")),
            mutability,
        }
    }

    #[test]
    fn test_empty_delta_is_noop() {
        assert_eq!(Plan::from_delta(&Delta::default()), Plan::NoOp);
    }

    #[test]
    fn test_updatable_changes_update_in_place() {
        let delta = Delta {
            entries: vec![
                entry("description", Mutability::Updatable),
                entry("data_quality_spec.rules", Mutability::Updatable),
            ],
        };
        assert_eq!(
            Plan::from_delta(&delta),
            Plan::InPlaceUpdate {
                fields: vec![
                    String::from("description"),
                    String::from("data_quality_spec.rules")
                ]
            }
        );
    }

    #[test]
    fn test_immutable_change_forces_replace() {
        let delta = Delta {
            entries: vec![
                entry("description", Mutability::Updatable),
                entry("location", Mutability::Immutable),
            ],
        };
        let plan = Plan::from_delta(&delta);
        assert_eq!(
            plan,
            Plan::Replace {
                immutable_fields: vec![String::from("location")]
            }
        );
        assert_eq!(plan.action(), PlanAction::Replace);
    }

    #[test]
    fn test_missing_resource_is_create() {
        let delta = Delta {
            entries: vec![entry("location", Mutability::Immutable)],
        };
        assert_eq!(Plan::for_observed(None, &delta), Plan::Create);
    }

    #[test]
    fn test_action_parse_and_display() {
        assert_eq!("update".parse::<PlanAction>().unwrap(), PlanAction::Update);
        assert_eq!("no-op".parse::<PlanAction>().unwrap(), PlanAction::NoOp);
        assert!("resize".parse::<PlanAction>().is_err());
        assert_eq!(PlanAction::NoOp.to_string(), "no-op");
    }
}
