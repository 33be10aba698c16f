//! Deployment plan types and construction.
//!
//! Actions are ordered so nothing is removed while something still depends
//! on it, and nothing is linked before both ends exist:
//! link deletions, app and service deletions, service creates and updates,
//! app creates and updates, then link creations.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::config::Manifest;
use crate::resource::ResourceKind;
use crate::state::DeploymentState;

use super::diff::{DiffResult, DiffType, ResourceDiff};

/// A complete deployment plan.
#[derive(Debug, Clone)]
pub struct DeploymentPlan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Manifest hash this plan is based on.
    pub manifest_hash: String,
    /// Planned actions in execution order.
    pub actions: Vec<PlannedAction>,
}

/// A single planned action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedAction {
    /// Action type.
    pub action_type: ActionType,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Logical key of the resource.
    pub key: String,
    /// Remote name, for display.
    pub name: String,
    /// Reason for this action.
    pub reason: String,
    /// New fingerprint (if applicable).
    pub new_hash: Option<String>,
    /// Dependencies (action indices that must succeed first).
    pub dependencies: Vec<usize>,
}

/// Types of actions in a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionType {
    /// Create a resource.
    Create,
    /// Converge a resource in place.
    Update,
    /// Destroy a resource.
    Delete,
}

/// Accumulates actions and remembers where each resource landed.
#[derive(Default)]
struct PlanBuilder {
    actions: Vec<PlannedAction>,
    deletes: HashMap<(ResourceKind, String), usize>,
    /// Create/update actions keyed by remote name, for link dependencies.
    writes: HashMap<(ResourceKind, String), usize>,
}

impl PlanBuilder {
    fn push(&mut self, action: PlannedAction) -> usize {
        self.actions.push(action);
        self.actions.len() - 1
    }

    /// Plans a deletion of the resource as recorded, which for a replace
    /// may differ from the name the manifest now asks for.
    fn delete(&mut self, diff: &ResourceDiff, name: &str, dependencies: Vec<usize>) {
        let reason = match (diff.diff_type, &diff.reason) {
            (DiffType::Replace, Some(reason)) => format!("replace: {reason}"),
            _ => String::from("removed from manifest"),
        };
        let idx = self.push(PlannedAction {
            action_type: ActionType::Delete,
            kind: diff.kind,
            key: diff.key.clone(),
            name: name.to_string(),
            reason,
            new_hash: None,
            dependencies,
        });
        self.deletes.insert((diff.kind, diff.key.clone()), idx);
    }

    fn write(&mut self, diff: &ResourceDiff, mut dependencies: Vec<usize>) {
        let (action_type, reason) = match diff.diff_type {
            DiffType::Update => (ActionType::Update, changed_fields(diff)),
            DiffType::Replace => {
                if let Some(&idx) = self.deletes.get(&(diff.kind, diff.key.clone())) {
                    dependencies.push(idx);
                }
                (
                    ActionType::Create,
                    format!("replace: {}", diff.reason.as_deref().unwrap_or("recreated")),
                )
            }
            _ => (ActionType::Create, String::from("declared in manifest")),
        };
        dependencies.sort_unstable();
        dependencies.dedup();

        let idx = self.push(PlannedAction {
            action_type,
            kind: diff.kind,
            key: diff.key.clone(),
            name: diff.name.clone(),
            reason,
            new_hash: diff.new_hash.clone(),
            dependencies,
        });
        self.writes.insert((diff.kind, diff.name.clone()), idx);
    }
}

fn changed_fields(diff: &ResourceDiff) -> String {
    if diff.details.is_empty() {
        return String::from("drifted from manifest");
    }
    let fields: Vec<&str> = diff.details.iter().map(|d| d.field.as_str()).collect();
    format!("changed: {}", fields.join(", "))
}

impl DeploymentPlan {
    /// Creates a new plan from a diff result.
    ///
    /// `state` supplies the recorded link endpoints so deletions wait for
    /// the links that reference them.
    #[must_use]
    pub fn from_diff(
        diff: &DiffResult,
        manifest: &Manifest,
        state: &DeploymentState,
        manifest_hash: &str,
    ) -> Self {
        let mut builder = PlanBuilder::default();
        let removes =
            |d: &&ResourceDiff| matches!(d.diff_type, DiffType::Delete | DiffType::Replace);
        let writes = |d: &&ResourceDiff| {
            matches!(d.diff_type, DiffType::Create | DiffType::Update | DiffType::Replace)
        };
        let of_kind = |kind: ResourceKind| move |d: &&ResourceDiff| d.kind == kind;

        // Link deletions
        for d in diff.diffs.iter().filter(of_kind(ResourceKind::Link)).filter(removes) {
            let name = recorded_name(d, state).unwrap_or(d.name.as_str());
            builder.delete(d, name, Vec::new());
        }

        // App and service deletions, after the links that reference them
        for d in diff
            .diffs
            .iter()
            .filter(|d| d.kind != ResourceKind::Link)
            .filter(removes)
        {
            let name = recorded_name(d, state).unwrap_or(d.name.as_str());
            let deps = unlinks_of(&builder, d.kind, name, state);
            builder.delete(d, name, deps);
        }

        // Service creates and updates
        for d in diff.diffs.iter().filter(of_kind(ResourceKind::Service)).filter(writes) {
            builder.write(d, Vec::new());
        }

        // App creates and updates
        for d in diff.diffs.iter().filter(of_kind(ResourceKind::App)).filter(writes) {
            builder.write(d, Vec::new());
        }

        // Link creations, after both ends
        for d in diff.diffs.iter().filter(of_kind(ResourceKind::Link)).filter(writes) {
            let deps = manifest
                .links
                .get(&d.key)
                .map(|link| {
                    [
                        builder.writes.get(&(ResourceKind::Service, link.service.clone())),
                        builder.writes.get(&(ResourceKind::App, link.app.clone())),
                    ]
                    .into_iter()
                    .flatten()
                    .copied()
                    .collect()
                })
                .unwrap_or_default();
            builder.write(d, deps);
        }

        Self {
            created_at: Utc::now(),
            manifest_hash: manifest_hash.to_string(),
            actions: builder.actions,
        }
    }

    /// Creates an empty plan (no changes needed).
    #[must_use]
    pub fn empty(manifest_hash: &str) -> Self {
        Self {
            created_at: Utc::now(),
            manifest_hash: manifest_hash.to_string(),
            actions: Vec::new(),
        }
    }

    /// Returns true if the plan is empty (no changes).
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Returns the number of actions.
    #[must_use]
    pub const fn action_count(&self) -> usize {
        self.actions.len()
    }

    /// Returns the number of actions of a type.
    #[must_use]
    pub fn count(&self, action_type: ActionType) -> usize {
        self.actions
            .iter()
            .filter(|a| a.action_type == action_type)
            .count()
    }
}

/// Remote name a deletion applies to.
fn recorded_name<'a>(diff: &ResourceDiff, state: &'a DeploymentState) -> Option<&'a str> {
    match diff.kind {
        ResourceKind::App => state.apps.get(&diff.key).map(|r| r.attributes.name.as_str()),
        ResourceKind::Service => state
            .services
            .get(&diff.key)
            .map(|r| r.attributes.name.as_str()),
        ResourceKind::Link => state.links.get(&diff.key).map(|r| r.id.as_str()),
    }
}

/// Planned link deletions that reference an app or service by name.
fn unlinks_of(
    builder: &PlanBuilder,
    kind: ResourceKind,
    name: &str,
    state: &DeploymentState,
) -> Vec<usize> {
    state
        .links
        .iter()
        .filter(|(_, record)| match kind {
            ResourceKind::App => record.attributes.app == name,
            ResourceKind::Service => record.attributes.service == name,
            ResourceKind::Link => false,
        })
        .filter_map(|(key, _)| builder.deletes.get(&(ResourceKind::Link, key.clone())).copied())
        .collect()
}

impl PlannedAction {
    /// Returns a human-readable description of the action.
    #[must_use]
    pub fn description(&self) -> String {
        let verb = match self.action_type {
            ActionType::Create => "Create",
            ActionType::Update => "Update",
            ActionType::Delete => "Delete",
        };
        format!("{verb} {} '{}'", self.kind, self.name)
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for PlannedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.action_type, self.kind, self.key)?;
        if !self.reason.is_empty() {
            write!(f, " ({})", self.reason)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for DeploymentPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.actions.is_empty() {
            return write!(f, "No changes required");
        }

        writeln!(f, "Deployment Plan ({} actions):", self.actions.len())?;
        for (i, action) in self.actions.iter().enumerate() {
            writeln!(f, "  {i}. {action}")?;
        }

        Ok(())
    }
}
