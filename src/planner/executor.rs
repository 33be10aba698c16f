//! Plan executor for applying deployment plans.
//!
//! Actions run one at a time in plan order. Each result is written into the
//! state as soon as it is known, so a failed run still records what exists.

use std::collections::HashSet;
use tracing::{error, info, warn};

use crate::config::{ConfigHasher, Manifest};
use crate::dokku::DokkuProvisioner;
use crate::error::{DokkuError, PlanError, Result};
use crate::resource::{ResourceData, ResourceKind};
use crate::state::{DeploymentHistoryEntry, DeploymentOperation, DeploymentState};

use super::plan::{ActionType, DeploymentPlan, PlannedAction};

/// Executor for deployment plans.
#[derive(Debug)]
pub struct PlanExecutor<'a> {
    /// Resource provisioner.
    provisioner: &'a DokkuProvisioner,
    /// Desired resources for create and update actions.
    manifest: &'a Manifest,
    /// Fingerprint hasher for recorded attributes.
    hasher: ConfigHasher,
    /// Whether to continue on errors.
    continue_on_error: bool,
}

/// Outcome of a single action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The action completed.
    Succeeded,
    /// The action failed with the given error.
    Failed(String),
    /// A dependency failed, so the action never ran.
    Skipped,
}

/// Result of executing a single action.
#[derive(Debug, Clone)]
pub struct ActionResult {
    /// Action index.
    pub index: usize,
    /// Action that was executed.
    pub action: PlannedAction,
    /// What happened.
    pub outcome: ActionOutcome,
    /// Remote id after the action, if the resource exists.
    pub resource_id: Option<String>,
}

/// Result of executing the entire plan.
#[derive(Debug, Default)]
pub struct ExecutionResult {
    /// Individual action results.
    pub results: Vec<ActionResult>,
    /// Number of successful actions.
    pub successful: usize,
    /// Number of failed actions.
    pub failed: usize,
    /// Number of skipped actions (due to dependency failures).
    pub skipped: usize,
    /// Number of actions not reached after a stop on error.
    pub not_run: usize,
}

impl<'a> PlanExecutor<'a> {
    /// Creates a new plan executor.
    #[must_use]
    pub const fn new(provisioner: &'a DokkuProvisioner, manifest: &'a Manifest) -> Self {
        Self {
            provisioner,
            manifest,
            hasher: ConfigHasher::new(),
            continue_on_error: false,
        }
    }

    /// Sets whether to continue on errors.
    #[must_use]
    pub const fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    /// Executes a deployment plan, recording results into `state`.
    ///
    /// Action failures are reported in the result, not as an error.
    pub async fn execute(
        &self,
        plan: &DeploymentPlan,
        state: &mut DeploymentState,
        operation: DeploymentOperation,
    ) -> ExecutionResult {
        info!("Executing deployment plan with {} actions", plan.actions.len());

        let mut results = Vec::new();
        let mut failed_indices: HashSet<usize> = HashSet::new();

        for (idx, action) in plan.actions.iter().enumerate() {
            if action.dependencies.iter().any(|dep| failed_indices.contains(dep)) {
                warn!(
                    "Skipping action {idx} ({}) due to failed dependencies",
                    action.description()
                );
                failed_indices.insert(idx);
                results.push(ActionResult {
                    index: idx,
                    action: action.clone(),
                    outcome: ActionOutcome::Skipped,
                    resource_id: None,
                });
                continue;
            }

            info!("Executing action {idx}: {}", action.description());
            let (outcome, resource_id) = match self.execute_action(action, state).await {
                Ok(id) => (ActionOutcome::Succeeded, id),
                Err(e) => {
                    error!("Failed to {} {} {}: {e}", action.action_type, action.kind, action.key);
                    (ActionOutcome::Failed(e.to_string()), None)
                }
            };

            let failed = matches!(outcome, ActionOutcome::Failed(_));
            results.push(ActionResult {
                index: idx,
                action: action.clone(),
                outcome,
                resource_id,
            });

            if failed {
                failed_indices.insert(idx);
                if !self.continue_on_error {
                    break;
                }
            }
        }

        let count =
            |f: fn(&ActionOutcome) -> bool| results.iter().filter(|r| f(&r.outcome)).count();
        let execution_result = ExecutionResult {
            successful: count(|o| *o == ActionOutcome::Succeeded),
            failed: count(|o| matches!(o, ActionOutcome::Failed(_))),
            skipped: count(|o| *o == ActionOutcome::Skipped),
            not_run: plan.actions.len() - results.len(),
            results,
        };

        let resources = plan
            .actions
            .iter()
            .map(|a| format!("{}.{}", a.kind, a.key))
            .collect();
        let history_entry = if execution_result.all_successful() {
            DeploymentHistoryEntry::new(operation, &plan.manifest_hash, resources)
        } else {
            DeploymentHistoryEntry::failed(
                operation,
                &plan.manifest_hash,
                resources,
                &format!("{} action(s) failed", execution_result.failed),
            )
        };
        state.add_history(history_entry);
        if execution_result.all_successful() {
            state.manifest_hash.clone_from(&plan.manifest_hash);
        }

        execution_result
    }

    /// Executes a single action and records its effect.
    async fn execute_action(
        &self,
        action: &PlannedAction,
        state: &mut DeploymentState,
    ) -> Result<Option<String>> {
        match (action.kind, action.action_type) {
            (ResourceKind::App, ActionType::Delete) => {
                let record = state.apps.get(&action.key).ok_or_else(|| missing(action))?;
                let mut data = ResourceData::new(
                    record.id.clone(),
                    record.attributes.clone(),
                    record.attributes.clone(),
                );
                self.provisioner.delete_app(&mut data).await?;
                state.remove(ResourceKind::App, &action.key);
                Ok(None)
            }
            (ResourceKind::App, _) => {
                let desired = self.manifest.apps.get(&action.key).ok_or_else(|| missing(action))?;
                let mut data = match (action.action_type, state.apps.get(&action.key)) {
                    (ActionType::Update, Some(record)) => ResourceData::new(
                        record.id.clone(),
                        record.attributes.clone(),
                        desired.clone().with_computed_from(&record.attributes),
                    ),
                    _ => ResourceData::for_create(desired.clone()),
                };

                let result = if data.prior().is_some() {
                    self.provisioner.update_app(&mut data).await
                } else {
                    self.provisioner.create_app(&mut data).await
                };

                if let Err(e) = result {
                    if data.exists() && action.action_type == ActionType::Create {
                        // Partially created; the next refresh reads what is there.
                        let (id, attributes) = data.into_parts();
                        state.set_app(&action.key, id, attributes, String::new());
                    } else if action.action_type == ActionType::Update
                        && desired.name != data.id()
                        && self
                            .provisioner
                            .observer()
                            .app_exists(&desired.name)
                            .await
                            .unwrap_or(false)
                    {
                        // The rename went through before the failure.
                        if let Some(record) = state.apps.get_mut(&action.key) {
                            record.id.clone_from(&desired.name);
                            record.attributes.name.clone_from(&desired.name);
                            record.fingerprint.clear();
                        }
                    }
                    return Err(e);
                }

                let (id, attributes) = data.into_parts();
                let fingerprint = self.hasher.hash_app(&attributes);
                state.set_app(&action.key, id.clone(), attributes, fingerprint);
                Ok(Some(id))
            }
            (ResourceKind::Service, ActionType::Delete) => {
                let record = state.services.get(&action.key).ok_or_else(|| missing(action))?;
                let mut data = ResourceData::new(
                    record.id.clone(),
                    record.attributes.clone(),
                    record.attributes.clone(),
                );
                self.provisioner.delete_service(&mut data).await?;
                state.remove(ResourceKind::Service, &action.key);
                Ok(None)
            }
            (ResourceKind::Service, _) => {
                let desired = self
                    .manifest
                    .services
                    .get(&action.key)
                    .ok_or_else(|| missing(action))?;
                let mut data = match (action.action_type, state.services.get(&action.key)) {
                    (ActionType::Update, Some(record)) => ResourceData::new(
                        record.id.clone(),
                        record.attributes.clone(),
                        desired.clone().with_computed_from(&record.attributes),
                    ),
                    _ => ResourceData::for_create(desired.clone()),
                };

                let result = if data.prior().is_some() {
                    self.provisioner.update_service(&mut data).await
                } else {
                    self.provisioner.create_service(&mut data).await
                };

                if let Err(e) = result {
                    if data.exists() && action.action_type == ActionType::Create {
                        let (id, attributes) = data.into_parts();
                        state.set_service(&action.key, id, attributes, String::new());
                    } else if action.action_type == ActionType::Update
                        && desired.name != data.id()
                    {
                        let renamed = self
                            .provisioner
                            .observer()
                            .retrieve_service(desired.family, &desired.name)
                            .await
                            .ok()
                            .flatten()
                            .is_some();
                        if renamed && let Some(record) = state.services.get_mut(&action.key) {
                            record.id.clone_from(&desired.name);
                            record.attributes.name.clone_from(&desired.name);
                            record.fingerprint.clear();
                        }
                    }
                    return Err(e);
                }

                let (id, attributes) = data.into_parts();
                let fingerprint = self.hasher.hash_service(&attributes);
                state.set_service(&action.key, id.clone(), attributes, fingerprint);
                Ok(Some(id))
            }
            (ResourceKind::Link, ActionType::Delete) => {
                let record = state.links.get(&action.key).ok_or_else(|| missing(action))?;
                let mut data = ResourceData::new(
                    record.id.clone(),
                    record.attributes.clone(),
                    record.attributes.clone(),
                );
                self.provisioner.delete_link(&mut data).await?;
                state.remove(ResourceKind::Link, &action.key);
                Ok(None)
            }
            (ResourceKind::Link, _) => {
                let desired = self.manifest.links.get(&action.key).ok_or_else(|| missing(action))?;
                let mut data = ResourceData::for_create(desired.clone());
                self.provisioner.create_link(&mut data).await?;

                let (id, attributes) = data.into_parts();
                let fingerprint = self.hasher.hash_link(&attributes);
                state.set_link(&action.key, id.clone(), attributes, fingerprint);
                Ok(Some(id))
            }
        }
    }
}

fn missing(action: &PlannedAction) -> DokkuError {
    PlanError::MissingDefinition {
        resource_type: action.kind.to_string(),
        key: action.key.clone(),
    }
    .into()
}

impl ExecutionResult {
    /// Returns true if every planned action ran and succeeded.
    #[must_use]
    pub const fn all_successful(&self) -> bool {
        self.failed == 0 && self.skipped == 0 && self.not_run == 0
    }

    /// Returns the failed results.
    #[must_use]
    pub fn failures(&self) -> Vec<&ActionResult> {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, ActionOutcome::Failed(_)))
            .collect()
    }
}

impl std::fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Executed {} actions: {} successful, {} failed, {} skipped",
            self.results.len(),
            self.successful,
            self.failed,
            self.skipped
        )?;
        if self.not_run > 0 {
            write!(f, ", {} not run", self.not_run)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for ActionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Succeeded => write!(f, "ok"),
            Self::Failed(e) => write!(f, "failed: {e}"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}
