//! Reconciler for converging the host to the manifest.
//!
//! A run takes the state lock, refreshes every recorded resource from the
//! host, diffs the manifest against the refreshed state, plans and executes
//! the changes, saves the state and releases the lock. There is a single
//! attempt per run; a failed action is reported, never retried.

use std::future::Future;
use tracing::{debug, error, info, warn};

use crate::config::{AppConfig, ConfigHasher, Manifest};
use crate::dokku::DokkuProvisioner;
use crate::error::{ConfigError, PlanError, ReconcileError, Result};
use crate::planner::{DeploymentPlan, DiffEngine, DiffResult, ExecutionResult, PlanExecutor};
use crate::resource::{ResourceData, ResourceKind};
use crate::state::{
    DeploymentHistoryEntry, DeploymentOperation, DeploymentState, StateStore, generate_holder_id,
};

/// Reconciler for maintaining desired state.
pub struct Reconciler<'a, S: StateStore + ?Sized> {
    /// Desired resources.
    manifest: &'a Manifest,
    /// State store.
    state_store: &'a S,
    /// Resource provisioner.
    provisioner: &'a DokkuProvisioner,
    /// Manifest hasher.
    hasher: ConfigHasher,
    /// Diff engine.
    diff_engine: DiffEngine,
    /// Keep executing independent actions after a failure.
    continue_on_error: bool,
}

/// What a refresh found.
#[derive(Debug, Default, serde::Serialize)]
pub struct RefreshSummary {
    /// Number of records read back.
    pub refreshed: usize,
    /// Records whose attributes changed on the host, as `kind.key`.
    pub changed: Vec<String>,
    /// Records no longer present on the host, as `kind.key`.
    pub removed: Vec<String>,
}

/// A computed plan together with the diff behind it.
#[derive(Debug)]
pub struct PlanPreview {
    /// Refresh findings.
    pub refresh: RefreshSummary,
    /// Differences between manifest and refreshed state.
    pub diff: DiffResult,
    /// Ordered actions.
    pub plan: DeploymentPlan,
}

/// A resource adopted from the host.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ImportedResource {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Logical key it is recorded under.
    pub key: String,
    /// Remote identifier.
    pub id: String,
    /// Fingerprint of the recorded attributes.
    pub fingerprint: String,
}

/// Result of a reconciliation run.
#[derive(Debug, serde::Serialize)]
pub struct ReconciliationResult {
    /// Whether every planned action succeeded.
    pub success: bool,
    /// Whether the plan was declined.
    pub cancelled: bool,
    /// Number of resources created.
    pub created: usize,
    /// Number of resources updated.
    pub updated: usize,
    /// Number of resources replaced.
    pub replaced: usize,
    /// Number of resources deleted.
    pub deleted: usize,
    /// Number of resources unchanged.
    pub unchanged: usize,
    /// Errors encountered.
    pub errors: Vec<String>,
    /// Final state after reconciliation.
    #[serde(skip)]
    pub final_state: Option<DeploymentState>,
}

impl<'a, S: StateStore + ?Sized> Reconciler<'a, S> {
    /// Creates a new reconciler.
    #[must_use]
    pub const fn new(
        manifest: &'a Manifest,
        state_store: &'a S,
        provisioner: &'a DokkuProvisioner,
    ) -> Self {
        Self {
            manifest,
            state_store,
            provisioner,
            hasher: ConfigHasher::new(),
            diff_engine: DiffEngine::new(),
            continue_on_error: false,
        }
    }

    /// Sets whether to continue on errors.
    #[must_use]
    pub const fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    /// Loads the recorded state, or an empty one for a first run.
    async fn load_state(&self) -> Result<DeploymentState> {
        Ok(self
            .state_store
            .load()
            .await?
            .unwrap_or_else(|| DeploymentState::new(&self.manifest.provider.ssh_host)))
    }

    /// Reads every recorded resource back from the host.
    ///
    /// Records reported absent are dropped from `state`.
    ///
    /// # Errors
    ///
    /// Returns an error if any read fails.
    pub async fn refresh(&self, state: &mut DeploymentState) -> Result<RefreshSummary> {
        let mut summary = RefreshSummary::default();

        let keys: Vec<String> = state.services.keys().cloned().collect();
        for key in keys {
            let Some(record) = state.services.get(&key) else { continue };
            let before = record.fingerprint.clone();
            let attributes = record.attributes.clone();
            let mut data = ResourceData::new(record.id.clone(), attributes.clone(), attributes);
            self.provisioner.read_service(&mut data).await?;
            if data.exists() {
                let (id, attributes) = data.into_parts();
                let fingerprint = self.hasher.hash_service(&attributes);
                summary.note(ResourceKind::Service, &key, &before, &fingerprint);
                state.set_service(&key, id, attributes, fingerprint);
            } else {
                summary.gone(ResourceKind::Service, &key);
                state.remove(ResourceKind::Service, &key);
            }
        }

        let keys: Vec<String> = state.apps.keys().cloned().collect();
        for key in keys {
            let Some(record) = state.apps.get(&key) else { continue };
            let before = record.fingerprint.clone();
            let attributes = record.attributes.clone();
            let mut data = ResourceData::new(record.id.clone(), attributes.clone(), attributes);
            self.provisioner.read_app(&mut data).await?;
            if data.exists() {
                let (id, attributes) = data.into_parts();
                let fingerprint = self.hasher.hash_app(&attributes);
                summary.note(ResourceKind::App, &key, &before, &fingerprint);
                state.set_app(&key, id, attributes, fingerprint);
            } else {
                summary.gone(ResourceKind::App, &key);
                state.remove(ResourceKind::App, &key);
            }
        }

        let keys: Vec<String> = state.links.keys().cloned().collect();
        for key in keys {
            let Some(record) = state.links.get(&key) else { continue };
            let attributes = record.attributes.clone();
            let mut data = ResourceData::new(record.id.clone(), attributes.clone(), attributes);
            self.provisioner.read_link(&mut data).await?;
            if data.exists() {
                summary.refreshed += 1;
            } else {
                summary.gone(ResourceKind::Link, &key);
                state.remove(ResourceKind::Link, &key);
            }
        }

        debug!(
            "Refreshed {} resource(s), {} changed, {} gone",
            summary.refreshed,
            summary.changed.len(),
            summary.removed.len()
        );
        Ok(summary)
    }

    /// Computes the plan without changing anything on the host or on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be loaded or a read fails.
    pub async fn plan(&self) -> Result<PlanPreview> {
        let mut state = self.load_state().await?;
        self.preview(self.manifest, &mut state).await
    }

    async fn preview(
        &self,
        manifest: &Manifest,
        state: &mut DeploymentState,
    ) -> Result<PlanPreview> {
        let refresh = self.refresh(state).await?;
        let diff = self.diff_engine.compute_diff(manifest, state);
        info!(
            "Diff: {} creates, {} updates, {} replaces, {} deletes, {} unchanged",
            diff.creates, diff.updates, diff.replaces, diff.deletes, diff.unchanged
        );

        let manifest_hash = self.hasher.hash_manifest(manifest);
        let plan = if diff.has_changes() {
            DeploymentPlan::from_diff(&diff, manifest, state, &manifest_hash)
        } else {
            DeploymentPlan::empty(&manifest_hash)
        };
        Ok(PlanPreview { refresh, diff, plan })
    }

    /// Converges the host to the manifest.
    ///
    /// `approve` sees the plan before anything is changed and may decline it.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be taken, the refresh fails, or
    /// the state cannot be saved. Failed actions are reported in the result.
    pub async fn reconcile<F>(&self, approve: F) -> Result<ReconciliationResult>
    where
        F: FnOnce(&PlanPreview) -> Result<bool>,
    {
        info!("Starting reconciliation against {}", self.manifest.provider.ssh_host);
        self.locked("apply", self.run(self.manifest, DeploymentOperation::Apply, approve))
            .await
    }

    /// Destroys every recorded resource.
    ///
    /// # Errors
    ///
    /// Same as [`Self::reconcile`].
    pub async fn destroy<F>(&self, approve: F) -> Result<ReconciliationResult>
    where
        F: FnOnce(&PlanPreview) -> Result<bool>,
    {
        info!("Destroying managed resources on {}", self.manifest.provider.ssh_host);
        let empty = Manifest {
            provider: self.manifest.provider.clone(),
            state: self.manifest.state.clone(),
            ..Manifest::default()
        };
        self.locked("destroy", self.run(&empty, DeploymentOperation::Destroy, approve))
            .await
    }

    /// Records a resource that already exists on the host, so the next run
    /// converges it instead of creating it.
    ///
    /// The manifest entry under `key` supplies the attributes to manage; an
    /// app without one is adopted with nothing managed. `remote_name`
    /// defaults to the declared name. Links are identified by their declared
    /// endpoints, and a given `remote_name` must match the link id.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is already recorded, the resource needs a
    /// manifest entry it does not have, it does not exist on the host, or
    /// the state cannot be locked or saved.
    pub async fn import(
        &self,
        kind: ResourceKind,
        key: &str,
        remote_name: Option<&str>,
    ) -> Result<ImportedResource> {
        info!("Importing {kind} {key}");
        self.locked("import", self.adopt(kind, key, remote_name)).await
    }

    async fn adopt(
        &self,
        kind: ResourceKind,
        key: &str,
        remote_name: Option<&str>,
    ) -> Result<ImportedResource> {
        let mut state = self.load_state().await?;
        if state.contains(kind, key) {
            return Err(ReconcileError::ResourceReconcileFailed {
                resource_type: kind.to_string(),
                name: key.to_string(),
                reason: String::from("already recorded in state"),
            }
            .into());
        }
        let undeclared = || PlanError::MissingDefinition {
            resource_type: kind.to_string(),
            key: key.to_string(),
        };

        let (id, fingerprint) = match kind {
            ResourceKind::App => {
                let declared = self.manifest.apps.get(key).cloned();
                let name = remote_name
                    .map(String::from)
                    .or_else(|| declared.as_ref().map(|a| a.name.clone()))
                    .ok_or_else(undeclared)?;
                let template = declared.unwrap_or_else(|| AppConfig::new(name.as_str()));
                let mut data = ResourceData::new(name.as_str(), template.clone(), template);
                self.provisioner.read_app(&mut data).await?;
                let (id, attributes) = found(kind, &name, data)?;
                let fingerprint = self.hasher.hash_app(&attributes);
                state.set_app(key, id.clone(), attributes, fingerprint.clone());
                (id, fingerprint)
            }
            ResourceKind::Service => {
                let declared = self.manifest.services.get(key).cloned().ok_or_else(undeclared)?;
                let name = remote_name.map_or_else(|| declared.name.clone(), String::from);
                let mut data = ResourceData::new(name.as_str(), declared.clone(), declared);
                self.provisioner.read_service(&mut data).await?;
                let (id, attributes) = found(kind, &name, data)?;
                let fingerprint = self.hasher.hash_service(&attributes);
                state.set_service(key, id.clone(), attributes, fingerprint.clone());
                (id, fingerprint)
            }
            ResourceKind::Link => {
                let declared = self.manifest.links.get(key).cloned().ok_or_else(undeclared)?;
                let link_id = declared.link_id();
                if let Some(name) = remote_name.filter(|n| *n != link_id) {
                    return Err(ConfigError::validation(
                        format!("Link '{key}' has id '{link_id}', not '{name}'"),
                        format!("links.{key}"),
                    )
                    .into());
                }
                let mut data = ResourceData::new(link_id.as_str(), declared.clone(), declared);
                self.provisioner.read_link(&mut data).await?;
                let (id, attributes) = found(kind, &link_id, data)?;
                let fingerprint = self.hasher.hash_link(&attributes);
                state.set_link(key, id.clone(), attributes, fingerprint.clone());
                (id, fingerprint)
            }
        };

        let manifest_hash = state.manifest_hash.clone();
        state.add_history(DeploymentHistoryEntry::new(
            DeploymentOperation::Import,
            &manifest_hash,
            vec![format!("{kind}.{key}")],
        ));
        self.state_store.save(&state).await?;
        info!("Imported {kind} {key} as {id}");

        Ok(ImportedResource {
            kind,
            key: key.to_string(),
            id,
            fingerprint,
        })
    }

    /// Runs `work` while holding the state lock.
    async fn locked<T>(&self, operation: &str, work: impl Future<Output = Result<T>>) -> Result<T> {
        let lock = self
            .state_store
            .acquire_lock(&generate_holder_id(), operation)
            .await?;

        let result = work.await;

        if let Err(e) = self.state_store.release_lock(&lock.lock_id).await {
            error!("Failed to release state lock {}: {e}", lock.lock_id);
        }
        result
    }

    async fn run<F>(
        &self,
        manifest: &Manifest,
        operation: DeploymentOperation,
        approve: F,
    ) -> Result<ReconciliationResult>
    where
        F: FnOnce(&PlanPreview) -> Result<bool>,
    {
        let mut state = self.load_state().await?;
        let preview = self.preview(manifest, &mut state).await?;

        for removed in &preview.refresh.removed {
            warn!("{removed} no longer exists on the host");
        }

        if preview.plan.is_empty() {
            info!("No changes required - state is converged");
            self.state_store.save(&state).await?;
            return Ok(ReconciliationResult::from_diff(&preview.diff, true, Some(state)));
        }

        if !approve(&preview)? {
            info!("Plan declined");
            let mut result = ReconciliationResult::from_diff(&preview.diff, false, None);
            result.cancelled = true;
            return Ok(result);
        }

        let executor = PlanExecutor::new(self.provisioner, manifest)
            .with_continue_on_error(self.continue_on_error);
        let execution = executor.execute(&preview.plan, &mut state, operation).await;

        // Saved even after failures: the state holds whatever was applied.
        self.state_store.save(&state).await?;

        let success = execution.all_successful();
        let mut result = ReconciliationResult::from_diff(&preview.diff, success, Some(state));
        result.errors = execution_errors(&execution);
        Ok(result)
    }

    /// Checks for drift without applying changes or saving state.
    ///
    /// # Errors
    ///
    /// Returns an error if the drift check fails.
    pub async fn check_drift(&self) -> Result<DriftReport> {
        info!("Checking for drift against {}", self.manifest.provider.ssh_host);

        let mut state = self.load_state().await?;
        let recorded = state.resource_count();
        let preview = self.preview(self.manifest, &mut state).await?;

        let pending_changes = preview
            .diff
            .actionable_diffs()
            .into_iter()
            .map(ToString::to_string)
            .collect();

        let mut drifted_resources = preview.refresh.changed;
        drifted_resources.extend(preview.refresh.removed.iter().map(|r| format!("{r} (gone)")));

        Ok(DriftReport {
            has_drift: !drifted_resources.is_empty(),
            drifted_resources,
            pending_changes,
            total_resources: self.manifest.resource_count(),
            recorded_count: recorded,
        })
    }
}

/// Unpacks a record read back from the host, failing if it is absent.
fn found<T>(kind: ResourceKind, name: &str, data: ResourceData<T>) -> Result<(String, T)> {
    if !data.exists() {
        return Err(ReconcileError::ResourceReconcileFailed {
            resource_type: kind.to_string(),
            name: name.to_string(),
            reason: String::from("does not exist on the host"),
        }
        .into());
    }
    Ok(data.into_parts())
}

fn execution_errors(execution: &ExecutionResult) -> Vec<String> {
    execution
        .failures()
        .into_iter()
        .map(|r| format!("{}: {}", r.action.description(), r.outcome))
        .collect()
}

impl RefreshSummary {
    fn note(&mut self, kind: ResourceKind, key: &str, before: &str, after: &str) {
        self.refreshed += 1;
        // Records left by a partial apply have no fingerprint yet.
        if !before.is_empty() && before != after {
            self.changed.push(format!("{kind}.{key}"));
        }
    }

    fn gone(&mut self, kind: ResourceKind, key: &str) {
        self.removed.push(format!("{kind}.{key}"));
    }
}

impl ReconciliationResult {
    fn from_diff(diff: &DiffResult, success: bool, final_state: Option<DeploymentState>) -> Self {
        Self {
            success,
            cancelled: false,
            created: diff.creates,
            updated: diff.updates,
            replaced: diff.replaces,
            deleted: diff.deletes,
            unchanged: diff.unchanged,
            errors: Vec::new(),
            final_state,
        }
    }
}

/// Report of drift detection.
#[derive(Debug, serde::Serialize)]
pub struct DriftReport {
    /// Whether the host changed since the last run.
    pub has_drift: bool,
    /// Resources that changed or vanished on the host, as `kind.key`.
    pub drifted_resources: Vec<String>,
    /// Changes an apply would make.
    pub pending_changes: Vec<String>,
    /// Total number of resources in the manifest.
    pub total_resources: usize,
    /// Number of resources recorded before the refresh.
    pub recorded_count: usize,
}

impl DriftReport {
    /// Returns true if the host matches both the state and the manifest.
    #[must_use]
    pub fn is_converged(&self) -> bool {
        !self.has_drift && self.pending_changes.is_empty()
    }
}

impl std::fmt::Display for DriftReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.has_drift {
            writeln!(f, "Drift detected:")?;
            for resource in &self.drifted_resources {
                writeln!(f, "  - {resource}")?;
            }
        } else {
            writeln!(f, "No drift detected")?;
        }
        if self.pending_changes.is_empty() {
            write!(f, "Manifest is converged")?;
        } else {
            writeln!(f, "Pending changes:")?;
            for change in &self.pending_changes {
                writeln!(f, "  - {change}")?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for ReconciliationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.cancelled {
            return write!(f, "Reconciliation cancelled");
        }
        let status = if self.success { "successful" } else { "failed" };
        writeln!(f, "Reconciliation {status}:")?;
        writeln!(f, "  Created: {}", self.created)?;
        writeln!(f, "  Updated: {}", self.updated)?;
        writeln!(f, "  Replaced: {}", self.replaced)?;
        writeln!(f, "  Deleted: {}", self.deleted)?;
        writeln!(f, "  Unchanged: {}", self.unchanged)?;

        if !self.errors.is_empty() {
            writeln!(f, "  Errors:")?;
            for error in &self.errors {
                writeln!(f, "    - {error}")?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, ProviderConfig};
    use crate::dokku::testing::{client, ScriptedTransport, CURRENT};
    use crate::state::LocalStateStore;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn app_reads(transport: ScriptedTransport, name: &str, vars: &str) -> ScriptedTransport {
        transport
            .on_ok(&format!("apps:exists {name}"), "")
            .on_ok(&format!("config:show {name}"), &format!("=====> {name} env vars\n{vars}"))
            .on_ok(
                &format!("domains:report {name}"),
                &format!("=====> {name} domains information\n  Domains app vhosts:\n"),
            )
            .on_ok(&format!("buildpacks:list {name}"), &format!("=====> {name} buildpack urls\n"))
            .on_status(&format!("ports:list {name}"), 1)
            .on_ok(&format!("nginx:report {name}"), &format!("=====> {name} nginx information\n"))
    }

    fn manifest() -> Manifest {
        let mut app = AppConfig::new("web");
        app.config_vars.insert(String::from("MODE"), String::from("prod"));
        let mut manifest = Manifest {
            provider: ProviderConfig {
                ssh_host: String::from("dokku.example.com"),
                ..ProviderConfig::default()
            },
            ..Manifest::default()
        };
        manifest.apps.insert(String::from("web"), app);
        manifest
    }

    fn approve_all(_: &PlanPreview) -> Result<bool> {
        Ok(true)
    }

    fn decline(_: &PlanPreview) -> Result<bool> {
        Ok(false)
    }

    #[tokio::test]
    async fn test_apply_then_converged() {
        let dir = TempDir::new().unwrap();
        let store = LocalStateStore::new(dir.path().join("state.json"));
        let transport = Arc::new(app_reads(ScriptedTransport::new(), "web", "MODE: prod\n"));
        let provisioner = DokkuProvisioner::new(client(&transport, CURRENT));
        let manifest = manifest();
        let reconciler = Reconciler::new(&manifest, &store, &provisioner);

        let result = reconciler.reconcile(approve_all).await.unwrap();
        assert!(result.success, "{result}");
        assert_eq!(result.created, 1);
        assert!(!store.is_locked().await.unwrap());

        let state = store.load().await.unwrap().unwrap();
        assert_eq!(state.apps["web"].attributes.config_vars["MODE"], "prod");

        let preview = reconciler.plan().await.unwrap();
        assert!(preview.plan.is_empty());
        assert_eq!(preview.refresh.refreshed, 1);
    }

    #[tokio::test]
    async fn test_declined_plan_changes_nothing() {
        let dir = TempDir::new().unwrap();
        let store = LocalStateStore::new(dir.path().join("state.json"));
        let transport = Arc::new(ScriptedTransport::new());
        let provisioner = DokkuProvisioner::new(client(&transport, CURRENT));
        let manifest = manifest();

        let result = Reconciler::new(&manifest, &store, &provisioner)
            .reconcile(decline)
            .await
            .unwrap();

        assert!(result.cancelled);
        assert!(transport.mutations().is_empty());
        assert!(!store.exists().await.unwrap());
        assert!(!store.is_locked().await.unwrap());
    }

    #[tokio::test]
    async fn test_lock_held_elsewhere() {
        let dir = TempDir::new().unwrap();
        let store = LocalStateStore::new(dir.path().join("state.json"));
        store.acquire_lock("someone-else", "apply").await.unwrap();
        let transport = Arc::new(ScriptedTransport::new());
        let provisioner = DokkuProvisioner::new(client(&transport, CURRENT));
        let manifest = manifest();

        let result = Reconciler::new(&manifest, &store, &provisioner)
            .reconcile(approve_all)
            .await;

        assert!(result.is_err());
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_drops_missing_and_detects_drift() {
        let dir = TempDir::new().unwrap();
        let store = LocalStateStore::new(dir.path().join("state.json"));
        let hasher = ConfigHasher::new();
        let mut state = DeploymentState::new("dokku.example.com");
        let recorded = manifest().apps["web"].clone();
        state.set_app("web", String::from("web"), recorded.clone(), hasher.hash_app(&recorded));
        let gone = AppConfig::new("old");
        state.set_app("old", String::from("old"), gone.clone(), hasher.hash_app(&gone));
        store.save(&state).await.unwrap();

        // MODE was changed by hand on the host; "old" was destroyed.
        let transport = Arc::new(
            app_reads(ScriptedTransport::new(), "web", "MODE: debug\n")
                .on_status("apps:exists old", 1),
        );
        let provisioner = DokkuProvisioner::new(client(&transport, CURRENT));
        let manifest = manifest();

        let report = Reconciler::new(&manifest, &store, &provisioner)
            .check_drift()
            .await
            .unwrap();

        assert!(report.has_drift);
        assert_eq!(
            report.drifted_resources,
            vec![String::from("app.web"), String::from("app.old (gone)")]
        );
        assert_eq!(report.pending_changes.len(), 1);
        assert!(!report.is_converged());
        // Drift checks never write state.
        assert_eq!(store.load().await.unwrap().unwrap().apps.len(), 2);
    }

    #[tokio::test]
    async fn test_destroy_clears_state() {
        let dir = TempDir::new().unwrap();
        let store = LocalStateStore::new(dir.path().join("state.json"));
        let hasher = ConfigHasher::new();
        let mut state = DeploymentState::new("dokku.example.com");
        let recorded = manifest().apps["web"].clone();
        state.set_app("web", String::from("web"), recorded.clone(), hasher.hash_app(&recorded));
        store.save(&state).await.unwrap();

        let transport = Arc::new(app_reads(ScriptedTransport::new(), "web", "MODE: prod\n"));
        let provisioner = DokkuProvisioner::new(client(&transport, CURRENT));
        let manifest = manifest();

        let result = Reconciler::new(&manifest, &store, &provisioner)
            .destroy(approve_all)
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.deleted, 1);
        assert_eq!(transport.mutations(), vec![String::from("apps:destroy web --force")]);
        assert!(store.load().await.unwrap().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_import_adopts_existing_app() {
        let dir = TempDir::new().unwrap();
        let store = LocalStateStore::new(dir.path().join("state.json"));
        let reads = app_reads(ScriptedTransport::new(), "web", "MODE: prod\nOTHER: x\n");
        let transport = Arc::new(reads);
        let provisioner = DokkuProvisioner::new(client(&transport, CURRENT));
        let manifest = manifest();
        let reconciler = Reconciler::new(&manifest, &store, &provisioner);

        let imported = reconciler.import(ResourceKind::App, "web", None).await.unwrap();
        assert_eq!(imported.id, "web");
        assert!(transport.mutations().is_empty());
        assert!(!store.is_locked().await.unwrap());

        let state = store.load().await.unwrap().unwrap();
        let record = &state.apps["web"];
        assert_eq!(record.fingerprint, imported.fingerprint);
        // Only the variables the manifest manages are recorded.
        assert_eq!(record.attributes.config_vars.len(), 1);
        assert_eq!(state.history[0].operation, DeploymentOperation::Import);

        // The adopted app is converged, so the next plan creates nothing.
        let preview = reconciler.plan().await.unwrap();
        assert!(preview.plan.is_empty());

        let again = reconciler.import(ResourceKind::App, "web", None).await;
        assert!(again.is_err());
    }

    #[tokio::test]
    async fn test_import_missing_resource_records_nothing() {
        let dir = TempDir::new().unwrap();
        let store = LocalStateStore::new(dir.path().join("state.json"));
        let transport = Arc::new(ScriptedTransport::new().on_status("apps:exists ghost", 1));
        let provisioner = DokkuProvisioner::new(client(&transport, CURRENT));
        let manifest = manifest();
        let reconciler = Reconciler::new(&manifest, &store, &provisioner);

        let err = reconciler
            .import(ResourceKind::App, "web", Some("ghost"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
        assert!(!store.exists().await.unwrap());

        // Services and links need a manifest entry to know their family.
        let err = reconciler
            .import(ResourceKind::Service, "db", Some("db"))
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::DokkuError::Plan(_)));
        assert!(!store.is_locked().await.unwrap());
    }
}
