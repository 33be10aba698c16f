//! Diff engine for comparing the manifest with recorded state.
//!
//! The recorded state is expected to be freshly refreshed, so a record
//! reflects what the host reports. Unset computed attributes in the manifest
//! inherit the recorded value before fingerprints are compared.

use std::collections::{BTreeMap, HashSet};
use tracing::debug;

use crate::config::{AppConfig, ConfigHasher, LinkConfig, Manifest, ServiceConfig};
use crate::resource::ResourceKind;
use crate::state::{DeploymentState, ResourceRecord};

/// Placeholder shown instead of sensitive values.
const SENSITIVE: &str = "(sensitive)";

/// Engine for computing diffs between the manifest and recorded state.
#[derive(Debug, Default)]
pub struct DiffEngine {
    /// Fingerprint hasher.
    hasher: ConfigHasher,
}

/// Difference for a single resource.
#[derive(Debug, Clone)]
pub struct ResourceDiff {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Logical key in the manifest.
    pub key: String,
    /// Remote name (desired name, or recorded name for deletions).
    pub name: String,
    /// Type of difference.
    pub diff_type: DiffType,
    /// Per-attribute differences.
    pub details: Vec<DiffDetail>,
    /// Why a replacement is needed, if it is.
    pub reason: Option<String>,
    /// Recorded fingerprint (if recorded).
    pub old_hash: Option<String>,
    /// Desired fingerprint (if declared).
    pub new_hash: Option<String>,
}

/// Type of difference detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiffType {
    /// Resource needs to be created.
    Create,
    /// Resource needs to be updated in place.
    Update,
    /// Resource must be destroyed and created again.
    Replace,
    /// Resource needs to be deleted.
    Delete,
    /// Resource is unchanged.
    NoChange,
}

/// Detail about a specific difference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffDetail {
    /// Field that differs.
    pub field: String,
    /// Old value.
    pub old_value: Option<String>,
    /// New value.
    pub new_value: Option<String>,
}

/// Complete diff result.
#[derive(Debug, Default)]
pub struct DiffResult {
    /// All resource diffs.
    pub diffs: Vec<ResourceDiff>,
    /// Number of resources to create.
    pub creates: usize,
    /// Number of resources to update.
    pub updates: usize,
    /// Number of resources to replace.
    pub replaces: usize,
    /// Number of resources to delete.
    pub deletes: usize,
    /// Number of unchanged resources.
    pub unchanged: usize,
}

impl DiffEngine {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            hasher: ConfigHasher::new(),
        }
    }

    /// Computes the diff between the manifest and the recorded state.
    #[must_use]
    pub fn compute_diff(&self, manifest: &Manifest, state: &DeploymentState) -> DiffResult {
        let mut diffs = Vec::new();

        for (key, desired) in &manifest.apps {
            diffs.push(self.diff_app(key, desired, state.apps.get(key)));
        }
        diffs.extend(deletions(ResourceKind::App, &manifest.apps, &state.apps, |a| &a.name));

        for (key, desired) in &manifest.services {
            diffs.push(self.diff_service(key, desired, state.services.get(key)));
        }
        diffs.extend(deletions(
            ResourceKind::Service,
            &manifest.services,
            &state.services,
            |s| &s.name,
        ));

        for (key, desired) in &manifest.links {
            diffs.push(self.diff_link(key, desired, state.links.get(key)));
        }
        diffs.extend(deletions(ResourceKind::Link, &manifest.links, &state.links, |l| {
            &l.service
        }));

        cascade_service_replacements(&mut diffs, state);

        DiffResult::from_diffs(diffs)
    }

    fn diff_app(
        &self,
        key: &str,
        desired: &AppConfig,
        recorded: Option<&ResourceRecord<AppConfig>>,
    ) -> ResourceDiff {
        let Some(record) = recorded else {
            debug!("App {key} needs to be created");
            return created(ResourceKind::App, key, &desired.name, self.hasher.hash_app(desired));
        };

        let desired = desired.clone().with_computed_from(&record.attributes);
        let new_hash = self.hasher.hash_app(&desired);
        let old_hash = self.hasher.hash_app(&record.attributes);
        let diff_type = if ConfigHasher::hashes_match(&old_hash, &new_hash) {
            DiffType::NoChange
        } else {
            DiffType::Update
        };
        debug!("App {key}: {diff_type}");

        ResourceDiff {
            kind: ResourceKind::App,
            key: key.to_string(),
            name: desired.name.clone(),
            diff_type,
            details: app_details(&record.attributes, &desired),
            reason: None,
            old_hash: Some(old_hash),
            new_hash: Some(new_hash),
        }
    }

    fn diff_service(
        &self,
        key: &str,
        desired: &ServiceConfig,
        recorded: Option<&ResourceRecord<ServiceConfig>>,
    ) -> ResourceDiff {
        let Some(record) = recorded else {
            debug!("Service {key} needs to be created");
            return created(
                ResourceKind::Service,
                key,
                &desired.name,
                self.hasher.hash_service(desired),
            );
        };

        let prior = &record.attributes;
        let desired = desired.clone().with_computed_from(prior);
        let new_hash = self.hasher.hash_service(&desired);
        let old_hash = self.hasher.hash_service(prior);

        let reason = if desired.family != prior.family {
            Some(format!("family changes from {} to {}", prior.family, desired.family))
        } else if desired.name != prior.name && !desired.family.capabilities().clone {
            Some(format!("{} services cannot be renamed", desired.family))
        } else {
            None
        };

        let diff_type = if ConfigHasher::hashes_match(&old_hash, &new_hash) {
            DiffType::NoChange
        } else if reason.is_some() {
            DiffType::Replace
        } else {
            DiffType::Update
        };
        debug!("Service {key}: {diff_type}");

        ResourceDiff {
            kind: ResourceKind::Service,
            key: key.to_string(),
            name: desired.name.clone(),
            diff_type,
            details: service_details(prior, &desired),
            reason,
            old_hash: Some(old_hash),
            new_hash: Some(new_hash),
        }
    }

    fn diff_link(
        &self,
        key: &str,
        desired: &LinkConfig,
        recorded: Option<&ResourceRecord<LinkConfig>>,
    ) -> ResourceDiff {
        let new_hash = self.hasher.hash_link(desired);
        let Some(record) = recorded else {
            debug!("Link {key} needs to be created");
            return created(ResourceKind::Link, key, &desired.link_id(), new_hash);
        };

        let old_hash = self.hasher.hash_link(&record.attributes);
        let (diff_type, reason) = if ConfigHasher::hashes_match(&old_hash, &new_hash) {
            (DiffType::NoChange, None)
        } else {
            (DiffType::Replace, Some(String::from("link attributes cannot change in place")))
        };
        debug!("Link {key}: {diff_type}");

        ResourceDiff {
            kind: ResourceKind::Link,
            key: key.to_string(),
            name: desired.link_id(),
            diff_type,
            details: link_details(&record.attributes, desired),
            reason,
            old_hash: Some(old_hash),
            new_hash: Some(new_hash),
        }
    }
}

fn created(kind: ResourceKind, key: &str, name: &str, new_hash: String) -> ResourceDiff {
    ResourceDiff {
        kind,
        key: key.to_string(),
        name: name.to_string(),
        diff_type: DiffType::Create,
        details: Vec::new(),
        reason: None,
        old_hash: None,
        new_hash: Some(new_hash),
    }
}

/// Diffs for recorded resources no longer declared.
fn deletions<T>(
    kind: ResourceKind,
    declared: &BTreeMap<String, T>,
    recorded: &BTreeMap<String, ResourceRecord<T>>,
    name: impl Fn(&T) -> &String,
) -> Vec<ResourceDiff> {
    recorded
        .iter()
        .filter(|(key, _)| !declared.contains_key(*key))
        .map(|(key, record)| {
            debug!("{kind} {key} removed from manifest");
            ResourceDiff {
                kind,
                key: key.clone(),
                name: if kind == ResourceKind::Link {
                    record.id.clone()
                } else {
                    name(&record.attributes).clone()
                },
                diff_type: DiffType::Delete,
                details: Vec::new(),
                reason: None,
                old_hash: Some(record.fingerprint.clone()),
                new_hash: None,
            }
        })
        .collect()
}

/// Replacing a service destroys it, which drops its links; unchanged links
/// to it are replaced too.
fn cascade_service_replacements(diffs: &mut [ResourceDiff], state: &DeploymentState) {
    let replaced: HashSet<&str> = diffs
        .iter()
        .filter(|d| d.kind == ResourceKind::Service && d.diff_type == DiffType::Replace)
        .filter_map(|d| state.services.get(&d.key))
        .map(|record| record.attributes.name.as_str())
        .collect();
    if replaced.is_empty() {
        return;
    }

    let affected: Vec<String> = state
        .links
        .iter()
        .filter(|(_, record)| replaced.contains(record.attributes.service.as_str()))
        .map(|(key, _)| key.clone())
        .collect();

    for diff in diffs.iter_mut() {
        if diff.kind == ResourceKind::Link
            && diff.diff_type == DiffType::NoChange
            && affected.contains(&diff.key)
        {
            diff.diff_type = DiffType::Replace;
            diff.reason = Some(String::from("linked service is replaced"));
        }
    }
}

fn push_detail(
    details: &mut Vec<DiffDetail>,
    field: &str,
    old: Option<String>,
    new: Option<String>,
) {
    if old != new {
        details.push(DiffDetail {
            field: field.to_string(),
            old_value: old,
            new_value: new,
        });
    }
}

fn join<'a>(values: impl IntoIterator<Item = &'a String>) -> String {
    values.into_iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}

fn app_details(old: &AppConfig, new: &AppConfig) -> Vec<DiffDetail> {
    let mut details = Vec::new();
    push_detail(&mut details, "name", Some(old.name.clone()), Some(new.name.clone()));

    // Values may be secrets; only keys are shown.
    for key in old.config_vars.keys().chain(new.config_vars.keys()) {
        let before = old.config_vars.get(key);
        let after = new.config_vars.get(key);
        if before != after && !details.iter().any(|d| d.field == format!("config_vars.{key}")) {
            details.push(DiffDetail {
                field: format!("config_vars.{key}"),
                old_value: before.map(|_| String::from(SENSITIVE)),
                new_value: after.map(|_| String::from(SENSITIVE)),
            });
        }
    }

    push_detail(
        &mut details,
        "domains",
        old.domains.as_ref().map(|d| join(d)),
        new.domains.as_ref().map(|d| join(d)),
    );
    push_detail(
        &mut details,
        "buildpacks",
        Some(join(&old.buildpacks)),
        Some(join(&new.buildpacks)),
    );
    push_detail(&mut details, "ports", Some(join(&old.ports)), Some(join(&new.ports)));
    push_detail(
        &mut details,
        "nginx_bind_address_ipv4",
        Some(old.nginx_bind_address_ipv4.clone()),
        Some(new.nginx_bind_address_ipv4.clone()),
    );
    push_detail(
        &mut details,
        "nginx_bind_address_ipv6",
        Some(old.nginx_bind_address_ipv6.clone()),
        Some(new.nginx_bind_address_ipv6.clone()),
    );
    details
}

fn service_details(old: &ServiceConfig, new: &ServiceConfig) -> Vec<DiffDetail> {
    let mut details = Vec::new();
    let secret = |v: &Option<String>| v.as_ref().map(|_| String::from(SENSITIVE));

    push_detail(&mut details, "name", Some(old.name.clone()), Some(new.name.clone()));
    push_detail(&mut details, "family", Some(old.family.to_string()), Some(new.family.to_string()));
    push_detail(&mut details, "image", old.image.clone(), new.image.clone());
    push_detail(
        &mut details,
        "image_version",
        old.image_version.clone(),
        new.image_version.clone(),
    );
    push_detail(
        &mut details,
        "stopped",
        Some(old.stopped.to_string()),
        Some(new.stopped.to_string()),
    );
    push_detail(&mut details, "expose_on", old.expose_on.clone(), new.expose_on.clone());
    if old.password != new.password {
        details.push(DiffDetail {
            field: String::from("password"),
            old_value: secret(&old.password),
            new_value: secret(&new.password),
        });
    }
    if old.root_password != new.root_password {
        details.push(DiffDetail {
            field: String::from("root_password"),
            old_value: secret(&old.root_password),
            new_value: secret(&new.root_password),
        });
    }
    details
}

fn link_details(old: &LinkConfig, new: &LinkConfig) -> Vec<DiffDetail> {
    let mut details = Vec::new();
    push_detail(&mut details, "family", Some(old.family.to_string()), Some(new.family.to_string()));
    push_detail(&mut details, "service", Some(old.service.clone()), Some(new.service.clone()));
    push_detail(&mut details, "app", Some(old.app.clone()), Some(new.app.clone()));
    push_detail(&mut details, "alias", old.alias.clone(), new.alias.clone());
    push_detail(&mut details, "query_string", old.query_string.clone(), new.query_string.clone());
    details
}

impl DiffResult {
    /// Builds a result and its summary counts.
    #[must_use]
    pub fn from_diffs(diffs: Vec<ResourceDiff>) -> Self {
        let count = |t: DiffType| diffs.iter().filter(|d| d.diff_type == t).count();
        Self {
            creates: count(DiffType::Create),
            updates: count(DiffType::Update),
            replaces: count(DiffType::Replace),
            deletes: count(DiffType::Delete),
            unchanged: count(DiffType::NoChange),
            diffs,
        }
    }

    /// Returns true if there are any changes.
    #[must_use]
    pub const fn has_changes(&self) -> bool {
        self.total_changes() > 0
    }

    /// Returns the total number of changes.
    #[must_use]
    pub const fn total_changes(&self) -> usize {
        self.creates + self.updates + self.replaces + self.deletes
    }

    /// Filters to only diffs that require action.
    #[must_use]
    pub fn actionable_diffs(&self) -> Vec<&ResourceDiff> {
        self.diffs
            .iter()
            .filter(|d| d.diff_type != DiffType::NoChange)
            .collect()
    }

    /// Finds the diff of a resource.
    #[must_use]
    pub fn find(&self, kind: ResourceKind, key: &str) -> Option<&ResourceDiff> {
        self.diffs.iter().find(|d| d.kind == kind && d.key == key)
    }
}

impl std::fmt::Display for DiffType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::NoChange => "no change",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for ResourceDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}: {}", self.kind, self.key, self.diff_type)?;
        if !self.details.is_empty() {
            let fields: Vec<&str> = self.details.iter().map(|d| d.field.as_str()).collect();
            write!(f, " ({})", fields.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceFamily;
    use std::collections::BTreeSet;

    fn record_app(state: &mut DeploymentState, key: &str, app: AppConfig) {
        let hash = ConfigHasher::new().hash_app(&app);
        state.set_app(key, app.name.clone(), app, hash);
    }

    fn record_service(state: &mut DeploymentState, key: &str, service: ServiceConfig) {
        let hash = ConfigHasher::new().hash_service(&service);
        state.set_service(key, service.name.clone(), service, hash);
    }

    fn link(service: &str, app: &str) -> LinkConfig {
        LinkConfig {
            family: ServiceFamily::Postgres,
            service: service.to_string(),
            app: app.to_string(),
            alias: None,
            query_string: None,
        }
    }

    fn record_link(state: &mut DeploymentState, key: &str, link: LinkConfig) {
        let hash = ConfigHasher::new().hash_link(&link);
        state.set_link(key, link.link_id(), link, hash);
    }

    #[test]
    fn test_create_and_delete() {
        let mut manifest = Manifest::default();
        manifest.apps.insert(String::from("web"), AppConfig::new("web"));
        let mut state = DeploymentState::new("host");
        record_app(&mut state, "old", AppConfig::new("legacy"));

        let result = DiffEngine::new().compute_diff(&manifest, &state);
        assert_eq!(result.creates, 1);
        assert_eq!(result.deletes, 1);
        let delete = result.find(ResourceKind::App, "old").unwrap();
        assert_eq!(delete.name, "legacy");
    }

    #[test]
    fn test_computed_domains_do_not_diff() {
        let mut recorded = AppConfig::new("web");
        recorded.domains = Some(BTreeSet::from([String::from("web.dokku.me")]));
        let mut state = DeploymentState::new("host");
        record_app(&mut state, "web", recorded);

        let mut manifest = Manifest::default();
        manifest.apps.insert(String::from("web"), AppConfig::new("web"));

        let result = DiffEngine::new().compute_diff(&manifest, &state);
        assert!(!result.has_changes());
        assert_eq!(result.unchanged, 1);
    }

    #[test]
    fn test_app_update_details_hide_values() {
        let mut state = DeploymentState::new("host");
        record_app(&mut state, "web", AppConfig::new("web"));

        let mut desired = AppConfig::new("web");
        desired.config_vars.insert(String::from("SECRET"), String::from("hunter2"));
        let mut manifest = Manifest::default();
        manifest.apps.insert(String::from("web"), desired);

        let result = DiffEngine::new().compute_diff(&manifest, &state);
        let diff = result.find(ResourceKind::App, "web").unwrap();
        assert_eq!(diff.diff_type, DiffType::Update);
        assert_eq!(diff.details.len(), 1);
        assert_eq!(diff.details[0].field, "config_vars.SECRET");
        assert_eq!(diff.details[0].new_value.as_deref(), Some(SENSITIVE));
    }

    #[test]
    fn test_service_rename_without_clone_is_replace() {
        let mut state = DeploymentState::new("host");
        record_service(&mut state, "ch", ServiceConfig::new("events", ServiceFamily::Clickhouse));
        record_service(&mut state, "db", ServiceConfig::new("db", ServiceFamily::Postgres));

        let mut manifest = Manifest::default();
        manifest.services.insert(
            String::from("ch"),
            ServiceConfig::new("events2", ServiceFamily::Clickhouse),
        );
        manifest.services.insert(
            String::from("db"),
            ServiceConfig::new("db2", ServiceFamily::Postgres),
        );

        let result = DiffEngine::new().compute_diff(&manifest, &state);
        assert_eq!(result.find(ResourceKind::Service, "ch").unwrap().diff_type, DiffType::Replace);
        assert_eq!(result.find(ResourceKind::Service, "db").unwrap().diff_type, DiffType::Update);
    }

    #[test]
    fn test_service_family_change_is_replace() {
        let mut state = DeploymentState::new("host");
        record_service(&mut state, "db", ServiceConfig::new("db", ServiceFamily::Postgres));

        let mut manifest = Manifest::default();
        manifest
            .services
            .insert(String::from("db"), ServiceConfig::new("db", ServiceFamily::Mysql));

        let result = DiffEngine::new().compute_diff(&manifest, &state);
        let diff = result.find(ResourceKind::Service, "db").unwrap();
        assert_eq!(diff.diff_type, DiffType::Replace);
        assert!(diff.reason.as_deref().unwrap().contains("family"));
    }

    #[test]
    fn test_link_change_is_replace() {
        let mut state = DeploymentState::new("host");
        record_link(&mut state, "l", link("db", "web"));

        let mut changed = link("db", "web");
        changed.alias = Some(String::from("PRIMARY"));
        let mut manifest = Manifest::default();
        manifest.links.insert(String::from("l"), changed);

        let result = DiffEngine::new().compute_diff(&manifest, &state);
        assert_eq!(result.replaces, 1);
    }

    #[test]
    fn test_service_replacement_cascades_to_links() {
        let mut state = DeploymentState::new("host");
        record_service(&mut state, "db", ServiceConfig::new("db", ServiceFamily::Postgres));
        record_link(&mut state, "l", link("db", "web"));

        let mut manifest = Manifest::default();
        manifest
            .services
            .insert(String::from("db"), ServiceConfig::new("db", ServiceFamily::Mysql));
        manifest.links.insert(String::from("l"), link("db", "web"));

        let result = DiffEngine::new().compute_diff(&manifest, &state);
        let link_diff = result.find(ResourceKind::Link, "l").unwrap();
        assert_eq!(link_diff.diff_type, DiffType::Replace);
        assert_eq!(result.replaces, 2);
    }
}
