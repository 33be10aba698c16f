//! State types for tracking managed resources.
//!
//! These types represent the recorded state of every resource the manifest
//! manages, used for change detection and for reading resources back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::{AppConfig, LinkConfig, ServiceConfig};
use crate::resource::ResourceKind;

/// Current version of the state format.
pub const STATE_VERSION: &str = "1";

/// Number of history entries kept.
pub const MAX_HISTORY: usize = 100;

/// The complete recorded state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentState {
    /// State format version.
    pub version: String,
    /// Dokku host the resources live on.
    pub host: String,
    /// Hash of the last applied manifest.
    #[serde(default)]
    pub manifest_hash: String,
    /// Recorded applications keyed by logical key.
    #[serde(default)]
    pub apps: BTreeMap<String, ResourceRecord<AppConfig>>,
    /// Recorded services keyed by logical key.
    #[serde(default)]
    pub services: BTreeMap<String, ResourceRecord<ServiceConfig>>,
    /// Recorded links keyed by logical key.
    #[serde(default)]
    pub links: BTreeMap<String, ResourceRecord<LinkConfig>>,
    /// When the state was last updated.
    pub last_updated: DateTime<Utc>,
    /// Deployment history (recent entries).
    #[serde(default)]
    pub history: Vec<DeploymentHistoryEntry>,
}

/// A recorded resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceRecord<T> {
    /// Remote identifier.
    pub id: String,
    /// Attributes as last applied or read back.
    pub attributes: T,
    /// Fingerprint of `attributes`.
    pub fingerprint: String,
    /// When the resource was first recorded.
    pub created_at: DateTime<Utc>,
    /// When the record last changed.
    pub updated_at: DateTime<Utc>,
}

/// A single entry in the deployment history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentHistoryEntry {
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
    /// Type of operation.
    pub operation: DeploymentOperation,
    /// Manifest hash at the time of the run.
    pub manifest_hash: String,
    /// Resources affected, as `kind.key`.
    pub resources: Vec<String>,
    /// Whether the run succeeded.
    pub success: bool,
    /// Optional error message.
    #[serde(default)]
    pub error: Option<String>,
}

/// Types of deployment operations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentOperation {
    /// Manifest applied.
    Apply,
    /// Every managed resource destroyed.
    Destroy,
    /// An existing host resource adopted into the state.
    Import,
}

impl DeploymentState {
    /// Creates a new empty state for a host.
    #[must_use]
    pub fn new(host: &str) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            host: host.to_string(),
            manifest_hash: String::new(),
            apps: BTreeMap::new(),
            services: BTreeMap::new(),
            links: BTreeMap::new(),
            last_updated: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Records an application, keeping its creation time if already known.
    pub fn set_app(&mut self, key: &str, id: String, attributes: AppConfig, fingerprint: String) {
        upsert(&mut self.apps, key, id, attributes, fingerprint);
        self.last_updated = Utc::now();
    }

    /// Records a service, keeping its creation time if already known.
    pub fn set_service(
        &mut self,
        key: &str,
        id: String,
        attributes: ServiceConfig,
        fingerprint: String,
    ) {
        upsert(&mut self.services, key, id, attributes, fingerprint);
        self.last_updated = Utc::now();
    }

    /// Records a link, keeping its creation time if already known.
    pub fn set_link(&mut self, key: &str, id: String, attributes: LinkConfig, fingerprint: String) {
        upsert(&mut self.links, key, id, attributes, fingerprint);
        self.last_updated = Utc::now();
    }

    /// Removes a recorded resource. Returns true if it was present.
    pub fn remove(&mut self, kind: ResourceKind, key: &str) -> bool {
        let removed = match kind {
            ResourceKind::App => self.apps.remove(key).is_some(),
            ResourceKind::Service => self.services.remove(key).is_some(),
            ResourceKind::Link => self.links.remove(key).is_some(),
        };
        if removed {
            self.last_updated = Utc::now();
        }
        removed
    }

    /// Returns true if a resource is recorded under the key.
    #[must_use]
    pub fn contains(&self, kind: ResourceKind, key: &str) -> bool {
        match kind {
            ResourceKind::App => self.apps.contains_key(key),
            ResourceKind::Service => self.services.contains_key(key),
            ResourceKind::Link => self.links.contains_key(key),
        }
    }

    /// Returns the total number of recorded resources.
    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.apps.len() + self.services.len() + self.links.len()
    }

    /// Returns true if nothing is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resource_count() == 0
    }

    /// Adds a history entry, dropping the oldest beyond [`MAX_HISTORY`].
    pub fn add_history(&mut self, entry: DeploymentHistoryEntry) {
        if self.history.len() >= MAX_HISTORY {
            let excess = self.history.len() + 1 - MAX_HISTORY;
            self.history.drain(..excess);
        }
        self.history.push(entry);
    }
}

fn upsert<T>(
    records: &mut BTreeMap<String, ResourceRecord<T>>,
    key: &str,
    id: String,
    attributes: T,
    fingerprint: String,
) {
    match records.get_mut(key) {
        Some(record) => record.update(id, attributes, fingerprint),
        None => {
            records.insert(key.to_string(), ResourceRecord::new(id, attributes, fingerprint));
        }
    }
}

impl<T> ResourceRecord<T> {
    /// Creates a new record.
    #[must_use]
    pub fn new(id: String, attributes: T, fingerprint: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            attributes,
            fingerprint,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replaces the recorded attributes.
    pub fn update(&mut self, id: String, attributes: T, fingerprint: String) {
        if self.fingerprint != fingerprint || self.id != id {
            self.updated_at = Utc::now();
        }
        self.id = id;
        self.attributes = attributes;
        self.fingerprint = fingerprint;
    }
}

impl DeploymentHistoryEntry {
    /// Creates a new history entry.
    #[must_use]
    pub fn new(
        operation: DeploymentOperation,
        manifest_hash: &str,
        resources: Vec<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            manifest_hash: manifest_hash.to_string(),
            resources,
            success: true,
            error: None,
        }
    }

    /// Creates a failed history entry.
    #[must_use]
    pub fn failed(
        operation: DeploymentOperation,
        manifest_hash: &str,
        resources: Vec<String>,
        error: &str,
    ) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            ..Self::new(operation, manifest_hash, resources)
        }
    }
}

impl std::fmt::Display for DeploymentOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Apply => "apply",
            Self::Destroy => "destroy",
            Self::Import => "import",
        };
        write!(f, "{op}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_keeps_created_at() {
        let mut state = DeploymentState::new("dokku.example.com");
        state.set_app("web", String::from("web"), AppConfig::new("web"), String::from("h1"));
        let created = state.apps["web"].created_at;

        state.set_app("web", String::from("web2"), AppConfig::new("web2"), String::from("h2"));
        let record = &state.apps["web"];
        assert_eq!(record.created_at, created);
        assert_eq!(record.id, "web2");
        assert_eq!(record.fingerprint, "h2");
        assert!(record.updated_at >= created);
    }

    #[test]
    fn test_remove_by_kind() {
        let mut state = DeploymentState::new("host");
        state.set_app("web", String::from("web"), AppConfig::new("web"), String::new());

        assert!(state.contains(ResourceKind::App, "web"));
        assert!(!state.remove(ResourceKind::Service, "web"));
        assert!(state.remove(ResourceKind::App, "web"));
        assert!(state.is_empty());
    }

    #[test]
    fn test_history_is_bounded() {
        let mut state = DeploymentState::new("host");
        for i in 0..(MAX_HISTORY + 5) {
            state.add_history(DeploymentHistoryEntry::new(
                DeploymentOperation::Apply,
                &i.to_string(),
                Vec::new(),
            ));
        }

        assert_eq!(state.history.len(), MAX_HISTORY);
        assert_eq!(state.history[0].manifest_hash, "5");
    }

    #[test]
    fn test_state_serialization() {
        let mut state = DeploymentState::new("host");
        state.set_app("web", String::from("web"), AppConfig::new("web"), String::from("abc"));

        let json = serde_json::to_string(&state).unwrap();
        let parsed: DeploymentState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.apps["web"], state.apps["web"]);
    }

    #[test]
    fn test_failed_history_entry() {
        let entry = DeploymentHistoryEntry::failed(
            DeploymentOperation::Destroy,
            "abc",
            vec![String::from("app.web")],
            "boom",
        );
        assert!(!entry.success);
        assert_eq!(entry.error.as_deref(), Some("boom"));
        assert_eq!(entry.operation.to_string(), "destroy");
    }
}
