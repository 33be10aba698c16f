//! Manifest specification types for the reconciliation system.
//!
//! This module defines all the structs that map to the `dokku.yaml` manifest.
//! Resources are declared under a stable logical key; the `name` attribute is
//! the remote identifier, so changing it under the same key is a rename.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Default IPv4 address nginx binds to.
pub const DEFAULT_BIND_ADDRESS_IPV4: &str = "0.0.0.0";

/// Default IPv6 address nginx binds to.
pub const DEFAULT_BIND_ADDRESS_IPV6: &str = "::";

/// The root manifest structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Manifest {
    /// Connection settings for the Dokku host.
    #[serde(default)]
    pub provider: ProviderConfig,
    /// State file configuration.
    #[serde(default)]
    pub state: StateConfig,
    /// Applications keyed by logical key.
    #[serde(default)]
    pub apps: BTreeMap<String, AppConfig>,
    /// Managed services keyed by logical key.
    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,
    /// Service links keyed by logical key.
    #[serde(default)]
    pub links: BTreeMap<String, LinkConfig>,
}

/// Connection settings for the Dokku host.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Hostname of the Dokku server.
    #[serde(default)]
    pub ssh_host: String,
    /// SSH user, normally `dokku`.
    #[serde(default = "default_ssh_user")]
    pub ssh_user: String,
    /// SSH port.
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    /// Path to a private key, or the key material itself.
    #[serde(default)]
    pub ssh_cert: String,
    /// Passphrase for the private key.
    #[serde(default)]
    pub ssh_passphrase: Option<String>,
    /// Refuse to run against Dokku versions outside the tested range.
    #[serde(default = "default_true")]
    pub fail_on_untested_version: bool,
    /// Skip known-hosts verification.
    #[serde(default)]
    pub skip_known_hosts_check: bool,
}

/// State file configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StateConfig {
    /// Path of the state file (defaults to `.dokku/state.json`).
    #[serde(default)]
    pub path: Option<String>,
}

/// Desired attributes of a Dokku application.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    /// Application name on the Dokku host.
    pub name: String,
    /// Reserved; not enforced on the remote.
    #[serde(default)]
    pub locked: bool,
    /// Configuration variables managed by this manifest.
    #[serde(default)]
    pub config_vars: BTreeMap<String, String>,
    /// Domains; left to the host when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domains: Option<BTreeSet<String>>,
    /// Buildpacks, in order.
    #[serde(default)]
    pub buildpacks: Vec<String>,
    /// Port mappings as `scheme:hostPort:containerPort`.
    #[serde(default)]
    pub ports: BTreeSet<String>,
    /// IPv4 address nginx binds to.
    #[serde(default = "default_bind_ipv4")]
    pub nginx_bind_address_ipv4: String,
    /// IPv6 address nginx binds to.
    #[serde(default = "default_bind_ipv6")]
    pub nginx_bind_address_ipv6: String,
}

/// Managed service families.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ServiceFamily {
    /// Relational store (dokku-postgres).
    Postgres,
    /// Relational store (dokku-mysql).
    Mysql,
    /// Key-value store (dokku-redis).
    Redis,
    /// Document store (dokku-mongo).
    Mongodb,
    /// Columnar store (dokku-clickhouse).
    Clickhouse,
}

/// Desired attributes of a managed service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Service name on the Dokku host.
    pub name: String,
    /// Service family.
    pub family: ServiceFamily,
    /// Container image; read back from the host when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Container image version; read back from the host when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_version: Option<String>,
    /// Whether the service should be stopped.
    #[serde(default)]
    pub stopped: bool,
    /// Address to expose the service on (`host:port`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expose_on: Option<String>,
    /// Service password (write-only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Service root password (write-only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_password: Option<String>,
}

/// Desired link between a service and an application.
///
/// Every attribute is immutable; a change replaces the link.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LinkConfig {
    /// Family of the linked service.
    pub family: ServiceFamily,
    /// Service name.
    pub service: String,
    /// Application name.
    pub app: String,
    /// Alternative environment variable name for the credentials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Query string appended to the connection URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_string: Option<String>,
}

impl Manifest {
    /// Returns the total number of declared resources.
    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.apps.len() + self.services.len() + self.links.len()
    }

    /// Finds a declared service by remote name.
    #[must_use]
    pub fn service_by_name(&self, name: &str) -> Option<&ServiceConfig> {
        self.services.values().find(|s| s.name == name)
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            ssh_host: String::new(),
            ssh_user: default_ssh_user(),
            ssh_port: default_ssh_port(),
            ssh_cert: String::new(),
            ssh_passphrase: None,
            fail_on_untested_version: true,
            skip_known_hosts_check: false,
        }
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("ssh_host", &self.ssh_host)
            .field("ssh_user", &self.ssh_user)
            .field("ssh_port", &self.ssh_port)
            .field("ssh_cert", &"<redacted>")
            .field("ssh_passphrase", &self.ssh_passphrase.as_ref().map(|_| "<redacted>"))
            .field("fail_on_untested_version", &self.fail_on_untested_version)
            .field("skip_known_hosts_check", &self.skip_known_hosts_check)
            .finish()
    }
}

impl AppConfig {
    /// Creates an app with the given name and default attributes.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            locked: false,
            config_vars: BTreeMap::new(),
            domains: None,
            buildpacks: Vec::new(),
            ports: BTreeSet::new(),
            nginx_bind_address_ipv4: default_bind_ipv4(),
            nginx_bind_address_ipv6: default_bind_ipv6(),
        }
    }

    /// Fills unset computed attributes from a prior record.
    #[must_use]
    pub fn with_computed_from(mut self, prior: &Self) -> Self {
        if self.domains.is_none() {
            self.domains.clone_from(&prior.domains);
        }
        self
    }

    /// Returns the declared domains, empty when unset.
    #[must_use]
    pub fn domain_list(&self) -> Vec<String> {
        self.domains
            .as_ref()
            .map(|d| d.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl ServiceConfig {
    /// Creates a service with the given name and family.
    #[must_use]
    pub fn new(name: impl Into<String>, family: ServiceFamily) -> Self {
        Self {
            name: name.into(),
            family,
            image: None,
            image_version: None,
            stopped: false,
            expose_on: None,
            password: None,
            root_password: None,
        }
    }

    /// Fills unset computed and write-only attributes from a prior record.
    #[must_use]
    pub fn with_computed_from(mut self, prior: &Self) -> Self {
        if self.image.is_none() {
            self.image.clone_from(&prior.image);
        }
        if self.image_version.is_none() {
            self.image_version.clone_from(&prior.image_version);
        }
        self
    }
}

impl LinkConfig {
    /// Identifier of the link on the framework side.
    #[must_use]
    pub fn link_id(&self) -> String {
        format!("{}-{}", self.service, self.app)
    }
}

impl std::fmt::Display for ServiceFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Postgres => "postgres",
            Self::Mysql => "mysql",
            Self::Redis => "redis",
            Self::Mongodb => "mongodb",
            Self::Clickhouse => "clickhouse",
        };
        write!(f, "{s}")
    }
}

fn default_ssh_user() -> String {
    String::from("dokku")
}

const fn default_ssh_port() -> u16 {
    22
}

const fn default_true() -> bool {
    true
}

fn default_bind_ipv4() -> String {
    String::from(DEFAULT_BIND_ADDRESS_IPV4)
}

fn default_bind_ipv6() -> String {
    String::from(DEFAULT_BIND_ADDRESS_IPV6)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_defaults() {
        let yaml = "name: web\n";
        let app: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(app, AppConfig::new("web"));
        assert_eq!(app.nginx_bind_address_ipv4, "0.0.0.0");
        assert_eq!(app.nginx_bind_address_ipv6, "::");
        assert!(app.domains.is_none());
    }

    #[test]
    fn test_service_inherits_computed_image() {
        let mut prior = ServiceConfig::new("db", ServiceFamily::Postgres);
        prior.image = Some(String::from("postgres"));
        prior.image_version = Some(String::from("11.6"));

        let desired = ServiceConfig::new("db", ServiceFamily::Postgres).with_computed_from(&prior);
        assert_eq!(desired.image.as_deref(), Some("postgres"));
        assert_eq!(desired.image_version.as_deref(), Some("11.6"));
    }

    #[test]
    fn test_app_domains_explicit_empty_not_inherited() {
        let mut prior = AppConfig::new("web");
        prior.domains = Some(BTreeSet::from([String::from("web.example.com")]));

        let mut desired = AppConfig::new("web");
        desired.domains = Some(BTreeSet::new());

        let merged = desired.with_computed_from(&prior);
        assert_eq!(merged.domains, Some(BTreeSet::new()));
    }

    #[test]
    fn test_provider_debug_redacts_key() {
        let provider = ProviderConfig {
            ssh_cert: String::from("-----BEGIN KEY-----"),
            ..ProviderConfig::default()
        };
        let rendered = format!("{provider:?}");
        assert!(!rendered.contains("BEGIN"));
    }

    #[test]
    fn test_link_id() {
        let link = LinkConfig {
            family: ServiceFamily::Redis,
            service: String::from("cache"),
            app: String::from("web"),
            alias: None,
            query_string: None,
        };
        assert_eq!(link.link_id(), "cache-web");
    }
}
