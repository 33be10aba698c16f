//! Dokku resource representations.
//!
//! These types sit between the manifest attribute structs and the remote
//! reports: they are built either from desired attributes or from parsed
//! reports, and project back into attribute structs. Configuration variables
//! and ports are projected onto the recorded (managed) subset so values the
//! platform adds on its own are never claimed.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::config::{
    AppConfig, DEFAULT_BIND_ADDRESS_IPV4, DEFAULT_BIND_ADDRESS_IPV6, ServiceConfig, ServiceFamily,
};
use crate::error::ConfigError;

use super::parse::split_image;

/// Report key holding the app's domains.
pub const DOMAINS_KEY: &str = "Domains app vhosts";

/// Report key holding the nginx IPv4 bind address.
pub const NGINX_IPV4_KEY: &str = "Nginx bind address ipv4";

/// Report key holding the nginx IPv6 bind address.
pub const NGINX_IPV6_KEY: &str = "Nginx bind address ipv6";

/// Service statuses that read as stopped.
const STOPPED_STATUSES: [&str; 2] = ["exited", "missing"];

/// Commands and flags a service family supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceCapabilities {
    /// Command prefix, e.g. `postgres` in `postgres:create`.
    pub prefix: &'static str,
    /// Accepts `--image` and `--image-version`.
    pub image: bool,
    /// Supports `:clone`, and therefore renames.
    pub clone: bool,
    /// Accepts `--password`.
    pub password: bool,
    /// Accepts `--root-password`.
    pub root_password: bool,
    /// Supports `:expose` and `:unexpose`.
    pub expose: bool,
}

impl ServiceCapabilities {
    /// Returns the full subcommand for an action, e.g. `redis:info`.
    #[must_use]
    pub fn subcommand(&self, action: &str) -> String {
        format!("{}:{action}", self.prefix)
    }
}

impl ServiceFamily {
    /// Every supported family.
    pub const ALL: [Self; 5] = [
        Self::Postgres,
        Self::Mysql,
        Self::Redis,
        Self::Mongodb,
        Self::Clickhouse,
    ];

    /// Returns the capability descriptor of this family.
    #[must_use]
    pub const fn capabilities(self) -> ServiceCapabilities {
        match self {
            Self::Postgres => ServiceCapabilities {
                prefix: "postgres",
                image: true,
                clone: true,
                password: true,
                root_password: false,
                expose: true,
            },
            Self::Mysql => ServiceCapabilities {
                prefix: "mysql",
                image: true,
                clone: true,
                password: true,
                root_password: true,
                expose: true,
            },
            Self::Redis => ServiceCapabilities {
                prefix: "redis",
                image: true,
                clone: true,
                password: true,
                root_password: false,
                expose: true,
            },
            Self::Mongodb => ServiceCapabilities {
                prefix: "mongo",
                image: true,
                clone: true,
                password: true,
                root_password: true,
                expose: true,
            },
            Self::Clickhouse => ServiceCapabilities {
                prefix: "clickhouse",
                image: false,
                clone: false,
                password: false,
                root_password: false,
                expose: true,
            },
        }
    }
}

/// Network bind addresses reported by `nginx:report`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NginxReport {
    /// IPv4 bind address.
    pub bind_address_ipv4: String,
    /// IPv6 bind address.
    pub bind_address_ipv6: String,
}

impl Default for NginxReport {
    fn default() -> Self {
        Self {
            bind_address_ipv4: String::from(DEFAULT_BIND_ADDRESS_IPV4),
            bind_address_ipv6: String::from(DEFAULT_BIND_ADDRESS_IPV6),
        }
    }
}

impl NginxReport {
    /// Builds the report from parsed `nginx:report` keys.
    ///
    /// Dokku prints blank values for the defaults, so missing and blank keys
    /// both fall back to `0.0.0.0` and `::`.
    #[must_use]
    pub fn from_report(report: &BTreeMap<String, String>) -> Self {
        let pick = |key: &str, default: &str| {
            report
                .get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .unwrap_or(default)
                .to_string()
        };
        Self {
            bind_address_ipv4: pick(NGINX_IPV4_KEY, DEFAULT_BIND_ADDRESS_IPV4),
            bind_address_ipv6: pick(NGINX_IPV6_KEY, DEFAULT_BIND_ADDRESS_IPV6),
        }
    }
}

/// An application as seen on, or destined for, the Dokku host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DokkuApp {
    /// Application name.
    pub name: String,
    /// Every configuration variable (managed or not).
    pub config_vars: BTreeMap<String, String>,
    /// Domains.
    pub domains: Vec<String>,
    /// Buildpacks in order.
    pub buildpacks: Vec<String>,
    /// Port mappings as `scheme:hostPort:containerPort`.
    pub ports: BTreeSet<String>,
    /// Nginx bind addresses.
    pub nginx: NginxReport,
}

impl DokkuApp {
    /// Builds an app from desired attributes.
    ///
    /// Blank buildpacks are skipped and blank bind addresses take their
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty.
    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        if config.name.trim().is_empty() {
            return Err(ConfigError::validation("App name cannot be empty", "name"));
        }
        let or_default = |value: &str, default: &str| {
            if value.trim().is_empty() {
                default.to_string()
            } else {
                value.trim().to_string()
            }
        };

        Ok(Self {
            name: config.name.clone(),
            config_vars: config.config_vars.clone(),
            domains: config.domain_list(),
            buildpacks: config
                .buildpacks
                .iter()
                .map(|b| b.trim())
                .filter(|b| !b.is_empty())
                .map(String::from)
                .collect(),
            ports: config.ports.clone(),
            nginx: NginxReport {
                bind_address_ipv4: or_default(
                    &config.nginx_bind_address_ipv4,
                    DEFAULT_BIND_ADDRESS_IPV4,
                ),
                bind_address_ipv6: or_default(
                    &config.nginx_bind_address_ipv6,
                    DEFAULT_BIND_ADDRESS_IPV6,
                ),
            },
        })
    }

    /// Projects the app onto attributes, keeping only the managed subset of
    /// configuration variables and ports.
    ///
    /// Without a recorded state, nothing is managed yet.
    #[must_use]
    pub fn to_config(&self, recorded: Option<&AppConfig>) -> AppConfig {
        let empty_vars = BTreeMap::new();
        let empty_ports = BTreeSet::new();
        let (recorded_vars, recorded_ports) = recorded.map_or((&empty_vars, &empty_ports), |r| {
            (&r.config_vars, &r.ports)
        });

        AppConfig {
            name: self.name.clone(),
            locked: recorded.is_some_and(|r| r.locked),
            config_vars: managed_subset(recorded_vars.keys(), &self.config_vars),
            domains: Some(self.domains.iter().cloned().collect()),
            buildpacks: self.buildpacks.clone(),
            ports: self.ports.intersection(recorded_ports).cloned().collect(),
            nginx_bind_address_ipv4: self.nginx.bind_address_ipv4.clone(),
            nginx_bind_address_ipv6: self.nginx.bind_address_ipv6.clone(),
        }
    }
}

/// A managed service as seen on, or destined for, the Dokku host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DokkuService {
    /// Service name.
    pub name: String,
    /// Service family.
    pub family: ServiceFamily,
    /// Container image, empty when unknown.
    pub image: String,
    /// Container image version, empty when unknown.
    pub image_version: String,
    /// Whether the service is stopped.
    pub stopped: bool,
    /// Exposed address (`host:port`).
    pub exposed_on: Option<String>,
}

impl DokkuService {
    /// Builds a service from desired attributes.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty, or if the attributes use a flag
    /// the family does not support.
    pub fn from_config(config: &ServiceConfig) -> Result<Self, ConfigError> {
        if config.name.trim().is_empty() {
            return Err(ConfigError::validation("Service name cannot be empty", "name"));
        }
        let caps = config.family.capabilities();
        let has = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());

        if !caps.image && (has(&config.image) || has(&config.image_version)) {
            return Err(ConfigError::validation(
                format!("{} services do not support image settings", config.family),
                "image",
            ));
        }
        if (!caps.password && has(&config.password))
            || (!caps.root_password && has(&config.root_password))
        {
            return Err(ConfigError::validation(
                format!("{} services do not support this credential", config.family),
                "password",
            ));
        }
        if !caps.expose && has(&config.expose_on) {
            return Err(ConfigError::validation(
                format!("{} services cannot be exposed", config.family),
                "expose_on",
            ));
        }

        Ok(Self {
            name: config.name.clone(),
            family: config.family,
            image: config.image.clone().unwrap_or_default(),
            image_version: config.image_version.clone().unwrap_or_default(),
            stopped: config.stopped,
            exposed_on: config.expose_on.clone().filter(|e| !e.trim().is_empty()),
        })
    }

    /// Builds a service from its lower-cased `:info` report.
    #[must_use]
    pub fn from_info(name: &str, family: ServiceFamily, info: &BTreeMap<String, String>) -> Self {
        let (image, image_version) = info
            .get("version")
            .map(|v| split_image(v))
            .unwrap_or_default();

        Self {
            name: name.to_string(),
            family,
            image,
            image_version,
            stopped: info
                .get("status")
                .is_some_and(|s| STOPPED_STATUSES.contains(&s.as_str())),
            exposed_on: info.get("exposed ports").and_then(|p| parse_exposed(p)),
        }
    }

    /// Projects the service onto attributes.
    ///
    /// Credentials cannot be read back, so the recorded values are kept.
    #[must_use]
    pub fn to_config(&self, recorded: Option<&ServiceConfig>) -> ServiceConfig {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        ServiceConfig {
            name: self.name.clone(),
            family: self.family,
            image: non_empty(&self.image),
            image_version: non_empty(&self.image_version),
            stopped: self.stopped,
            expose_on: self.exposed_on.clone(),
            password: recorded.and_then(|r| r.password.clone()),
            root_password: recorded.and_then(|r| r.root_password.clone()),
        }
    }
}

/// Returns the remote entries whose keys were recorded as managed.
///
/// Keys present only remotely are foreign and excluded.
#[must_use]
pub fn managed_subset<'a, I>(
    recorded_keys: I,
    remote: &BTreeMap<String, String>,
) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = &'a String>,
{
    recorded_keys
        .into_iter()
        .filter_map(|k| remote.get_key_value(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Extracts the exposed address from an `exposed ports` value.
///
/// Dokku prints `-` when nothing is exposed and `container->host` pairs
/// otherwise.
fn parse_exposed(value: &str) -> Option<String> {
    let first = value.split_whitespace().next()?;
    if first == "-" {
        return None;
    }
    let host = first.rsplit_once("->").map_or(first, |(_, host)| host);
    (!host.is_empty()).then(|| host.to_string())
}
