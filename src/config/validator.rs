//! Manifest validation.
//!
//! Checks every declared resource before anything is sent to the host. All
//! problems are collected; the first one is reported as the error.

use crate::dokku::{is_word, DokkuApp, DokkuService};
use crate::error::{ConfigError, DokkuError, Result};
use std::collections::HashSet;
use std::net::{Ipv4Addr, Ipv6Addr};
use tracing::debug;

use super::spec::{AppConfig, LinkConfig, Manifest, ServiceConfig};

/// Validator for manifests.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all problems found.
#[derive(Debug, Default)]
pub struct ValidationReport {
    /// List of validation errors.
    pub errors: Vec<ValidationIssue>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a manifest.
    ///
    /// # Errors
    ///
    /// Returns the first validation error if any were found.
    pub fn validate(&self, manifest: &Manifest) -> Result<ValidationReport> {
        let report = self.check(manifest);

        match report.errors.first() {
            None => {
                debug!("Manifest validation passed");
                Ok(report)
            }
            Some(first) => Err(DokkuError::Config(ConfigError::ValidationError {
                message: first.message.clone(),
                field: Some(first.field.clone()),
            })),
        }
    }

    /// Runs every check and returns the full report without failing.
    #[must_use]
    pub fn check(&self, manifest: &Manifest) -> ValidationReport {
        let mut report = ValidationReport::default();

        if manifest.provider.ssh_host.trim().is_empty() {
            report.error("provider.ssh_host", "SSH host is required");
        }
        if manifest.provider.ssh_cert.trim().is_empty() {
            report.error("provider.ssh_cert", "SSH private key is required");
        }
        if manifest.provider.ssh_port == 0 {
            report.error("provider.ssh_port", "SSH port must be between 1 and 65535");
        }

        if manifest.resource_count() == 0 {
            report.warnings.push(String::from("No resources declared in manifest"));
        }

        let mut app_names = HashSet::new();
        for (key, app) in &manifest.apps {
            let prefix = format!("apps.{key}");
            if !app_names.insert(app.name.as_str()) {
                report.error(format!("{prefix}.name"), format!("Duplicate app name: {}", app.name));
            }
            Self::validate_app(app, &prefix, &mut report);
        }

        let mut service_names = HashSet::new();
        for (key, service) in &manifest.services {
            let prefix = format!("services.{key}");
            if !service_names.insert(service.name.as_str()) {
                report.error(
                    format!("{prefix}.name"),
                    format!("Duplicate service name: {}", service.name),
                );
            }
            Self::validate_service(service, &prefix, &mut report);
        }

        let mut link_ids = HashSet::new();
        for (key, link) in &manifest.links {
            let prefix = format!("links.{key}");
            if !link_ids.insert(link.link_id()) {
                report.error(
                    prefix.clone(),
                    format!("Duplicate link of {} to {}", link.service, link.app),
                );
            }
            Self::validate_link(manifest, link, &prefix, &mut report);
        }

        report
    }

    fn validate_app(app: &AppConfig, prefix: &str, report: &mut ValidationReport) {
        if !is_valid_name(&app.name) {
            report.error(
                format!("{prefix}.name"),
                format!(
                    "App name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    app.name
                ),
            );
        }

        for port in &app.ports {
            if !is_valid_port_mapping(port) {
                report.error(
                    format!("{prefix}.ports"),
                    format!(
                        "Invalid port mapping '{port}', expected scheme:hostPort:containerPort"
                    ),
                );
            }
        }

        let ipv4 = app.nginx_bind_address_ipv4.trim();
        if !ipv4.is_empty() && ipv4.parse::<Ipv4Addr>().is_err() {
            report.error(
                format!("{prefix}.nginx_bind_address_ipv4"),
                format!("Invalid IPv4 address: {ipv4}"),
            );
        }
        let ipv6 = app.nginx_bind_address_ipv6.trim();
        if !ipv6.is_empty() && ipv6.parse::<Ipv6Addr>().is_err() {
            report.error(
                format!("{prefix}.nginx_bind_address_ipv6"),
                format!("Invalid IPv6 address: {ipv6}"),
            );
        }

        if app.buildpacks.iter().any(|b| b.trim().is_empty()) {
            report
                .warnings
                .push(format!("{prefix}.buildpacks: blank entries are ignored"));
        }
        let buildpacks = app.buildpacks.iter().map(|b| b.trim()).filter(|b| !b.is_empty());
        report.words(&format!("{prefix}.buildpacks"), buildpacks);
        if let Some(domains) = &app.domains {
            report.words(&format!("{prefix}.domains"), domains.iter().map(String::as_str));
        }

        if let Err(e) = DokkuApp::from_config(app) {
            report.push_config_error(prefix, e);
        }
    }

    fn validate_service(service: &ServiceConfig, prefix: &str, report: &mut ValidationReport) {
        if !is_valid_name(&service.name) {
            report.error(
                format!("{prefix}.name"),
                format!(
                    "Service name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    service.name
                ),
            );
        }

        if let Some(expose_on) = service.expose_on.as_deref().filter(|e| !e.trim().is_empty())
            && !is_valid_expose_address(expose_on)
        {
            report.error(
                format!("{prefix}.expose_on"),
                format!("Invalid expose address '{expose_on}', expected host:port"),
            );
        }

        report.words(
            &format!("{prefix}.image"),
            service.image.iter().chain(&service.image_version).map(String::as_str),
        );
        let secrets = [
            ("password", &service.password),
            ("root_password", &service.root_password),
        ];
        for (field, secret) in secrets {
            if secret.as_deref().is_some_and(|s| !s.is_empty() && !is_word(s)) {
                report.error(
                    format!("{prefix}.{field}"),
                    "Password must be a single word without quotes or glob characters",
                );
            }
        }

        // Capability checks live with the service model.
        if let Err(e) = DokkuService::from_config(service) {
            report.push_config_error(prefix, e);
        }
    }

    fn validate_link(
        manifest: &Manifest,
        link: &LinkConfig,
        prefix: &str,
        report: &mut ValidationReport,
    ) {
        if link.service.trim().is_empty() {
            report.error(format!("{prefix}.service"), "Link service cannot be empty");
        }
        if link.app.trim().is_empty() {
            report.error(format!("{prefix}.app"), "Link app cannot be empty");
        }
        report.words(
            &format!("{prefix}.alias"),
            link.alias.as_deref().map(str::trim).filter(|a| !a.is_empty()),
        );
        report.words(
            &format!("{prefix}.query_string"),
            link.query_string.as_deref().map(str::trim).filter(|q| !q.is_empty()),
        );

        match manifest.service_by_name(&link.service) {
            Some(service) if service.family != link.family => report.warnings.push(format!(
                "{prefix}: service '{}' is declared as {} but linked as {}",
                link.service, service.family, link.family
            )),
            Some(_) => {}
            None => report.warnings.push(format!(
                "{prefix}: service '{}' is not declared in this manifest",
                link.service
            )),
        }

        if !manifest.apps.values().any(|a| a.name == link.app) {
            report.warnings.push(format!(
                "{prefix}: app '{}' is not declared in this manifest",
                link.app
            ));
        }
    }
}

/// Validates that a name follows the Dokku naming convention.
/// Names must be lowercase alphanumeric with hyphens, starting with a letter or digit.
fn is_valid_name(name: &str) -> bool {
    let Some(first) = name.chars().next() else {
        return false;
    };

    if !first.is_ascii_lowercase() && !first.is_ascii_digit() {
        return false;
    }

    name.chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.ends_with('-')
}

/// Checks a `scheme:hostPort:containerPort` mapping.
fn is_valid_port_mapping(spec: &str) -> bool {
    let parts: Vec<&str> = spec.split(':').collect();
    let [scheme, host, container] = parts.as_slice() else {
        return false;
    };

    !scheme.is_empty()
        && scheme.chars().all(|c| c.is_ascii_lowercase())
        && is_port(host)
        && is_port(container)
}

/// Checks a `host:port` address; the host may be an IPv6 literal.
fn is_valid_expose_address(address: &str) -> bool {
    address
        .rsplit_once(':')
        .is_some_and(|(host, port)| !host.is_empty() && is_port(port))
}

fn is_port(value: &str) -> bool {
    value.parse::<u16>().is_ok_and(|p| p > 0)
}

impl ValidationReport {
    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationIssue {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Flags values the host would split or glob-expand.
    fn words<'a>(&mut self, field: &str, values: impl IntoIterator<Item = &'a str>) {
        for value in values.into_iter().filter(|v| !is_word(v)) {
            self.error(
                field,
                format!("'{value}' must be a single word without quotes or glob characters"),
            );
        }
    }

    fn push_config_error(&mut self, prefix: &str, error: ConfigError) {
        match error {
            ConfigError::ValidationError { message, field } => {
                let field = field.map_or_else(|| prefix.to_string(), |f| format!("{prefix}.{f}"));
                if !self.errors.iter().any(|e| e.field == field) {
                    self.error(field, message);
                }
            }
            other => self.error(prefix, other.to_string()),
        }
    }

    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProviderConfig, ServiceFamily};

    fn manifest() -> Manifest {
        Manifest {
            provider: ProviderConfig {
                ssh_host: String::from("dokku.example.com"),
                ssh_cert: String::from("/keys/dokku"),
                ..ProviderConfig::default()
            },
            ..Manifest::default()
        }
    }

    fn link(family: ServiceFamily, service: &str, app: &str) -> LinkConfig {
        LinkConfig {
            family,
            service: service.to_string(),
            app: app.to_string(),
            alias: None,
            query_string: None,
        }
    }

    #[test]
    fn test_valid_name() {
        assert!(is_valid_name("web"));
        assert!(is_valid_name("my-app-123"));
        assert!(is_valid_name("1st-app"));
    }

    #[test]
    fn test_invalid_name() {
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("Web")); // uppercase
        assert!(!is_valid_name("web_app")); // underscore
        assert!(!is_valid_name("web-")); // ends with hyphen
        assert!(!is_valid_name("-web"));
    }

    #[test]
    fn test_port_mapping_format() {
        assert!(is_valid_port_mapping("http:80:5000"));
        assert!(is_valid_port_mapping("https:443:5000"));
        assert!(!is_valid_port_mapping("80:5000"));
        assert!(!is_valid_port_mapping("http:80:0"));
        assert!(!is_valid_port_mapping("http:eighty:5000"));
        assert!(!is_valid_port_mapping("http:80:5000:1"));
    }

    #[test]
    fn test_expose_address_format() {
        assert!(is_valid_expose_address("0.0.0.0:5432"));
        assert!(is_valid_expose_address("::1:5432"));
        assert!(!is_valid_expose_address("5432"));
        assert!(!is_valid_expose_address("host:"));
    }

    #[test]
    fn test_valid_manifest_passes() {
        let mut m = manifest();
        m.apps.insert(String::from("web"), AppConfig::new("web"));
        m.services.insert(
            String::from("db"),
            ServiceConfig::new("web-db", ServiceFamily::Postgres),
        );
        m.links.insert(
            String::from("web-db"),
            link(ServiceFamily::Postgres, "web-db", "web"),
        );

        let report = ConfigValidator::new().validate(&m).unwrap();
        assert!(report.is_valid());
        assert_eq!(report.warning_count(), 0);
    }

    #[test]
    fn test_missing_provider_host() {
        let mut m = manifest();
        m.provider.ssh_host = String::new();
        let result = ConfigValidator::new().validate(&m);
        assert!(matches!(
            result,
            Err(DokkuError::Config(ConfigError::ValidationError { field: Some(f), .. }))
                if f == "provider.ssh_host"
        ));
    }

    #[test]
    fn test_duplicate_app_names() {
        let mut m = manifest();
        m.apps.insert(String::from("a"), AppConfig::new("web"));
        m.apps.insert(String::from("b"), AppConfig::new("web"));

        let report = ConfigValidator::new().check(&m);
        assert_eq!(report.error_count(), 1);
        assert!(report.errors[0].message.contains("Duplicate app name"));
    }

    #[test]
    fn test_invalid_bind_address() {
        let mut m = manifest();
        let mut app = AppConfig::new("web");
        app.nginx_bind_address_ipv4 = String::from("::");
        app.nginx_bind_address_ipv6 = String::from("0.0.0.0");
        m.apps.insert(String::from("web"), app);

        let report = ConfigValidator::new().check(&m);
        assert_eq!(report.error_count(), 2);
    }

    #[test]
    fn test_family_without_image_flags() {
        let mut m = manifest();
        let mut service = ServiceConfig::new("analytics", ServiceFamily::Clickhouse);
        service.image_version = Some(String::from("22.1"));
        m.services.insert(String::from("analytics"), service);

        let report = ConfigValidator::new().check(&m);
        assert_eq!(report.error_count(), 1);
        assert_eq!(report.errors[0].field, "services.analytics.image");
    }

    #[test]
    fn test_arguments_must_be_single_words() {
        let mut m = manifest();
        let mut app = AppConfig::new("web");
        app.buildpacks = vec![String::from("https://example.com/pack.git#v2")];
        app.domains = Some(std::collections::BTreeSet::from([String::from("a.example.com b")]));
        m.apps.insert(String::from("web"), app);
        let mut service = ServiceConfig::new("db", ServiceFamily::Postgres);
        service.password = Some(String::from("correct horse"));
        m.services.insert(String::from("db"), service);
        let mut l = link(ServiceFamily::Postgres, "db", "web");
        l.query_string = Some(String::from("sslmode=require&pool=5"));
        m.links.insert(String::from("db-web"), l);

        let report = ConfigValidator::new().check(&m);
        let fields: Vec<&str> = report.errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["apps.web.domains", "services.db.password"]);
        assert!(!report.errors[1].message.contains("horse"));
    }

    #[test]
    fn test_link_family_mismatch_warns() {
        let mut m = manifest();
        m.apps.insert(String::from("web"), AppConfig::new("web"));
        m.services.insert(
            String::from("cache"),
            ServiceConfig::new("cache", ServiceFamily::Redis),
        );
        m.links.insert(
            String::from("cache-web"),
            link(ServiceFamily::Postgres, "cache", "web"),
        );

        let report = ConfigValidator::new().validate(&m).unwrap();
        assert_eq!(report.warning_count(), 1);
        assert!(report.warnings[0].contains("declared as redis"));
    }
}
