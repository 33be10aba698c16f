//! Command sequences that converge a resource.
//!
//! Every function here is pure: it turns desired (and prior) attributes into
//! the ordered commands to run, without touching the host. The provisioner
//! executes the sequences and stops at the first failure.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::{AppConfig, LinkConfig, ServiceConfig, ServiceFamily};
use crate::error::ReconcileError;
use crate::resource::ResourceData;

use super::command::DokkuCommand;
use super::types::{DokkuApp, DokkuService, ServiceCapabilities};
use super::version::PortCommands;

/// Split of a port change into removals and additions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortDiff {
    /// Mappings only in the prior set.
    pub removed: BTreeSet<String>,
    /// Mappings only in the desired set.
    pub added: BTreeSet<String>,
}

/// Computes the symmetric difference between prior and desired ports.
#[must_use]
pub fn diff_ports(prior: &BTreeSet<String>, desired: &BTreeSet<String>) -> PortDiff {
    let keep = |p: &&String| !p.trim().is_empty();
    PortDiff {
        removed: prior.difference(desired).filter(keep).cloned().collect(),
        added: desired.difference(prior).filter(keep).cloned().collect(),
    }
}

// ============================================================================
// Applications
// ============================================================================

/// Commands creating an app with all its attributes.
#[must_use]
pub fn create_app(app: &DokkuApp, ports: PortCommands) -> Vec<DokkuCommand> {
    let name = app.name.as_str();
    let mut commands = vec![DokkuCommand::new("apps:create").arg(name)];

    commands.extend(set_config_vars(name, &app.config_vars));
    if !app.domains.is_empty() {
        commands.push(
            DokkuCommand::new("domains:set")
                .arg(name)
                .args(app.domains.iter().cloned()),
        );
    }
    commands.extend(add_buildpacks(name, &app.buildpacks));
    commands.extend(
        app.ports
            .iter()
            .filter(|p| !p.trim().is_empty())
            .map(|p| DokkuCommand::new(ports.add).arg(name).arg(p.as_str())),
    );
    commands.push(nginx_set(name, "bind-address-ipv4", &app.nginx.bind_address_ipv4));
    commands.push(nginx_set(name, "bind-address-ipv6", &app.nginx.bind_address_ipv6));
    commands
}

/// Commands converging an existing app from its prior to its desired
/// attributes.
///
/// A rename runs first, since every later command addresses the new name.
#[must_use]
pub fn update_app(data: &ResourceData<AppConfig>, ports: PortCommands) -> Vec<DokkuCommand> {
    let desired = data.get();
    let name = desired.name.as_str();
    let mut commands = Vec::new();

    if let (Some(old), new) = data.get_change(|a| a.name.as_str()) {
        if old != new {
            commands.push(DokkuCommand::new("apps:rename").arg(old).arg(new));
        }
    }

    if data.has_change(|a| &a.config_vars) {
        let empty = BTreeMap::new();
        let (prior, current) = data.get_change(|a| &a.config_vars);
        commands.extend(config_var_changes(name, prior.unwrap_or(&empty), current));
    }

    if data.has_change(|a| &a.domains) {
        let prior = data.prior().map(AppConfig::domain_list).unwrap_or_default();
        commands.extend(domain_changes(name, &prior, &desired.domain_list()));
    }

    if data.has_change(|a| &a.buildpacks) {
        commands.extend(buildpack_changes(name, &desired.buildpacks));
    }

    if data.has_change(|a| &a.ports) {
        let empty = BTreeSet::new();
        let (prior, current) = data.get_change(|a| &a.ports);
        commands.extend(port_changes(name, &diff_ports(prior.unwrap_or(&empty), current), ports));
    }

    if data.has_change(|a| &a.nginx_bind_address_ipv4) {
        commands.push(nginx_set(name, "bind-address-ipv4", &desired.nginx_bind_address_ipv4));
    }
    if data.has_change(|a| &a.nginx_bind_address_ipv6) {
        commands.push(nginx_set(name, "bind-address-ipv6", &desired.nginx_bind_address_ipv6));
    }

    commands
}

/// Command destroying an app without prompting.
#[must_use]
pub fn destroy_app(name: &str) -> DokkuCommand {
    DokkuCommand::new("apps:destroy").arg(name).arg("--force")
}

/// Unsets removed keys, then re-sets every desired key.
///
/// Desired values are always re-set, changed or not.
#[must_use]
pub fn config_var_changes(
    app: &str,
    prior: &BTreeMap<String, String>,
    desired: &BTreeMap<String, String>,
) -> Vec<DokkuCommand> {
    let removed: Vec<&String> = prior.keys().filter(|k| !desired.contains_key(*k)).collect();
    let mut commands = Vec::new();
    if !removed.is_empty() {
        commands.push(
            DokkuCommand::new("config:unset")
                .arg(app)
                .args(removed.into_iter().cloned()),
        );
    }
    commands.extend(set_config_vars(app, desired));
    commands
}

/// Removes domains no longer desired, then adds the full desired set.
#[must_use]
pub fn domain_changes(app: &str, prior: &[String], desired: &[String]) -> Vec<DokkuCommand> {
    let removed: Vec<String> = prior
        .iter()
        .filter(|d| !desired.contains(d))
        .cloned()
        .collect();
    let mut commands = Vec::new();
    if !removed.is_empty() {
        commands.push(DokkuCommand::new("domains:remove").arg(app).args(removed));
    }
    if !desired.is_empty() {
        commands.push(
            DokkuCommand::new("domains:add")
                .arg(app)
                .args(desired.iter().cloned()),
        );
    }
    commands
}

/// Clears the buildpack list, then adds the desired entries in order.
#[must_use]
pub fn buildpack_changes(app: &str, desired: &[String]) -> Vec<DokkuCommand> {
    let mut commands = vec![DokkuCommand::new("buildpacks:clear").arg(app)];
    commands.extend(add_buildpacks(app, desired));
    commands
}

/// One remove per dropped mapping, one add per new mapping.
#[must_use]
pub fn port_changes(app: &str, diff: &PortDiff, ports: PortCommands) -> Vec<DokkuCommand> {
    diff.removed
        .iter()
        .map(|p| DokkuCommand::new(ports.remove).arg(app).arg(p.as_str()))
        .chain(
            diff.added
                .iter()
                .map(|p| DokkuCommand::new(ports.add).arg(app).arg(p.as_str())),
        )
        .collect()
}

fn set_config_vars(app: &str, vars: &BTreeMap<String, String>) -> Option<DokkuCommand> {
    if vars.is_empty() {
        return None;
    }
    Some(
        vars.iter()
            .fold(DokkuCommand::new("config:set").arg(app), |cmd, (k, v)| {
                cmd.assignment(k, v)
            }),
    )
}

fn add_buildpacks<'a>(
    app: &'a str,
    buildpacks: &'a [String],
) -> impl Iterator<Item = DokkuCommand> + 'a {
    buildpacks
        .iter()
        .map(|b| b.trim())
        .filter(|b| !b.is_empty())
        .map(move |b| DokkuCommand::new("buildpacks:add").arg(app).arg(b))
}

/// Sets an nginx property; a blank value resets it to Dokku's default.
fn nginx_set(app: &str, property: &str, value: &str) -> DokkuCommand {
    let cmd = DokkuCommand::new("nginx:set").arg(app).arg(property);
    match value.trim() {
        "" => cmd,
        value => cmd.arg(value),
    }
}

// ============================================================================
// Services
// ============================================================================

/// Commands creating a service, exposing it, and stopping it if desired.
#[must_use]
pub fn create_service(service: &DokkuService, config: &ServiceConfig) -> Vec<DokkuCommand> {
    let caps = service.family.capabilities();
    let create = DokkuCommand::new(caps.subcommand("create")).arg(service.name.as_str());
    let mut commands = vec![with_create_flags(create, config, caps)];

    if let Some(address) = &service.exposed_on {
        commands.push(expose(caps, &service.name, address));
    }
    if service.stopped {
        commands.push(DokkuCommand::new(caps.subcommand("stop")).arg(service.name.as_str()));
    }
    commands
}

/// Commands converging an existing service.
///
/// A name or credential change recreates the service with `:clone`. When the
/// name itself is unchanged the clone goes through `temp_name` and back, since
/// the original has to be destroyed first.
///
/// # Errors
///
/// Returns an error if a recreation is needed but the family cannot clone.
pub fn update_service(
    data: &ResourceData<ServiceConfig>,
    temp_name: &str,
) -> Result<Vec<DokkuCommand>, ReconcileError> {
    let desired = data.get();
    let caps = desired.family.capabilities();
    let name = desired.name.as_str();
    let mut commands = Vec::new();

    let renamed = data.has_change(|s| &s.name);
    let recreate = renamed
        || data.has_change(|s| &s.password)
        || data.has_change(|s| &s.root_password);

    if recreate && data.prior().is_some() {
        if !caps.clone {
            return Err(ReconcileError::ResourceReconcileFailed {
                resource_type: desired.family.to_string(),
                name: name.to_string(),
                reason: String::from("this family cannot be renamed or recreated in place"),
            });
        }
        let (old, _) = data.get_change(|s| s.name.as_str());
        let old = old.unwrap_or(name);
        let target = if renamed { name } else { temp_name };

        commands.push(clone_service(caps, old, target, desired));
        commands.push(destroy_service(desired.family, old));
        if !renamed {
            commands.push(clone_service(caps, temp_name, name, desired));
            commands.push(destroy_service(desired.family, temp_name));
        }
    }

    if caps.image && (data.has_change(|s| &s.image) || data.has_change(|s| &s.image_version)) {
        let upgrade = DokkuCommand::new(caps.subcommand("upgrade"))
            .arg(name)
            .flag_opt("image", desired.image.as_deref())
            .flag_opt("image-version", desired.image_version.as_deref());
        commands.push(upgrade);
    }

    if data.has_change(|s| &s.expose_on) {
        let (prior, current) = data.get_change(|s| &s.expose_on);
        if prior.is_some_and(Option::is_some) {
            commands.push(DokkuCommand::new(caps.subcommand("unexpose")).arg(name));
        }
        if let Some(address) = current {
            commands.push(expose(caps, name, address));
        }
    }

    if data.has_change(|s| &s.stopped) {
        let action = if desired.stopped { "stop" } else { "start" };
        commands.push(DokkuCommand::new(caps.subcommand(action)).arg(name));
    }

    Ok(commands)
}

/// Command destroying a service without prompting.
#[must_use]
pub fn destroy_service(family: ServiceFamily, name: &str) -> DokkuCommand {
    DokkuCommand::new(family.capabilities().subcommand("destroy"))
        .arg(name)
        .arg("-f")
}

fn clone_service(
    caps: ServiceCapabilities,
    from: &str,
    to: &str,
    config: &ServiceConfig,
) -> DokkuCommand {
    let clone = DokkuCommand::new(caps.subcommand("clone")).arg(from).arg(to);
    with_create_flags(clone, config, caps)
}

fn expose(caps: ServiceCapabilities, name: &str, address: &str) -> DokkuCommand {
    DokkuCommand::new(caps.subcommand("expose")).arg(name).arg(address)
}

/// Appends the creation flags the family supports.
fn with_create_flags(
    cmd: DokkuCommand,
    config: &ServiceConfig,
    caps: ServiceCapabilities,
) -> DokkuCommand {
    let mut cmd = cmd;
    if caps.image {
        cmd = cmd
            .flag_opt("image", config.image.as_deref())
            .flag_opt("image-version", config.image_version.as_deref());
    }
    if caps.password {
        cmd = cmd.secret_flag("password", config.password.as_deref());
    }
    if caps.root_password {
        cmd = cmd.secret_flag("root-password", config.root_password.as_deref());
    }
    cmd
}

// ============================================================================
// Links
// ============================================================================

/// Command linking a service to an app.
#[must_use]
pub fn create_link(link: &LinkConfig) -> DokkuCommand {
    DokkuCommand::new(link.family.capabilities().subcommand("link"))
        .arg(link.service.as_str())
        .arg(link.app.as_str())
        .flag_opt("alias", link.alias.as_deref())
        .flag_opt("querystring", link.query_string.as_deref())
}

/// Command unlinking a service from an app.
#[must_use]
pub fn destroy_link(link: &LinkConfig) -> DokkuCommand {
    DokkuCommand::new(link.family.capabilities().subcommand("unlink"))
        .arg(link.service.as_str())
        .arg(link.app.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dokku::version::{port_commands, DokkuVersion};

    fn current_ports() -> PortCommands {
        port_commands(&DokkuVersion::new(0, 34, 0))
    }

    fn rendered(commands: &[DokkuCommand]) -> Vec<String> {
        commands.iter().map(DokkuCommand::render).collect()
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_port_diff_is_disjoint() {
        let prior = set(&["http:80:5000", "http:8080:5000"]);
        let desired = set(&["http:8080:5000", "https:443:5000"]);
        let diff = diff_ports(&prior, &desired);
        assert_eq!(diff.removed, set(&["http:80:5000"]));
        assert_eq!(diff.added, set(&["https:443:5000"]));
        assert!(diff.removed.is_disjoint(&desired));
        assert!(diff.added.is_disjoint(&prior));

        assert_eq!(
            rendered(&port_changes("web", &diff, current_ports())),
            vec!["ports:remove web http:80:5000", "ports:add web https:443:5000"]
        );
    }

    #[test]
    fn test_domains_remove_then_add_full_set() {
        let commands = domain_changes(
            "web",
            &strings(&["a.example.com", "b.example.com"]),
            &strings(&["b.example.com", "c.example.com"]),
        );
        assert_eq!(
            rendered(&commands),
            vec![
                "domains:remove web a.example.com",
                "domains:add web b.example.com c.example.com",
            ]
        );
        assert_eq!(
            rendered(&domain_changes("web", &strings(&["a.example.com"]), &[])),
            vec!["domains:remove web a.example.com"]
        );
        assert!(domain_changes("web", &[], &[]).is_empty());
    }

    #[test]
    fn test_buildpacks_clear_then_add_in_order() {
        let mut prior = AppConfig::new("web");
        prior.buildpacks = strings(&["A", "B"]);
        let mut desired = prior.clone();
        desired.buildpacks = strings(&["B", "A"]);

        let data = ResourceData::new("web", prior, desired);
        assert_eq!(
            rendered(&update_app(&data, current_ports())),
            vec!["buildpacks:clear web", "buildpacks:add web B", "buildpacks:add web A"]
        );
    }

    #[test]
    fn test_config_vars_unset_before_set() {
        let prior = BTreeMap::from([
            (String::from("OLD"), String::from("1")),
            (String::from("KEEP"), String::from("1")),
        ]);
        let desired = BTreeMap::from([(String::from("KEEP"), String::from("two words"))]);
        let commands = config_var_changes("web", &prior, &desired);
        assert_eq!(
            rendered(&commands),
            vec!["config:unset web OLD", "config:set web 'KEEP=two words'"]
        );
        assert_eq!(commands[1].redacted(), "config:set web 'KEEP=*******'");
    }

    #[test]
    fn test_rename_runs_first() {
        let prior = AppConfig::new("old");
        let mut desired = AppConfig::new("new");
        desired.nginx_bind_address_ipv4 = String::from("127.0.0.1");
        desired.config_vars.insert(String::from("A"), String::from("1"));

        let data = ResourceData::new("old", prior, desired);
        assert_eq!(
            rendered(&update_app(&data, current_ports())),
            vec![
                "apps:rename old new",
                "config:set new A=1",
                "nginx:set new bind-address-ipv4 127.0.0.1",
            ]
        );
    }

    #[test]
    fn test_unchanged_app_issues_nothing() {
        let config = AppConfig::new("web");
        let data = ResourceData::new("web", config.clone(), config);
        assert!(update_app(&data, current_ports()).is_empty());
    }

    #[test]
    fn test_create_app_sequence() {
        let mut config = AppConfig::new("web");
        config.config_vars.insert(String::from("FOO"), String::from("bar"));
        config.domains = Some(set(&["web.example.com"]));
        config.buildpacks = strings(&["https://bp"]);
        config.ports = set(&["http:80:5000"]);
        let app = DokkuApp::from_config(&config).unwrap();

        assert_eq!(
            rendered(&create_app(&app, port_commands(&DokkuVersion::new(0, 31, 0)))),
            vec![
                "apps:create web",
                "config:set web FOO=bar",
                "domains:set web web.example.com",
                "buildpacks:add web https://bp",
                "proxy:ports-add web http:80:5000",
                "nginx:set web bind-address-ipv4 0.0.0.0",
                "nginx:set web bind-address-ipv6 ::",
            ]
        );
    }

    #[test]
    fn test_service_rename_with_image_change() {
        let mut prior = ServiceConfig::new("svc1", ServiceFamily::Postgres);
        prior.image_version = Some(String::from("11.6"));
        let mut desired = ServiceConfig::new("svc2", ServiceFamily::Postgres);
        desired.image_version = Some(String::from("12.1"));

        let data = ResourceData::new("svc1", prior, desired);
        assert_eq!(
            rendered(&update_service(&data, "tmp-unused").unwrap()),
            vec![
                "postgres:clone svc1 svc2 --image-version 12.1",
                "postgres:destroy svc1 -f",
                "postgres:upgrade svc2 --image-version 12.1",
            ]
        );
    }

    #[test]
    fn test_credential_change_clones_through_temp_name() {
        let prior = ServiceConfig::new("db", ServiceFamily::Mysql);
        let mut desired = prior.clone();
        desired.root_password = Some(String::from("s3cret"));

        let data = ResourceData::new("db", prior, desired);
        let commands = update_service(&data, "tmp-db-1234abcd").unwrap();
        assert_eq!(
            commands.iter().map(DokkuCommand::redacted).collect::<Vec<_>>(),
            vec![
                "mysql:clone db tmp-db-1234abcd --root-password *******",
                "mysql:destroy db -f",
                "mysql:clone tmp-db-1234abcd db --root-password *******",
                "mysql:destroy tmp-db-1234abcd -f",
            ]
        );
    }

    #[test]
    fn test_clickhouse_cannot_rename() {
        let prior = ServiceConfig::new("a", ServiceFamily::Clickhouse);
        let desired = ServiceConfig::new("b", ServiceFamily::Clickhouse);
        let data = ResourceData::new("a", prior, desired);
        assert!(update_service(&data, "tmp").is_err());
    }

    #[test]
    fn test_service_expose_and_stop() {
        let prior = ServiceConfig::new("cache", ServiceFamily::Redis);
        let mut desired = prior.clone();
        desired.expose_on = Some(String::from("0.0.0.0:6380"));
        desired.stopped = true;

        let data = ResourceData::new("cache", prior, desired.clone());
        assert_eq!(
            rendered(&update_service(&data, "tmp").unwrap()),
            vec!["redis:expose cache 0.0.0.0:6380", "redis:stop cache"]
        );

        let mut unexposed = desired.clone();
        unexposed.expose_on = None;
        let back = ResourceData::new("cache", desired, unexposed);
        assert_eq!(rendered(&update_service(&back, "tmp").unwrap()), vec!["redis:unexpose cache"]);
    }

    #[test]
    fn test_create_service_sequence() {
        let mut config = ServiceConfig::new("db", ServiceFamily::Postgres);
        config.image = Some(String::from("postgres"));
        config.image_version = Some(String::from("14"));
        config.password = Some(String::from("pw"));
        config.stopped = true;
        let service = DokkuService::from_config(&config).unwrap();

        let commands = create_service(&service, &config);
        assert_eq!(
            commands.iter().map(DokkuCommand::redacted).collect::<Vec<_>>(),
            vec![
                "postgres:create db --image postgres --image-version 14 --password *******",
                "postgres:stop db",
            ]
        );
    }

    #[test]
    fn test_link_commands() {
        let link = LinkConfig {
            family: ServiceFamily::Postgres,
            service: String::from("db"),
            app: String::from("web"),
            alias: Some(String::from("PRIMARY")),
            query_string: Some(String::from("sslmode=require&pool=5")),
        };
        assert_eq!(
            create_link(&link).render(),
            "postgres:link db web --alias PRIMARY --querystring sslmode=require&pool=5"
        );
        assert_eq!(destroy_link(&link).render(), "postgres:unlink db web");
        assert_eq!(
            destroy_service(ServiceFamily::Mongodb, "docs").render(),
            "mongo:destroy docs -f"
        );
        assert_eq!(destroy_app("web").render(), "apps:destroy web --force");
    }
}
