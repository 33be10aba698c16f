//! Resource readers.
//!
//! Each reader issues one command and parses its report. Existence-style
//! queries turn the "not found" status into an absent result; any other
//! failure is returned to the caller.

use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::config::ServiceFamily;
use crate::error::{ParseError, Result};

use super::client::DokkuClient;
use super::command::DokkuCommand;
use super::parse::{
    parse_list, parse_port_table, parse_report, split_header, split_words, KeyCase,
};
use super::types::{DokkuApp, DokkuService, NginxReport, DOMAINS_KEY};

/// Header printed by `apps:list`.
const APPS_LIST_HEADER: &str = "=====> My Apps";

/// Reads resource state from a Dokku host.
#[derive(Debug, Clone)]
pub struct DokkuObserver {
    /// Connected client.
    client: DokkuClient,
}

impl DokkuObserver {
    /// Creates an observer.
    #[must_use]
    pub const fn new(client: DokkuClient) -> Self {
        Self { client }
    }

    /// Returns true if the app exists.
    ///
    /// # Errors
    ///
    /// Returns an error for any failure other than "not found".
    pub async fn app_exists(&self, name: &str) -> Result<bool> {
        let output = self
            .client
            .run(&DokkuCommand::new("apps:exists").arg(name))
            .await;
        if output.is_not_found() {
            debug!("App {name} does not exist");
            return Ok(false);
        }
        output.into_result().map(|_| true)
    }

    /// Reads every configuration variable of an app, keys as printed.
    ///
    /// An app without variables makes `config:show` exit with the "not
    /// found" status, which reads as an empty map.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails otherwise or the report is
    /// malformed.
    pub async fn read_config_vars(&self, name: &str) -> Result<BTreeMap<String, String>> {
        let cmd = DokkuCommand::new("config:show").arg(name);
        let output = self.client.run(&cmd).await;
        if output.is_not_found() {
            debug!("App {name} has no config vars");
            return Ok(BTreeMap::new());
        }
        let stdout = output.into_result()?;
        Ok(parse_report(&cmd.redacted(), &stdout, KeyCase::Preserve)?)
    }

    /// Reads the domains of an app.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails or the report has no domains key.
    pub async fn read_domains(&self, name: &str) -> Result<Vec<String>> {
        let cmd = DokkuCommand::new("domains:report").arg(name);
        let stdout = self.client.run_checked(&cmd).await?;
        let report = parse_report(&cmd.redacted(), &stdout, KeyCase::Preserve)?;
        let domains = report
            .get(DOMAINS_KEY)
            .ok_or_else(|| ParseError::missing_field(cmd.redacted(), DOMAINS_KEY))?;
        Ok(split_words(domains))
    }

    /// Reads the buildpacks of an app, in order.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails or the listing is malformed.
    pub async fn read_buildpacks(&self, name: &str) -> Result<Vec<String>> {
        let cmd = DokkuCommand::new("buildpacks:list").arg(name);
        let stdout = self.client.run_checked(&cmd).await?;
        Ok(parse_list(&cmd.redacted(), &stdout)?)
    }

    /// Reads the port mappings of an app.
    ///
    /// The listing exits with the "not found" status when no ports are set,
    /// which reads as an empty set.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails otherwise or the table header
    /// is malformed.
    pub async fn read_ports(&self, name: &str) -> Result<BTreeSet<String>> {
        let cmd = DokkuCommand::new(self.client.port_commands().list).arg(name);
        let output = self.client.run(&cmd).await;
        if output.is_not_found() {
            debug!("App {name} has no port mappings");
            return Ok(BTreeSet::new());
        }
        let stdout = output.into_result()?;
        Ok(parse_port_table(&cmd.redacted(), &stdout)?)
    }

    /// Reads the nginx bind addresses of an app.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails or the report is malformed.
    pub async fn read_nginx(&self, name: &str) -> Result<NginxReport> {
        let cmd = DokkuCommand::new("nginx:report").arg(name);
        let stdout = self.client.run_checked(&cmd).await?;
        let report = parse_report(&cmd.redacted(), &stdout, KeyCase::Preserve)?;
        Ok(NginxReport::from_report(&report))
    }

    /// Retrieves the full state of an app, or `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if any read fails.
    pub async fn retrieve_app(&self, name: &str) -> Result<Option<DokkuApp>> {
        if !self.app_exists(name).await? {
            return Ok(None);
        }

        Ok(Some(DokkuApp {
            name: name.to_string(),
            config_vars: self.read_config_vars(name).await?,
            domains: self.read_domains(name).await?,
            buildpacks: self.read_buildpacks(name).await?,
            ports: self.read_ports(name).await?,
            nginx: self.read_nginx(name).await?,
        }))
    }

    /// Lists every app on the host.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails or the header is not the app
    /// listing header.
    pub async fn list_apps(&self) -> Result<Vec<String>> {
        let cmd = DokkuCommand::new("apps:list");
        let stdout = self.client.run_checked(&cmd).await?;
        let (header, _) = split_header(&cmd.redacted(), &stdout)?;
        if header != APPS_LIST_HEADER {
            return Err(ParseError::UnexpectedHeader {
                command: cmd.redacted(),
                found: header.to_string(),
            }
            .into());
        }
        Ok(parse_list(&cmd.redacted(), &stdout)?)
    }

    /// Reads the lower-cased `:info` report of a service, or `None` if it
    /// does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error for any failure other than "not found".
    pub async fn service_info(
        &self,
        family: ServiceFamily,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>> {
        let cmd = DokkuCommand::new(family.capabilities().subcommand("info")).arg(name);
        let output = self.client.run(&cmd).await;
        if output.is_not_found() {
            debug!("{family} service {name} does not exist");
            return Ok(None);
        }
        let stdout = output.into_result()?;
        Ok(Some(parse_report(&cmd.redacted(), &stdout, KeyCase::Lower)?))
    }

    /// Retrieves a service, or `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the info command fails.
    pub async fn retrieve_service(
        &self,
        family: ServiceFamily,
        name: &str,
    ) -> Result<Option<DokkuService>> {
        Ok(self
            .service_info(family, name)
            .await?
            .map(|info| DokkuService::from_info(name, family, &info)))
    }

    /// Returns true if the service is linked to the app.
    ///
    /// # Errors
    ///
    /// Returns an error for any failure other than "not found".
    pub async fn link_exists(
        &self,
        family: ServiceFamily,
        service: &str,
        app: &str,
    ) -> Result<bool> {
        let cmd = DokkuCommand::new(family.capabilities().subcommand("linked"))
            .arg(service)
            .arg(app);
        let output = self.client.run(&cmd).await;
        if output.is_not_found() {
            debug!("{family} service {service} is not linked to {app}");
            return Ok(false);
        }
        output.into_result().map(|_| true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dokku::testing::{client, ScriptedTransport, CURRENT};
    use crate::dokku::transport::ExecOutput;
    use crate::dokku::version::DokkuVersion;
    use crate::error::DokkuError;
    use std::sync::Arc;

    fn observer(transport: &Arc<ScriptedTransport>) -> DokkuObserver {
        DokkuObserver::new(client(transport, CURRENT))
    }

    fn full_app_transport() -> ScriptedTransport {
        app_transport(ExecOutput::ok("=====> web env vars\nFOO:  BAR\nBAZ:  a:b:c\n"))
    }

    fn app_transport(config: ExecOutput) -> ScriptedTransport {
        ScriptedTransport::new()
            .on_ok("apps:exists web", "")
            .on("config:show web", config)
            .on_ok(
                "domains:report web",
                "=====> web domains information\n       Domains app enabled:           true\n       Domains app vhosts:            web.example.com www.example.com\n",
            )
            .on_ok(
                "buildpacks:list web",
                "=====> web buildpack urls\nhttps://github.com/heroku/heroku-buildpack-nodejs.git\n",
            )
            .on_ok(
                "ports:list web",
                "-----> Port mappings for web\n    -----> scheme  host port  container port\n    http           80         5000\n",
            )
            .on_ok(
                "nginx:report web",
                "=====> web nginx information\n       Nginx bind address ipv4:       \n       Nginx bind address ipv6:       ::\n",
            )
    }

    #[tokio::test]
    async fn test_retrieve_missing_app() {
        let transport = Arc::new(ScriptedTransport::new().on_status("apps:exists foo", 1));
        let app = observer(&transport).retrieve_app("foo").await.unwrap();
        assert!(app.is_none());
        assert_eq!(transport.calls(), vec![String::from("apps:exists foo")]);
    }

    #[tokio::test]
    async fn test_retrieve_app_reads_in_order() {
        let transport = Arc::new(full_app_transport());
        let app = observer(&transport).retrieve_app("web").await.unwrap().unwrap();

        assert_eq!(app.config_vars.get("BAZ").map(String::as_str), Some("a:b:c"));
        assert_eq!(
            app.domains,
            vec![String::from("web.example.com"), String::from("www.example.com")]
        );
        assert_eq!(app.buildpacks.len(), 1);
        assert_eq!(app.ports, BTreeSet::from([String::from("http:80:5000")]));
        assert_eq!(app.nginx, NginxReport::default());
        assert_eq!(
            transport.calls(),
            vec![
                "apps:exists web",
                "config:show web",
                "domains:report web",
                "buildpacks:list web",
                "ports:list web",
                "nginx:report web",
            ]
        );
    }

    #[tokio::test]
    async fn test_retrieve_app_without_config_vars() {
        let no_vars = ExecOutput::exited(" !     no config vars for web", 1);
        let transport = Arc::new(app_transport(no_vars));
        let app = observer(&transport).retrieve_app("web").await.unwrap().unwrap();

        assert!(app.config_vars.is_empty());
        assert_eq!(app.domains.len(), 2);
        assert_eq!(transport.calls().len(), 6);
    }

    #[tokio::test]
    async fn test_config_other_status_is_error() {
        let transport = Arc::new(ScriptedTransport::new().on_status("config:show web", 2));
        let err = observer(&transport).read_config_vars("web").await.unwrap_err();
        assert_eq!(err.remote_status(), Some(2));
    }

    #[tokio::test]
    async fn test_exists_other_status_is_error() {
        let transport = Arc::new(ScriptedTransport::new().on_status("apps:exists foo", 2));
        let err = observer(&transport).app_exists("foo").await.unwrap_err();
        assert_eq!(err.remote_status(), Some(2));
    }

    #[tokio::test]
    async fn test_ports_not_found_status_is_empty() {
        let transport = Arc::new(ScriptedTransport::new().on_status("ports:list web", 1));
        assert!(observer(&transport).read_ports("web").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_legacy_port_listing() {
        let transport = Arc::new(ScriptedTransport::new().on_ok(
            "proxy:ports web",
            "-----> Port mappings for web\n    -----> scheme  host port  container port\n    http 8080 5000\n",
        ));
        let legacy = DokkuObserver::new(client(&transport, DokkuVersion::new(0, 31, 0)));
        let ports = legacy.read_ports("web").await.unwrap();
        assert_eq!(ports, BTreeSet::from([String::from("http:8080:5000")]));
    }

    #[tokio::test]
    async fn test_config_without_header_is_parse_error() {
        let transport = Arc::new(ScriptedTransport::new().on_ok("config:show web", ""));
        let err = observer(&transport).read_config_vars("web").await.unwrap_err();
        assert!(matches!(err, DokkuError::Parse(ParseError::MissingHeader { .. })));
    }

    #[tokio::test]
    async fn test_domains_missing_key() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .on_ok("domains:report web", "=====> web domains information\n"),
        );
        let err = observer(&transport).read_domains("web").await.unwrap_err();
        assert!(matches!(err, DokkuError::Parse(ParseError::MissingField { .. })));
    }

    #[tokio::test]
    async fn test_list_apps() {
        let transport =
            Arc::new(ScriptedTransport::new().on_ok("apps:list", "=====> My Apps\napi\nweb\n"));
        assert_eq!(
            observer(&transport).list_apps().await.unwrap(),
            vec![String::from("api"), String::from("web")]
        );

        let wrong = Arc::new(
            ScriptedTransport::new().on_ok("apps:list", "=====> Something else\napi\n"),
        );
        assert!(observer(&wrong).list_apps().await.is_err());
    }

    #[tokio::test]
    async fn test_service_info() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .on_ok(
                    "postgres:info db",
                    "=====> db postgres service information\n       Status:              running\n       Version:             postgres:11.6\n       Exposed ports:       -\n",
                )
                .on_status("redis:info cache", 1),
        );
        let obs = observer(&transport);
        let db = obs.retrieve_service(ServiceFamily::Postgres, "db").await.unwrap().unwrap();
        assert_eq!(db.image_version, "11.6");
        assert!(!db.stopped);
        assert!(obs.retrieve_service(ServiceFamily::Redis, "cache").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_link_exists() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .on_ok("redis:linked cache web", "")
                .on_status("redis:linked cache api", 1),
        );
        let obs = observer(&transport);
        assert!(obs.link_exists(ServiceFamily::Redis, "cache", "web").await.unwrap());
        assert!(!obs.link_exists(ServiceFamily::Redis, "cache", "api").await.unwrap());
    }
}
