//! Manifest parser for loading the `dokku.yaml` file.
//!
//! This module handles loading the manifest from YAML and applying the
//! `DOKKU_*` environment overrides for the provider settings.

use crate::error::{ConfigError, DokkuError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::Manifest;

/// Environment variables overriding provider settings.
pub const ENV_SSH_HOST: &str = "DOKKU_SSH_HOST";
/// SSH user override.
pub const ENV_SSH_USER: &str = "DOKKU_SSH_USER";
/// SSH port override.
pub const ENV_SSH_PORT: &str = "DOKKU_SSH_PORT";
/// SSH key (path or inline) override.
pub const ENV_SSH_CERT: &str = "DOKKU_SSH_CERT";
/// SSH key passphrase override.
pub const ENV_SSH_PASSPHRASE: &str = "DOKKU_SSH_PASSPHRASE";
/// Untested-version policy override.
pub const ENV_FAIL_ON_UNTESTED_VERSION: &str = "DOKKU_FAIL_ON_UNTESTED_VERSION";
/// Known-hosts policy override.
pub const ENV_SKIP_KNOWN_HOSTS_CHECK: &str = "DOKKU_SKIP_KNOWN_HOSTS_CHECK";

/// Manifest parser.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving the `.env` file.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new manifest parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads a manifest from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Manifest> {
        let path = path.as_ref();
        info!("Loading manifest from: {}", path.display());

        if !path.exists() {
            return Err(DokkuError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            DokkuError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses a manifest from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<Manifest> {
        debug!("Parsing YAML manifest");

        let manifest: Manifest = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            DokkuError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!(
            "Parsed manifest with {} app(s), {} service(s), {} link(s)",
            manifest.apps.len(),
            manifest.services.len(),
            manifest.links.len()
        );
        Ok(manifest)
    }

    /// Loads a manifest and applies overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or an override
    /// has an invalid value.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<Manifest> {
        let mut manifest = self.load_file(path)?;
        Self::apply_env_overrides(&mut manifest, |name| std::env::var(name).ok())?;
        Ok(manifest)
    }

    /// Applies `DOKKU_*` overrides to the provider settings.
    ///
    /// `lookup` returns the value of an environment variable, if set.
    ///
    /// # Errors
    ///
    /// Returns an error if a numeric or boolean override cannot be parsed.
    pub fn apply_env_overrides<F>(manifest: &mut Manifest, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let provider = &mut manifest.provider;

        if let Some(host) = lookup(ENV_SSH_HOST) {
            debug!("Overriding provider.ssh_host from environment");
            provider.ssh_host = host;
        }

        if let Some(user) = lookup(ENV_SSH_USER) {
            debug!("Overriding provider.ssh_user from environment");
            provider.ssh_user = user;
        }

        if let Some(port) = lookup(ENV_SSH_PORT) {
            debug!("Overriding provider.ssh_port from environment");
            provider.ssh_port = port.trim().parse().map_err(|_| {
                ConfigError::validation(format!("Invalid {ENV_SSH_PORT}: {port}"), "ssh_port")
            })?;
        }

        if let Some(cert) = lookup(ENV_SSH_CERT) {
            debug!("Overriding provider.ssh_cert from environment");
            provider.ssh_cert = cert;
        }

        if let Some(passphrase) = lookup(ENV_SSH_PASSPHRASE) {
            debug!("Overriding provider.ssh_passphrase from environment");
            provider.ssh_passphrase = Some(passphrase).filter(|p| !p.is_empty());
        }

        if let Some(flag) = lookup(ENV_FAIL_ON_UNTESTED_VERSION) {
            debug!("Overriding provider.fail_on_untested_version from environment");
            provider.fail_on_untested_version = parse_bool(ENV_FAIL_ON_UNTESTED_VERSION, &flag)?;
        }

        if let Some(flag) = lookup(ENV_SKIP_KNOWN_HOSTS_CHECK) {
            debug!("Overriding provider.skip_known_hosts_check from environment");
            provider.skip_known_hosts_check = parse_bool(ENV_SKIP_KNOWN_HOSTS_CHECK, &flag)?;
        }

        Ok(())
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                DokkuError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::validation(format!("Invalid {name}: {value}"), name).into()),
    }
}

/// Default manifest file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["dokku.yaml", "dokku.yml"];

/// Finds the manifest in the given directory or its parents.
///
/// # Errors
///
/// Returns an error if no manifest is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found manifest: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(DokkuError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}
