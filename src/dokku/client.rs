//! Per-connection Dokku client.
//!
//! A [`DokkuClient`] owns the command runner for one host together with the
//! version detected when the connection was opened, so command selection is
//! scoped to the connection rather than the process.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::ProviderConfig;
use crate::error::{RemoteError, Result};

use super::command::DokkuCommand;
use super::runner::{CommandOutput, CommandRunner, COMMAND_NOT_FOUND_STATUS};
use super::transport::{SshTransport, Transport};
use super::version::{
    check_compatibility, detect_version, port_commands, Compatibility, DokkuVersion, PortCommands,
    TESTED_VERSIONS,
};

/// Client for one Dokku host.
#[derive(Debug, Clone)]
pub struct DokkuClient {
    /// Command runner over the host session.
    runner: CommandRunner,
    /// Version detected at connection time.
    version: DokkuVersion,
}

/// A freshly opened connection.
#[derive(Debug, Clone)]
pub struct Connection {
    /// The connected client.
    pub client: DokkuClient,
    /// Non-fatal compatibility warnings.
    pub warnings: Vec<String>,
}

impl DokkuClient {
    /// Opens an SSH connection from provider settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot be set up or the version
    /// check fails.
    pub async fn from_provider(provider: &ProviderConfig) -> Result<Connection> {
        let transport = SshTransport::new(provider)?;
        Self::connect(Arc::new(transport), provider.fail_on_untested_version).await
    }

    /// Connects over a transport, detecting the host version.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::WrongRemoteUser`] if the `version` command is
    /// not found, [`RemoteError::VersionUndetected`] if no version can be
    /// extracted, and [`RemoteError::UntestedVersion`] if the version is out
    /// of range while `fail_on_untested` is set.
    pub async fn connect(
        transport: Arc<dyn Transport>,
        fail_on_untested: bool,
    ) -> Result<Connection> {
        let runner = CommandRunner::new(transport);
        let output = runner.run(&DokkuCommand::new("version")).await;

        if !output.is_transport_failure() && output.status == COMMAND_NOT_FOUND_STATUS {
            return Err(RemoteError::WrongRemoteUser.into());
        }
        let stdout = output.into_result()?;

        let version = detect_version(&stdout).ok_or_else(|| RemoteError::VersionUndetected {
            tested: TESTED_VERSIONS.to_string(),
        })?;
        debug!("Host version {version}");

        let mut warnings = Vec::new();
        match check_compatibility(&version, fail_on_untested)? {
            Compatibility::Tested => info!("Connected to Dokku {version}"),
            Compatibility::Untested { warning } => {
                warn!("{warning}");
                warnings.push(warning);
            }
        }

        Ok(Connection {
            client: Self { runner, version },
            warnings,
        })
    }

    /// Creates a client for a known version without probing the host.
    #[must_use]
    pub const fn with_version(runner: CommandRunner, version: DokkuVersion) -> Self {
        Self { runner, version }
    }

    /// Returns the detected host version.
    #[must_use]
    pub const fn version(&self) -> &DokkuVersion {
        &self.version
    }

    /// Returns the port subcommands for this host.
    #[must_use]
    pub fn port_commands(&self) -> PortCommands {
        port_commands(&self.version)
    }

    /// Runs a command, capturing its status.
    pub async fn run(&self, command: &DokkuCommand) -> CommandOutput {
        self.runner.run(command).await
    }

    /// Runs a command and fails unless it succeeded.
    ///
    /// # Errors
    ///
    /// Returns an error if the command failed.
    pub async fn run_checked(&self, command: &DokkuCommand) -> Result<String> {
        self.runner.run_checked(command).await
    }
}
