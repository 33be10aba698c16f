//! Command runner.
//!
//! Executes one [`DokkuCommand`] over the transport and turns whatever comes
//! back into a [`CommandOutput`]. The runner never fails: transport errors and
//! non-zero exits are both carried in the output so callers can branch on the
//! status.

use regex::Regex;
use std::sync::{Arc, LazyLock};
use tracing::debug;

use crate::error::{DokkuError, RemoteError, Result};

use super::command::{redact, DokkuCommand};
use super::transport::Transport;

/// Exit status Dokku uses when the queried resource does not exist.
pub const NOT_FOUND_STATUS: i32 = 1;

/// Exit status of a shell that could not find the command.
pub const COMMAND_NOT_FOUND_STATUS: i32 = 127;

#[allow(clippy::expect_used)]
static STATUS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Process exited with status ([0-9]+)$").expect("status pattern is valid")
});

/// Result of running one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Redacted command text.
    pub command: String,
    /// Redacted captured output.
    pub stdout: String,
    /// Exit status; 0 when it could not be determined.
    pub status: i32,
    /// Redacted error description, if the command did not succeed.
    pub error: Option<String>,
    /// The command never reached the host.
    transport_failure: bool,
}

impl CommandOutput {
    /// Returns true if the command succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Returns true if the command exited with the "not found" status.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        !self.transport_failure && self.error.is_some() && self.status == NOT_FOUND_STATUS
    }

    /// Returns true if the command could not be delivered.
    #[must_use]
    pub const fn is_transport_failure(&self) -> bool {
        self.transport_failure
    }

    /// Returns the output lines.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.stdout.lines()
    }

    /// Converts the output into a result.
    ///
    /// A status of 0 with an error present is an unknown failure, not success.
    ///
    /// # Errors
    ///
    /// Returns the transport failure, or a command failure carrying the
    /// redacted command, status and output.
    pub fn into_result(self) -> Result<String> {
        match self.error {
            None => Ok(self.stdout),
            Some(message) if self.transport_failure => {
                Err(RemoteError::transport(message).into())
            }
            Some(message) => {
                let output = if self.stdout.trim().is_empty() {
                    message
                } else {
                    self.stdout.trim().to_string()
                };
                Err(DokkuError::Remote(RemoteError::CommandFailed {
                    command: self.command,
                    status: self.status,
                    output,
                }))
            }
        }
    }
}

/// Runs commands against the Dokku host.
#[derive(Clone)]
pub struct CommandRunner {
    /// Session shared by every operation.
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for CommandRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRunner").finish_non_exhaustive()
    }
}

impl CommandRunner {
    /// Creates a runner over a transport.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Runs a command, capturing output and status.
    pub async fn run(&self, command: &DokkuCommand) -> CommandOutput {
        let secrets = command.secrets();
        let redacted = command.redacted();
        debug!("Running command: {redacted}");

        match self.transport.execute(&command.render()).await {
            Ok(exec) => {
                let stdout = redact(&String::from_utf8_lossy(&exec.output), &secrets);
                let error = exec.error.map(|e| redact(&e, &secrets));
                let status = error.as_deref().map_or(0, parse_status);
                if error.is_some() {
                    debug!("Command `{redacted}` exited with status {status}");
                }
                CommandOutput {
                    command: redacted,
                    stdout,
                    status,
                    error,
                    transport_failure: false,
                }
            }
            Err(e) => {
                debug!("Command `{redacted}` was not delivered: {e}");
                CommandOutput {
                    command: redacted,
                    stdout: String::new(),
                    status: 0,
                    error: Some(redact(&transport_message(e), &secrets)),
                    transport_failure: true,
                }
            }
        }
    }

    /// Runs a command and fails unless it succeeded.
    ///
    /// # Errors
    ///
    /// Returns a validation error, without contacting the host, if an
    /// argument would not arrive intact. Otherwise returns an error if the
    /// command could not be delivered or did not exit successfully.
    pub async fn run_checked(&self, command: &DokkuCommand) -> Result<String> {
        command.check()?;
        self.run(command).await.into_result()
    }
}

/// Extracts the exit status from an execution error message.
///
/// Returns 0 when the message does not carry a status.
#[must_use]
pub fn parse_status(message: &str) -> i32 {
    STATUS_PATTERN
        .captures(message.trim())
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

fn transport_message(error: RemoteError) -> String {
    match error {
        RemoteError::Transport { message } => message,
        other => other.to_string(),
    }
}
