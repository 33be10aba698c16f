//! Scripted transport for engine tests.
//!
//! Records every command it receives and answers from a table of canned
//! outputs, so tests can assert exact command sequences.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use crate::error::RemoteError;

use super::client::DokkuClient;
use super::runner::CommandRunner;
use super::transport::{ExecOutput, Transport};
use super::version::DokkuVersion;

/// Transport answering from canned responses.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    /// Responses keyed by command or command prefix, checked in order.
    rules: Vec<(String, ExecOutput)>,
    /// Commands received, in order.
    calls: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    /// Creates a transport answering every command with empty success.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers `command` (or any command starting with `command `).
    pub fn on(mut self, command: &str, output: ExecOutput) -> Self {
        self.rules.push((command.to_string(), output));
        self
    }

    /// Answers `command` with successful output.
    pub fn on_ok(self, command: &str, stdout: &str) -> Self {
        self.on(command, ExecOutput::ok(stdout))
    }

    /// Answers `command` with an exit status.
    pub fn on_status(self, command: &str, status: i32) -> Self {
        self.on(command, ExecOutput::exited("", status))
    }

    /// Returns the commands received so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Returns the received commands that mutate state (everything except
    /// reads).
    pub fn mutations(&self) -> Vec<String> {
        const READS: [&str; 9] = [
            "apps:exists",
            "apps:list",
            "config:show",
            "domains:report",
            "buildpacks:list",
            "nginx:report",
            "ports:list",
            ":info",
            ":linked",
        ];
        self.calls()
            .into_iter()
            .filter(|c| {
                let sub = c.split_whitespace().next().unwrap_or_default();
                !READS.iter().any(|r| sub == *r || (r.starts_with(':') && sub.ends_with(r)))
                    && sub != "proxy:ports"
            })
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, command: &str) -> Result<ExecOutput, RemoteError> {
        self.calls.lock().unwrap().push(command.to_string());
        let output = self
            .rules
            .iter()
            .find(|(key, _)| {
                command == key
                    || command
                        .strip_prefix(key.as_str())
                        .is_some_and(|rest| rest.starts_with(' '))
            })
            .map(|(_, output)| output.clone())
            .unwrap_or_default();
        Ok(output)
    }
}

/// Builds a client over a scripted transport for a given host version.
pub fn client(transport: &Arc<ScriptedTransport>, version: DokkuVersion) -> DokkuClient {
    let shared: Arc<dyn Transport> = transport.clone();
    DokkuClient::with_version(CommandRunner::new(shared), version)
}

/// A version using the current port subcommands.
pub const CURRENT: DokkuVersion = DokkuVersion::new(0, 34, 0);
