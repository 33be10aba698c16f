//! Dokku integration module.
//!
//! This module provides everything that talks to the Dokku host: the command
//! builder and runner, report parsers, version gate, resource readers and the
//! per-resource command sequences.

mod changeset;
mod client;
mod command;
mod observer;
mod parse;
mod provisioner;
mod runner;
mod transport;
mod types;
mod version;

#[cfg(test)]
pub(crate) mod testing;

pub use changeset::{diff_ports, PortDiff};
pub use client::{Connection, DokkuClient};
pub use command::{is_word, quote, redact, DokkuCommand, REDACTION_MARKER};
pub use observer::DokkuObserver;
pub use parse::{parse_key_values, parse_list, parse_port_table, parse_report, KeyCase};
pub use provisioner::DokkuProvisioner;
pub use runner::{CommandOutput, CommandRunner, NOT_FOUND_STATUS};
pub use transport::{ExecOutput, SshTransport, Transport};
pub use types::{managed_subset, DokkuApp, DokkuService, NginxReport, ServiceCapabilities};
pub use version::{
    check_compatibility, detect_version, port_commands, Compatibility, DokkuVersion, PortCommands,
    TESTED_VERSIONS,
};
