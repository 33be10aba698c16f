//! Dokku version detection and command selection.

use regex::Regex;
use semver::{Version, VersionReq};
use std::sync::LazyLock;

use crate::error::RemoteError;

/// A detected Dokku version.
pub type DokkuVersion = Version;

#[allow(clippy::expect_used)]
static VERSION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9]+\.[0-9]+\.[0-9]+").expect("version pattern is valid"));

/// Versions this tool has been tested against.
#[allow(clippy::expect_used)]
pub static TESTED_VERSIONS: LazyLock<VersionReq> =
    LazyLock::new(|| VersionReq::parse(">=0.30.0, <0.36.0").expect("tested range is valid"));

/// Versions that only know the `proxy:ports*` spelling.
#[allow(clippy::expect_used)]
static LEGACY_PORTS: LazyLock<VersionReq> =
    LazyLock::new(|| VersionReq::parse("<0.32.0").expect("legacy port range is valid"));

/// Extracts the first version-shaped substring from command output.
#[must_use]
pub fn detect_version(output: &str) -> Option<DokkuVersion> {
    VERSION_PATTERN
        .find(output)
        .and_then(|m| Version::parse(m.as_str()).ok())
}

/// Port management subcommands for one Dokku version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortCommands {
    /// Adds a mapping.
    pub add: &'static str,
    /// Removes a mapping.
    pub remove: &'static str,
    /// Lists mappings.
    pub list: &'static str,
}

/// `proxy:ports*` spelling used before 0.32.0.
const LEGACY_PORT_COMMANDS: PortCommands = PortCommands {
    add: "proxy:ports-add",
    remove: "proxy:ports-remove",
    list: "proxy:ports",
};

const PORT_COMMANDS: PortCommands = PortCommands {
    add: "ports:add",
    remove: "ports:remove",
    list: "ports:list",
};

/// Selects the port subcommands for a host version.
#[must_use]
pub fn port_commands(version: &DokkuVersion) -> PortCommands {
    if LEGACY_PORTS.matches(version) {
        LEGACY_PORT_COMMANDS
    } else {
        PORT_COMMANDS
    }
}

/// Outcome of the compatibility policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compatibility {
    /// Version is in the tested range.
    Tested,
    /// Version is outside the tested range but allowed.
    Untested {
        /// Message to surface to the user.
        warning: String,
    },
}

/// Applies the compatibility policy to a detected version.
///
/// # Errors
///
/// Returns [`RemoteError::UntestedVersion`] when the version is outside the
/// tested range and `fail_on_untested` is set.
pub fn check_compatibility(
    version: &DokkuVersion,
    fail_on_untested: bool,
) -> Result<Compatibility, RemoteError> {
    if TESTED_VERSIONS.matches(version) {
        return Ok(Compatibility::Tested);
    }
    if fail_on_untested {
        return Err(RemoteError::UntestedVersion {
            version: version.to_string(),
            tested: TESTED_VERSIONS.to_string(),
        });
    }
    Ok(Compatibility::Untested {
        warning: format!(
            "Dokku version {version} has not been tested. Tested version range: {}",
            *TESTED_VERSIONS
        ),
    })
}
