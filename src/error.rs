//! Error types for the Dokku reconciliation system.
//!
//! This module provides the error hierarchy for every stage of a run:
//! configuration, state management, remote command execution, output
//! parsing, planning, and reconciliation.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the Dokku reconciliation system.
#[derive(Debug, Error)]
pub enum DokkuError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Remote command errors.
    #[error("Dokku error: {0}")]
    Remote(#[from] RemoteError),

    /// Remote output did not match the expected format.
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Reconciliation errors.
    #[error("Reconciliation error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The manifest file was not found.
    #[error("Manifest file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The manifest file could not be parsed.
    #[error("Failed to parse manifest: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Manifest validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// A required setting is missing.
    #[error("Missing setting: {name}")]
    MissingSetting {
        /// Name of the setting or environment variable.
        name: String,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Reading or writing the state file failed.
    #[error("State storage failed: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: String,
        /// Found state version.
        found: String,
    },
}

/// Errors raised while talking to the Dokku host.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The command could not be delivered or executed.
    #[error("Transport failure: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
    },

    /// The command ran but exited unsuccessfully.
    #[error("Command `{command}` failed with status {status}: {output}")]
    CommandFailed {
        /// Redacted command text.
        command: String,
        /// Exit status (0 when it could not be determined).
        status: i32,
        /// Redacted command output.
        output: String,
    },

    /// The SSH user is not the dokku user (command not found).
    #[error("Remote user cannot run dokku commands (status 127); connect as the dokku user")]
    WrongRemoteUser,

    /// No version could be extracted from `dokku version`.
    #[error("Could not detect dokku version - tested version range: {tested}")]
    VersionUndetected {
        /// Tested version range.
        tested: String,
    },

    /// The detected version is outside the tested range.
    #[error("Dokku version {version} has not been tested. Tested version range: {tested}")]
    UntestedVersion {
        /// Detected version.
        version: String,
        /// Tested version range.
        tested: String,
    },
}

/// Remote output did not match the expected wire format.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// The report header was missing.
    #[error("`{command}` output is missing its header line")]
    MissingHeader {
        /// Command that produced the output.
        command: String,
    },

    /// The report header did not look as expected.
    #[error("`{command}` output has unexpected header: {found}")]
    UnexpectedHeader {
        /// Command that produced the output.
        command: String,
        /// The header line found.
        found: String,
    },

    /// A required report field was absent.
    #[error("`{command}` output has no `{field}` field")]
    MissingField {
        /// Command that produced the output.
        command: String,
        /// The missing field.
        field: String,
    },
}

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// A planned resource was not found in the manifest or state.
    #[error("Planned {resource_type} '{key}' has no definition")]
    MissingDefinition {
        /// Type of resource.
        resource_type: String,
        /// Logical key of the resource.
        key: String,
    },
}

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Reconciliation failed for a specific resource.
    #[error("Failed to reconcile {resource_type} '{name}': {reason}")]
    ResourceReconcileFailed {
        /// Type of resource.
        resource_type: String,
        /// Name of the resource.
        name: String,
        /// Reason for failure.
        reason: String,
    },

    /// A multi-step change failed after some steps were applied.
    ///
    /// Nothing is rolled back; re-read the resource to learn its state.
    #[error("{resource} partially changed ({applied} step(s) applied): {reason}")]
    PartiallyApplied {
        /// Resource being changed.
        resource: String,
        /// Number of commands that succeeded before the failure.
        applied: usize,
        /// The failure that stopped the sequence.
        reason: String,
    },

    /// Reconciliation was aborted.
    #[error("Reconciliation aborted: {reason}")]
    Aborted {
        /// Reason for abort.
        reason: String,
    },
}

/// Result type alias for reconciliation operations.
pub type Result<T> = std::result::Result<T, DokkuError>;

impl DokkuError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error came from the remote transport.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Remote(RemoteError::Transport { .. }))
    }

    /// Returns the remote exit status, if this is a command failure.
    #[must_use]
    pub const fn remote_status(&self) -> Option<i32> {
        match self {
            Self::Remote(RemoteError::CommandFailed { status, .. }) => Some(*status),
            _ => None,
        }
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

impl StateError {
    /// Creates a storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

impl RemoteError {
    /// Creates a transport error.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }
}

impl ParseError {
    /// Creates a missing-field error.
    #[must_use]
    pub fn missing_field(command: impl Into<String>, field: impl Into<String>) -> Self {
        Self::MissingField {
            command: command.into(),
            field: field.into(),
        }
    }
}
