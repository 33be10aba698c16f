//! CLI module for the dokku-reconcile tool.
//!
//! This module provides the command-line interface for managing
//! resources on a Dokku host.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, StateCommands};
pub use output::OutputFormatter;
