// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![warn(missing_docs)]                // All public items must be documented
#![warn(dead_code)]                   // Unused code is reported
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![warn(unused_imports)]              // Unused imports are reported
#![warn(unused_variables)]            // Unused variables are reported
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// Tests may unwrap freely
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Dokku Reconcile
//!
//! Declarative, idempotent management of apps, backing services and service
//! links on a [Dokku](https://dokku.com) host.
//!
//! ## Overview
//!
//! Every change is made by running `dokku` subcommands over SSH and every
//! observation comes from parsing their text output. Given a manifest and the
//! recorded state, the tool:
//!
//! - Refreshes the recorded resources from the host
//! - Computes the per-resource difference with the manifest
//! - Issues the ordered commands that converge the host
//! - Records what it observed afterwards
//!
//! ## Architecture
//!
//! 1. **Desired State**: Defined in `dokku.yaml`
//! 2. **Recorded State**: Kept in a local state file, refreshed from the host
//! 3. **Reconciler**: Diffs, plans and executes the necessary commands
//!
//! ## Modules
//!
//! - [`dokku`]: Command runner, report parsers, version gate and per-resource
//!   command sequences
//! - [`resource`]: Record interface handed to the create/read/update/delete
//!   operations
//! - [`config`]: Manifest parsing and validation
//! - [`state`]: State file and locking
//! - [`planner`]: Diff computation and execution planning
//! - [`reconciler`]: Reconciliation pipeline and drift checks
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! provider:
//!   ssh_host: dokku.example.com
//!   ssh_cert: ~/.ssh/id_ed25519
//!
//! apps:
//!   web:
//!     name: web
//!     config_vars:
//!       RUST_LOG: info
//!     domains: [web.example.com]
//!     ports: ["http:80:5000"]
//!
//! services:
//!   db:
//!     name: web-db
//!     family: postgres
//!     image_version: "16.2"
//!
//! links:
//!   web-db:
//!     family: postgres
//!     service: web-db
//!     app: web
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod dokku;
pub mod error;
pub mod planner;
pub mod reconciler;
pub mod resource;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigHasher, ConfigParser, ConfigValidator, Manifest};
pub use dokku::{DokkuClient, DokkuObserver, DokkuProvisioner, DokkuVersion};
pub use error::{DokkuError, Result};
pub use planner::{DeploymentPlan, DiffEngine, PlanExecutor};
pub use reconciler::{DriftReport, ImportedResource, PlanPreview, ReconciliationResult, Reconciler};
pub use resource::{ResourceData, ResourceKind};
pub use state::{DeploymentState, LocalStateStore, StateStore};
