//! Configuration module for the Dokku reconciliation system.
//!
//! This module handles all manifest-related functionality:
//! - Parsing and deserializing `dokku.yaml`
//! - Validation of resource declarations
//! - Computing attribute fingerprints for change detection

mod hash;
mod parser;
mod spec;
mod validator;

pub use hash::ConfigHasher;
pub use parser::{
    ConfigParser, DEFAULT_CONFIG_FILES, ENV_FAIL_ON_UNTESTED_VERSION, ENV_SKIP_KNOWN_HOSTS_CHECK,
    ENV_SSH_CERT, ENV_SSH_HOST, ENV_SSH_PASSPHRASE, ENV_SSH_PORT, ENV_SSH_USER, find_config_file,
};
pub use spec::{
    AppConfig, DEFAULT_BIND_ADDRESS_IPV4, DEFAULT_BIND_ADDRESS_IPV6, LinkConfig, Manifest,
    ProviderConfig, ServiceConfig, ServiceFamily, StateConfig,
};
pub use validator::{ConfigValidator, ValidationIssue, ValidationReport};
