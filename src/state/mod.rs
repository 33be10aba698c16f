//! State management module.
//!
//! This module provides persistent state storage for tracking managed
//! resources: their remote ids, recorded attributes, fingerprints and the
//! deployment history.

mod local;
mod lock;
mod store;
mod types;

pub use local::{DEFAULT_STATE_PATH, LocalStateStore};
pub use lock::{LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
pub use store::StateStore;
pub use types::{
    DeploymentHistoryEntry, DeploymentOperation, DeploymentState, MAX_HISTORY, ResourceRecord,
    STATE_VERSION,
};
