//! State store trait definition.

use async_trait::async_trait;

use super::lock::LockInfo;
use super::types::DeploymentState;
use crate::error::Result;

/// Trait for state storage backends.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the recorded state.
    ///
    /// Returns `None` if no state exists yet.
    async fn load(&self) -> Result<Option<DeploymentState>>;

    /// Saves the recorded state.
    async fn save(&self, state: &DeploymentState) -> Result<()>;

    /// Deletes the recorded state.
    async fn delete(&self) -> Result<()>;

    /// Checks if state exists.
    async fn exists(&self) -> Result<bool>;

    /// Acquires a lock on the state for an operation.
    async fn acquire_lock(&self, holder: &str, operation: &str) -> Result<LockInfo>;

    /// Releases a lock on the state. A lock held by someone else is left alone.
    async fn release_lock(&self, lock_id: &str) -> Result<()>;

    /// Removes any lock, whoever holds it.
    async fn force_unlock(&self) -> Result<Option<LockInfo>>;

    /// Gets current lock information if locked.
    async fn get_lock_info(&self) -> Result<Option<LockInfo>>;

    /// Checks if the state is locked by an unexpired lock.
    async fn is_locked(&self) -> Result<bool>;

    /// Human-readable location of the state, for display.
    fn location(&self) -> String;
}
