//! Local file-based state storage backend.
//!
//! State is a pretty-printed JSON file written through a temporary file and
//! renamed into place. The lock file sits next to it.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{DokkuError, Result, StateError};

use super::lock::{generate_holder_id, LockInfo, LOCK_EXPIRY_SECS};
use super::store::StateStore;
use super::types::{DeploymentState, STATE_VERSION};

/// Default state file path, relative to the manifest directory.
pub const DEFAULT_STATE_PATH: &str = ".dokku/state.json";

/// Local file-based state store.
#[derive(Debug, Clone)]
pub struct LocalStateStore {
    /// Path to the state file.
    state_path: PathBuf,
    /// Path to the lock file.
    lock_path: PathBuf,
}

impl LocalStateStore {
    /// Creates a store for the given state file.
    #[must_use]
    pub fn new(state_path: impl Into<PathBuf>) -> Self {
        let state_path = state_path.into();
        let lock_path = state_path.with_extension("lock");

        Self {
            state_path,
            lock_path,
        }
    }

    /// Creates a store from the manifest's state path, resolved against
    /// `base_dir` when relative.
    #[must_use]
    pub fn from_config(path: Option<&str>, base_dir: &Path) -> Self {
        let path = Path::new(path.unwrap_or(DEFAULT_STATE_PATH));
        if path.is_absolute() {
            Self::new(path)
        } else {
            Self::new(base_dir.join(path))
        }
    }

    /// Returns the state file path.
    #[must_use]
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Ensures the state directory exists.
    async fn ensure_dir(&self) -> Result<()> {
        if let Some(dir) = self.state_path.parent()
            && !dir.as_os_str().is_empty()
            && !dir.exists()
        {
            debug!("Creating state directory: {}", dir.display());
            fs::create_dir_all(dir).await.map_err(|e| {
                StateError::storage(format!("Failed to create state directory: {e}"))
            })?;
        }
        Ok(())
    }

    /// Reads the lock file if it exists.
    async fn read_lock_file(&self) -> Result<Option<LockInfo>> {
        if !self.lock_path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.lock_path).await.map_err(|e| {
            DokkuError::State(StateError::Corrupted {
                message: format!("Failed to read lock file: {e}"),
            })
        })?;

        let lock_info: LockInfo = serde_json::from_str(&content).map_err(|e| {
            DokkuError::State(StateError::Corrupted {
                message: format!("Failed to parse lock file: {e}"),
            })
        })?;

        Ok(Some(lock_info))
    }

    /// Creates the lock file; fails if another process created it first.
    async fn create_lock_file(&self, lock_info: &LockInfo) -> Result<()> {
        self.ensure_dir().await?;

        let content = serde_json::to_string_pretty(lock_info)
            .map_err(|e| StateError::serialization(format!("Failed to serialize lock: {e}")))?;

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_path)
            .await
            .map_err(|e| {
                DokkuError::State(StateError::LockFailed {
                    message: format!("Failed to create lock file: {e}"),
                })
            })?;

        file.write_all(content.as_bytes()).await.map_err(|e| {
            DokkuError::State(StateError::LockFailed {
                message: format!("Failed to write lock file: {e}"),
            })
        })?;

        file.sync_all().await.map_err(|e| {
            DokkuError::State(StateError::LockFailed {
                message: format!("Failed to sync lock file: {e}"),
            })
        })?;

        Ok(())
    }

    /// Deletes the lock file.
    async fn delete_lock_file(&self) -> Result<()> {
        if self.lock_path.exists() {
            fs::remove_file(&self.lock_path).await.map_err(|e| {
                DokkuError::State(StateError::LockFailed {
                    message: format!("Failed to delete lock file: {e}"),
                })
            })?;
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn load(&self) -> Result<Option<DeploymentState>> {
        if !self.state_path.exists() {
            debug!("State file does not exist: {}", self.state_path.display());
            return Ok(None);
        }

        info!("Loading state from: {}", self.state_path.display());

        let content = fs::read_to_string(&self.state_path).await.map_err(|e| {
            DokkuError::State(StateError::Corrupted {
                message: format!("Failed to read state file: {e}"),
            })
        })?;

        let state: DeploymentState = serde_json::from_str(&content).map_err(|e| {
            DokkuError::State(StateError::Corrupted {
                message: format!("Failed to parse state file: {e}"),
            })
        })?;

        if state.version != STATE_VERSION {
            return Err(StateError::VersionMismatch {
                expected: STATE_VERSION.to_string(),
                found: state.version,
            }
            .into());
        }

        Ok(Some(state))
    }

    async fn save(&self, state: &DeploymentState) -> Result<()> {
        self.ensure_dir().await?;

        info!("Saving state to: {}", self.state_path.display());

        let content = serde_json::to_string_pretty(state)
            .map_err(|e| StateError::serialization(format!("Failed to serialize state: {e}")))?;

        // Write to a temporary file first, then rename for atomicity
        let temp_path = self.state_path.with_extension("json.tmp");

        let mut file = fs::File::create(&temp_path).await.map_err(|e| {
            StateError::storage(format!("Failed to create temp state file: {e}"))
        })?;

        file.write_all(content.as_bytes())
            .await
            .map_err(|e| StateError::storage(format!("Failed to write state file: {e}")))?;

        file.sync_all()
            .await
            .map_err(|e| StateError::storage(format!("Failed to sync state file: {e}")))?;

        fs::rename(&temp_path, &self.state_path)
            .await
            .map_err(|e| StateError::storage(format!("Failed to rename state file: {e}")))?;

        debug!("State saved successfully");
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        if self.state_path.exists() {
            info!("Deleting state file: {}", self.state_path.display());
            fs::remove_file(&self.state_path)
                .await
                .map_err(|e| StateError::storage(format!("Failed to delete state file: {e}")))?;
        }

        self.delete_lock_file().await?;

        Ok(())
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self.state_path.exists())
    }

    async fn acquire_lock(&self, holder: &str, operation: &str) -> Result<LockInfo> {
        if let Some(existing) = self.read_lock_file().await? {
            if !existing.is_expired() {
                return Err(DokkuError::State(StateError::LockedByOther {
                    holder: existing.holder,
                    since: existing.acquired_at.to_rfc3339(),
                }));
            }
            warn!(
                "Taking over expired lock held by {} since {}",
                existing.holder,
                existing.acquired_at.to_rfc3339()
            );
            self.delete_lock_file().await?;
        }

        let holder_id = if holder.is_empty() {
            generate_holder_id()
        } else {
            holder.to_string()
        };

        let lock_info = LockInfo::new(&holder_id, operation);
        self.create_lock_file(&lock_info).await?;

        info!(
            "Acquired state lock: {} (expires in {}s)",
            lock_info.lock_id, LOCK_EXPIRY_SECS
        );

        Ok(lock_info)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        if let Some(existing) = self.read_lock_file().await? {
            if existing.lock_id == lock_id {
                self.delete_lock_file().await?;
                info!("Released state lock: {lock_id}");
            } else {
                debug!(
                    "Lock ID mismatch: expected {lock_id}, found {}",
                    existing.lock_id
                );
            }
        }
        Ok(())
    }

    async fn force_unlock(&self) -> Result<Option<LockInfo>> {
        let existing = self.read_lock_file().await.unwrap_or_else(|e| {
            warn!("Removing unreadable lock file: {e}");
            None
        });
        self.delete_lock_file().await?;
        Ok(existing)
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        self.read_lock_file().await
    }

    async fn is_locked(&self) -> Result<bool> {
        if let Some(lock_info) = self.read_lock_file().await? {
            return Ok(!lock_info.is_expired());
        }
        Ok(false)
    }

    fn location(&self) -> String {
        self.state_path.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use tempfile::TempDir;

    fn create_test_store() -> (LocalStateStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStateStore::new(temp_dir.path().join(".dokku/state.json"));
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let (store, _temp) = create_test_store();

        let mut state = DeploymentState::new("dokku.example.com");
        state.set_app("web", String::from("web"), AppConfig::new("web"), String::from("abc"));
        store.save(&state).await.expect("Failed to save state");

        let loaded = store
            .load()
            .await
            .expect("Failed to load state")
            .expect("State should exist");

        assert_eq!(loaded.host, "dokku.example.com");
        assert_eq!(loaded.apps["web"].fingerprint, "abc");
        assert!(!store.state_path().with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_load_nonexistent() {
        let (store, _temp) = create_test_store();

        let result = store.load().await.expect("Load should not fail");
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_load_corrupted() {
        let (store, _temp) = create_test_store();
        std::fs::create_dir_all(store.state_path().parent().unwrap()).unwrap();
        std::fs::write(store.state_path(), "{not json").unwrap();

        let result = store.load().await;
        assert!(matches!(
            result,
            Err(DokkuError::State(StateError::Corrupted { .. }))
        ));
    }

    #[tokio::test]
    async fn test_load_version_mismatch() {
        let (store, _temp) = create_test_store();
        let mut state = DeploymentState::new("host");
        state.version = String::from("0");
        store.save(&state).await.unwrap();

        let result = store.load().await;
        assert!(matches!(
            result,
            Err(DokkuError::State(StateError::VersionMismatch { .. }))
        ));
    }

    #[tokio::test]
    async fn test_exists_and_delete() {
        let (store, _temp) = create_test_store();

        assert!(!store.exists().await.expect("exists check failed"));

        store.save(&DeploymentState::new("host")).await.expect("Failed to save state");
        assert!(store.exists().await.expect("exists check failed"));

        store.delete().await.expect("Failed to delete state");
        assert!(!store.exists().await.expect("exists check failed"));
    }

    #[tokio::test]
    async fn test_lock_acquire_release() {
        let (store, _temp) = create_test_store();

        let lock = store
            .acquire_lock("test-holder", "apply")
            .await
            .expect("Failed to acquire lock");

        assert!(store.is_locked().await.expect("is_locked failed"));

        store
            .release_lock(&lock.lock_id)
            .await
            .expect("Failed to release lock");

        assert!(!store.is_locked().await.expect("is_locked failed"));
    }

    #[tokio::test]
    async fn test_lock_conflict() {
        let (store, _temp) = create_test_store();

        let _lock1 = store
            .acquire_lock("holder-1", "apply")
            .await
            .expect("Failed to acquire first lock");

        let result = store.acquire_lock("holder-2", "apply").await;
        assert!(matches!(
            result,
            Err(DokkuError::State(StateError::LockedByOther { holder, .. })) if holder == "holder-1"
        ));
    }

    #[tokio::test]
    async fn test_release_foreign_lock_is_noop() {
        let (store, _temp) = create_test_store();
        store.acquire_lock("holder-1", "apply").await.unwrap();

        store.release_lock("someone-else").await.unwrap();
        assert!(store.is_locked().await.unwrap());

        let removed = store.force_unlock().await.unwrap();
        assert_eq!(removed.map(|l| l.holder).as_deref(), Some("holder-1"));
        assert!(!store.is_locked().await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_lock_taken_over() {
        let (store, _temp) = create_test_store();
        let mut stale = LockInfo::new("crashed", "apply");
        stale.expires_at = chrono::Utc::now() - chrono::Duration::seconds(5);
        store.create_lock_file(&stale).await.unwrap();

        let lock = store.acquire_lock("fresh", "apply").await.unwrap();
        assert_eq!(lock.holder, "fresh");
    }

    #[test]
    fn test_from_config_resolves_relative_path() {
        let store = LocalStateStore::from_config(None, Path::new("/srv/deploy"));
        assert_eq!(store.state_path(), Path::new("/srv/deploy/.dokku/state.json"));

        let store = LocalStateStore::from_config(Some("/var/lib/state.json"), Path::new("/srv"));
        assert_eq!(store.state_path(), Path::new("/var/lib/state.json"));
    }
}
