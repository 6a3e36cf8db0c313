//! Local file-based state storage.
//!
//! State lives in a single JSON file (`.flyrec/state.json` by default) with a
//! sibling `<file>.lock` holding the [`LockInfo`] of the current writer.

use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::config::DEFAULT_STATE_PATH;
use crate::error::{FlyrecError, Result, StateError};

use super::lock::{generate_holder_id, LockInfo, LOCK_EXPIRY_SECS};
use super::store::StateStore;
use super::types::{ResourceState, STATE_VERSION};

/// Local file-based state store.
#[derive(Debug, Clone)]
pub struct LocalStateStore {
    /// Path to the state file.
    state_path: PathBuf,
    /// Path to the lock file.
    lock_path: PathBuf,
}

impl Default for LocalStateStore {
    fn default() -> Self {
        Self::new(DEFAULT_STATE_PATH)
    }
}

impl LocalStateStore {
    /// Creates a store for the given state file.
    #[must_use]
    pub fn new(state_path: impl Into<PathBuf>) -> Self {
        let state_path = state_path.into();
        let mut lock_name = state_path
            .file_name()
            .map_or_else(|| "state".into(), ToOwned::to_owned);
        lock_name.push(".lock");
        let lock_path = state_path.with_file_name(lock_name);

        Self {
            state_path,
            lock_path,
        }
    }

    /// Path of the state file.
    #[must_use]
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Path of the lock file.
    #[must_use]
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    async fn ensure_dir(&self) -> Result<()> {
        if let Some(dir) = self.state_path.parent()
            && !dir.as_os_str().is_empty()
            && !dir.exists()
        {
            debug!("Creating state directory: {}", dir.display());
            fs::create_dir_all(dir).await.map_err(|e| {
                StateError::write(format!("Failed to create state directory: {e}"))
            })?;
        }
        Ok(())
    }

    async fn read_lock_file(&self) -> Result<Option<LockInfo>> {
        if !self.lock_path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.lock_path).await.map_err(|e| {
            FlyrecError::State(StateError::Corrupted {
                message: format!("Failed to read lock file: {e}"),
            })
        })?;

        let lock_info = serde_json::from_str(&content).map_err(|e| {
            FlyrecError::State(StateError::Corrupted {
                message: format!("Failed to parse lock file: {e}"),
            })
        })?;

        Ok(Some(lock_info))
    }

    /// Creates the lock file, failing if it already exists.
    async fn create_lock_file(&self, lock_info: &LockInfo) -> Result<()> {
        self.ensure_dir().await?;

        let content = serde_json::to_string_pretty(lock_info)
            .map_err(|e| StateError::serialization(format!("Failed to serialize lock: {e}")))?;

        let lock_failed = |e: std::io::Error| {
            FlyrecError::State(StateError::LockFailed {
                message: format!("{}: {e}", self.lock_path.display()),
            })
        };

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_path)
            .await
            .map_err(lock_failed)?;
        file.write_all(content.as_bytes()).await.map_err(lock_failed)?;
        file.sync_all().await.map_err(lock_failed)?;

        Ok(())
    }

    async fn delete_lock_file(&self) -> Result<()> {
        if self.lock_path.exists() {
            fs::remove_file(&self.lock_path).await.map_err(|e| {
                FlyrecError::State(StateError::LockFailed {
                    message: format!("Failed to delete lock file: {e}"),
                })
            })?;
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn load(&self) -> Result<Option<ResourceState>> {
        if !self.state_path.exists() {
            debug!("State file does not exist: {}", self.state_path.display());
            return Ok(None);
        }

        debug!("Loading state from: {}", self.state_path.display());

        let content = fs::read_to_string(&self.state_path).await.map_err(|e| {
            FlyrecError::State(StateError::Corrupted {
                message: format!("Failed to read state file: {e}"),
            })
        })?;

        let state: ResourceState = serde_json::from_str(&content).map_err(|e| {
            FlyrecError::State(StateError::Corrupted {
                message: format!("Failed to parse state file: {e}"),
            })
        })?;

        if state.version != STATE_VERSION {
            return Err(FlyrecError::State(StateError::VersionMismatch {
                expected: STATE_VERSION.to_string(),
                found: state.version,
            }));
        }

        debug!(
            serial = state.serial,
            resources = state.resources.len(),
            "Loaded state"
        );
        Ok(Some(state))
    }

    async fn save(&self, state: &mut ResourceState) -> Result<()> {
        self.ensure_dir().await?;

        state.serial += 1;
        state.last_updated = Utc::now();

        let content = serde_json::to_string_pretty(state)
            .map_err(|e| StateError::serialization(format!("Failed to serialize state: {e}")))?;

        // Write to a temporary file first, then rename for atomicity
        let temp_path = self.state_path.with_extension("json.tmp");

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| StateError::write(format!("Failed to create temp state file: {e}")))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| StateError::write(format!("Failed to write state file: {e}")))?;
        file.sync_all()
            .await
            .map_err(|e| StateError::write(format!("Failed to sync state file: {e}")))?;

        fs::rename(&temp_path, &self.state_path)
            .await
            .map_err(|e| StateError::write(format!("Failed to rename state file: {e}")))?;

        info!(
            serial = state.serial,
            "Saved state to {}",
            self.state_path.display()
        );
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        if self.state_path.exists() {
            info!("Deleting state file: {}", self.state_path.display());
            fs::remove_file(&self.state_path)
                .await
                .map_err(|e| StateError::write(format!("Failed to delete state file: {e}")))?;
        }

        self.delete_lock_file().await
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self.state_path.exists())
    }

    async fn acquire_lock(&self, holder: &str, operation: &str) -> Result<LockInfo> {
        if let Some(existing) = self.read_lock_file().await? {
            if !existing.is_expired() {
                return Err(FlyrecError::State(StateError::LockedByOther {
                    holder: existing.holder,
                    since: existing.acquired_at.to_rfc3339(),
                }));
            }
            warn!(holder = %existing.holder, "Taking over expired state lock");
            self.delete_lock_file().await?;
        }

        let holder_id = if holder.is_empty() {
            generate_holder_id()
        } else {
            holder.to_string()
        };

        let lock_info = LockInfo::new(&holder_id).with_operation(operation);
        self.create_lock_file(&lock_info).await?;

        info!(
            "Acquired state lock: {} (expires in {}s)",
            lock_info.lock_id, LOCK_EXPIRY_SECS
        );

        Ok(lock_info)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        match self.read_lock_file().await? {
            Some(existing) if existing.lock_id == lock_id => {
                self.delete_lock_file().await?;
                debug!("Released state lock: {lock_id}");
            }
            Some(existing) => {
                warn!(
                    "Lock ID mismatch: expected {lock_id}, found {}",
                    existing.lock_id
                );
            }
            None => debug!("No lock to release"),
        }
        Ok(())
    }

    async fn force_unlock(&self) -> Result<()> {
        if let Some(existing) = self.read_lock_file().await? {
            warn!(holder = %existing.holder, "Force-removing state lock");
        }
        self.delete_lock_file().await
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        self.read_lock_file().await
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{AppConfig, ResourceKind};
    use crate::state::ResourceRecord;
    use tempfile::TempDir;

    fn create_test_store() -> (LocalStateStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStateStore::new(temp_dir.path().join(".flyrec").join("state.json"));
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let (store, _temp) = create_test_store();

        let mut state = ResourceState::new();
        state.track(
            &ResourceKind::App.address("hello"),
            "abc",
            ResourceRecord::App(AppConfig {
                name: String::from("hello"),
                ..AppConfig::default()
            }),
        );
        store.save(&mut state).await.expect("Failed to save state");
        assert_eq!(state.serial, 1);

        let loaded = store
            .load()
            .await
            .expect("Failed to load state")
            .expect("State should exist");

        assert_eq!(loaded, state);
        assert!(!store.state_path().with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_serial_increments() {
        let (store, _temp) = create_test_store();

        let mut state = store.load_or_default().await.expect("load");
        store.save(&mut state).await.expect("save");
        store.save(&mut state).await.expect("save");

        let loaded = store.load().await.expect("load").expect("exists");
        assert_eq!(loaded.serial, 2);
    }

    #[tokio::test]
    async fn test_load_nonexistent() {
        let (store, _temp) = create_test_store();

        assert!(store.load().await.expect("Load should not fail").is_none());
        assert!(!store.exists().await.expect("exists check failed"));
    }

    #[tokio::test]
    async fn test_corrupted_state() {
        let (store, _temp) = create_test_store();
        std::fs::create_dir_all(store.state_path().parent().expect("parent")).expect("mkdir");
        std::fs::write(store.state_path(), "{not json").expect("write");

        let err = store.load().await.expect_err("corrupted");
        assert!(matches!(err, FlyrecError::State(StateError::Corrupted { .. })));
    }

    #[tokio::test]
    async fn test_version_mismatch() {
        let (store, _temp) = create_test_store();
        let mut state = ResourceState::new();
        state.version = String::from("0.1");
        store.save(&mut state).await.expect("save");

        let err = store.load().await.expect_err("old version");
        assert!(matches!(err, FlyrecError::State(StateError::VersionMismatch { .. })));
    }

    #[tokio::test]
    async fn test_lock_acquire_release() {
        let (store, _temp) = create_test_store();

        let lock = store
            .acquire_lock("test-holder", "apply")
            .await
            .expect("Failed to acquire lock");

        assert!(store.lock_path().exists());
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

        let _lock = store
            .acquire_lock("holder-1", "apply")
            .await
            .expect("Failed to acquire first lock");

        let err = store.acquire_lock("holder-2", "destroy").await.expect_err("locked");
        match err {
            FlyrecError::State(StateError::LockedByOther { holder, .. }) => {
                assert_eq!(holder, "holder-1");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_release_with_wrong_id_keeps_lock() {
        let (store, _temp) = create_test_store();

        store.acquire_lock("holder-1", "apply").await.expect("lock");
        store.release_lock("someone-else").await.expect("release");

        assert!(store.is_locked().await.expect("is_locked"));

        store.force_unlock().await.expect("force unlock");
        assert!(!store.is_locked().await.expect("is_locked"));
    }

    #[tokio::test]
    async fn test_expired_lock_is_taken_over() {
        let (store, _temp) = create_test_store();
        let stale = LockInfo::acquired_at(
            "crashed",
            Utc::now() - chrono::Duration::seconds(LOCK_EXPIRY_SECS + 60),
        );
        store.create_lock_file(&stale).await.expect("write stale lock");

        let lock = store.acquire_lock("holder-2", "apply").await.expect("take over");
        assert_eq!(lock.holder, "holder-2");
    }
}
