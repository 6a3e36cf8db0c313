//! State store trait definition.

use async_trait::async_trait;

use super::lock::LockInfo;
use super::types::ResourceState;
use crate::error::Result;

/// Storage backend for tracked state.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the tracked state.
    ///
    /// Returns `None` if no state exists yet.
    async fn load(&self) -> Result<Option<ResourceState>>;

    /// Saves the tracked state, bumping its serial.
    async fn save(&self, state: &mut ResourceState) -> Result<()>;

    /// Deletes the tracked state.
    async fn delete(&self) -> Result<()>;

    /// Checks if state exists.
    async fn exists(&self) -> Result<bool>;

    /// Acquires the state lock.
    async fn acquire_lock(&self, holder: &str, operation: &str) -> Result<LockInfo>;

    /// Releases the state lock if `lock_id` still holds it.
    async fn release_lock(&self, lock_id: &str) -> Result<()>;

    /// Removes the lock regardless of holder.
    async fn force_unlock(&self) -> Result<()>;

    /// Current lock, if any (expired locks included).
    async fn get_lock_info(&self) -> Result<Option<LockInfo>>;

    /// Checks if a live lock is held.
    async fn is_locked(&self) -> Result<bool> {
        Ok(self.get_lock_info().await?.is_some_and(|lock| !lock.is_expired()))
    }

    /// Loads the state or starts an empty one.
    async fn load_or_default(&self) -> Result<ResourceState> {
        Ok(self.load().await?.unwrap_or_default())
    }

    /// Backend name for display.
    fn backend_type(&self) -> &'static str;
}
