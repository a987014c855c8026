//! State store trait definition.

use async_trait::async_trait;

use super::lock::LockInfo;
use super::types::State;
use crate::error::Result;

/// Persistence backend for [`State`].
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the state; `None` if none was ever saved.
    async fn load(&self) -> Result<Option<State>>;

    /// Saves the state, replacing the previous one.
    async fn save(&self, state: &State) -> Result<()>;

    /// Checks if a saved state exists.
    async fn exists(&self) -> Result<bool>;

    /// Acquires the state lock for `holder` running `operation`.
    async fn acquire_lock(&self, holder: &str, operation: &str) -> Result<LockInfo>;

    /// Releases a lock previously returned by [`Self::acquire_lock`].
    async fn release_lock(&self, lock_id: &str) -> Result<()>;

    /// Returns the current lock, if any.
    async fn lock_info(&self) -> Result<Option<LockInfo>>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}

#[async_trait]
impl StateStore for Box<dyn StateStore> {
    async fn load(&self) -> Result<Option<State>> {
        (**self).load().await
    }

    async fn save(&self, state: &State) -> Result<()> {
        (**self).save(state).await
    }

    async fn exists(&self) -> Result<bool> {
        (**self).exists().await
    }

    async fn acquire_lock(&self, holder: &str, operation: &str) -> Result<LockInfo> {
        (**self).acquire_lock(holder, operation).await
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        (**self).release_lock(lock_id).await
    }

    async fn lock_info(&self) -> Result<Option<LockInfo>> {
        (**self).lock_info().await
    }

    fn backend_type(&self) -> &'static str {
        (**self).backend_type()
    }
}
