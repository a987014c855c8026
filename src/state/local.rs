//! Local file-based state storage.
//!
//! The state is written as pretty JSON to a temporary file that is then
//! renamed over the real one, so a crash mid-write never leaves a partial
//! state behind. A sibling lock file guards the state file.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{InfraplanError, Result, StateError};

use super::lock::{LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
use super::store::StateStore;
use super::types::{STATE_VERSION, State};

/// Lock file extension appended to the state file name.
const LOCK_EXTENSION: &str = "lock";

/// Local file-based state store.
#[derive(Debug, Clone)]
pub struct LocalStateStore {
    /// Directory holding the state file.
    base_dir: PathBuf,
    /// Path to the state file.
    state_path: PathBuf,
    /// Path to the lock file.
    lock_path: PathBuf,
}

impl LocalStateStore {
    /// Creates a store for the given state file path.
    #[must_use]
    pub fn new(state_path: impl Into<PathBuf>) -> Self {
        let state_path = state_path.into();
        let base_dir = state_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        let lock_path = state_path.with_extension(LOCK_EXTENSION);

        Self {
            base_dir,
            state_path,
            lock_path,
        }
    }

    /// Returns the state file path.
    #[must_use]
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Ensures the state directory exists.
    async fn ensure_dir(&self) -> Result<()> {
        if !self.base_dir.exists() {
            debug!("Creating state directory: {}", self.base_dir.display());
            fs::create_dir_all(&self.base_dir).await.map_err(|e| {
                InfraplanError::State(StateError::write(format!(
                    "Failed to create state directory: {e}"
                )))
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
            InfraplanError::State(StateError::Corrupted {
                message: format!("Failed to read lock file: {e}"),
            })
        })?;

        let lock_info: LockInfo = serde_json::from_str(&content).map_err(|e| {
            InfraplanError::State(StateError::Corrupted {
                message: format!("Failed to parse lock file: {e}"),
            })
        })?;

        Ok(Some(lock_info))
    }

    /// Writes the lock file.
    async fn write_lock_file(&self, lock_info: &LockInfo) -> Result<()> {
        self.ensure_dir().await?;

        let content = serde_json::to_string_pretty(lock_info).map_err(|e| {
            InfraplanError::State(StateError::serialization(format!(
                "Failed to serialize lock: {e}"
            )))
        })?;

        let lock_failed = |what: &str, e: std::io::Error| {
            InfraplanError::State(StateError::LockFailed {
                message: format!("Failed to {what} lock file: {e}"),
            })
        };

        let mut file = fs::File::create(&self.lock_path)
            .await
            .map_err(|e| lock_failed("create", e))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| lock_failed("write", e))?;
        file.sync_all().await.map_err(|e| lock_failed("sync", e))?;

        Ok(())
    }

    /// Deletes the lock file.
    async fn delete_lock_file(&self) -> Result<()> {
        if self.lock_path.exists() {
            fs::remove_file(&self.lock_path).await.map_err(|e| {
                InfraplanError::State(StateError::LockFailed {
                    message: format!("Failed to delete lock file: {e}"),
                })
            })?;
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn load(&self) -> Result<Option<State>> {
        if !self.state_path.exists() {
            debug!("State file does not exist: {}", self.state_path.display());
            return Ok(None);
        }

        info!("Loading state from: {}", self.state_path.display());

        let content = fs::read_to_string(&self.state_path).await.map_err(|e| {
            InfraplanError::State(StateError::Corrupted {
                message: format!("Failed to read state file: {e}"),
            })
        })?;

        let mut state: State = serde_json::from_str(&content).map_err(|e| {
            InfraplanError::State(StateError::Corrupted {
                message: format!("Failed to parse state file: {e}"),
            })
        })?;

        if state.version > STATE_VERSION {
            return Err(InfraplanError::State(StateError::VersionMismatch {
                expected: STATE_VERSION,
                found: state.version,
            }));
        }

        state.normalize();
        Ok(Some(state))
    }

    async fn save(&self, state: &State) -> Result<()> {
        self.ensure_dir().await?;

        info!(serial = state.serial, "Saving state to: {}", self.state_path.display());

        let content = serde_json::to_string_pretty(state).map_err(|e| {
            InfraplanError::State(StateError::serialization(format!(
                "Failed to serialize state: {e}"
            )))
        })?;

        let temp_path = self.state_path.with_extension("tmp");
        let write_failed =
            |what: &str, e: std::io::Error| InfraplanError::State(StateError::write(format!("Failed to {what}: {e}")));

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| write_failed("create temp state file", e))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| write_failed("write state file", e))?;
        file.sync_all()
            .await
            .map_err(|e| write_failed("sync state file", e))?;

        fs::rename(&temp_path, &self.state_path)
            .await
            .map_err(|e| write_failed("rename state file", e))?;

        debug!("State saved successfully");
        Ok(())
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self.state_path.exists())
    }

    async fn acquire_lock(&self, holder: &str, operation: &str) -> Result<LockInfo> {
        if let Some(existing) = self.read_lock_file().await? {
            if !existing.is_expired() {
                return Err(InfraplanError::State(StateError::LockedByOther {
                    holder: existing.holder.clone(),
                    since: existing.acquired_at.to_rfc3339(),
                }));
            }
            debug!("Expired lock found, taking over");
        }

        let holder_id = if holder.is_empty() {
            generate_holder_id()
        } else {
            holder.to_string()
        };

        let lock_info = LockInfo::new(&holder_id, operation);
        self.write_lock_file(&lock_info).await?;

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

    async fn lock_info(&self) -> Result<Option<LockInfo>> {
        self.read_lock_file().await
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}
