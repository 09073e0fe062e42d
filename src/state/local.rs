//! Local file-based state storage backend.
//!
//! State lives in one JSON file next to a `.lock` file. Writes go through a
//! temporary file and a rename so a crash never leaves a half-written state.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{Result, StateError};

use super::lock::{LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
use super::store::StateStore;
use super::types::{STATE_VERSION, WorkspaceState};

/// Default state file path, relative to the workspace file.
pub const DEFAULT_STATE_PATH: &str = ".costform/state.json";

/// Local file-based state store.
#[derive(Debug, Clone)]
pub struct LocalStateStore {
    /// Path to the state file.
    state_path: PathBuf,
    /// Path to the lock file.
    lock_path: PathBuf,
}

fn corrupted(what: &str, e: impl std::fmt::Display) -> StateError {
    StateError::Corrupted {
        message: format!("{what}: {e}"),
    }
}

fn lock_failed(what: &str, e: impl std::fmt::Display) -> StateError {
    StateError::LockFailed {
        message: format!("{what}: {e}"),
    }
}

impl LocalStateStore {
    /// Creates a store for the given state file.
    #[must_use]
    pub fn new(state_path: impl Into<PathBuf>) -> Self {
        let state_path = state_path.into();
        let lock_path = state_path.with_extension("lock");
        Self { state_path, lock_path }
    }

    /// The state file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.state_path
    }

    /// Ensures the state directory exists.
    async fn ensure_dir(&self) -> Result<()> {
        if let Some(dir) = self.state_path.parent()
            && !dir.as_os_str().is_empty()
            && !dir.exists()
        {
            debug!("Creating state directory: {}", dir.display());
            fs::create_dir_all(dir)
                .await
                .map_err(|e| StateError::write(format!("Failed to create state directory: {e}")))?;
        }
        Ok(())
    }

    /// Writes `content` to `path` through a temporary file and a rename.
    async fn write_atomic(&self, path: &Path, content: &str) -> Result<()> {
        self.ensure_dir().await?;
        let temp_path = path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| StateError::write(format!("Failed to create {}: {e}", temp_path.display())))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| StateError::write(format!("Failed to write {}: {e}", temp_path.display())))?;
        file.sync_all()
            .await
            .map_err(|e| StateError::write(format!("Failed to sync {}: {e}", temp_path.display())))?;

        fs::rename(&temp_path, path)
            .await
            .map_err(|e| StateError::write(format!("Failed to rename to {}: {e}", path.display())))?;
        Ok(())
    }

    /// Reads the lock file if it exists.
    async fn read_lock_file(&self) -> Result<Option<LockInfo>> {
        if !self.lock_path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.lock_path)
            .await
            .map_err(|e| corrupted("Failed to read lock file", e))?;
        let lock_info = serde_json::from_str(&content).map_err(|e| corrupted("Failed to parse lock file", e))?;
        Ok(Some(lock_info))
    }

    /// Deletes the lock file.
    async fn delete_lock_file(&self) -> Result<()> {
        if self.lock_path.exists() {
            fs::remove_file(&self.lock_path)
                .await
                .map_err(|e| lock_failed("Failed to delete lock file", e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn load(&self) -> Result<Option<WorkspaceState>> {
        if !self.state_path.exists() {
            debug!("State file does not exist: {}", self.state_path.display());
            return Ok(None);
        }

        debug!("Loading state from: {}", self.state_path.display());
        let content = fs::read_to_string(&self.state_path)
            .await
            .map_err(|e| corrupted("Failed to read state file", e))?;
        let state: WorkspaceState =
            serde_json::from_str(&content).map_err(|e| corrupted("Failed to parse state file", e))?;

        if state.version > STATE_VERSION {
            return Err(StateError::VersionMismatch {
                expected: STATE_VERSION.to_string(),
                found: state.version.to_string(),
            }
            .into());
        }
        Ok(Some(state))
    }

    async fn save(&self, state: &WorkspaceState) -> Result<()> {
        let content = serde_json::to_string_pretty(state)
            .map_err(|e| StateError::serialization(format!("Failed to serialize state: {e}")))?;
        self.write_atomic(&self.state_path, &content).await?;
        info!(
            "Saved state (serial {}, {} resources) to {}",
            state.serial,
            state.resources.len(),
            self.state_path.display()
        );
        Ok(())
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self.state_path.exists())
    }

    async fn acquire_lock(&self, holder: &str, operation: &str) -> Result<LockInfo> {
        if let Some(existing) = self.read_lock_file().await? {
            if !existing.is_expired() {
                return Err(StateError::LockedByOther {
                    holder: existing.holder,
                    since: existing.acquired_at.to_rfc3339(),
                }
                .into());
            }
            warn!("Taking over expired lock {} held by {}", existing.lock_id, existing.holder);
        }

        let holder_id = if holder.is_empty() {
            generate_holder_id()
        } else {
            holder.to_string()
        };
        let lock_info = LockInfo::new(&holder_id).for_operation(operation);
        let content = serde_json::to_string_pretty(&lock_info)
            .map_err(|e| StateError::serialization(format!("Failed to serialize lock: {e}")))?;
        self.write_atomic(&self.lock_path, &content)
            .await
            .map_err(|e| lock_failed("Failed to write lock file", e))?;

        debug!("Acquired state lock {} (expires in {LOCK_EXPIRY_SECS}s)", lock_info.lock_id);
        Ok(lock_info)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        match self.read_lock_file().await? {
            Some(existing) if existing.lock_id == lock_id => {
                self.delete_lock_file().await?;
                debug!("Released state lock: {lock_id}");
            }
            Some(existing) => debug!("Lock ID mismatch: expected {lock_id}, found {}", existing.lock_id),
            None => {}
        }
        Ok(())
    }

    async fn force_unlock(&self) -> Result<()> {
        if let Some(existing) = self.read_lock_file().await? {
            warn!("Force-removing lock {} held by {}", existing.lock_id, existing.holder);
        }
        self.delete_lock_file().await
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        self.read_lock_file().await
    }

    async fn is_locked(&self) -> Result<bool> {
        Ok(self.read_lock_file().await?.is_some_and(|l| !l.is_expired()))
    }
}
