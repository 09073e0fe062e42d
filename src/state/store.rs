//! State store trait definition.
//!
//! This module defines the interface the engine uses to load and save
//! prior state, and to serialize access to it.

use async_trait::async_trait;

use super::lock::LockInfo;
use super::types::WorkspaceState;
use crate::error::Result;

/// Trait for state storage backends.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the workspace state.
    ///
    /// Returns `None` if no state exists yet.
    async fn load(&self) -> Result<Option<WorkspaceState>>;

    /// Saves the workspace state.
    async fn save(&self, state: &WorkspaceState) -> Result<()>;

    /// Checks if state exists.
    async fn exists(&self) -> Result<bool>;

    /// Acquires a lock on the state for `operation`.
    ///
    /// Returns lock information if successful.
    async fn acquire_lock(&self, holder: &str, operation: &str) -> Result<LockInfo>;

    /// Releases a lock on the state. A lock with a different id is left alone.
    async fn release_lock(&self, lock_id: &str) -> Result<()>;

    /// Removes any lock regardless of holder.
    async fn force_unlock(&self) -> Result<()>;

    /// Gets current lock information if locked.
    async fn get_lock_info(&self) -> Result<Option<LockInfo>>;

    /// Checks if the state is locked.
    async fn is_locked(&self) -> Result<bool>;
}
