//! # Replay Status Store
//!
//! Durable storage for [`ReplayStatus`] documents shared between the replay
//! scheduler, its workers and any peer instances pointed at the same store.
//!
//! Every record carries a monotonically increasing version. Writers use
//! [`StatusStore::compare_and_swap`] so that two updates racing on the same
//! job can never silently drop each other's changes; [`mutate`] wraps the
//! read/modify/CAS loop that nearly every caller wants.
//!
//! Stores may additionally offer a per-id advisory lock via
//! [`StatusStore::lock`], used to serialize job-level operations such as
//! start/stop/delete. Lock-free stores return `None` and callers rely on
//! CAS alone.

use crate::replay::ReplayStatus;
use crate::ReplayId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::OwnedMutexGuard;

pub mod filesystem;
pub mod memory;

pub use filesystem::FilesystemStatusStore;
pub use memory::InMemoryStatusStore;

/// Upper bound on CAS retries in [`mutate`] before giving up
const MAX_CAS_ATTEMPTS: u32 = 32;

/// Guard returned by [`StatusStore::lock`]; the lock is held until dropped
pub type StatusLock = OwnedMutexGuard<()>;

/// A stored value together with its version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

// ============================================================================
// Errors
// ============================================================================

/// Errors produced by status store implementations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Replay status {key} already exists")]
    AlreadyExists { key: String },

    #[error("Replay status {key} not found")]
    NotFound { key: String },

    #[error("Version conflict for {key}: expected {expected}, found {actual}")]
    VersionConflict {
        key: String,
        expected: u64,
        actual: u64,
    },

    #[error("Gave up updating {key} after {attempts} conflicting writes")]
    Contended { key: String, attempts: u32 },

    #[error("Status store I/O failure at {path}: {message}")]
    Io { path: String, message: String },

    #[error("Status store serialization failure for {key}: {message}")]
    Serialization { key: String, message: String },
}

impl StoreError {
    /// Check if the error may succeed on retry
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::VersionConflict { .. } | Self::Contended { .. } | Self::Io { .. }
        )
    }
}

// ============================================================================
// Store Trait
// ============================================================================

/// Versioned key/value storage for replay status records
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Fetch the current record for `id`
    async fn get(&self, id: &ReplayId) -> Result<Option<Versioned<ReplayStatus>>, StoreError>;

    /// Fetch every record
    async fn list(&self) -> Result<Vec<Versioned<ReplayStatus>>, StoreError>;

    /// Store a new record, failing if the id already exists. Returns the
    /// initial version.
    async fn insert(&self, status: ReplayStatus) -> Result<u64, StoreError>;

    /// Replace the record if its version still equals `expected_version`.
    /// Returns the new version.
    async fn compare_and_swap(
        &self,
        expected_version: u64,
        status: ReplayStatus,
    ) -> Result<u64, StoreError>;

    /// Delete the record if its version still equals `expected_version`
    async fn remove(&self, id: &ReplayId, expected_version: u64) -> Result<(), StoreError>;

    /// Acquire the advisory lock for `id`, if this store supports one
    async fn lock(&self, _id: &ReplayId) -> Result<Option<StatusLock>, StoreError> {
        Ok(None)
    }
}

/// Read, modify and conditionally write the record for `id`.
///
/// `apply` is re-run against a fresh copy after every version conflict, so it
/// must be free of side effects outside the record. An `Err` from `apply`
/// aborts without writing. Returns `Ok(None)` when no record exists.
pub async fn mutate<F, E>(
    store: &dyn StatusStore,
    id: &ReplayId,
    mut apply: F,
) -> Result<Option<ReplayStatus>, E>
where
    F: FnMut(&mut ReplayStatus) -> Result<(), E> + Send,
    E: From<StoreError> + Send,
{
    for _ in 0..MAX_CAS_ATTEMPTS {
        let Some(current) = store.get(id).await? else {
            return Ok(None);
        };

        let mut updated = current.value;
        apply(&mut updated)?;

        match store.compare_and_swap(current.version, updated.clone()).await {
            Ok(_) => return Ok(Some(updated)),
            Err(StoreError::VersionConflict { .. }) => {
                tracing::trace!(replay_id = %id, "Status write conflicted, retrying");
                tokio::task::yield_now().await;
            }
            Err(StoreError::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(e.into()),
        }
    }

    Err(StoreError::Contended {
        key: id.to_string(),
        attempts: MAX_CAS_ATTEMPTS,
    }
    .into())
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
