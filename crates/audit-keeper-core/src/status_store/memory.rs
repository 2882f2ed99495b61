//! In-memory status store for tests and single-instance deployments.

use super::{StatusLock, StatusStore, StoreError, Versioned};
use crate::replay::ReplayStatus;
use crate::ReplayId;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Status store backed by a process-local map.
///
/// Clones share the same records.
///
/// ```
/// use audit_keeper_core::{InMemoryStatusStore, ReplayId, ReplayStatus, StatusStore};
///
/// # tokio_test::block_on(async {
/// let store = InMemoryStatusStore::new();
/// let status = ReplayStatus::new(ReplayId::new(), "/audit", 10, Vec::new(), false);
///
/// let version = store.insert(status.clone()).await.unwrap();
/// let shared = store.clone();
///
/// assert_eq!(version, 1);
/// assert_eq!(shared.get(&status.id).await.unwrap().unwrap().value, status);
/// # });
/// ```
#[derive(Debug, Default, Clone)]
pub struct InMemoryStatusStore {
    records: Arc<RwLock<HashMap<ReplayId, Versioned<ReplayStatus>>>>,
    locks: Arc<DashMap<ReplayId, Arc<Mutex<()>>>>,
}

impl InMemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn tracked_locks(&self) -> usize {
        self.locks.len()
    }
}

#[async_trait]
impl StatusStore for InMemoryStatusStore {
    async fn get(&self, id: &ReplayId) -> Result<Option<Versioned<ReplayStatus>>, StoreError> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<Versioned<ReplayStatus>>, StoreError> {
        let records = self.records.read().await;
        let mut all: Vec<_> = records.values().cloned().collect();
        all.sort_by_key(|record| record.value.id);
        Ok(all)
    }

    async fn insert(&self, status: ReplayStatus) -> Result<u64, StoreError> {
        let mut records = self.records.write().await;
        if records.contains_key(&status.id) {
            return Err(StoreError::AlreadyExists {
                key: status.id.to_string(),
            });
        }

        records.insert(
            status.id,
            Versioned {
                version: 1,
                value: status,
            },
        );
        Ok(1)
    }

    async fn compare_and_swap(
        &self,
        expected_version: u64,
        status: ReplayStatus,
    ) -> Result<u64, StoreError> {
        let mut records = self.records.write().await;
        let current = records
            .get_mut(&status.id)
            .ok_or_else(|| StoreError::NotFound {
                key: status.id.to_string(),
            })?;

        if current.version != expected_version {
            return Err(StoreError::VersionConflict {
                key: status.id.to_string(),
                expected: expected_version,
                actual: current.version,
            });
        }

        current.version += 1;
        current.value = status;
        Ok(current.version)
    }

    async fn remove(&self, id: &ReplayId, expected_version: u64) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let current = records.get(id).ok_or_else(|| StoreError::NotFound {
            key: id.to_string(),
        })?;

        if current.version != expected_version {
            return Err(StoreError::VersionConflict {
                key: id.to_string(),
                expected: expected_version,
                actual: current.version,
            });
        }

        records.remove(id);
        self.locks.remove(id);
        Ok(())
    }

    async fn lock(&self, id: &ReplayId) -> Result<Option<StatusLock>, StoreError> {
        let mutex = self
            .locks
            .entry(*id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        Ok(Some(mutex.lock_owned().await))
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
