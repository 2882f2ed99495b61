//! # Filesystem Status Store
//!
//! Stores one JSON document per replay job in a directory. Several service
//! instances can share the directory (e.g. over a network mount); writes go
//! through a temporary file and an atomic rename so readers never observe a
//! partially written record.
//!
//! Version checks and writes are serialized inside a process by a single
//! write mutex. Across processes the store relies on the rename being atomic,
//! which narrows but does not close the race window; deployments that need
//! strict cross-process CAS should put a real database behind the trait.

use super::{StatusLock, StatusStore, StoreError, Versioned};
use crate::replay::ReplayStatus;
use crate::ReplayId;
use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

const RECORD_EXTENSION: &str = "json";

/// Directory-backed status store
///
/// # Examples
///
/// ```no_run
/// use audit_keeper_core::status_store::FilesystemStatusStore;
/// use std::path::PathBuf;
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = FilesystemStatusStore::new(PathBuf::from("./data/replay-status")).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct FilesystemStatusStore {
    base_path: PathBuf,
    write_lock: Arc<Mutex<()>>,
    locks: Arc<DashMap<ReplayId, Arc<Mutex<()>>>>,
}

impl FilesystemStatusStore {
    /// Open the store, creating the directory if needed
    pub async fn new(base_path: PathBuf) -> Result<Self, StoreError> {
        fs::create_dir_all(&base_path)
            .await
            .map_err(|e| io_error(&base_path, e))?;

        Ok(Self {
            base_path,
            write_lock: Arc::new(Mutex::new(())),
            locks: Arc::new(DashMap::new()),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn record_path(&self, id: &ReplayId) -> PathBuf {
        self.base_path
            .join(format!("{}.{}", id, RECORD_EXTENSION))
    }

    async fn read_record(
        &self,
        path: &Path,
    ) -> Result<Option<Versioned<ReplayStatus>>, StoreError> {
        let json = match fs::read_to_string(path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(path, e)),
        };

        serde_json::from_str(&json)
            .map(Some)
            .map_err(|e| StoreError::Serialization {
                key: path.display().to_string(),
                message: e.to_string(),
            })
    }

    async fn write_record(&self, record: &Versioned<ReplayStatus>) -> Result<(), StoreError> {
        let path = self.record_path(&record.value.id);
        let json =
            serde_json::to_string_pretty(record).map_err(|e| StoreError::Serialization {
                key: record.value.id.to_string(),
                message: e.to_string(),
            })?;

        let temp_path = path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| io_error(&temp_path, e))?;
        file.write_all(json.as_bytes())
            .await
            .map_err(|e| io_error(&temp_path, e))?;
        file.sync_all()
            .await
            .map_err(|e| io_error(&temp_path, e))?;
        drop(file);

        fs::rename(&temp_path, &path)
            .await
            .map_err(|e| io_error(&path, e))
    }
}

#[async_trait]
impl StatusStore for FilesystemStatusStore {
    async fn get(&self, id: &ReplayId) -> Result<Option<Versioned<ReplayStatus>>, StoreError> {
        self.read_record(&self.record_path(id)).await
    }

    async fn list(&self) -> Result<Vec<Versioned<ReplayStatus>>, StoreError> {
        let mut entries = fs::read_dir(&self.base_path)
            .await
            .map_err(|e| io_error(&self.base_path, e))?;

        let mut records = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error(&self.base_path, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }

            match self.read_record(&path).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable replay status");
                }
            }
        }

        records.sort_by_key(|record| record.value.id);
        Ok(records)
    }

    async fn insert(&self, status: ReplayStatus) -> Result<u64, StoreError> {
        let _guard = self.write_lock.lock().await;

        if fs::try_exists(self.record_path(&status.id))
            .await
            .unwrap_or(false)
        {
            return Err(StoreError::AlreadyExists {
                key: status.id.to_string(),
            });
        }

        let record = Versioned {
            version: 1,
            value: status,
        };
        self.write_record(&record).await?;
        Ok(record.version)
    }

    async fn compare_and_swap(
        &self,
        expected_version: u64,
        status: ReplayStatus,
    ) -> Result<u64, StoreError> {
        let _guard = self.write_lock.lock().await;

        let current = self
            .get(&status.id)
            .await?
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

        let record = Versioned {
            version: current.version + 1,
            value: status,
        };
        self.write_record(&record).await?;
        Ok(record.version)
    }

    async fn remove(&self, id: &ReplayId, expected_version: u64) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;

        let current = self.get(id).await?.ok_or_else(|| StoreError::NotFound {
            key: id.to_string(),
        })?;

        if current.version != expected_version {
            return Err(StoreError::VersionConflict {
                key: id.to_string(),
                expected: expected_version,
                actual: current.version,
            });
        }

        let path = self.record_path(id);
        fs::remove_file(&path)
            .await
            .map_err(|e| io_error(&path, e))?;

        // Holders of the old guard keep their own handle
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

impl FilesystemStatusStore {
    #[cfg(test)]
    pub(crate) fn tracked_locks(&self) -> usize {
        self.locks.len()
    }
}

fn io_error(path: &Path, error: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        message: error.to_string(),
    }
}

#[cfg(test)]
#[path = "filesystem_tests.rs"]
mod tests;
