//! # File Audit Sink
//!
//! Appends audit records, one JSON object per line, to a rotating file.
//!
//! The file being written is hidden (its name starts with `.`) so replay
//! source resolution never picks up a file that is still growing. When the
//! file rotates or the sink closes it is renamed to
//! `<prefix>-<yyyyMMdd_HHmmss.SSS>.json`.

use super::{AuditSink, SinkError};
use crate::audit::AuditParameters;
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S%.3f";

/// Where and how the file sink writes
#[derive(Debug, Clone, PartialEq)]
pub struct FileSinkSettings {
    pub path: PathBuf,
    pub sub_path: Option<String>,
    pub prefix: String,
    pub max_file_bytes: u64,
    pub max_file_age: Duration,
}

impl FileSinkSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            sub_path: None,
            prefix: "audit".to_string(),
            max_file_bytes: 20 * 1024 * 1024,
            max_file_age: Duration::from_secs(3600),
        }
    }

    pub fn with_sub_path(mut self, sub_path: impl Into<String>) -> Self {
        self.sub_path = Some(sub_path.into());
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_max_file_bytes(mut self, bytes: u64) -> Self {
        self.max_file_bytes = bytes;
        self
    }

    pub fn with_max_file_age(mut self, age: Duration) -> Self {
        self.max_file_age = age;
        self
    }

    /// Directory the files are written to
    pub fn directory(&self) -> PathBuf {
        match &self.sub_path {
            Some(sub_path) => self.path.join(sub_path),
            None => self.path.clone(),
        }
    }
}

struct ActiveFile {
    file: fs::File,
    path: PathBuf,
    opened: Instant,
    bytes: u64,
}

/// Rotating JSON-lines audit writer
pub struct FileAuditSink {
    settings: FileSinkSettings,
    directory: PathBuf,
    active: Mutex<Option<ActiveFile>>,
}

impl FileAuditSink {
    /// Create the sink, making its directory and publishing any hidden files
    /// a previous process left behind.
    pub async fn new(settings: FileSinkSettings) -> Result<Self, SinkError> {
        let directory = settings.directory();
        fs::create_dir_all(&directory)
            .await
            .map_err(|e| io_error(&directory, e))?;

        let sink = Self {
            settings,
            directory,
            active: Mutex::new(None),
        };
        sink.publish_orphans().await?;
        Ok(sink)
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Close the current file, if any, so it becomes visible to replay
    pub async fn rotate(&self) -> Result<(), SinkError> {
        let mut active = self.active.lock().await;
        if let Some(current) = active.take() {
            self.finish(current).await?;
        }
        Ok(())
    }

    /// Close the current file only if it has outlived `max_file_age`.
    /// Returns whether a file was closed.
    pub async fn rotate_expired(&self) -> Result<bool, SinkError> {
        let mut active = self.active.lock().await;
        let expired = active
            .as_ref()
            .is_some_and(|current| current.opened.elapsed() >= self.settings.max_file_age);
        if !expired {
            return Ok(false);
        }

        if let Some(current) = active.take() {
            self.finish(current).await?;
        }
        Ok(true)
    }

    /// Flush and publish the current file. The sink stays usable and opens a
    /// new file on the next write.
    pub async fn close(&self) -> Result<(), SinkError> {
        self.rotate().await
    }

    async fn open(&self) -> Result<ActiveFile, SinkError> {
        let name = format!(
            ".{}-{}.json",
            self.settings.prefix,
            Utc::now().format(TIMESTAMP_FORMAT)
        );
        let path = self.directory.join(name);
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| io_error(&path, e))?;

        debug!(path = %path.display(), "Opened audit file");
        Ok(ActiveFile {
            file,
            path,
            opened: Instant::now(),
            bytes: 0,
        })
    }

    async fn finish(&self, mut current: ActiveFile) -> Result<(), SinkError> {
        current
            .file
            .flush()
            .await
            .map_err(|e| io_error(&current.path, e))?;
        drop(current.file);

        if current.bytes == 0 {
            return fs::remove_file(&current.path)
                .await
                .map_err(|e| io_error(&current.path, e));
        }

        let target = self.unique_target().await;
        fs::rename(&current.path, &target)
            .await
            .map_err(|e| io_error(&target, e))?;
        info!(path = %target.display(), bytes = current.bytes, "Closed audit file");
        Ok(())
    }

    async fn unique_target(&self) -> PathBuf {
        let stamp = Utc::now().format(TIMESTAMP_FORMAT).to_string();
        let mut target = self
            .directory
            .join(format!("{}-{}.json", self.settings.prefix, stamp));
        let mut counter = 1;
        while fs::try_exists(&target).await.unwrap_or(false) {
            target = self
                .directory
                .join(format!("{}-{}-{}.json", self.settings.prefix, stamp, counter));
            counter += 1;
        }
        target
    }

    fn needs_rotation(&self, current: &ActiveFile, incoming: u64) -> bool {
        (current.bytes > 0 && current.bytes + incoming > self.settings.max_file_bytes)
            || current.opened.elapsed() >= self.settings.max_file_age
    }

    async fn publish_orphans(&self) -> Result<(), SinkError> {
        let hidden_prefix = format!(".{}-", self.settings.prefix);
        let mut entries = fs::read_dir(&self.directory)
            .await
            .map_err(|e| io_error(&self.directory, e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error(&self.directory, e))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(visible) = name.strip_prefix('.') {
                if name.starts_with(&hidden_prefix) && name.ends_with(".json") {
                    let target = self.directory.join(visible);
                    match fs::rename(entry.path(), &target).await {
                        Ok(()) => info!(path = %target.display(), "Published orphaned audit file"),
                        Err(e) => warn!(path = %target.display(), error = %e, "Unable to publish orphaned audit file"),
                    }
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl AuditSink for FileAuditSink {
    async fn audit(&self, parameters: &AuditParameters) -> Result<(), SinkError> {
        let mut line =
            serde_json::to_string(&parameters.to_map()).map_err(|e| SinkError::Serialization {
                message: e.to_string(),
            })?;
        line.push('\n');
        let incoming = line.len() as u64;

        let mut active = self.active.lock().await;

        if let Some(current) = active.as_ref() {
            if self.needs_rotation(current, incoming) {
                if let Some(current) = active.take() {
                    self.finish(current).await?;
                }
            }
        }

        if active.is_none() {
            *active = Some(self.open().await?);
        }

        let Some(current) = active.as_mut() else {
            return Ok(());
        };

        current
            .file
            .write_all(line.as_bytes())
            .await
            .map_err(|e| io_error(&current.path, e))?;
        current
            .file
            .flush()
            .await
            .map_err(|e| io_error(&current.path, e))?;
        current
            .file
            .sync_data()
            .await
            .map_err(|e| io_error(&current.path, e))?;
        current.bytes += incoming;

        Ok(())
    }
}

fn io_error(path: &Path, error: std::io::Error) -> SinkError {
    SinkError::Io {
        path: path.display().to_string(),
        message: error.to_string(),
    }
}

#[cfg(test)]
#[path = "file_tests.rs"]
mod tests;
