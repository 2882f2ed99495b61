//! Replay source resolution and file markers.
//!
//! A source is either a single file or a directory. In a directory, "ready"
//! files are regular files whose name carries no marker and does not start
//! with `.`. Files left behind by an interrupted run keep their `_RUNNING.`
//! or `_QUEUED.` marker and are only picked up on request.

use super::status::FileState;
use super::ReplayError;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;
use url::Url;

pub const QUEUED_PREFIX: &str = "_QUEUED.";
pub const RUNNING_PREFIX: &str = "_RUNNING.";
pub const FINISHED_PREFIX: &str = "_FINISHED.";
pub const FAILED_PREFIX: &str = "_FAILED.";

const MARKERS: [(&str, FileState); 4] = [
    (QUEUED_PREFIX, FileState::Queued),
    (RUNNING_PREFIX, FileState::Running),
    (FINISHED_PREFIX, FileState::Finished),
    (FAILED_PREFIX, FileState::Failed),
];

/// The marker prefix for a file state
pub fn marker(state: FileState) -> &'static str {
    match state {
        FileState::Queued => QUEUED_PREFIX,
        FileState::Running => RUNNING_PREFIX,
        FileState::Finished => FINISHED_PREFIX,
        FileState::Failed => FAILED_PREFIX,
    }
}

/// Split a file name into its marker state, if any, and the bare name
pub fn split_marker(name: &str) -> (Option<FileState>, &str) {
    for (prefix, state) in MARKERS {
        if let Some(bare) = name.strip_prefix(prefix) {
            return (Some(state), bare);
        }
    }
    (None, name)
}

/// Interpret a `file:` URI or a plain path
pub fn to_path(path_uri: &str) -> Result<PathBuf, ReplayError> {
    if path_uri.trim().is_empty() {
        return Err(ReplayError::Source {
            path: path_uri.to_string(),
            message: "path is empty".to_string(),
        });
    }

    if path_uri.starts_with("file:") {
        let url = Url::parse(path_uri).map_err(|e| ReplayError::Source {
            path: path_uri.to_string(),
            message: e.to_string(),
        })?;
        return url.to_file_path().map_err(|_| ReplayError::Source {
            path: path_uri.to_string(),
            message: "not a local file URI".to_string(),
        });
    }

    Ok(PathBuf::from(path_uri))
}

/// Resolve a source into the ordered list of files to replay.
///
/// Files interrupted while RUNNING come first, then interrupted QUEUED
/// files, then ready files; each group is sorted by name.
pub async fn resolve(path_uri: &str, replay_unfinished: bool) -> Result<Vec<PathBuf>, ReplayError> {
    let path = to_path(path_uri)?;
    let source_error = |e: std::io::Error| ReplayError::Source {
        path: path_uri.to_string(),
        message: e.to_string(),
    };

    let metadata = fs::metadata(&path).await.map_err(source_error)?;
    if metadata.is_file() {
        return Ok(vec![path]);
    }

    let mut running = Vec::new();
    let mut queued = Vec::new();
    let mut ready = Vec::new();

    let mut entries = fs::read_dir(&path).await.map_err(source_error)?;
    while let Some(entry) = entries.next_entry().await.map_err(source_error)? {
        if !entry.file_type().await.map_err(source_error)?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        match split_marker(&name) {
            (None, _) if !name.starts_with('.') => ready.push(entry.path()),
            (Some(FileState::Running), _) if replay_unfinished => running.push(entry.path()),
            (Some(FileState::Queued), _) if replay_unfinished => queued.push(entry.path()),
            _ => {}
        }
    }

    running.sort();
    queued.sort();
    ready.sort();

    debug!(
        source = %path.display(),
        running = running.len(),
        queued = queued.len(),
        ready = ready.len(),
        "Resolved replay source"
    );

    running.extend(queued);
    running.extend(ready);
    Ok(running)
}

/// The path `path` would have when carrying the marker for `state`
pub fn marked_path(path: &Path, state: FileState) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let (_, bare) = split_marker(&name);
    path.with_file_name(format!("{}{}", marker(state), bare))
}

/// The path `path` would have with its marker removed
pub fn unmarked_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let (_, bare) = split_marker(&name);
    path.with_file_name(bare)
}

/// Rename `path` to carry the marker for `state`, returning the new path
pub async fn mark(path: &Path, state: FileState) -> std::io::Result<PathBuf> {
    let target = marked_path(path, state);
    if target != path {
        fs::rename(path, &target).await?;
    }
    Ok(target)
}

/// Rename `path` back to its ready name, returning the new path
pub async fn unmark(path: &Path) -> std::io::Result<PathBuf> {
    let target = unmarked_path(path);
    if target != path {
        fs::rename(path, &target).await?;
    }
    Ok(target)
}

#[cfg(test)]
#[path = "source_tests.rs"]
mod tests;
