//! Replay job and per-file status records.
//!
//! These are the documents persisted in the [`StatusStore`](crate::StatusStore)
//! and returned verbatim by the status endpoints.

use crate::{ReplayId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Whole-job replay state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplayState {
    Created,
    Running,
    Stopped,
    Finished,
    Failed,
}

impl ReplayState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Running => "RUNNING",
            Self::Stopped => "STOPPED",
            Self::Finished => "FINISHED",
            Self::Failed => "FAILED",
        }
    }

    /// No further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }
}

impl fmt::Display for ReplayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-file replay state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileState {
    Queued,
    Running,
    Finished,
    Failed,
}

impl FileState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Finished => "FINISHED",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Progress of one source file
///
/// Counters only ever grow and are written only by the worker that owns the
/// file. `encountered_error` is sticky.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStatus {
    pub state: FileState,
    pub path_uri: String,
    pub lines_read: u64,
    pub audits_sent: u64,
    pub audits_failed: u64,
    pub parse_failures: u64,
    pub encountered_error: bool,
}

impl FileStatus {
    /// A freshly resolved file waiting for dispatch
    pub fn queued(path_uri: impl Into<String>) -> Self {
        Self {
            state: FileState::Queued,
            path_uri: path_uri.into(),
            lines_read: 0,
            audits_sent: 0,
            audits_failed: 0,
            parse_failures: 0,
            encountered_error: false,
        }
    }
}

/// Status of one replay job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayStatus {
    pub id: ReplayId,
    pub state: ReplayState,
    pub path_uri: String,
    pub send_rate: u64,
    pub files: Vec<FileStatus>,
    pub last_updated: Timestamp,
    pub replay_unfinished_files: bool,
}

impl ReplayStatus {
    /// Create a job in CREATED state with every file QUEUED
    pub fn new(
        id: ReplayId,
        path_uri: impl Into<String>,
        send_rate: u64,
        files: Vec<String>,
        replay_unfinished_files: bool,
    ) -> Self {
        Self {
            id,
            state: ReplayState::Created,
            path_uri: path_uri.into(),
            send_rate,
            files: files.into_iter().map(FileStatus::queued).collect(),
            last_updated: Timestamp::now(),
            replay_unfinished_files,
        }
    }

    /// Move to `state` and bump `last_updated`
    pub fn transition(&mut self, state: ReplayState) {
        self.state = state;
        self.touch();
    }

    pub fn touch(&mut self) {
        self.last_updated = Timestamp::now();
    }

    pub fn has_running_files(&self) -> bool {
        self.files.iter().any(|f| f.state == FileState::Running)
    }

    pub fn all_files_terminal(&self) -> bool {
        self.files.iter().all(|f| f.state.is_terminal())
    }

    /// Indices of files that still need work, in dispatch order
    pub fn unfinished_files(&self) -> Vec<usize> {
        self.files
            .iter()
            .enumerate()
            .filter(|(_, f)| !f.state.is_terminal())
            .map(|(index, _)| index)
            .collect()
    }

    /// Recompute the job state from its files.
    ///
    /// A running job whose files are all terminal becomes FINISHED. Other
    /// states are left alone: STOPPED and CREATED are operator decisions.
    pub fn settle(&mut self) {
        if self.state == ReplayState::Running && self.all_files_terminal() {
            self.transition(ReplayState::Finished);
        }
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
