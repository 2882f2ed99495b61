//! # Audit File Replay
//!
//! Streams previously persisted audit files back into the broker at a
//! controlled rate.
//!
//! A replay job resolves its source once at creation into a fixed list of
//! files. Starting the job hands every unfinished file to a worker; workers
//! share a bounded pool of slots across all jobs and a per-job [`Pacer`]
//! that enforces the job's send rate. Progress is persisted in the
//! [`StatusStore`](crate::StatusStore), which is the only state shared
//! between service instances.
//!
//! ## File markers
//!
//! Each source file is renamed as its state changes, prefixing the base
//! name with `_QUEUED.`, `_RUNNING.`, `_FINISHED.` or `_FAILED.`, so the
//! progress of a replay is visible on disk.

use crate::status_store::StoreError;
use crate::ErrorCategory;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

pub mod pacer;
pub mod remote;
pub mod scheduler;
pub mod source;
pub mod status;
mod worker;

pub use pacer::Pacer;
pub use remote::{
    BroadcastCommandBus, HttpCommandBus, NoopCommandBus, RemoteCommand, RemoteCommandBus,
    RemoteCommandHandler, RemoteError,
};
pub use scheduler::ReplayScheduler;
pub use status::{FileState, FileStatus, ReplayState, ReplayStatus};

// ============================================================================
// Errors
// ============================================================================

/// Errors from replay control operations
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("No audit replay found with id {id}")]
    NotFound { id: String },

    #[error("Cannot start audit replay with state {state}")]
    NotStartable { id: String, state: ReplayState },

    #[error("Cannot {action} audit replay with id {id} in state {state}")]
    InvalidState {
        action: &'static str,
        id: String,
        state: ReplayState,
    },

    #[error("Send rate must be >= 0")]
    InvalidSendRate { send_rate: i64 },

    #[error("Unable to resolve replay source {path}: {message}")]
    Source { path: String, message: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ReplayError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            _ => false,
        }
    }

    pub fn error_category(&self) -> ErrorCategory {
        match self {
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::NotStartable { .. } | Self::InvalidState { .. } => ErrorCategory::Conflict,
            Self::InvalidSendRate { .. } | Self::Source { .. } => ErrorCategory::Permanent,
            Self::Store(_) => ErrorCategory::Transient,
        }
    }
}

/// Reject negative send rates
pub fn validate_send_rate(send_rate: i64) -> Result<u64, ReplayError> {
    u64::try_from(send_rate).map_err(|_| ReplayError::InvalidSendRate { send_rate })
}

// ============================================================================
// Configuration
// ============================================================================

/// What a worker does when a record cannot be published
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishFailurePolicy {
    /// Count the failure and continue with the next line
    #[default]
    Skip,
    /// Fail the file on the first publish failure
    Abort,
}

/// Replay scheduler settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Files replayed concurrently, across all jobs
    pub worker_pool_size: usize,

    /// Finished jobs older than this are deleted by the idle sweep
    #[serde(with = "crate::retry::duration_millis")]
    pub idle_timeout: Duration,

    /// Interval between idle and stale-run sweeps
    #[serde(with = "crate::retry::duration_millis")]
    pub sweep_interval: Duration,

    /// Lines processed between counter flushes
    pub flush_interval_lines: u64,

    pub publish_failure_policy: PublishFailurePolicy,

    /// RUNNING jobs with no local owner and no update for this long are
    /// marked STOPPED
    #[serde(with = "crate::retry::duration_millis")]
    pub stale_run_timeout: Duration,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 4,
            idle_timeout: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(60),
            flush_interval_lines: 100,
            publish_failure_policy: PublishFailurePolicy::Skip,
            stale_run_timeout: Duration::from_secs(600),
        }
    }
}

// ============================================================================
// Requests and outcomes
// ============================================================================

/// Request to create a replay job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReplay {
    pub path_uri: String,
    #[serde(default)]
    pub send_rate: i64,
    #[serde(default)]
    pub replay_unfinished_files: bool,
}

impl CreateReplay {
    pub fn new(path_uri: impl Into<String>, send_rate: i64) -> Self {
        Self {
            path_uri: path_uri.into(),
            send_rate,
            replay_unfinished_files: false,
        }
    }

    pub fn with_unfinished_files(mut self, replay_unfinished_files: bool) -> Self {
        self.replay_unfinished_files = replay_unfinished_files;
        self
    }
}

/// Per-job result of a bulk operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkOutcome {
    pub succeeded: Vec<String>,
    pub failed: BTreeMap<String, String>,
}

impl BulkOutcome {
    pub fn record(&mut self, id: &crate::ReplayId, result: Result<(), ReplayError>) {
        match result {
            Ok(()) => self.succeeded.push(id.to_string()),
            Err(e) => {
                self.failed.insert(id.to_string(), e.to_string());
            }
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
