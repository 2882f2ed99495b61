//! Per-file replay worker.
//!
//! A worker waits for a pool slot, marks its file RUNNING, then streams the
//! file line by line into the publisher. Counters are flushed to the store
//! every `flush_interval_lines` lines and on every state change. Stopping
//! is cooperative and checked between lines.

use super::pacer::Pacer;
use super::source;
use super::status::{FileState, FileStatus, ReplayState};
use super::{PublishFailurePolicy, ReplayConfig, ReplayError};
use crate::audit::AuditParameters;
use crate::publish::RecordPublisher;
use crate::status_store::{mutate, StatusStore, StoreError};
use crate::ReplayId;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How a worker ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkerExit {
    Finished,
    Failed,
    Stopped,
    /// The job vanished or was no longer running when the worker got a slot
    Abandoned,
}

enum Dispatch {
    Ready(PathBuf, Progress),
    Unavailable(PathBuf, Progress),
    Skipped,
    /// The store refused the dispatch and the job was suspended
    Deferred,
}

enum StreamEnd {
    Eof,
    Aborted,
    ReadError,
    Stopped,
    Vanished,
}

enum Flush {
    Continue,
    Halted,
    Vanished,
}

/// Counters owned by the worker between flushes
#[derive(Debug, Clone, Default)]
struct Progress {
    lines_read: u64,
    audits_sent: u64,
    audits_failed: u64,
    parse_failures: u64,
    encountered_error: bool,
}

impl Progress {
    fn from_status(file: &FileStatus) -> Self {
        Self {
            lines_read: file.lines_read,
            audits_sent: file.audits_sent,
            audits_failed: file.audits_failed,
            parse_failures: file.parse_failures,
            encountered_error: file.encountered_error,
        }
    }

    fn apply(&self, file: &mut FileStatus) {
        file.lines_read = self.lines_read;
        file.audits_sent = self.audits_sent;
        file.audits_failed = self.audits_failed;
        file.parse_failures = self.parse_failures;
        file.encountered_error |= self.encountered_error;
    }
}

pub(crate) struct FileWorker {
    pub id: ReplayId,
    pub index: usize,
    pub store: Arc<dyn StatusStore>,
    pub publisher: Arc<dyn RecordPublisher>,
    pub pacer: Arc<Pacer>,
    pub config: Arc<ReplayConfig>,
    pub cancel: CancellationToken,
}

impl FileWorker {
    pub async fn run(self, slots: Arc<Semaphore>) -> WorkerExit {
        let _permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return WorkerExit::Stopped,
            permit = slots.acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return WorkerExit::Abandoned,
            },
        };

        let (path, mut progress) = match self.dispatch().await {
            Dispatch::Ready(path, progress) => (path, progress),
            Dispatch::Unavailable(path, progress) => {
                return self.complete(path, progress, FileState::Failed).await
            }
            Dispatch::Skipped => return WorkerExit::Abandoned,
            Dispatch::Deferred => return WorkerExit::Stopped,
        };

        let file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) => {
                warn!(replay_id = %self.id, file = %path.display(), error = %e, "Unable to open replay file");
                progress.encountered_error = true;
                return self.complete(path, progress, FileState::Failed).await;
            }
        };

        match self.stream(file, &mut progress).await {
            StreamEnd::Eof => {
                let nothing_delivered = progress.audits_sent == 0 && progress.audits_failed > 0;
                let state = if nothing_delivered {
                    FileState::Failed
                } else {
                    FileState::Finished
                };
                self.complete(path, progress, state).await
            }
            StreamEnd::Aborted | StreamEnd::ReadError => {
                self.complete(path, progress, FileState::Failed).await
            }
            StreamEnd::Stopped => {
                self.flush(&progress).await;
                info!(
                    replay_id = %self.id,
                    file = %path.display(),
                    lines_read = progress.lines_read,
                    "Replay file paused"
                );
                WorkerExit::Stopped
            }
            StreamEnd::Vanished => WorkerExit::Abandoned,
        }
    }

    async fn dispatch(&self) -> Dispatch {
        let current = match self.store.get(&self.id).await {
            Ok(Some(current)) => current.value,
            Ok(None) => return Dispatch::Skipped,
            Err(e) => {
                error!(replay_id = %self.id, error = %e, "Unable to read replay status for dispatch");
                return Dispatch::Skipped;
            }
        };

        if current.state != ReplayState::Running {
            return Dispatch::Skipped;
        }
        let Some(file) = current.files.get(self.index) else {
            return Dispatch::Skipped;
        };
        if file.state.is_terminal() {
            return Dispatch::Skipped;
        }

        let original = PathBuf::from(&file.path_uri);
        let progress = Progress::from_status(file);
        let running = match source::mark(&original, FileState::Running).await {
            Ok(running) => running,
            Err(e) => {
                warn!(replay_id = %self.id, file = %original.display(), error = %e, "Unable to mark replay file running");
                let mut progress = progress;
                progress.encountered_error = true;
                return Dispatch::Unavailable(original, progress);
            }
        };

        let index = self.index;
        let id = self.id;
        let running_uri = running.display().to_string();
        let dispatched = mutate(self.store.as_ref(), &self.id, |status| {
            if status.state != ReplayState::Running {
                return Err(ReplayError::InvalidState {
                    action: "dispatch",
                    id: id.to_string(),
                    state: status.state,
                });
            }
            if let Some(file) = status.files.get_mut(index) {
                file.state = FileState::Running;
                file.path_uri = running_uri.clone();
            }
            status.touch();
            Ok(())
        })
        .await;

        match dispatched {
            Ok(Some(_)) => {
                info!(replay_id = %self.id, file = %running.display(), "Replay file dispatched");
                Dispatch::Ready(running, progress)
            }
            Err(ReplayError::Store(e)) => {
                error!(replay_id = %self.id, file = %running.display(), error = %e, "Unable to record replay file dispatch");
                self.restore_path(&running, &original).await;
                self.suspend().await;
                Dispatch::Deferred
            }
            Ok(None) | Err(_) => {
                self.restore_path(&running, &original).await;
                Dispatch::Skipped
            }
        }
    }

    /// Rename the file back to the path the store still records for it
    async fn restore_path(&self, path: &Path, recorded: &Path) {
        if path == recorded {
            return;
        }
        if let Err(e) = fs::rename(path, recorded).await {
            warn!(replay_id = %self.id, file = %path.display(), error = %e, "Unable to restore replay file marker");
        }
    }

    /// Move a RUNNING job to STOPPED so it can be resumed
    async fn suspend(&self) {
        let result = mutate(self.store.as_ref(), &self.id, |status| {
            if status.state == ReplayState::Running {
                status.transition(ReplayState::Stopped);
            }
            Ok::<(), StoreError>(())
        })
        .await;

        match result {
            Ok(_) => warn!(replay_id = %self.id, "Audit replay stopped after a failed dispatch"),
            Err(e) => error!(replay_id = %self.id, error = %e, "Unable to stop audit replay after a failed dispatch"),
        }
    }

    async fn stream(&self, file: fs::File, progress: &mut Progress) -> StreamEnd {
        let mut reader = BufReader::new(file);
        let mut buf = Vec::new();
        let mut already_read = progress.lines_read;
        let mut since_flush = 0u64;

        loop {
            if self.cancel.is_cancelled() {
                return StreamEnd::Stopped;
            }

            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => return StreamEnd::Eof,
                Ok(_) => {}
                Err(e) => {
                    warn!(replay_id = %self.id, error = %e, "Failed reading replay file");
                    progress.encountered_error = true;
                    return StreamEnd::ReadError;
                }
            }

            let line = decode_line(&buf);
            if matches!(&line, Ok(text) if text.trim().is_empty()) {
                continue;
            }
            if already_read > 0 {
                already_read -= 1;
                continue;
            }

            match line.and_then(|text| parse_record(&text)) {
                Err(e) => {
                    debug!(replay_id = %self.id, line = progress.lines_read + 1, error = %e, "Unparsable replay line");
                    progress.lines_read += 1;
                    progress.parse_failures += 1;
                    progress.encountered_error = true;
                }
                Ok(parameters) => {
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return StreamEnd::Stopped,
                        _ = self.pacer.acquire() => {}
                    }

                    progress.lines_read += 1;
                    match self.publisher.publish(&parameters).await {
                        Ok(()) => progress.audits_sent += 1,
                        Err(e) => {
                            progress.audits_failed += 1;
                            progress.encountered_error = true;
                            warn!(
                                replay_id = %self.id,
                                audit_id = %parameters.audit_id,
                                error = %e,
                                "Failed to publish replayed audit"
                            );
                            if self.config.publish_failure_policy == PublishFailurePolicy::Abort {
                                return StreamEnd::Aborted;
                            }
                        }
                    }
                }
            }

            since_flush += 1;
            if since_flush >= self.config.flush_interval_lines {
                since_flush = 0;
                match self.flush(progress).await {
                    Flush::Continue => {}
                    Flush::Halted => return StreamEnd::Stopped,
                    Flush::Vanished => return StreamEnd::Vanished,
                }
            }
        }
    }

    /// Persist counters and pick up the job's current rate and state
    async fn flush(&self, progress: &Progress) -> Flush {
        let index = self.index;
        let result = mutate(self.store.as_ref(), &self.id, |status| {
            if let Some(file) = status.files.get_mut(index) {
                progress.apply(file);
            }
            status.touch();
            Ok::<(), StoreError>(())
        })
        .await;

        match result {
            Ok(Some(status)) => {
                self.pacer.set_rate(status.send_rate);
                if status.state == ReplayState::Running {
                    Flush::Continue
                } else {
                    Flush::Halted
                }
            }
            Ok(None) => Flush::Vanished,
            Err(e) => {
                error!(replay_id = %self.id, error = %e, "Failed to persist replay progress");
                Flush::Continue
            }
        }
    }

    async fn complete(&self, path: PathBuf, progress: Progress, state: FileState) -> WorkerExit {
        let final_path = match source::mark(&path, state).await {
            Ok(final_path) => final_path,
            Err(e) => {
                warn!(replay_id = %self.id, file = %path.display(), error = %e, "Unable to mark replay file");
                path
            }
        };

        let index = self.index;
        let final_uri = final_path.display().to_string();
        let result = mutate(self.store.as_ref(), &self.id, |status| {
            if let Some(file) = status.files.get_mut(index) {
                progress.apply(file);
                file.state = state;
                file.path_uri = final_uri.clone();
            }
            status.touch();
            status.settle();
            Ok::<(), StoreError>(())
        })
        .await;

        match result {
            Ok(Some(status)) => info!(
                replay_id = %self.id,
                file = %final_path.display(),
                state = %state,
                job_state = %status.state,
                lines_read = progress.lines_read,
                audits_sent = progress.audits_sent,
                audits_failed = progress.audits_failed,
                parse_failures = progress.parse_failures,
                "Replay file completed"
            ),
            Ok(None) => warn!(replay_id = %self.id, "Replay removed before file completed"),
            Err(e) => error!(replay_id = %self.id, error = %e, "Failed to persist replay file completion"),
        }

        match state {
            FileState::Finished => WorkerExit::Finished,
            _ => WorkerExit::Failed,
        }
    }
}

/// Strip the line terminator and decode the line as UTF-8
fn decode_line(raw: &[u8]) -> Result<String, String> {
    let trimmed = raw.strip_suffix(b"\n").unwrap_or(raw);
    let trimmed = trimmed.strip_suffix(b"\r").unwrap_or(trimmed);
    String::from_utf8(trimmed.to_vec()).map_err(|e| e.to_string())
}

/// Parse one line of an audit file into validated parameters.
///
/// Lines are JSON objects of string values as written by the file sink.
/// Scalar values are accepted as their string form and arrays are joined
/// with `,`.
pub(crate) fn parse_record(line: &str) -> Result<AuditParameters, String> {
    let raw: HashMap<String, serde_json::Value> =
        serde_json::from_str(line).map_err(|e| e.to_string())?;

    let map = raw
        .into_iter()
        .filter_map(|(key, value)| {
            let value = match value {
                serde_json::Value::Null => return None,
                serde_json::Value::String(s) => s,
                serde_json::Value::Array(items) => items
                    .iter()
                    .map(|item| match item {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(","),
                other => other.to_string(),
            };
            Some((key, value))
        })
        .collect();

    AuditParameters::from_map(&map).map_err(|e| e.to_string())
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
