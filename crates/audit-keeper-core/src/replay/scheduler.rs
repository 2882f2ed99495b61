//! # Replay Scheduler
//!
//! Owns the lifecycle of replay jobs. The [`StatusStore`] is the source of
//! truth; the scheduler additionally keeps a process-local registry of the
//! jobs whose workers run in this instance, with the cancellation token and
//! pacer needed to control them.
//!
//! Control operations on one job are serialized by the store's advisory
//! lock where available and always by version compare-and-swap.

use super::pacer::Pacer;
use super::remote::{NoopCommandBus, RemoteCommand, RemoteCommandBus};
use super::source;
use super::status::{FileState, ReplayState, ReplayStatus};
use super::worker::{FileWorker, WorkerExit};
use super::{validate_send_rate, BulkOutcome, CreateReplay, ReplayConfig, ReplayError};
use crate::publish::RecordPublisher;
use crate::status_store::{mutate, StatusLock, StatusStore, StoreError};
use crate::ReplayId;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Live handles for a job whose workers run in this process
struct RunningReplay {
    generation: u64,
    cancel: CancellationToken,
    pacer: Arc<Pacer>,
    supervisor: JoinHandle<()>,
}

/// Replay job lifecycle manager
pub struct ReplayScheduler {
    store: Arc<dyn StatusStore>,
    publisher: Arc<dyn RecordPublisher>,
    config: Arc<ReplayConfig>,
    slots: Arc<Semaphore>,
    registry: Arc<DashMap<ReplayId, RunningReplay>>,
    generations: AtomicU64,
    bus: Arc<dyn RemoteCommandBus>,
}

impl ReplayScheduler {
    pub fn new(
        store: Arc<dyn StatusStore>,
        publisher: Arc<dyn RecordPublisher>,
        config: ReplayConfig,
    ) -> Self {
        let slots = Arc::new(Semaphore::new(config.worker_pool_size.max(1)));
        Self {
            store,
            publisher,
            config: Arc::new(config),
            slots,
            registry: Arc::new(DashMap::new()),
            generations: AtomicU64::new(0),
            bus: Arc::new(NoopCommandBus),
        }
    }

    /// Broadcast stop and update commands to peer instances through `bus`
    pub fn with_command_bus(mut self, bus: Arc<dyn RemoteCommandBus>) -> Self {
        self.bus = bus;
        self
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    /// Whether this instance runs workers for `id`
    pub fn is_local(&self, id: &ReplayId) -> bool {
        self.registry.contains_key(id)
    }

    /// Number of jobs with workers in this instance
    pub fn local_jobs(&self) -> usize {
        self.registry.len()
    }

    // ========================================================================
    // Single-job operations
    // ========================================================================

    /// Create a job in CREATED state, marking its files queued
    #[instrument(skip(self), fields(path_uri = %request.path_uri))]
    pub async fn create(&self, request: CreateReplay) -> Result<ReplayId, ReplayError> {
        let send_rate = validate_send_rate(request.send_rate)?;
        let resolved =
            source::resolve(&request.path_uri, request.replay_unfinished_files).await?;

        let mut queued: Vec<PathBuf> = Vec::with_capacity(resolved.len());
        for path in &resolved {
            match source::mark(path, FileState::Queued).await {
                Ok(marked) => queued.push(marked),
                Err(e) => {
                    unmark_all(&queued).await;
                    return Err(ReplayError::Source {
                        path: path.display().to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        let id = ReplayId::new();
        let files = queued.iter().map(|p| p.display().to_string()).collect();
        let status = ReplayStatus::new(
            id,
            request.path_uri.clone(),
            send_rate,
            files,
            request.replay_unfinished_files,
        );

        if let Err(e) = self.store.insert(status).await {
            unmark_all(&queued).await;
            return Err(e.into());
        }

        info!(replay_id = %id, files = queued.len(), send_rate, "Created audit replay");
        Ok(id)
    }

    /// Create a job and start it straight away
    pub async fn create_and_start(&self, request: CreateReplay) -> Result<ReplayId, ReplayError> {
        let id = self.create(request).await?;
        self.start(&id).await?;
        Ok(id)
    }

    /// Start a CREATED job, or a STOPPED job that has no paused files
    #[instrument(skip(self))]
    pub async fn start(&self, id: &ReplayId) -> Result<(), ReplayError> {
        let _guard = self.guard(id).await?;
        let current = self.load(id).await?;

        let startable = match current.state {
            ReplayState::Created => true,
            ReplayState::Stopped => !current.has_running_files(),
            _ => false,
        };
        if !startable || self.is_local(id) {
            return Err(ReplayError::NotStartable {
                id: id.to_string(),
                state: current.state,
            });
        }

        self.launch(id, current.state, "start").await
    }

    /// Pause every running file of a RUNNING job
    #[instrument(skip(self))]
    pub async fn stop(&self, id: &ReplayId) -> Result<(), ReplayError> {
        {
            let _guard = self.guard(id).await?;
            let current = self.load(id).await?;
            if current.state != ReplayState::Running {
                return Err(ReplayError::InvalidState {
                    action: "stop",
                    id: id.to_string(),
                    state: current.state,
                });
            }
            self.halt(id).await?;
        }

        self.broadcast(RemoteCommand::Stop { id: id.to_string() })
            .await;
        Ok(())
    }

    /// Change the send rate of a job that has not finished
    #[instrument(skip(self))]
    pub async fn update(&self, id: &ReplayId, send_rate: i64) -> Result<(), ReplayError> {
        let rate = validate_send_rate(send_rate)?;
        {
            let _guard = self.guard(id).await?;
            self.apply_rate(id, rate).await?;
        }

        self.broadcast(RemoteCommand::Update {
            id: id.to_string(),
            send_rate,
        })
        .await;
        Ok(())
    }

    /// Continue a STOPPED job from where each file left off
    #[instrument(skip(self))]
    pub async fn resume(&self, id: &ReplayId) -> Result<(), ReplayError> {
        let _guard = self.guard(id).await?;
        let current = self.load(id).await?;
        if current.state != ReplayState::Stopped || self.is_local(id) {
            return Err(ReplayError::InvalidState {
                action: "resume",
                id: id.to_string(),
                state: current.state,
            });
        }

        self.launch(id, ReplayState::Stopped, "resume").await
    }

    /// Remove a job that has no running files
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &ReplayId) -> Result<(), ReplayError> {
        let _guard = self.guard(id).await?;
        let current = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| not_found(id))?;

        if current.value.state == ReplayState::Running || current.value.has_running_files() {
            return Err(ReplayError::InvalidState {
                action: "delete",
                id: id.to_string(),
                state: current.value.state,
            });
        }

        if let Some((_, running)) = self.registry.remove(id) {
            running.cancel.cancel();
            running.supervisor.abort();
        }

        match self.store.remove(id, current.version).await {
            Ok(()) => {}
            Err(StoreError::NotFound { .. }) => return Err(not_found(id)),
            Err(e) => return Err(e.into()),
        }

        for file in &current.value.files {
            if file.state == FileState::Queued {
                if let Err(e) = source::unmark(Path::new(&file.path_uri)).await {
                    warn!(replay_id = %id, file = %file.path_uri, error = %e, "Unable to restore queued replay file");
                }
            }
        }

        info!(replay_id = %id, "Deleted audit replay");
        Ok(())
    }

    /// Current status of one job
    pub async fn status(&self, id: &ReplayId) -> Result<ReplayStatus, ReplayError> {
        self.load(id).await
    }

    // ========================================================================
    // Bulk operations
    // ========================================================================

    pub async fn start_all(&self) -> Result<BulkOutcome, ReplayError> {
        let mut outcome = BulkOutcome::default();
        for id in self.ids().await? {
            outcome.record(&id, self.start(&id).await);
        }
        Ok(outcome)
    }

    pub async fn stop_all(&self) -> Result<BulkOutcome, ReplayError> {
        let mut outcome = BulkOutcome::default();
        for id in self.ids().await? {
            let result = self.stop_local(&id).await;
            outcome.record(&id, result);
        }
        self.broadcast(RemoteCommand::StopAll).await;
        Ok(outcome)
    }

    pub async fn update_all(&self, send_rate: i64) -> Result<BulkOutcome, ReplayError> {
        let rate = validate_send_rate(send_rate)?;
        let mut outcome = BulkOutcome::default();
        for id in self.ids().await? {
            let result = match self.guard(&id).await {
                Ok(_guard) => self.apply_rate(&id, rate).await,
                Err(e) => Err(e),
            };
            outcome.record(&id, result);
        }
        self.broadcast(RemoteCommand::UpdateAll { send_rate }).await;
        Ok(outcome)
    }

    pub async fn resume_all(&self) -> Result<BulkOutcome, ReplayError> {
        let mut outcome = BulkOutcome::default();
        for id in self.ids().await? {
            outcome.record(&id, self.resume(&id).await);
        }
        Ok(outcome)
    }

    pub async fn delete_all(&self) -> Result<BulkOutcome, ReplayError> {
        let mut outcome = BulkOutcome::default();
        for id in self.ids().await? {
            outcome.record(&id, self.delete(&id).await);
        }
        Ok(outcome)
    }

    pub async fn status_all(&self) -> Result<Vec<ReplayStatus>, ReplayError> {
        Ok(self
            .store
            .list()
            .await?
            .into_iter()
            .map(|record| record.value)
            .collect())
    }

    // ========================================================================
    // Commands from peer instances
    // ========================================================================

    /// Stop local workers for a job another instance stopped
    pub async fn stop_local(&self, id: &ReplayId) -> Result<(), ReplayError> {
        let _guard = self.guard(id).await?;
        let current = self.load(id).await?;
        let owned_here = self.is_local(id);
        if current.state.is_terminal() || (current.state != ReplayState::Running && !owned_here) {
            return Err(ReplayError::InvalidState {
                action: "stop",
                id: id.to_string(),
                state: current.state,
            });
        }
        self.halt(id).await
    }

    /// Apply a rate another instance set, without re-broadcasting it
    pub async fn update_local(&self, id: &ReplayId, send_rate: i64) -> Result<(), ReplayError> {
        let rate = validate_send_rate(send_rate)?;
        let _guard = self.guard(id).await?;
        self.apply_rate(id, rate).await
    }

    /// Apply a rate to every job another instance updated
    pub async fn update_all_local(&self, send_rate: i64) -> Result<BulkOutcome, ReplayError> {
        let rate = validate_send_rate(send_rate)?;
        let mut outcome = BulkOutcome::default();
        for id in self.ids().await? {
            let result = match self.guard(&id).await {
                Ok(_guard) => self.apply_rate(&id, rate).await,
                Err(e) => Err(e),
            };
            outcome.record(&id, result);
        }
        Ok(outcome)
    }

    /// Stop every job with local workers
    pub async fn stop_all_local(&self) -> Result<BulkOutcome, ReplayError> {
        let mut outcome = BulkOutcome::default();
        let local: Vec<ReplayId> = self.registry.iter().map(|entry| *entry.key()).collect();
        for id in local {
            outcome.record(&id, self.stop_local(&id).await);
        }
        Ok(outcome)
    }

    // ========================================================================
    // Housekeeping
    // ========================================================================

    /// Delete FINISHED jobs untouched for longer than the idle timeout
    pub async fn evict_idle(&self) -> Result<usize, ReplayError> {
        let mut evicted = 0;
        for record in self.store.list().await? {
            let status = &record.value;
            if status.state != ReplayState::Finished
                || status.last_updated.elapsed() <= self.config.idle_timeout
            {
                continue;
            }

            let _guard = self.guard(&status.id).await?;
            match self.store.remove(&status.id, record.version).await {
                Ok(()) => {
                    evicted += 1;
                    info!(replay_id = %status.id, "Evicted idle audit replay");
                }
                Err(StoreError::NotFound { .. }) | Err(StoreError::VersionConflict { .. }) => {
                    debug!(replay_id = %status.id, "Idle replay changed before eviction");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(evicted)
    }

    /// Mark RUNNING jobs that nobody is updating as STOPPED
    pub async fn sweep_stale_runs(&self) -> Result<usize, ReplayError> {
        let timeout = self.config.stale_run_timeout;
        let mut swept = 0;
        for record in self.store.list().await? {
            let id = record.value.id;
            if record.value.state != ReplayState::Running
                || self.is_local(&id)
                || record.value.last_updated.elapsed() <= timeout
            {
                continue;
            }

            let _guard = self.guard(&id).await?;
            let registry = self.registry.clone();
            let stopped = mutate(self.store.as_ref(), &id, |status| {
                if status.state == ReplayState::Running
                    && !registry.contains_key(&id)
                    && status.last_updated.elapsed() > timeout
                {
                    status.transition(ReplayState::Stopped);
                }
                Ok::<(), StoreError>(())
            })
            .await?;

            if matches!(stopped, Some(ref s) if s.state == ReplayState::Stopped) {
                swept += 1;
                warn!(replay_id = %id, "Marked stale audit replay as stopped");
            }
        }
        Ok(swept)
    }

    /// Present every RUNNING job found at startup as STOPPED
    pub async fn recover_on_startup(&self) -> Result<usize, ReplayError> {
        let mut recovered = 0;
        for record in self.store.list().await? {
            let id = record.value.id;
            if record.value.state != ReplayState::Running || self.is_local(&id) {
                continue;
            }

            let updated = mutate(self.store.as_ref(), &id, |status| {
                if status.state == ReplayState::Running {
                    status.transition(ReplayState::Stopped);
                }
                Ok::<(), StoreError>(())
            })
            .await?;

            if updated.is_some() {
                recovered += 1;
                info!(replay_id = %id, "Audit replay interrupted by restart, marked stopped");
            }
        }
        Ok(recovered)
    }

    /// Stop every local job, waiting for workers to persist their progress
    pub async fn shutdown(&self) {
        let local: Vec<ReplayId> = self.registry.iter().map(|entry| *entry.key()).collect();
        for id in local {
            if let Err(e) = self.halt(&id).await {
                error!(replay_id = %id, error = %e, "Failed to stop audit replay on shutdown");
            }
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn guard(&self, id: &ReplayId) -> Result<Option<StatusLock>, ReplayError> {
        Ok(self.store.lock(id).await?)
    }

    async fn load(&self, id: &ReplayId) -> Result<ReplayStatus, ReplayError> {
        self.store
            .get(id)
            .await?
            .map(|record| record.value)
            .ok_or_else(|| not_found(id))
    }

    async fn ids(&self) -> Result<Vec<ReplayId>, ReplayError> {
        Ok(self
            .store
            .list()
            .await?
            .into_iter()
            .map(|record| record.value.id)
            .collect())
    }

    async fn apply_rate(&self, id: &ReplayId, rate: u64) -> Result<(), ReplayError> {
        let key = *id;
        let updated = mutate(self.store.as_ref(), id, |status| {
            if status.state.is_terminal() {
                return Err(ReplayError::InvalidState {
                    action: "update",
                    id: key.to_string(),
                    state: status.state,
                });
            }
            status.send_rate = rate;
            status.touch();
            Ok(())
        })
        .await?;

        if updated.is_none() {
            return Err(not_found(id));
        }
        if let Some(running) = self.registry.get(id) {
            running.pacer.set_rate(rate);
        }
        info!(replay_id = %id, send_rate = rate, "Updated audit replay send rate");
        Ok(())
    }

    /// Cancel local workers, wait for them to persist, then mark STOPPED
    async fn halt(&self, id: &ReplayId) -> Result<(), ReplayError> {
        if let Some((_, running)) = self.registry.remove(id) {
            running.cancel.cancel();
            if let Err(e) = running.supervisor.await {
                error!(replay_id = %id, error = %e, "Replay supervisor ended abnormally");
            }
        }

        let updated = mutate(self.store.as_ref(), id, |status| {
            if status.state == ReplayState::Running {
                status.transition(ReplayState::Stopped);
            }
            Ok::<(), StoreError>(())
        })
        .await?;

        match updated {
            Some(status) => {
                info!(replay_id = %id, state = %status.state, "Stopped audit replay");
                Ok(())
            }
            None => Err(not_found(id)),
        }
    }

    /// Move a job from `from` to RUNNING and hand its files to workers
    async fn launch(
        &self,
        id: &ReplayId,
        from: ReplayState,
        action: &'static str,
    ) -> Result<(), ReplayError> {
        let key = *id;
        let transitioned = mutate(self.store.as_ref(), id, |status| {
            if status.state != from {
                return Err(ReplayError::InvalidState {
                    action,
                    id: key.to_string(),
                    state: status.state,
                });
            }
            status.transition(ReplayState::Running);
            status.settle();
            Ok(())
        })
        .await;

        let status = match transitioned {
            Ok(Some(status)) => status,
            Ok(None) => return Err(not_found(id)),
            Err(ReplayError::Store(e)) => {
                error!(replay_id = %id, error = %e, "Unable to launch audit replay workers");
                self.mark_failed(id).await;
                return Err(ReplayError::Store(e));
            }
            Err(e) => return Err(e),
        };

        let pending = status.unfinished_files();
        if pending.is_empty() {
            info!(replay_id = %id, state = %status.state, "Audit replay has no files left to replay");
            return Ok(());
        }

        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let pacer = Arc::new(Pacer::new(status.send_rate));
        let (ready_tx, ready_rx) = oneshot::channel();

        let mut workers = Vec::with_capacity(pending.len());
        for index in pending {
            workers.push(FileWorker {
                id: *id,
                index,
                store: self.store.clone(),
                publisher: self.publisher.clone(),
                pacer: pacer.clone(),
                config: self.config.clone(),
                cancel: cancel.clone(),
            });
        }

        let supervisor = tokio::spawn(supervise(
            *id,
            generation,
            workers,
            self.slots.clone(),
            self.registry.clone(),
            ready_rx,
        ));

        self.registry.insert(
            *id,
            RunningReplay {
                generation,
                cancel,
                pacer,
                supervisor,
            },
        );
        let _ = ready_tx.send(());

        info!(replay_id = %id, action, "Audit replay running");
        Ok(())
    }

    async fn mark_failed(&self, id: &ReplayId) {
        let result = mutate(self.store.as_ref(), id, |status| {
            status.transition(ReplayState::Failed);
            Ok::<(), StoreError>(())
        })
        .await;
        if let Err(e) = result {
            error!(replay_id = %id, error = %e, "Unable to mark audit replay failed");
        }
    }

    async fn broadcast(&self, command: RemoteCommand) {
        if let Err(e) = self.bus.broadcast(&command).await {
            warn!(command = ?command, error = %e, "Failed to broadcast replay command");
        }
    }
}

/// Run every worker of a job and drop its registry entry once they finish
async fn supervise(
    id: ReplayId,
    generation: u64,
    workers: Vec<FileWorker>,
    slots: Arc<Semaphore>,
    registry: Arc<DashMap<ReplayId, RunningReplay>>,
    ready: oneshot::Receiver<()>,
) {
    let _ = ready.await;

    let mut set = JoinSet::new();
    for worker in workers {
        set.spawn(worker.run(slots.clone()));
    }

    let mut finished = 0usize;
    let mut failed = 0usize;
    while let Some(result) = set.join_next().await {
        match result {
            Ok(WorkerExit::Finished) => finished += 1,
            Ok(WorkerExit::Failed) => failed += 1,
            Ok(WorkerExit::Stopped) | Ok(WorkerExit::Abandoned) => {}
            Err(e) => error!(replay_id = %id, error = %e, "Replay worker panicked"),
        }
    }

    registry.remove_if(&id, |_, running| running.generation == generation);
    debug!(replay_id = %id, finished, failed, "Replay workers exited");
}

fn not_found(id: &ReplayId) -> ReplayError {
    ReplayError::NotFound { id: id.to_string() }
}

async fn unmark_all(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = source::unmark(path).await {
            warn!(file = %path.display(), error = %e, "Unable to restore replay file name");
        }
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
