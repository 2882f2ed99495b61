//! # Remote Replay Commands
//!
//! Service instances share replay state only through the status store.
//! Stop and update must also reach workers running in other processes, so
//! the instance that accepts such a request broadcasts it as a
//! [`RemoteCommand`]; each peer applies it to its local workers through a
//! [`RemoteCommandHandler`].

use super::scheduler::ReplayScheduler;
use super::ReplayError;
use crate::ReplayId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// Path peers accept remote commands on
pub const REMOTE_COMMAND_PATH: &str = "v1/replay/remote";

/// A replay control command sent between instances
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteCommand {
    Update {
        id: String,
        #[serde(rename = "sendRate")]
        send_rate: i64,
    },
    UpdateAll {
        #[serde(rename = "sendRate")]
        send_rate: i64,
    },
    Stop {
        id: String,
    },
    StopAll,
}

/// Errors delivering a remote command
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("Failed to deliver remote command to {peer}: {message}")]
    Delivery { peer: String, message: String },

    #[error("Invalid peer address {address}: {message}")]
    InvalidPeer { address: String, message: String },
}

/// Delivers commands to peer instances
#[async_trait]
pub trait RemoteCommandBus: Send + Sync {
    async fn broadcast(&self, command: &RemoteCommand) -> Result<(), RemoteError>;
}

/// Bus for a single instance deployment
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCommandBus;

#[async_trait]
impl RemoteCommandBus for NoopCommandBus {
    async fn broadcast(&self, _command: &RemoteCommand) -> Result<(), RemoteError> {
        Ok(())
    }
}

/// Posts each command as JSON to every configured peer
pub struct HttpCommandBus {
    client: reqwest::Client,
    endpoints: Vec<Url>,
}

impl HttpCommandBus {
    pub fn new(peers: &[String], timeout: Duration) -> Result<Self, RemoteError> {
        let endpoints = peers
            .iter()
            .map(|peer| {
                let base = if peer.ends_with('/') {
                    peer.clone()
                } else {
                    format!("{}/", peer)
                };
                Url::parse(&base)
                    .and_then(|url| url.join(REMOTE_COMMAND_PATH))
                    .map_err(|e| RemoteError::InvalidPeer {
                        address: peer.clone(),
                        message: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::InvalidPeer {
                address: peers.join(","),
                message: e.to_string(),
            })?;

        Ok(Self { client, endpoints })
    }

    pub fn endpoints(&self) -> &[Url] {
        &self.endpoints
    }
}

#[async_trait]
impl RemoteCommandBus for HttpCommandBus {
    async fn broadcast(&self, command: &RemoteCommand) -> Result<(), RemoteError> {
        let mut first_error = None;

        for endpoint in &self.endpoints {
            let result = self
                .client
                .post(endpoint.clone())
                .json(command)
                .send()
                .await
                .and_then(|response| response.error_for_status());

            match result {
                Ok(_) => debug!(peer = %endpoint, "Delivered remote replay command"),
                Err(e) => {
                    warn!(peer = %endpoint, error = %e, "Failed to deliver remote replay command");
                    first_error.get_or_insert(RemoteError::Delivery {
                        peer: endpoint.to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// In-process bus backed by a tokio broadcast channel
#[derive(Debug, Clone)]
pub struct BroadcastCommandBus {
    sender: broadcast::Sender<RemoteCommand>,
}

impl BroadcastCommandBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RemoteCommand> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl RemoteCommandBus for BroadcastCommandBus {
    async fn broadcast(&self, command: &RemoteCommand) -> Result<(), RemoteError> {
        // No subscribers is not an error; there is simply nobody to tell.
        let _ = self.sender.send(command.clone());
        Ok(())
    }
}

/// Applies commands received from peers to this instance's workers
#[derive(Clone)]
pub struct RemoteCommandHandler {
    scheduler: Arc<ReplayScheduler>,
}

impl RemoteCommandHandler {
    pub fn new(scheduler: Arc<ReplayScheduler>) -> Self {
        Self { scheduler }
    }

    pub async fn handle(&self, command: RemoteCommand) -> Result<(), ReplayError> {
        info!(command = ?command, "Handling remote replay command");
        match command {
            RemoteCommand::Update { id, send_rate } => {
                let id = parse_id(&id)?;
                self.scheduler.update_local(&id, send_rate).await
            }
            RemoteCommand::UpdateAll { send_rate } => {
                let outcome = self.scheduler.update_all_local(send_rate).await?;
                debug!(updated = outcome.succeeded.len(), skipped = outcome.failed.len(), "Applied remote update to all replays");
                Ok(())
            }
            RemoteCommand::Stop { id } => {
                let id = parse_id(&id)?;
                if !self.scheduler.is_local(&id) {
                    debug!(replay_id = %id, "No local workers to stop");
                    return Ok(());
                }
                self.scheduler.stop_local(&id).await
            }
            RemoteCommand::StopAll => {
                let outcome = self.scheduler.stop_all_local().await?;
                debug!(stopped = outcome.succeeded.len(), "Applied remote stop to all local replays");
                Ok(())
            }
        }
    }

    /// Apply commands from an in-process bus until `cancel` fires
    pub async fn listen(
        self,
        mut receiver: broadcast::Receiver<RemoteCommand>,
        cancel: CancellationToken,
    ) {
        loop {
            let command = tokio::select! {
                _ = cancel.cancelled() => break,
                received = receiver.recv() => match received {
                    Ok(command) => command,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "Remote command listener lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            };

            if let Err(e) = self.handle(command).await {
                warn!(error = %e, "Remote replay command failed");
            }
        }
    }
}

fn parse_id(id: &str) -> Result<ReplayId, ReplayError> {
    id.parse().map_err(|_| ReplayError::NotFound { id: id.to_string() })
}

#[cfg(test)]
#[path = "remote_tests.rs"]
mod tests;
