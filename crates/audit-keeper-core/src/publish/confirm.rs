//! Correlation-id keyed registry of publishes awaiting a broker ack.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

type Entries = DashMap<String, (u64, oneshot::Sender<bool>)>;

/// Publishes awaiting acknowledgement, keyed by correlation id.
///
/// Cloning shares the registry.
#[derive(Debug, Clone, Default)]
pub struct PendingConfirms {
    entries: Arc<Entries>,
    next_token: Arc<AtomicU64>,
}

impl PendingConfirms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in the ack for `correlation_id`.
    ///
    /// A second registration for the same id replaces the first, whose waiter
    /// then resolves as abandoned.
    pub fn register(&self, correlation_id: &str) -> ConfirmWaiter {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();

        if self
            .entries
            .insert(correlation_id.to_string(), (token, sender))
            .is_some()
        {
            debug!(correlation_id = %correlation_id, "Replaced pending confirmation");
        }

        ConfirmWaiter {
            correlation_id: correlation_id.to_string(),
            token,
            receiver,
            entries: self.entries.clone(),
        }
    }

    /// Resolve the waiter for `correlation_id` as acknowledged
    pub fn confirm(&self, correlation_id: &str) -> bool {
        self.resolve(correlation_id, true)
    }

    /// Resolve the waiter for `correlation_id` as rejected
    pub fn reject(&self, correlation_id: &str) -> bool {
        self.resolve(correlation_id, false)
    }

    /// Number of publishes still waiting
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn resolve(&self, correlation_id: &str, acked: bool) -> bool {
        match self.entries.remove(correlation_id) {
            Some((_, (_, sender))) => sender.send(acked).is_ok(),
            None => {
                warn!(
                    correlation_id = %correlation_id,
                    "Unable to find pending confirmation for audit message"
                );
                false
            }
        }
    }
}

/// One registered wait; removes its registration when dropped
#[derive(Debug)]
pub struct ConfirmWaiter {
    correlation_id: String,
    token: u64,
    receiver: oneshot::Receiver<bool>,
    entries: Arc<Entries>,
}

impl ConfirmWaiter {
    /// Wait for the outcome: `Some(true)` acked, `Some(false)` rejected,
    /// `None` if the registration was replaced
    pub async fn wait(&mut self) -> Option<bool> {
        (&mut self.receiver).await.ok()
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }
}

impl Drop for ConfirmWaiter {
    fn drop(&mut self) {
        let token = self.token;
        self.entries
            .remove_if(&self.correlation_id, |_, (entry_token, _)| *entry_token == token);
    }
}

#[cfg(test)]
#[path = "confirm_tests.rs"]
mod tests;
