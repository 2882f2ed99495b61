//! Message transports.

use super::{MessageTransport, PendingConfirms, PublishError};
use crate::audit::AuditMessage;
use crate::broker::ManagementApiClient;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;

// ============================================================================
// In-Memory Transport
// ============================================================================

/// Transport that keeps messages in memory.
///
/// Optionally acknowledges every message through a [`PendingConfirms`]
/// registry and forwards a copy to a consumer channel, which makes it a
/// complete single-process broker for tests and local runs.
#[derive(Debug, Clone)]
pub struct InMemoryTransport {
    messages: Arc<Mutex<Vec<AuditMessage>>>,
    available: Arc<AtomicBool>,
    confirms: Option<PendingConfirms>,
    forward: Option<mpsc::UnboundedSender<AuditMessage>>,
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self {
            messages: Arc::new(Mutex::new(Vec::new())),
            available: Arc::new(AtomicBool::new(true)),
            confirms: None,
            forward: None,
        }
    }

    /// Acknowledge each message as soon as it is stored
    pub fn with_auto_confirm(mut self, confirms: PendingConfirms) -> Self {
        self.confirms = Some(confirms);
        self
    }

    /// Forward a copy of each message to `sender`
    pub fn with_forwarding(mut self, sender: mpsc::UnboundedSender<AuditMessage>) -> Self {
        self.forward = Some(sender);
        self
    }

    /// Simulate the broker going away
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Messages sent so far
    pub fn messages(&self) -> Vec<AuditMessage> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<AuditMessage>> {
        self.messages.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl MessageTransport for InMemoryTransport {
    async fn send(&self, message: &AuditMessage) -> Result<(), PublishError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(PublishError::Transport {
                message: "in-memory transport is unavailable".to_string(),
            });
        }

        self.lock().push(message.clone());

        if let Some(forward) = &self.forward {
            if forward.send(message.clone()).is_err() {
                debug!("Audit message consumer has gone away");
            }
        }

        if let (Some(confirms), Some(id)) = (&self.confirms, message.correlation_id()) {
            confirms.confirm(id);
        }

        Ok(())
    }
}

// ============================================================================
// Management API Transport
// ============================================================================

/// Publishes through the broker management HTTP API.
///
/// The API reports whether the message was routed; a routed message is
/// treated as acknowledged.
#[derive(Debug, Clone)]
pub struct ManagementApiTransport {
    client: ManagementApiClient,
    exchange: String,
    routing_key: String,
    confirms: Option<PendingConfirms>,
}

impl ManagementApiTransport {
    pub fn new(
        client: ManagementApiClient,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            confirms: None,
        }
    }

    /// Resolve confirmations in `confirms` when the broker routes a message
    pub fn with_confirms(mut self, confirms: PendingConfirms) -> Self {
        self.confirms = Some(confirms);
        self
    }
}

#[async_trait]
impl MessageTransport for ManagementApiTransport {
    async fn send(&self, message: &AuditMessage) -> Result<(), PublishError> {
        let payload =
            serde_json::to_string(message).map_err(|e| PublishError::Serialization {
                message: e.to_string(),
            })?;
        let correlation_id = message.correlation_id();

        let routed = self
            .client
            .publish(&self.exchange, &self.routing_key, &payload, correlation_id)
            .await
            .map_err(|e| PublishError::Transport {
                message: e.to_string(),
            })?;

        let audit_id = correlation_id.unwrap_or_default().to_string();
        if !routed {
            if let Some(confirms) = &self.confirms {
                confirms.reject(&audit_id);
            }
            return Err(PublishError::NotRouted { audit_id });
        }

        if let Some(confirms) = &self.confirms {
            confirms.confirm(&audit_id);
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "transport_tests.rs"]
mod tests;
