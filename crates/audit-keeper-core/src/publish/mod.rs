//! # Publish Path
//!
//! Sends audit records to the broker and waits for the broker to acknowledge
//! them.
//!
//! A publish is gated on broker health, registers a waiter keyed by the
//! audit id, hands the message to a [`MessageTransport`], then waits a bounded
//! time for the acknowledgement. Each waiter removes its own registration when
//! dropped, so a timed-out publish never leaks an entry.

use crate::audit::{AuditMessage, AuditParameters};
use crate::retry::duration_millis;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub mod confirm;
pub mod transport;

pub use confirm::{ConfirmWaiter, PendingConfirms};
pub use transport::{InMemoryTransport, ManagementApiTransport};

// ============================================================================
// Errors
// ============================================================================

/// Errors from publishing an audit record
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Broker is unhealthy, refusing audit message with id [{audit_id}]")]
    BrokerUnhealthy { audit_id: String },

    #[error("Timed out after {timeout_ms}ms waiting for confirmation of audit message with id [{audit_id}]")]
    ConfirmTimeout { audit_id: String, timeout_ms: u64 },

    #[error("Broker rejected audit message with id [{audit_id}]")]
    Rejected { audit_id: String },

    #[error("Confirmation for audit message with id [{audit_id}] was abandoned")]
    ConfirmDropped { audit_id: String },

    #[error("Message with id [{audit_id}] was not routed to any queue")]
    NotRouted { audit_id: String },

    #[error("Transport failure: {message}")]
    Transport { message: String },

    #[error("Failed to encode audit message: {message}")]
    Serialization { message: String },
}

impl PublishError {
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Serialization { .. })
    }
}

// ============================================================================
// Seams
// ============================================================================

/// Moves one message onto the broker
#[async_trait]
pub trait MessageTransport: Send + Sync {
    async fn send(&self, message: &AuditMessage) -> Result<(), PublishError>;
}

/// Publishes a validated audit record; used by intake and replay workers
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordPublisher: Send + Sync {
    async fn publish(&self, parameters: &AuditParameters) -> Result<(), PublishError>;
}

/// Read-only broker health gate
#[async_trait]
pub trait BrokerHealth: Send + Sync {
    async fn is_healthy(&self) -> bool;
}

/// Broker acknowledgement settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmConfig {
    /// Wait for a broker acknowledgement before reporting success
    pub enabled: bool,

    #[serde(with = "duration_millis")]
    pub timeout: Duration,
}

impl Default for ConfirmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout: Duration::from_millis(2000),
        }
    }
}

// ============================================================================
// Audit Publisher
// ============================================================================

/// Health-gated, acknowledged publisher
pub struct AuditPublisher {
    transport: Arc<dyn MessageTransport>,
    confirms: PendingConfirms,
    health: Option<Arc<dyn BrokerHealth>>,
    config: ConfirmConfig,
}

impl AuditPublisher {
    pub fn new(
        transport: Arc<dyn MessageTransport>,
        confirms: PendingConfirms,
        config: ConfirmConfig,
    ) -> Self {
        Self {
            transport,
            confirms,
            health: None,
            config,
        }
    }

    /// Refuse to publish while `health` reports the broker unhealthy
    pub fn with_health_gate(mut self, health: Arc<dyn BrokerHealth>) -> Self {
        self.health = Some(health);
        self
    }

    pub fn confirms(&self) -> &PendingConfirms {
        &self.confirms
    }
}

#[async_trait]
impl RecordPublisher for AuditPublisher {
    async fn publish(&self, parameters: &AuditParameters) -> Result<(), PublishError> {
        let audit_id = parameters.audit_id.clone();

        if let Some(health) = &self.health {
            if !health.is_healthy().await {
                return Err(PublishError::BrokerUnhealthy { audit_id });
            }
        }

        let message = AuditMessage::from_parameters(parameters);

        if !self.config.enabled {
            return self.transport.send(&message).await;
        }

        let mut waiter = self.confirms.register(&audit_id);
        self.transport.send(&message).await?;

        match tokio::time::timeout(self.config.timeout, waiter.wait()).await {
            Ok(Some(true)) => {
                debug!(audit_id = %audit_id, "Audit message confirmed");
                Ok(())
            }
            Ok(Some(false)) => Err(PublishError::Rejected { audit_id }),
            Ok(None) => Err(PublishError::ConfirmDropped { audit_id }),
            Err(_) => {
                warn!(audit_id = %audit_id, "Timed out waiting for broker confirmation");
                Err(PublishError::ConfirmTimeout {
                    audit_id,
                    timeout_ms: self.config.timeout.as_millis() as u64,
                })
            }
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
