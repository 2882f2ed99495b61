//! # Audit Message Consumer
//!
//! Receives audit messages delivered by the broker and hands the records
//! to a sink. Records with audit type `NONE` are acknowledged and dropped.

use crate::audit::{AuditMessage, AuditType};
use crate::sink::AuditSink;
use crate::AuditKeeperError;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Dispatches delivered audit messages to an [`AuditSink`]
#[derive(Clone)]
pub struct AuditMessageConsumer {
    name: String,
    sink: Arc<dyn AuditSink>,
}

impl AuditMessageConsumer {
    pub fn new(name: impl Into<String>, sink: Arc<dyn AuditSink>) -> Self {
        Self {
            name: name.into(),
            sink,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Handle one message. Returns `false` when the record was skipped.
    pub async fn handle(&self, message: &AuditMessage) -> Result<bool, AuditKeeperError> {
        let parameters = message.to_parameters()?;
        if parameters.audit_type == AuditType::None {
            debug!(consumer = %self.name, audit_id = %parameters.audit_id, "Skipping audit record of type NONE");
            return Ok(false);
        }

        self.sink.audit(&parameters).await?;
        Ok(true)
    }

    /// Consume messages from `receiver` until it closes or `cancel` fires
    pub async fn run(
        self,
        mut receiver: mpsc::UnboundedReceiver<AuditMessage>,
        cancel: CancellationToken,
    ) {
        info!(consumer = %self.name, "Audit consumer started");
        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => break,
                message = receiver.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };

            if let Err(e) = self.handle(&message).await {
                error!(
                    consumer = %self.name,
                    audit_id = message.correlation_id().unwrap_or("unknown"),
                    error = %e,
                    "Failed to consume audit message"
                );
            }
        }
        info!(consumer = %self.name, "Audit consumer stopped");
    }
}

#[cfg(test)]
#[path = "consumer_tests.rs"]
mod tests;
