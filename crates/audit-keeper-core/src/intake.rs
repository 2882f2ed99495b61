//! # Audit Intake
//!
//! Accepts a validated audit record and makes sure it lands somewhere
//! durable: the broker if at all possible, the fallback sink otherwise.
//!
//! Publish attempts are retried according to a [`RetryPolicy`]. When the
//! budget is spent the record is handed to the fallback [`AuditSink`], and
//! only when that also fails is the caller told the record was lost.

use crate::audit::AuditParameters;
use crate::publish::RecordPublisher;
use crate::retry::{RetryPolicy, RetryState};
use crate::sink::AuditSink;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// The record could not be published nor written to the fallback sink
#[derive(Debug, thiserror::Error)]
#[error("Unable to process audit message with id [{audit_id}]")]
pub struct IntakeError {
    pub audit_id: String,
    pub attempts: u32,
    pub last_error: String,
}

impl IntakeError {
    pub fn is_transient(&self) -> bool {
        true
    }
}

/// Outcome of a successful intake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Acknowledged by the broker
    Published,
    /// Written to the fallback sink after the broker attempts were spent
    Fallback,
}

/// Retrying audit intake with an optional fallback sink
pub struct AuditIntake {
    publisher: Arc<dyn RecordPublisher>,
    fallback: Option<Arc<dyn AuditSink>>,
    policy: RetryPolicy,
}

impl AuditIntake {
    pub fn new(publisher: Arc<dyn RecordPublisher>, policy: RetryPolicy) -> Self {
        Self {
            publisher,
            fallback: None,
            policy,
        }
    }

    pub fn with_fallback(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.fallback = Some(sink);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Deliver an audit record, returning how it was stored
    pub async fn audit(&self, parameters: &AuditParameters) -> Result<Delivery, IntakeError> {
        let audit_id = parameters.audit_id.as_str();
        let mut state = RetryState::new();

        let last_error = loop {
            state.record_attempt();
            match self.publisher.publish(parameters).await {
                Ok(()) => {
                    debug!(audit_id = %audit_id, attempts = state.attempts, "Audit record published");
                    return Ok(Delivery::Published);
                }
                Err(e) => {
                    warn!(
                        audit_id = %audit_id,
                        attempt = state.attempts,
                        error = %e,
                        "Audit publish attempt failed"
                    );
                    if !e.is_transient() || !state.can_retry(&self.policy) {
                        break e.to_string();
                    }
                    tokio::time::sleep(state.get_delay(&self.policy)).await;
                }
            }
        };

        let Some(fallback) = &self.fallback else {
            error!(audit_id = %audit_id, attempts = state.attempts, "Audit record dropped, no fallback configured");
            return Err(IntakeError {
                audit_id: audit_id.to_string(),
                attempts: state.attempts,
                last_error,
            });
        };

        match fallback.audit(parameters).await {
            Ok(()) => {
                info!(audit_id = %audit_id, attempts = state.attempts, "Audit record written to fallback sink");
                Ok(Delivery::Fallback)
            }
            Err(e) => {
                error!(audit_id = %audit_id, error = %e, "Fallback sink failed, audit record dropped");
                Err(IntakeError {
                    audit_id: audit_id.to_string(),
                    attempts: state.attempts,
                    last_error: e.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
#[path = "intake_tests.rs"]
mod tests;
