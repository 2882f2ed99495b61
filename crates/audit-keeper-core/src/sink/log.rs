//! Sink that writes audit records to the tracing log.

use super::{AuditSink, SinkError};
use crate::audit::AuditParameters;
use async_trait::async_trait;
use tracing::info;

/// Emits one structured `tracing` event per audit record
#[derive(Debug, Clone, Default)]
pub struct LogAuditSink;

impl LogAuditSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AuditSink for LogAuditSink {
    async fn audit(&self, parameters: &AuditParameters) -> Result<(), SinkError> {
        info!(
            target: "audit",
            audit_id = %parameters.audit_id,
            user_dn = %parameters.user_dn,
            query = %parameters.query,
            auths = %parameters.auths,
            audit_type = %parameters.audit_type,
            column_visibility = %parameters.column_visibility,
            logic_class = parameters.logic_class.as_deref().unwrap_or(""),
            query_date = parameters.query_date.as_millis(),
            "Audit record"
        );
        Ok(())
    }
}
