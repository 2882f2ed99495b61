//! # Audit Sinks
//!
//! Destinations for audit records once they leave the broker, or when the
//! broker cannot be reached at all. Each sink is an independent
//! implementation of [`AuditSink`] chosen at startup.

use crate::audit::AuditParameters;
use async_trait::async_trait;

pub mod file;
pub mod log;

pub use file::{FileAuditSink, FileSinkSettings};
pub use log::LogAuditSink;

/// Errors from writing an audit record
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Audit file I/O failure at {path}: {message}")]
    Io { path: String, message: String },

    #[error("Failed to encode audit record: {message}")]
    Serialization { message: String },
}

impl SinkError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io { .. })
    }
}

/// A destination for audit records
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn audit(&self, parameters: &AuditParameters) -> Result<(), SinkError>;
}
