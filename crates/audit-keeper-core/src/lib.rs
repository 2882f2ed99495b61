//! # Audit-Keeper Core
//!
//! Core business logic for the Audit-Keeper audit intake and replay service.
//!
//! This crate contains the domain logic for accepting audit records, forwarding
//! them to a message broker, watching the broker's topology, and replaying
//! persisted audit files back into the broker at a controlled rate.
//!
//! ## Architecture
//!
//! - Business logic depends only on trait abstractions ([`StatusStore`],
//!   [`BrokerAdmin`], [`MessageTransport`], [`AuditSink`], [`RemoteCommandBus`])
//! - Infrastructure implementations are injected at runtime
//! - In-memory implementations exist for every seam so the whole pipeline can
//!   run inside a test
//!
//! ## Usage
//!
//! ```rust
//! use audit_keeper_core::{ReplayId, Timestamp};
//!
//! let replay_id = ReplayId::new();
//! let created = Timestamp::now();
//! assert!(!replay_id.to_string().is_empty());
//! assert!(created <= Timestamp::now());
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// Re-export commonly used types
pub use ulid::Ulid;
pub use uuid::Uuid;

// ============================================================================
// Domain Identifier Types
// ============================================================================

/// Unique identifier for a replay job
///
/// Uses ULID so identifiers sort by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplayId(Ulid);

impl ReplayId {
    /// Generate a new unique replay ID
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Get string representation of the replay ID
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for ReplayId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ReplayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ReplayId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ulid = s.parse::<Ulid>().map_err(|_| ParseError::InvalidFormat {
            expected: "ULID format".to_string(),
            actual: s.to_string(),
        })?;
        Ok(Self(ulid))
    }
}

/// UTC timestamp with millisecond-friendly helpers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current moment
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Build a timestamp from milliseconds since the Unix epoch
    pub fn from_millis(millis: i64) -> Result<Self, ParseError> {
        DateTime::from_timestamp_millis(millis)
            .map(Self)
            .ok_or_else(|| ParseError::InvalidFormat {
                expected: "epoch milliseconds".to_string(),
                actual: millis.to_string(),
            })
    }

    /// Milliseconds since the Unix epoch
    pub fn as_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    /// Convert to RFC3339 string
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339()
    }

    /// Get duration since another timestamp, zero if `other` is later
    pub fn duration_since(&self, other: Self) -> Duration {
        let chrono_duration = self.0.signed_duration_since(other.0);
        chrono_duration.to_std().unwrap_or_default()
    }

    /// Time elapsed between this timestamp and now
    pub fn elapsed(&self) -> Duration {
        Self::now().duration_since(*self)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// High-level error categorization for HTTP mapping and alerting decisions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Temporary failures that should be retried
    Transient,
    /// Permanent failures that won't succeed on retry
    Permanent,
    /// Requested resource does not exist
    NotFound,
    /// Operation not legal in the current state
    Conflict,
    /// Configuration errors preventing startup
    Configuration,
}

/// Error type for input validation failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum ValidationError {
    #[error("Required parameter {field} not found")]
    Required { field: String },

    #[error("Required parameter {field} only accepts one value")]
    SingleValue { field: String },

    #[error("Field '{field}' has invalid format: {message}")]
    InvalidFormat { field: String, message: String },
}

/// Error type for string parsing failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid format: expected {expected}, got '{actual}'")]
    InvalidFormat { expected: String, actual: String },
}

/// Top-level error type for audit-keeper operations
#[derive(Debug, thiserror::Error)]
pub enum AuditKeeperError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Replay(#[from] replay::ReplayError),

    #[error(transparent)]
    Store(#[from] status_store::StoreError),

    #[error(transparent)]
    Publish(#[from] publish::PublishError),

    #[error(transparent)]
    Sink(#[from] sink::SinkError),

    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl AuditKeeperError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Validation(_) => false,
            Self::Parse(_) => false,
            Self::Replay(e) => e.is_transient(),
            Self::Store(e) => e.is_transient(),
            Self::Publish(e) => e.is_transient(),
            Self::Sink(e) => e.is_transient(),
            Self::Configuration { .. } => false,
        }
    }

    /// Get error category for monitoring and HTTP mapping
    pub fn error_category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_) | Self::Parse(_) => ErrorCategory::Permanent,
            Self::Replay(e) => e.error_category(),
            Self::Store(_) | Self::Publish(_) | Self::Sink(_) => ErrorCategory::Transient,
            Self::Configuration { .. } => ErrorCategory::Configuration,
        }
    }
}

// ============================================================================
// Module declarations
// ============================================================================

/// Audit record parameters and broker message form
pub mod audit;

/// Retry policy for the intake publish loop
pub mod retry;

/// Persistent replay status storage
pub mod status_store;

/// Broker management abstraction and clients
pub mod broker;

/// Broker topology health checking and reconciliation
pub mod topology;

/// Publish path: transports, confirm acks, health gating
pub mod publish;

/// Intake retry loop with file fallback
pub mod intake;

/// Audit sinks (log, file)
pub mod sink;

/// Consumer side dispatch of delivered audit messages
pub mod consumer;

/// Audit file replay
pub mod replay;

// Re-export key types for convenience
pub use audit::{AuditMessage, AuditParameters, AuditType};
pub use broker::{
    BindingDestination, BindingSpec, BrokerAdmin, BrokerConnector, BrokerError, ExchangeSpec,
    InMemoryBroker, ManagementApiClient, ManagementApiConfig, ManagementApiConnector, NodeInfo,
    QueueInfo, QueueSpec, StaticConnector,
};
pub use consumer::AuditMessageConsumer;
pub use intake::{AuditIntake, Delivery, IntakeError};
pub use publish::{
    AuditPublisher, BrokerHealth, ConfirmConfig, InMemoryTransport, ManagementApiTransport,
    MessageTransport, PendingConfirms, PublishError, RecordPublisher,
};
pub use replay::{
    BulkOutcome, CreateReplay, FileState, FileStatus, PublishFailurePolicy, RemoteCommand,
    RemoteCommandBus, RemoteCommandHandler, ReplayConfig, ReplayError, ReplayScheduler,
    ReplayState, ReplayStatus,
};
pub use retry::{RetryPolicy, RetryState};
pub use sink::{AuditSink, FileAuditSink, FileSinkSettings, LogAuditSink, SinkError};
pub use status_store::{
    FilesystemStatusStore, InMemoryStatusStore, StatusStore, StoreError, Versioned,
};
pub use topology::{
    BrokerHealthReport, BrokerTopologyChecker, DesiredTopology, OutageStats, TopologyConfig,
};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
