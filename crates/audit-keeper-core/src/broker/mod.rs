//! # Broker Administration
//!
//! Topology primitives and the administrative operations the health checker
//! needs from a RabbitMQ-style broker: listing nodes, exchanges, queues and
//! bindings, and declaring or deleting them.
//!
//! The wire shape of every type follows the RabbitMQ management HTTP API so
//! the same structs deserialize management responses and desired-topology
//! configuration.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub mod management;
pub mod memory;

pub use management::{ManagementApiClient, ManagementApiConfig, ManagementApiConnector};
pub use memory::InMemoryBroker;

/// Broker argument table (`x-message-ttl`, `x-queue-type`, ...)
pub type Arguments = BTreeMap<String, serde_json::Value>;

// ============================================================================
// Topology Types
// ============================================================================

/// A cluster node as reported by the broker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    #[serde(default)]
    pub running: bool,
}

/// An exchange declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeSpec {
    pub name: String,
    #[serde(rename = "type", default = "default_exchange_type")]
    pub exchange_type: String,
    #[serde(default = "default_true")]
    pub durable: bool,
    #[serde(default)]
    pub auto_delete: bool,
    #[serde(default)]
    pub internal: bool,
    #[serde(default)]
    pub arguments: Arguments,
}

impl ExchangeSpec {
    /// Durable exchange of the given type with default flags
    pub fn new(name: impl Into<String>, exchange_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            exchange_type: exchange_type.into(),
            durable: true,
            auto_delete: false,
            internal: false,
            arguments: Arguments::new(),
        }
    }

    /// Whether `detected` matches this desired exchange
    pub fn matches(&self, detected: &ExchangeSpec) -> bool {
        self.name == detected.name
            && self.exchange_type == detected.exchange_type
            && self.durable == detected.durable
            && self.auto_delete == detected.auto_delete
            && self.internal == detected.internal
    }
}

/// A queue declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSpec {
    pub name: String,
    #[serde(default = "default_true")]
    pub durable: bool,
    #[serde(default)]
    pub exclusive: bool,
    #[serde(default)]
    pub auto_delete: bool,
    #[serde(default)]
    pub arguments: Arguments,
}

impl QueueSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: true,
            exclusive: false,
            auto_delete: false,
            arguments: Arguments::new(),
        }
    }

    /// Whether `detected` matches this desired queue
    pub fn matches(&self, detected: &QueueSpec) -> bool {
        self.name == detected.name
            && self.durable == detected.durable
            && self.exclusive == detected.exclusive
            && self.auto_delete == detected.auto_delete
            && arguments_subset(&self.arguments, &detected.arguments)
    }
}

/// A queue as reported by the broker, including its depth
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueInfo {
    #[serde(flatten)]
    pub spec: QueueSpec,
    #[serde(default)]
    pub messages: u64,
    #[serde(default)]
    pub messages_ready: u64,
    #[serde(default)]
    pub messages_unacknowledged: u64,
}

impl QueueInfo {
    /// Wrap a declaration as an empty queue
    pub fn empty(spec: QueueSpec) -> Self {
        Self {
            spec,
            messages: 0,
            messages_ready: 0,
            messages_unacknowledged: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }
}

/// Kind of entity a binding routes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindingDestination {
    Queue,
    Exchange,
}

impl fmt::Display for BindingDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queue => f.write_str("queue"),
            Self::Exchange => f.write_str("exchange"),
        }
    }
}

/// A binding from an exchange to a queue or another exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindingSpec {
    pub source: String,
    pub destination: String,
    pub destination_type: BindingDestination,
    #[serde(default)]
    pub routing_key: String,
    #[serde(default)]
    pub arguments: Arguments,
}

impl BindingSpec {
    pub fn to_queue(
        source: impl Into<String>,
        queue: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            destination: queue.into(),
            destination_type: BindingDestination::Queue,
            routing_key: routing_key.into(),
            arguments: Arguments::new(),
        }
    }

    /// Identity used to pair desired and detected bindings
    pub fn key(&self) -> (String, String) {
        (self.source.clone(), self.destination.clone())
    }

    /// Whether `detected` matches this desired binding
    pub fn matches(&self, detected: &BindingSpec) -> bool {
        self.source == detected.source
            && self.destination == detected.destination
            && self.destination_type == detected.destination_type
            && self.routing_key == detected.routing_key
            && arguments_subset(&self.arguments, &detected.arguments)
    }
}

impl fmt::Display for BindingSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} {} [{}]",
            self.source, self.destination_type, self.destination, self.routing_key
        )
    }
}

/// Every desired argument must be present in `detected` with an equal value.
/// Extra detected arguments are tolerated.
pub fn arguments_subset(desired: &Arguments, detected: &Arguments) -> bool {
    desired
        .iter()
        .all(|(key, value)| detected.get(key) == Some(value))
}

fn default_true() -> bool {
    true
}

fn default_exchange_type() -> String {
    "topic".to_string()
}

// ============================================================================
// Errors
// ============================================================================

/// Errors from broker administration calls
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Broker management API returned {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Broker unreachable: {message}")]
    Unreachable { message: String },

    #[error("Unexpected broker response: {message}")]
    InvalidResponse { message: String },

    #[error("Broker {kind} '{name}' not found")]
    NotFound { kind: String, name: String },
}

impl BrokerError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            Self::Unreachable { .. } => true,
            Self::InvalidResponse { .. } | Self::NotFound { .. } => false,
        }
    }
}

// ============================================================================
// Admin Trait
// ============================================================================

/// Administrative view of a broker's topology
#[async_trait]
pub trait BrokerAdmin: Send + Sync {
    async fn nodes(&self) -> Result<Vec<NodeInfo>, BrokerError>;

    async fn exchanges(&self) -> Result<Vec<ExchangeSpec>, BrokerError>;

    async fn queues(&self) -> Result<Vec<QueueInfo>, BrokerError>;

    /// Live lookup of one queue; `Ok(None)` when it does not exist
    async fn queue(&self, name: &str) -> Result<Option<QueueInfo>, BrokerError>;

    async fn bindings(&self) -> Result<Vec<BindingSpec>, BrokerError>;

    async fn declare_exchange(&self, exchange: &ExchangeSpec) -> Result<(), BrokerError>;

    async fn delete_exchange(&self, name: &str) -> Result<(), BrokerError>;

    async fn declare_queue(&self, queue: &QueueSpec) -> Result<(), BrokerError>;

    async fn delete_queue(&self, name: &str) -> Result<(), BrokerError>;

    async fn bind(&self, binding: &BindingSpec) -> Result<(), BrokerError>;

    async fn unbind(&self, binding: &BindingSpec) -> Result<(), BrokerError>;
}

/// Produces a verified admin client on demand.
///
/// The topology checker calls [`BrokerConnector::connect`] whenever it has
/// no client, so a broker that is down at startup is picked up once it comes
/// back.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect(&self) -> Result<std::sync::Arc<dyn BrokerAdmin>, BrokerError>;
}

/// Connector that always hands out the same admin client
pub struct StaticConnector {
    admin: std::sync::Arc<dyn BrokerAdmin>,
}

impl StaticConnector {
    pub fn new(admin: std::sync::Arc<dyn BrokerAdmin>) -> Self {
        Self { admin }
    }
}

#[async_trait]
impl BrokerConnector for StaticConnector {
    async fn connect(&self) -> Result<std::sync::Arc<dyn BrokerAdmin>, BrokerError> {
        Ok(self.admin.clone())
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
