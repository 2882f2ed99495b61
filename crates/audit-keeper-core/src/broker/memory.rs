//! In-memory broker for tests and local development.
//!
//! Holds a mutable topology and counts admin calls so tests can assert on
//! what reconciliation did. Individual calls can be made to fail.

use super::{
    BindingSpec, BrokerAdmin, BrokerError, ExchangeSpec, NodeInfo, QueueInfo, QueueSpec,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct BrokerState {
    nodes: Vec<NodeInfo>,
    exchanges: BTreeMap<String, ExchangeSpec>,
    queues: BTreeMap<String, QueueInfo>,
    bindings: Vec<BindingSpec>,
    unavailable: bool,
    failing: HashSet<&'static str>,
    calls: Vec<String>,
}

/// A fake broker implementing [`BrokerAdmin`]
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    /// Empty broker with `node_count` running nodes
    pub fn new(node_count: usize) -> Self {
        let broker = Self::default();
        broker.set_running_nodes(node_count);
        broker
    }

    pub fn set_running_nodes(&self, count: usize) {
        let mut state = self.lock();
        state.nodes = (0..count)
            .map(|i| NodeInfo {
                name: format!("rabbit@node{}", i),
                running: true,
            })
            .collect();
    }

    /// Make every call fail as if the broker were unreachable
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Make one operation (e.g. `"declare_queue"`) fail
    pub fn fail_operation(&self, operation: &'static str) {
        self.lock().failing.insert(operation);
    }

    pub fn insert_exchange(&self, exchange: ExchangeSpec) {
        self.lock()
            .exchanges
            .insert(exchange.name.clone(), exchange);
    }

    pub fn insert_queue(&self, queue: QueueInfo) {
        self.lock().queues.insert(queue.spec.name.clone(), queue);
    }

    pub fn insert_binding(&self, binding: BindingSpec) {
        self.lock().bindings.push(binding);
    }

    /// Set the message count of an existing queue
    pub fn set_queue_depth(&self, name: &str, ready: u64, unacknowledged: u64) {
        if let Some(queue) = self.lock().queues.get_mut(name) {
            queue.messages_ready = ready;
            queue.messages_unacknowledged = unacknowledged;
            queue.messages = ready + unacknowledged;
        }
    }

    /// Names of the admin operations invoked so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BrokerState> {
        // A poisoned lock only means another test thread panicked
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn enter(&self, operation: &'static str) -> Result<std::sync::MutexGuard<'_, BrokerState>, BrokerError> {
        let mut state = self.lock();
        state.calls.push(operation.to_string());
        if state.unavailable {
            return Err(BrokerError::Unreachable {
                message: "broker is unavailable".to_string(),
            });
        }
        if state.failing.contains(operation) {
            return Err(BrokerError::Http {
                status: 500,
                message: format!("{} failed", operation),
            });
        }
        Ok(state)
    }
}

#[async_trait]
impl BrokerAdmin for InMemoryBroker {
    async fn nodes(&self) -> Result<Vec<NodeInfo>, BrokerError> {
        Ok(self.enter("nodes")?.nodes.clone())
    }

    async fn exchanges(&self) -> Result<Vec<ExchangeSpec>, BrokerError> {
        Ok(self.enter("exchanges")?.exchanges.values().cloned().collect())
    }

    async fn queues(&self) -> Result<Vec<QueueInfo>, BrokerError> {
        Ok(self.enter("queues")?.queues.values().cloned().collect())
    }

    async fn queue(&self, name: &str) -> Result<Option<QueueInfo>, BrokerError> {
        Ok(self.enter("queue")?.queues.get(name).cloned())
    }

    async fn bindings(&self) -> Result<Vec<BindingSpec>, BrokerError> {
        Ok(self.enter("bindings")?.bindings.clone())
    }

    async fn declare_exchange(&self, exchange: &ExchangeSpec) -> Result<(), BrokerError> {
        let mut state = self.enter("declare_exchange")?;
        state
            .exchanges
            .entry(exchange.name.clone())
            .or_insert_with(|| exchange.clone());
        Ok(())
    }

    async fn delete_exchange(&self, name: &str) -> Result<(), BrokerError> {
        let mut state = self.enter("delete_exchange")?;
        state.exchanges.remove(name);
        state
            .bindings
            .retain(|b| b.source != name && b.destination != name);
        Ok(())
    }

    async fn declare_queue(&self, queue: &QueueSpec) -> Result<(), BrokerError> {
        let mut state = self.enter("declare_queue")?;
        state
            .queues
            .entry(queue.name.clone())
            .or_insert_with(|| QueueInfo::empty(queue.clone()));
        Ok(())
    }

    async fn delete_queue(&self, name: &str) -> Result<(), BrokerError> {
        let mut state = self.enter("delete_queue")?;
        state.queues.remove(name);
        state.bindings.retain(|b| b.destination != name);
        Ok(())
    }

    async fn bind(&self, binding: &BindingSpec) -> Result<(), BrokerError> {
        let mut state = self.enter("bind")?;
        if !state.bindings.contains(binding) {
            state.bindings.push(binding.clone());
        }
        Ok(())
    }

    async fn unbind(&self, binding: &BindingSpec) -> Result<(), BrokerError> {
        let mut state = self.enter("unbind")?;
        state.bindings.retain(|b| {
            !(b.source == binding.source
                && b.destination == binding.destination
                && b.destination_type == binding.destination_type
                && b.routing_key == binding.routing_key)
        });
        Ok(())
    }
}
