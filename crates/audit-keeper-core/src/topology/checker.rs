//! # Topology Checker
//!
//! Polls the broker through a [`BrokerAdmin`], classifies every desired
//! exchange, queue and binding as present, missing or invalid, and folds the
//! result into a health snapshot.
//!
//! A poll runs in two phases: all admin calls happen first without holding
//! the snapshot lock, then the results are applied in one write so readers
//! never see a half-updated snapshot. A separate poll lock keeps health checks
//! and recovery single-flight.

use super::outage::{Divergence, OutageStats};
use super::TopologyConfig;
use crate::broker::{
    BindingSpec, BrokerAdmin, BrokerConnector, ExchangeSpec, QueueInfo, QueueSpec,
};
use crate::publish::BrokerHealth;
use crate::Timestamp;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

// ============================================================================
// Health Report
// ============================================================================

/// Overall broker status as reported by the health endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    #[serde(rename = "UP")]
    Up,
    #[serde(rename = "RABBITMQ_UNHEALTHY")]
    RabbitmqUnhealthy,
}

/// Depth of one desired queue, or `"unknown"` if the lookup failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueueStat {
    Depth {
        ready: u64,
        unacknowledged: u64,
        total: u64,
    },
    Unknown(String),
}

impl QueueStat {
    fn unknown() -> Self {
        Self::Unknown("unknown".to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outage: Option<OutageStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_stats: Option<BTreeMap<String, QueueStat>>,
}

/// Payload of the broker health endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerHealthReport {
    pub status: HealthStatus,
    pub details: HealthDetails,
}

// ============================================================================
// Internal State
// ============================================================================

#[derive(Debug, Clone)]
struct InvalidPair<D, T> {
    desired: D,
    detected: T,
}

/// Findings for one kind of topology item
#[derive(Debug, Clone)]
struct ItemCheck<D, T> {
    missing: Vec<D>,
    invalid: Vec<InvalidPair<D, T>>,
}

impl<D, T> Default for ItemCheck<D, T> {
    fn default() -> Self {
        Self {
            missing: Vec::new(),
            invalid: Vec::new(),
        }
    }
}

impl<D, T> ItemCheck<D, T> {
    fn is_healthy(&self) -> bool {
        self.missing.is_empty() && self.invalid.is_empty()
    }
}

/// Everything one poll learned, gathered before the snapshot is touched
struct PollResult {
    admin: Option<Arc<dyn BrokerAdmin>>,
    running_nodes: Option<usize>,
    exchanges: ItemCheck<ExchangeSpec, ExchangeSpec>,
    queues: ItemCheck<QueueSpec, QueueInfo>,
    bindings: ItemCheck<BindingSpec, BindingSpec>,
}

#[derive(Default)]
struct HealthState {
    admin: Option<Arc<dyn BrokerAdmin>>,

    cluster_healthy: bool,
    nodes_missing: usize,
    times_missing_node: u32,

    exchanges: ItemCheck<ExchangeSpec, ExchangeSpec>,
    queues: ItemCheck<QueueSpec, QueueInfo>,
    bindings: ItemCheck<BindingSpec, BindingSpec>,

    // Item checks start out unhealthy until the first poll completes
    polled: bool,

    last_successful_check: Option<Timestamp>,
    current_outage: Option<OutageStats>,
    history: VecDeque<OutageStats>,
}

impl HealthState {
    fn is_healthy(&self) -> bool {
        self.admin.is_some()
            && self.polled
            && self.cluster_healthy
            && self.exchanges.is_healthy()
            && self.queues.is_healthy()
            && self.bindings.is_healthy()
    }

    fn divergence(&self) -> Divergence {
        Divergence {
            nodes_missing: self.nodes_missing,
            missing_exchanges: self.exchanges.missing.iter().map(|e| e.name.clone()).collect(),
            invalid_exchanges: self
                .exchanges
                .invalid
                .iter()
                .map(|p| p.desired.name.clone())
                .collect(),
            missing_queues: self.queues.missing.iter().map(|q| q.name.clone()).collect(),
            invalid_queues: self
                .queues
                .invalid
                .iter()
                .map(|p| p.desired.name.clone())
                .collect(),
            missing_bindings: self.bindings.missing.iter().map(BindingSpec::key).collect(),
            invalid_bindings: self
                .bindings
                .invalid
                .iter()
                .map(|p| p.desired.key())
                .collect(),
        }
    }
}

// ============================================================================
// Checker
// ============================================================================

/// Broker topology health checker and reconciler
pub struct BrokerTopologyChecker {
    config: TopologyConfig,
    connector: Arc<dyn BrokerConnector>,
    state: RwLock<HealthState>,
    poll_lock: Mutex<()>,
}

impl BrokerTopologyChecker {
    /// Create a checker. Health is reported as unhealthy until the first
    /// successful poll.
    pub fn new(config: TopologyConfig, connector: Arc<dyn BrokerConnector>) -> Self {
        Self {
            config,
            connector,
            state: RwLock::new(HealthState::default()),
            poll_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &TopologyConfig {
        &self.config
    }

    /// Run one poll and return the resulting health.
    ///
    /// Never fails: an admin call that errors degrades the corresponding
    /// check to "everything missing".
    pub async fn run_health_check(&self) -> bool {
        let _poll = self.poll_lock.lock().await;
        debug!("Broker health check started");

        let result = self.poll().await;

        let mut state = self.state.write().await;
        let was_healthy = state.is_healthy();
        self.apply(&mut state, result);
        let is_healthy = state.is_healthy();
        let now = Timestamp::now();

        match (was_healthy, is_healthy) {
            (true, true) => {
                debug!("Broker is still healthy");
                state.last_successful_check = Some(now);
            }
            (true, false) => {
                let divergence = state.divergence();
                let mut outage = OutageStats::open(state.last_successful_check);
                outage.widen(&divergence);
                warn!(
                    nodes_missing = divergence.nodes_missing,
                    missing_exchanges = ?divergence.missing_exchanges,
                    invalid_exchanges = ?divergence.invalid_exchanges,
                    missing_queues = ?divergence.missing_queues,
                    invalid_queues = ?divergence.invalid_queues,
                    missing_bindings = ?divergence.missing_bindings,
                    invalid_bindings = ?divergence.invalid_bindings,
                    "Broker is not healthy"
                );
                state.current_outage = Some(outage);
            }
            (false, true) => {
                state.last_successful_check = Some(now);
                match state.current_outage.take() {
                    Some(mut outage) => {
                        outage.close(now);
                        info!(
                            outage_start = ?outage.start.map(|t| t.to_rfc3339()),
                            max_nodes_missing = outage.max_nodes_missing,
                            "Broker has recovered"
                        );
                        self.record_history(&mut state, outage);
                    }
                    None => info!("Broker is healthy"),
                }
            }
            (false, false) => {
                debug!("Broker is still unhealthy");
                let divergence = state.divergence();
                if let Some(outage) = state.current_outage.as_mut() {
                    outage.widen(&divergence);
                }
            }
        }

        debug!(healthy = is_healthy, "Broker health check complete");
        is_healthy
    }

    /// Reconcile the broker towards the desired topology.
    ///
    /// Only acts when recovery is enabled and the last poll was unhealthy.
    /// Every step is best-effort; a failure is logged and the remaining steps
    /// still run. Call [`run_health_check`](Self::run_health_check) afterwards
    /// to observe the outcome.
    pub async fn recover(&self) {
        if !self.config.attempt_recovery {
            return;
        }

        let _poll = self.poll_lock.lock().await;

        let (admin, exchanges, queues, bindings) = {
            let state = self.state.read().await;
            if state.is_healthy() {
                return;
            }
            (
                state.admin.clone(),
                state.exchanges.clone(),
                state.queues.clone(),
                state.bindings.clone(),
            )
        };

        let Some(admin) = admin else {
            debug!("Skipping broker recovery, no admin connection");
            return;
        };

        info!("Broker recovery started");

        if self.config.fix_missing {
            for exchange in &exchanges.missing {
                info!(exchange = %exchange.name, "Creating missing exchange");
                if let Err(e) = admin.declare_exchange(exchange).await {
                    warn!(exchange = %exchange.name, error = %e, "Unable to create missing exchange");
                }
            }
        }

        if self.config.fix_invalid {
            for pair in &exchanges.invalid {
                info!(exchange = %pair.desired.name, "Recreating invalid exchange");
                let result = match admin.delete_exchange(&pair.detected.name).await {
                    Ok(()) => admin.declare_exchange(&pair.desired).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = result {
                    warn!(exchange = %pair.desired.name, error = %e, "Unable to recreate invalid exchange");
                }
            }
        }

        if self.config.fix_missing {
            for queue in &queues.missing {
                info!(queue = %queue.name, "Creating missing queue");
                if let Err(e) = admin.declare_queue(queue).await {
                    warn!(queue = %queue.name, error = %e, "Unable to create missing queue");
                }
            }
        }

        if self.config.fix_invalid {
            for pair in &queues.invalid {
                self.recreate_queue_if_empty(admin.as_ref(), &pair.desired, pair.detected.name())
                    .await;
            }
        }

        if self.config.fix_missing {
            for binding in &bindings.missing {
                info!(binding = %binding, "Creating missing binding");
                if let Err(e) = admin.bind(binding).await {
                    warn!(binding = %binding, error = %e, "Unable to create missing binding");
                }
            }
        }

        if self.config.fix_invalid {
            for pair in &bindings.invalid {
                info!(binding = %pair.desired, "Recreating invalid binding");
                let result = match admin.unbind(&pair.detected).await {
                    Ok(()) => admin.bind(&pair.desired).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = result {
                    warn!(binding = %pair.desired, error = %e, "Unable to recreate invalid binding");
                }
            }
        }

        info!("Broker recovery complete");
    }

    /// Latest health snapshot
    pub async fn is_healthy(&self) -> bool {
        self.state.read().await.is_healthy()
    }

    /// Delay before the next poll: short while unhealthy, long while healthy
    pub async fn poll_interval(&self) -> Duration {
        if self.is_healthy().await {
            self.config.healthy_poll_interval
        } else {
            self.config.unhealthy_poll_interval
        }
    }

    /// What the last poll found wrong
    pub async fn divergence(&self) -> Divergence {
        self.state.read().await.divergence()
    }

    /// The outage in progress, if any
    pub async fn current_outage(&self) -> Option<OutageStats> {
        self.state.read().await.current_outage.clone()
    }

    /// Closed outages ordered by start time
    pub async fn outage_history(&self) -> Vec<OutageStats> {
        self.state.read().await.history.iter().cloned().collect()
    }

    /// Health payload, including live queue depth when configured
    pub async fn health(&self) -> BrokerHealthReport {
        let (healthy, outage, admin) = {
            let state = self.state.read().await;
            (
                state.is_healthy(),
                state.current_outage.clone(),
                state.admin.clone(),
            )
        };

        let queue_stats = if self.config.include_queue_size_stats {
            Some(self.queue_stats(admin.as_deref()).await)
        } else {
            None
        };

        if healthy {
            BrokerHealthReport {
                status: HealthStatus::Up,
                details: HealthDetails {
                    outage: None,
                    queue_stats,
                },
            }
        } else {
            BrokerHealthReport {
                status: HealthStatus::RabbitmqUnhealthy,
                details: HealthDetails {
                    outage,
                    queue_stats,
                },
            }
        }
    }

    // ------------------------------------------------------------------------
    // Polling
    // ------------------------------------------------------------------------

    async fn poll(&self) -> PollResult {
        let admin = self.ensure_admin().await;

        let Some(admin) = admin else {
            return PollResult {
                admin: None,
                running_nodes: None,
                exchanges: ItemCheck {
                    missing: self.config.desired.exchanges.clone(),
                    invalid: Vec::new(),
                },
                queues: ItemCheck {
                    missing: self.config.desired.queues.clone(),
                    invalid: Vec::new(),
                },
                bindings: ItemCheck {
                    missing: self.config.desired.bindings.clone(),
                    invalid: Vec::new(),
                },
            };
        };

        let running_nodes = match admin.nodes().await {
            Ok(nodes) => Some(nodes.iter().filter(|n| n.running).count()),
            Err(e) => {
                debug!(error = %e, "Unable to get broker node info");
                None
            }
        };

        let exchanges = match admin.exchanges().await {
            Ok(detected) => classify(
                &self.config.desired.exchanges,
                detected,
                |e| e.name.clone(),
                |e| e.name.clone(),
                ExchangeSpec::matches,
            ),
            Err(e) => {
                debug!(error = %e, "Unable to get broker exchange info");
                all_missing(&self.config.desired.exchanges)
            }
        };

        let queues = match admin.queues().await {
            Ok(detected) => classify(
                &self.config.desired.queues,
                detected,
                |q| q.name.clone(),
                |q| q.spec.name.clone(),
                |desired, detected| desired.matches(&detected.spec),
            ),
            Err(e) => {
                debug!(error = %e, "Unable to get broker queue info");
                all_missing(&self.config.desired.queues)
            }
        };

        let bindings = match admin.bindings().await {
            Ok(detected) => classify(
                &self.config.desired.bindings,
                detected,
                BindingSpec::key,
                BindingSpec::key,
                BindingSpec::matches,
            ),
            Err(e) => {
                debug!(error = %e, "Unable to get broker binding info");
                all_missing(&self.config.desired.bindings)
            }
        };

        PollResult {
            admin: Some(admin),
            running_nodes,
            exchanges,
            queues,
            bindings,
        }
    }

    async fn ensure_admin(&self) -> Option<Arc<dyn BrokerAdmin>> {
        if let Some(admin) = self.state.read().await.admin.clone() {
            return Some(admin);
        }

        match self.connector.connect().await {
            Ok(admin) => {
                info!("Broker admin connection established");
                Some(admin)
            }
            Err(e) => {
                warn!(error = %e, "Unable to establish broker admin connection");
                None
            }
        }
    }

    fn apply(&self, state: &mut HealthState, result: PollResult) {
        state.admin = result.admin;
        state.polled = true;

        let expected = self.config.expected_nodes;
        state.nodes_missing = match result.running_nodes {
            Some(running) => expected.saturating_sub(running),
            None => expected,
        };

        if state.nodes_missing > 0 {
            state.times_missing_node = state.times_missing_node.saturating_add(1);
            state.cluster_healthy = !(self.config.fail_if_node_missing
                && state.times_missing_node > self.config.num_checks_before_failure);
        } else {
            state.times_missing_node = 0;
            state.cluster_healthy = true;
        }

        state.exchanges = result.exchanges;
        state.queues = result.queues;
        state.bindings = result.bindings;
    }

    fn record_history(&self, state: &mut HealthState, outage: OutageStats) {
        let position = state
            .history
            .iter()
            .position(|existing| existing.start > outage.start)
            .unwrap_or(state.history.len());
        state.history.insert(position, outage);

        while state.history.len() > self.config.outage_history_size {
            state.history.pop_front();
        }
    }

    async fn recreate_queue_if_empty(
        &self,
        admin: &dyn BrokerAdmin,
        desired: &QueueSpec,
        detected_name: &str,
    ) {
        let live = match admin.queue(detected_name).await {
            Ok(Some(queue)) => queue,
            Ok(None) => {
                debug!(queue = %detected_name, "Invalid queue disappeared before recovery");
                return;
            }
            Err(e) => {
                warn!(queue = %detected_name, error = %e, "Unable to get queue info");
                return;
            }
        };

        if live.messages > 0 {
            warn!(
                "Cannot fix invalid queue [{}] containing {} messages",
                live.name(),
                live.messages
            );
            return;
        }

        info!(queue = %desired.name, "Recreating invalid queue");
        let result = match admin.delete_queue(detected_name).await {
            Ok(()) => admin.declare_queue(desired).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(queue = %desired.name, error = %e, "Unable to recreate invalid queue");
        }
    }

    async fn queue_stats(&self, admin: Option<&dyn BrokerAdmin>) -> BTreeMap<String, QueueStat> {
        let mut stats = BTreeMap::new();
        for queue in &self.config.desired.queues {
            let stat = match admin {
                Some(admin) => match admin.queue(&queue.name).await {
                    Ok(Some(info)) => QueueStat::Depth {
                        ready: info.messages_ready,
                        unacknowledged: info.messages_unacknowledged,
                        total: info.messages,
                    },
                    Ok(None) => QueueStat::unknown(),
                    Err(e) => {
                        debug!(queue = %queue.name, error = %e, "Unable to get queue info");
                        QueueStat::unknown()
                    }
                },
                None => QueueStat::unknown(),
            };
            stats.insert(queue.name.clone(), stat);
        }
        stats
    }
}

#[async_trait]
impl BrokerHealth for BrokerTopologyChecker {
    async fn is_healthy(&self) -> bool {
        BrokerTopologyChecker::is_healthy(self).await
    }
}

fn all_missing<D: Clone, T>(desired: &[D]) -> ItemCheck<D, T> {
    ItemCheck {
        missing: desired.to_vec(),
        invalid: Vec::new(),
    }
}

/// Pair desired items with detected ones by key and sort them into missing
/// and invalid
fn classify<D, T, K>(
    desired: &[D],
    detected: Vec<T>,
    desired_key: impl Fn(&D) -> K,
    detected_key: impl Fn(&T) -> K,
    matches: impl Fn(&D, &T) -> bool,
) -> ItemCheck<D, T>
where
    D: Clone,
    T: Clone,
    K: std::hash::Hash + Eq,
{
    let detected: HashMap<K, T> = detected
        .into_iter()
        .map(|item| (detected_key(&item), item))
        .collect();

    let mut check = ItemCheck::default();
    for item in desired {
        match detected.get(&desired_key(item)) {
            None => check.missing.push(item.clone()),
            Some(found) if !matches(item, found) => check.invalid.push(InvalidPair {
                desired: item.clone(),
                detected: found.clone(),
            }),
            Some(_) => {}
        }
    }
    check
}

#[cfg(test)]
#[path = "checker_tests.rs"]
mod tests;
