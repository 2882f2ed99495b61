//! # Broker Topology Health
//!
//! Compares the broker's live topology with a desired configuration, tracks
//! outages and repairs divergences on request.
//!
//! The checker is driven externally: a background task calls
//! [`BrokerTopologyChecker::run_health_check`], optionally
//! [`BrokerTopologyChecker::recover`], then sleeps for
//! [`BrokerTopologyChecker::poll_interval`] which is short while unhealthy and
//! long while healthy.

use crate::broker::{BindingSpec, ExchangeSpec, QueueSpec};
use crate::retry::duration_millis;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod checker;
pub mod outage;

pub use checker::{BrokerHealthReport, BrokerTopologyChecker, HealthDetails, HealthStatus, QueueStat};
pub use outage::{Divergence, OutageStats};

/// Exchanges, queues and bindings the broker is expected to carry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DesiredTopology {
    pub exchanges: Vec<ExchangeSpec>,
    pub queues: Vec<QueueSpec>,
    pub bindings: Vec<BindingSpec>,
}

/// Health check and reconciliation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    /// Number of running nodes the cluster should have
    pub expected_nodes: usize,

    /// Whether missing nodes can mark the cluster unhealthy at all
    pub fail_if_node_missing: bool,

    /// Consecutive polls with missing nodes tolerated before failing
    pub num_checks_before_failure: u32,

    #[serde(with = "duration_millis")]
    pub healthy_poll_interval: Duration,

    #[serde(with = "duration_millis")]
    pub unhealthy_poll_interval: Duration,

    pub attempt_recovery: bool,
    pub fix_missing: bool,
    pub fix_invalid: bool,

    /// Report per-queue depth in [`BrokerTopologyChecker::health`]
    pub include_queue_size_stats: bool,

    /// Closed outages retained in history
    pub outage_history_size: usize,

    pub desired: DesiredTopology,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            expected_nodes: 1,
            fail_if_node_missing: true,
            num_checks_before_failure: 3,
            healthy_poll_interval: Duration::from_secs(60),
            unhealthy_poll_interval: Duration::from_secs(5),
            attempt_recovery: true,
            fix_missing: true,
            fix_invalid: true,
            include_queue_size_stats: true,
            outage_history_size: 100,
            desired: DesiredTopology::default(),
        }
    }
}
