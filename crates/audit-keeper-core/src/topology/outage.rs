//! Outage bookkeeping for the topology checker.

use crate::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// What one poll found wrong with the broker
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Divergence {
    pub nodes_missing: usize,
    pub missing_exchanges: Vec<String>,
    pub invalid_exchanges: Vec<String>,
    pub missing_queues: Vec<String>,
    pub invalid_queues: Vec<String>,
    /// (source, destination) pairs
    pub missing_bindings: Vec<(String, String)>,
    pub invalid_bindings: Vec<(String, String)>,
}

impl Divergence {
    pub fn is_empty(&self) -> bool {
        self.nodes_missing == 0
            && self.missing_exchanges.is_empty()
            && self.invalid_exchanges.is_empty()
            && self.missing_queues.is_empty()
            && self.invalid_queues.is_empty()
            && self.missing_bindings.is_empty()
            && self.invalid_bindings.is_empty()
    }
}

/// One broker outage.
///
/// While open, every poll widens the record so it describes the worst the
/// outage got: the node count only grows and names are only added.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutageStats {
    /// Last successful health check before the outage, if any
    pub start: Option<Timestamp>,
    pub stop: Option<Timestamp>,
    pub max_nodes_missing: usize,
    pub missing_exchanges: BTreeSet<String>,
    pub invalid_exchanges: BTreeSet<String>,
    pub missing_queues: BTreeSet<String>,
    pub invalid_queues: BTreeSet<String>,
    /// source exchange -> destinations
    pub missing_bindings: BTreeMap<String, BTreeSet<String>>,
    pub invalid_bindings: BTreeMap<String, BTreeSet<String>>,
}

impl OutageStats {
    /// Open a new outage
    pub fn open(start: Option<Timestamp>) -> Self {
        Self {
            start,
            ..Self::default()
        }
    }

    pub fn is_open(&self) -> bool {
        self.stop.is_none()
    }

    pub fn close(&mut self, stop: Timestamp) {
        self.stop = Some(stop);
    }

    /// Fold one poll's findings into the record
    pub fn widen(&mut self, divergence: &Divergence) {
        self.max_nodes_missing = self.max_nodes_missing.max(divergence.nodes_missing);

        self.missing_exchanges
            .extend(divergence.missing_exchanges.iter().cloned());
        self.invalid_exchanges
            .extend(divergence.invalid_exchanges.iter().cloned());
        self.missing_queues
            .extend(divergence.missing_queues.iter().cloned());
        self.invalid_queues
            .extend(divergence.invalid_queues.iter().cloned());

        for (source, destination) in &divergence.missing_bindings {
            self.missing_bindings
                .entry(source.clone())
                .or_default()
                .insert(destination.clone());
        }
        for (source, destination) in &divergence.invalid_bindings {
            self.invalid_bindings
                .entry(source.clone())
                .or_default()
                .insert(destination.clone());
        }
    }
}

#[cfg(test)]
#[path = "outage_tests.rs"]
mod tests;
