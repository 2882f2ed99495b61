//! Builds the service object graph from configuration.

use audit_keeper_api::{
    AppState, ServiceConfig, ServiceError, ServiceMetrics, StatusStoreBackend, TransportMode,
};
use audit_keeper_core::{
    replay::{HttpCommandBus, NoopCommandBus},
    AuditIntake, AuditMessage, AuditMessageConsumer, AuditPublisher, AuditSink,
    BrokerConnector, BrokerTopologyChecker, FileAuditSink, FilesystemStatusStore,
    InMemoryBroker, InMemoryStatusStore, InMemoryTransport, LogAuditSink, ManagementApiClient,
    ManagementApiConnector, ManagementApiTransport, MessageTransport, PendingConfirms,
    RemoteCommandBus, ReplayScheduler, StaticConnector, StatusStore,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Messages delivered by the in-memory transport and the consumers reading them
pub struct ConsumerFeed {
    pub receiver: mpsc::UnboundedReceiver<AuditMessage>,
    pub consumers: Vec<AuditMessageConsumer>,
}

/// Everything the running service needs
pub struct Service {
    pub state: AppState,
    pub housekeeping_interval: std::time::Duration,

    /// Taken by the background loops when started
    pub feed: Option<ConsumerFeed>,

    /// Dump and fallback sinks, rotated by housekeeping
    pub file_sinks: Vec<Arc<FileAuditSink>>,
}

impl Service {
    /// Rename partially written sink files so they become replayable
    pub async fn close_sinks(&self) {
        for sink in &self.file_sinks {
            if let Err(e) = sink.close().await {
                warn!(directory = %sink.directory().display(), error = %e, "Failed to close audit file sink");
            }
        }
    }
}

fn startup_error(what: &str, error: impl std::fmt::Display) -> ServiceError {
    ServiceError::StartupFailed {
        message: format!("{}: {}", what, error),
    }
}

/// Construct stores, transports, the checker, the intake and the scheduler
pub async fn build(config: ServiceConfig) -> Result<Service, ServiceError> {
    let metrics = ServiceMetrics::new().map_err(|e| startup_error("metrics", e))?;

    // -------------------------------------------------------------------------
    // Replay status store
    // -------------------------------------------------------------------------
    let store: Arc<dyn StatusStore> = match config.status_store.backend {
        StatusStoreBackend::Memory => Arc::new(InMemoryStatusStore::new()),
        StatusStoreBackend::Filesystem => Arc::new(
            FilesystemStatusStore::new(config.status_store.directory.clone())
                .await
                .map_err(|e| startup_error("status store", e))?,
        ),
    };
    info!(backend = ?config.status_store.backend, "Replay status store ready");

    // -------------------------------------------------------------------------
    // Consumer side sinks, fed only by the in-memory transport
    // -------------------------------------------------------------------------
    let mut file_sinks = Vec::new();
    let mut consumers = Vec::new();
    if config.dump.enabled {
        let sink = Arc::new(
            FileAuditSink::new(config.dump.to_settings())
                .await
                .map_err(|e| startup_error("dump sink", e))?,
        );
        file_sinks.push(sink.clone());
        consumers.push(AuditMessageConsumer::new("dump", sink));
    }
    if config.log_sink.enabled {
        consumers.push(AuditMessageConsumer::new(
            "log",
            Arc::new(LogAuditSink::new()) as Arc<dyn AuditSink>,
        ));
    }

    // -------------------------------------------------------------------------
    // Broker transport and topology checker
    // -------------------------------------------------------------------------
    let confirms = PendingConfirms::new();
    let mut feed = None;
    let (transport, connector): (Arc<dyn MessageTransport>, Arc<dyn BrokerConnector>) =
        match config.broker.transport {
            TransportMode::Memory => {
                let mut transport = InMemoryTransport::new().with_auto_confirm(confirms.clone());
                if !consumers.is_empty() {
                    let (sender, receiver) = mpsc::unbounded_channel();
                    transport = transport.with_forwarding(sender);
                    feed = Some(ConsumerFeed {
                        receiver,
                        consumers: std::mem::take(&mut consumers),
                    });
                }
                let broker = InMemoryBroker::new(config.health.expected_nodes);
                (
                    Arc::new(transport) as Arc<dyn MessageTransport>,
                    Arc::new(StaticConnector::new(Arc::new(broker))) as Arc<dyn BrokerConnector>,
                )
            }
            TransportMode::ManagementApi => {
                if !consumers.is_empty() {
                    warn!("Consumer sinks are only fed by the in-memory transport; ignoring them");
                }
                let client = ManagementApiClient::new(config.broker.management.clone())
                    .map_err(|e| startup_error("broker client", e))?;
                let transport = ManagementApiTransport::new(
                    client,
                    config.broker.exchange.clone(),
                    config.broker.routing_key.clone(),
                )
                .with_confirms(confirms.clone());
                (
                    Arc::new(transport) as Arc<dyn MessageTransport>,
                    Arc::new(ManagementApiConnector::new(config.broker.management.clone()))
                        as Arc<dyn BrokerConnector>,
                )
            }
        };
    info!(transport = ?config.broker.transport, exchange = %config.broker.exchange, "Broker transport ready");

    let checker = Arc::new(BrokerTopologyChecker::new(config.health.clone(), connector));

    let publisher = Arc::new(
        AuditPublisher::new(transport, confirms, config.audit.confirm.clone())
            .with_health_gate(checker.clone()),
    );

    // -------------------------------------------------------------------------
    // Intake with the fallback file sink
    // -------------------------------------------------------------------------
    let mut intake = AuditIntake::new(publisher.clone(), config.audit.retry.clone());
    if config.file_sink.enabled {
        let sink = Arc::new(
            FileAuditSink::new(config.file_sink.to_settings())
                .await
                .map_err(|e| startup_error("fallback sink", e))?,
        );
        file_sinks.push(sink.clone());
        intake = intake.with_fallback(sink);
    }

    // -------------------------------------------------------------------------
    // Replay scheduler and peer command bus
    // -------------------------------------------------------------------------
    let bus: Arc<dyn RemoteCommandBus> = if config.cluster.peers.is_empty() {
        Arc::new(NoopCommandBus)
    } else {
        info!(peers = config.cluster.peers.len(), "Broadcasting replay commands to peers");
        Arc::new(
            HttpCommandBus::new(&config.cluster.peers, config.cluster.request_timeout())
                .map_err(|e| startup_error("cluster peers", e))?,
        )
    };
    let scheduler = Arc::new(
        ReplayScheduler::new(store, publisher, config.replay.clone()).with_command_bus(bus),
    );

    let housekeeping_interval = config.replay.sweep_interval;
    let state = AppState::new(config, Arc::new(intake), scheduler, checker, metrics);

    Ok(Service {
        state,
        housekeeping_interval,
        feed,
        file_sinks,
    })
}

#[cfg(test)]
#[path = "wiring_tests.rs"]
mod tests;
