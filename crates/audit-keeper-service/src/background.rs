//! Long-running service tasks: broker health polling, replay housekeeping and
//! the audit consumers.

use crate::wiring::{ConsumerFeed, Service};
use audit_keeper_api::ServiceMetrics;
use audit_keeper_core::{AuditMessage, BrokerTopologyChecker, FileAuditSink, ReplayScheduler};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Start every background loop; each ends when `cancel` fires
pub fn spawn_all(service: &mut Service, cancel: CancellationToken) -> JoinSet<()> {
    let mut tasks = JoinSet::new();

    tasks.spawn(health_poll_loop(
        service.state.broker_health.clone(),
        service.state.metrics.clone(),
        cancel.clone(),
    ));
    tasks.spawn(housekeeping_loop(
        service.state.scheduler.clone(),
        service.file_sinks.clone(),
        service.housekeeping_interval,
        cancel.clone(),
    ));

    if let Some(feed) = service.feed.take() {
        spawn_consumers(&mut tasks, feed, cancel);
    }

    tasks
}

/// Poll the broker topology, repairing it when recovery is enabled.
///
/// The sleep between polls comes from the checker: short while unhealthy,
/// long while healthy.
pub async fn health_poll_loop(
    checker: Arc<BrokerTopologyChecker>,
    metrics: Arc<ServiceMetrics>,
    cancel: CancellationToken,
) {
    info!("Broker health polling started");
    loop {
        if !checker.run_health_check().await {
            checker.recover().await;
        }
        metrics.set_broker_healthy(checker.is_healthy().await);

        let wait = checker.poll_interval().await;
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }
    }
    info!("Broker health polling stopped");
}

/// Evict idle finished replays, stop abandoned running ones and publish
/// sink files that have outlived their age limit
pub async fn housekeeping_loop(
    scheduler: Arc<ReplayScheduler>,
    file_sinks: Vec<Arc<FileAuditSink>>,
    every: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(every);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match scheduler.evict_idle().await {
            Ok(0) => {}
            Ok(evicted) => info!(evicted, "Evicted idle audit replays"),
            Err(e) => warn!(error = %e, "Idle replay eviction failed"),
        }
        match scheduler.sweep_stale_runs().await {
            Ok(0) => debug!("No stale audit replays"),
            Ok(swept) => warn!(swept, "Stopped stale audit replays"),
            Err(e) => error!(error = %e, "Stale replay sweep failed"),
        }
        for sink in &file_sinks {
            match sink.rotate_expired().await {
                Ok(true) => debug!(directory = %sink.directory().display(), "Rotated expired audit file"),
                Ok(false) => {}
                Err(e) => warn!(directory = %sink.directory().display(), error = %e, "Audit file rotation failed"),
            }
        }
    }
}

fn spawn_consumers(tasks: &mut JoinSet<()>, feed: ConsumerFeed, cancel: CancellationToken) {
    let mut senders = Vec::with_capacity(feed.consumers.len());
    for consumer in feed.consumers {
        let (sender, receiver) = mpsc::unbounded_channel();
        senders.push(sender);
        tasks.spawn(consumer.run(receiver, cancel.clone()));
    }
    tasks.spawn(fan_out(feed.receiver, senders, cancel));
}

/// Copy every delivered message to each consumer
pub async fn fan_out(
    mut receiver: mpsc::UnboundedReceiver<AuditMessage>,
    senders: Vec<mpsc::UnboundedSender<AuditMessage>>,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            message = receiver.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        for sender in &senders {
            if sender.send(message.clone()).is_err() {
                warn!(
                    audit_id = message.correlation_id().unwrap_or("unknown"),
                    "Audit consumer has stopped; message not delivered to it"
                );
            }
        }
    }
}

#[cfg(test)]
#[path = "background_tests.rs"]
mod tests;
