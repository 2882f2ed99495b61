//! Metrics collection for the API service.
//!
//! Each [`ServiceMetrics`] owns its own [`Registry`] so several instances can
//! coexist in one process (tests build one per router).

use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

/// Service metrics for observability
#[derive(Debug)]
pub struct ServiceMetrics {
    registry: Registry,

    // HTTP request metrics
    pub http_requests_total: IntCounterVec,
    pub http_request_duration: Histogram,

    // Intake metrics
    pub audit_requests_total: IntCounter,
    pub audit_failures_total: IntCounter,
    pub audit_fallback_total: IntCounter,

    // Replay control metrics
    pub replay_operations_total: IntCounterVec,
    pub replay_operation_failures_total: IntCounterVec,

    // Broker health
    pub broker_healthy: IntGauge,
}

impl ServiceMetrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new_custom(Some("audit_keeper".to_string()), None)?;

        let http_requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "Total number of HTTP requests"),
            &["method", "status"],
        )?;
        let http_request_duration = Histogram::with_opts(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "HTTP request processing time",
            )
            .buckets(vec![0.001, 0.01, 0.1, 1.0, 10.0]),
        )?;
        let audit_requests_total =
            IntCounter::with_opts(Opts::new("audit_requests_total", "Audit records received"))?;
        let audit_failures_total = IntCounter::with_opts(Opts::new(
            "audit_failures_total",
            "Audit records that could not be stored anywhere",
        ))?;
        let audit_fallback_total = IntCounter::with_opts(Opts::new(
            "audit_fallback_total",
            "Audit records written to the fallback sink",
        ))?;
        let replay_operations_total = IntCounterVec::new(
            Opts::new("replay_operations_total", "Replay control operations"),
            &["action"],
        )?;
        let replay_operation_failures_total = IntCounterVec::new(
            Opts::new(
                "replay_operation_failures_total",
                "Replay control operations that were rejected or failed",
            ),
            &["action"],
        )?;
        let broker_healthy = IntGauge::with_opts(Opts::new(
            "broker_healthy",
            "1 when the broker topology is healthy, 0 otherwise",
        ))?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration.clone()))?;
        registry.register(Box::new(audit_requests_total.clone()))?;
        registry.register(Box::new(audit_failures_total.clone()))?;
        registry.register(Box::new(audit_fallback_total.clone()))?;
        registry.register(Box::new(replay_operations_total.clone()))?;
        registry.register(Box::new(replay_operation_failures_total.clone()))?;
        registry.register(Box::new(broker_healthy.clone()))?;

        #[cfg(target_os = "linux")]
        registry.register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))?;

        Ok(Arc::new(Self {
            registry,
            http_requests_total,
            http_request_duration,
            audit_requests_total,
            audit_failures_total,
            audit_fallback_total,
            replay_operations_total,
            replay_operation_failures_total,
            broker_healthy,
        }))
    }

    pub fn record_http_request(&self, method: &str, status: u16, duration: Duration) {
        self.http_requests_total
            .with_label_values(&[method, &status.to_string()])
            .inc();
        self.http_request_duration.observe(duration.as_secs_f64());
    }

    /// Record one intake request; `fallback` marks delivery to the fallback sink
    pub fn record_audit(&self, success: bool, fallback: bool) {
        self.audit_requests_total.inc();
        if !success {
            self.audit_failures_total.inc();
        } else if fallback {
            self.audit_fallback_total.inc();
        }
    }

    pub fn record_replay_operation(&self, action: &str, success: bool) {
        self.replay_operations_total
            .with_label_values(&[action])
            .inc();
        if !success {
            self.replay_operation_failures_total
                .with_label_values(&[action])
                .inc();
        }
    }

    pub fn set_broker_healthy(&self, healthy: bool) {
        self.broker_healthy.set(i64::from(healthy));
    }

    /// Render every registered metric in the Prometheus text format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }
}
