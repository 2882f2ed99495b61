//! Common test utilities for audit-keeper-api integration tests
//!
//! This module provides:
//! - An instance builder wiring a real scheduler, intake and checker behind
//!   the router
//! - Request helpers for form, JSON and empty requests
//! - Audit file writers and status polling helpers

#![allow(dead_code)]

use audit_keeper_api::{create_router, AppState, ServiceConfig, ServiceMetrics};
use audit_keeper_core::{
    AuditIntake, AuditPublisher, BrokerTopologyChecker, ConfirmConfig, FileAuditSink,
    InMemoryBroker, InMemoryTransport, PendingConfirms, RemoteCommandBus, ReplayConfig,
    ReplayScheduler, RetryPolicy, StaticConnector, StatusStore, TopologyConfig,
};
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

// ============================================================================
// Instance
// ============================================================================

/// One service instance driven through its router
pub struct Instance {
    pub router: Router,
    pub scheduler: Arc<ReplayScheduler>,
    pub transport: InMemoryTransport,
    pub broker: InMemoryBroker,
    pub checker: Arc<BrokerTopologyChecker>,
    pub metrics: Arc<ServiceMetrics>,
}

pub struct InstanceBuilder {
    store: Arc<dyn StatusStore>,
    bus: Option<Arc<dyn RemoteCommandBus>>,
    topology: TopologyConfig,
    replay: ReplayConfig,
    fallback: Option<Arc<FileAuditSink>>,
    health_gate: bool,
}

impl InstanceBuilder {
    pub fn new(store: Arc<dyn StatusStore>) -> Self {
        Self {
            store,
            bus: None,
            topology: TopologyConfig::default(),
            replay: ReplayConfig {
                flush_interval_lines: 1,
                ..ReplayConfig::default()
            },
            fallback: None,
            health_gate: false,
        }
    }

    pub fn with_bus(mut self, bus: Arc<dyn RemoteCommandBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_topology(mut self, topology: TopologyConfig) -> Self {
        self.topology = topology;
        self
    }

    pub fn with_fallback(mut self, sink: Arc<FileAuditSink>) -> Self {
        self.fallback = Some(sink);
        self
    }

    /// Refuse publishes while the checker reports the broker unhealthy
    pub fn with_health_gate(mut self) -> Self {
        self.health_gate = true;
        self
    }

    pub fn build(self) -> Instance {
        let confirms = PendingConfirms::new();
        let transport = InMemoryTransport::new().with_auto_confirm(confirms.clone());
        let broker = InMemoryBroker::new(self.topology.expected_nodes);
        let checker = Arc::new(BrokerTopologyChecker::new(
            self.topology,
            Arc::new(StaticConnector::new(Arc::new(broker.clone()))),
        ));

        let mut publisher = AuditPublisher::new(
            Arc::new(transport.clone()),
            confirms,
            ConfirmConfig {
                enabled: true,
                timeout: Duration::from_millis(500),
            },
        );
        if self.health_gate {
            publisher = publisher.with_health_gate(checker.clone());
        }
        let publisher = Arc::new(publisher);

        let mut intake = AuditIntake::new(
            publisher.clone(),
            RetryPolicy::fixed(2, Duration::from_millis(5), Duration::from_secs(1)),
        );
        if let Some(sink) = self.fallback {
            intake = intake.with_fallback(sink);
        }

        let mut scheduler = ReplayScheduler::new(self.store, publisher, self.replay);
        if let Some(bus) = self.bus {
            scheduler = scheduler.with_command_bus(bus);
        }
        let scheduler = Arc::new(scheduler);

        let metrics = ServiceMetrics::new().unwrap();
        let state = AppState::new(
            ServiceConfig::default(),
            Arc::new(intake),
            scheduler.clone(),
            checker.clone(),
            metrics.clone(),
        );

        Instance {
            router: create_router(state),
            scheduler,
            transport,
            broker,
            checker,
            metrics,
        }
    }
}

// ============================================================================
// Requests
// ============================================================================

pub fn form(method: Method, uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn json(method: Method, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn empty(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub async fn send(router: &Router, request: Request<Body>) -> (StatusCode, String) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

pub fn parse(body: &str) -> Value {
    serde_json::from_str(body).unwrap()
}

// ============================================================================
// Replay fixtures
// ============================================================================

pub fn audit_line(tag: &str, n: usize) -> String {
    format!(
        "{{\"auditId\":\"{tag}-{n}\",\"auditUserDN\":\"cn=user{n}\",\"query\":\"FIELD == '{n}'\",\
\"auths\":\"PUBLIC\",\"auditType\":\"ACTIVE\",\"auditColumnVisibility\":\"PUBLIC\"}}"
    )
}

pub async fn write_audit_file(dir: &Path, name: &str, tag: &str, lines: usize) {
    let content: String = (0..lines)
        .map(|n| format!("{}\n", audit_line(tag, n)))
        .collect();
    tokio::fs::write(dir.join(name), content).await.unwrap();
}

pub fn create_form(dir: &Path, send_rate: i64) -> String {
    let path: String =
        url::form_urlencoded::byte_serialize(dir.to_string_lossy().as_bytes()).collect();
    format!("pathUri={}&sendRate={}", path, send_rate)
}

pub async fn create(router: &Router, dir: &Path, send_rate: i64, start: bool) -> String {
    let route = if start {
        "/v1/replay/createAndStart"
    } else {
        "/v1/replay/create"
    };
    let (status, id) = send(router, form(Method::POST, route, &create_form(dir, send_rate))).await;
    assert_eq!(status, StatusCode::OK, "create failed: {}", id);
    id
}

pub async fn status(router: &Router, id: &str) -> Value {
    let (code, body) = send(router, empty(Method::GET, &format!("/v1/replay/{id}/status"))).await;
    assert_eq!(code, StatusCode::OK, "status failed: {}", body);
    parse(&body)
}

/// Poll the status endpoint until `predicate` holds
pub async fn wait_for<F>(router: &Router, id: &str, predicate: F) -> Value
where
    F: Fn(&Value) -> bool,
{
    for _ in 0..1000 {
        let current = status(router, id).await;
        if predicate(&current) {
            return current;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("replay {id} never reached the expected status");
}

pub async fn wait_for_state(router: &Router, id: &str, state: &str) -> Value {
    wait_for(router, id, |s| s["state"] == state).await
}

/// Wait until the scheduler has no workers for any job
pub async fn wait_until_idle(scheduler: &ReplayScheduler) {
    for _ in 0..1000 {
        if scheduler.local_jobs() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("replay workers never stopped");
}

pub async fn file_names(dir: &Path) -> Vec<String> {
    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await.unwrap();
    while let Some(entry) = entries.next_entry().await.unwrap() {
        names.push(entry.file_name().to_string_lossy().to_string());
    }
    names.sort();
    names
}

pub fn sent_ids(transport: &InMemoryTransport) -> Vec<String> {
    let mut ids: Vec<String> = transport
        .messages()
        .iter()
        .filter_map(|m| m.correlation_id().map(str::to_string))
        .collect();
    ids.sort();
    ids
}
