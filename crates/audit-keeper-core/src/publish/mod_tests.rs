//! Tests for the acknowledged publisher.

use super::*;
use crate::audit::AuditParameters;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

fn params(audit_id: &str) -> AuditParameters {
    let mut map = HashMap::new();
    map.insert("auditUserDN".to_string(), "cn=user".to_string());
    map.insert("query".to_string(), "FOO == 'bar'".to_string());
    map.insert("auths".to_string(), "PUBLIC".to_string());
    map.insert("auditType".to_string(), "ACTIVE".to_string());
    map.insert("auditColumnVisibility".to_string(), "PUBLIC".to_string());
    map.insert("auditId".to_string(), audit_id.to_string());
    AuditParameters::from_map(&map).unwrap()
}

struct FixedHealth(AtomicBool);

#[async_trait]
impl BrokerHealth for FixedHealth {
    async fn is_healthy(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Verify that an auto-confirmed publish succeeds
#[tokio::test]
async fn test_publish_succeeds_when_confirmed() {
    // Arrange
    let confirms = PendingConfirms::new();
    let transport = InMemoryTransport::new().with_auto_confirm(confirms.clone());
    let publisher =
        AuditPublisher::new(Arc::new(transport.clone()), confirms.clone(), ConfirmConfig::default());

    // Act
    let result = publisher.publish(&params("a-1")).await;

    // Assert
    assert!(result.is_ok());
    assert_eq!(transport.len(), 1);
    assert_eq!(transport.messages()[0].correlation_id(), Some("a-1"));
    assert!(confirms.is_empty());
}

/// Verify that a missing ack times out and cleans up the registration
#[tokio::test]
async fn test_publish_times_out_without_confirmation() {
    let confirms = PendingConfirms::new();
    let transport = InMemoryTransport::new();
    let publisher = AuditPublisher::new(
        Arc::new(transport),
        confirms.clone(),
        ConfirmConfig {
            enabled: true,
            timeout: Duration::from_millis(20),
        },
    );

    let result = publisher.publish(&params("a-2")).await;

    assert!(matches!(
        result,
        Err(PublishError::ConfirmTimeout { ref audit_id, timeout_ms: 20 }) if audit_id == "a-2"
    ));
    assert!(confirms.is_empty());
}

/// Verify that confirmation can be disabled
#[tokio::test]
async fn test_publish_without_confirmation_returns_after_send() {
    let transport = InMemoryTransport::new();
    let publisher = AuditPublisher::new(
        Arc::new(transport.clone()),
        PendingConfirms::new(),
        ConfirmConfig {
            enabled: false,
            ..ConfirmConfig::default()
        },
    );

    publisher.publish(&params("a-3")).await.unwrap();

    assert_eq!(transport.len(), 1);
}

/// Verify that an unhealthy broker is refused before sending
#[tokio::test]
async fn test_publish_refused_while_unhealthy() {
    let confirms = PendingConfirms::new();
    let transport = InMemoryTransport::new().with_auto_confirm(confirms.clone());
    let health = Arc::new(FixedHealth(AtomicBool::new(false)));
    let publisher = AuditPublisher::new(Arc::new(transport.clone()), confirms, ConfirmConfig::default())
        .with_health_gate(health.clone());

    let refused = publisher.publish(&params("a-4")).await;
    health.0.store(true, Ordering::SeqCst);
    let accepted = publisher.publish(&params("a-5")).await;

    assert!(matches!(refused, Err(PublishError::BrokerUnhealthy { .. })));
    assert!(accepted.is_ok());
    assert_eq!(transport.len(), 1);
}

/// Verify that transport failures propagate and leave no registration
#[tokio::test]
async fn test_transport_failure_propagates() {
    let confirms = PendingConfirms::new();
    let transport = InMemoryTransport::new().with_auto_confirm(confirms.clone());
    transport.set_available(false);
    let publisher =
        AuditPublisher::new(Arc::new(transport), confirms.clone(), ConfirmConfig::default());

    let result = publisher.publish(&params("a-6")).await;

    assert!(matches!(result, Err(PublishError::Transport { .. })));
    assert!(result.unwrap_err().is_transient());
    assert!(confirms.is_empty());
}
