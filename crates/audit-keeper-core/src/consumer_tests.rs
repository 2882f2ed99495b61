//! Tests for the audit message consumer.

use super::*;
use crate::sink::MockAuditSink;
use std::collections::BTreeMap;

fn message(audit_id: &str, audit_type: &str) -> AuditMessage {
    let mut audit_parameters = BTreeMap::new();
    audit_parameters.insert("auditUserDN".to_string(), "cn=user".to_string());
    audit_parameters.insert("query".to_string(), "FOO == 'bar'".to_string());
    audit_parameters.insert("auths".to_string(), "PUBLIC".to_string());
    audit_parameters.insert("auditType".to_string(), audit_type.to_string());
    audit_parameters.insert("auditColumnVisibility".to_string(), "PUBLIC".to_string());
    audit_parameters.insert("auditId".to_string(), audit_id.to_string());
    AuditMessage { audit_parameters }
}

/// Verify that active records reach the sink
#[tokio::test]
async fn test_active_record_is_dispatched() {
    // Arrange
    let mut sink = MockAuditSink::new();
    sink.expect_audit()
        .withf(|p| p.audit_id == "c-1")
        .times(1)
        .returning(|_| Ok(()));
    let consumer = AuditMessageConsumer::new("dump", Arc::new(sink));

    // Act
    let dispatched = consumer.handle(&message("c-1", "ACTIVE")).await.unwrap();

    // Assert
    assert!(dispatched);
}

/// Verify that NONE records are skipped
#[tokio::test]
async fn test_none_record_is_skipped() {
    let mut sink = MockAuditSink::new();
    sink.expect_audit().times(0);
    let consumer = AuditMessageConsumer::new("dump", Arc::new(sink));

    let dispatched = consumer.handle(&message("c-2", "NONE")).await.unwrap();

    assert!(!dispatched);
}

/// Verify that an invalid message is a validation error
#[tokio::test]
async fn test_invalid_message_is_rejected() {
    let sink = MockAuditSink::new();
    let consumer = AuditMessageConsumer::new("dump", Arc::new(sink));
    let mut invalid = message("c-3", "ACTIVE");
    invalid.audit_parameters.remove("query");

    let result = consumer.handle(&invalid).await;

    assert!(matches!(result, Err(AuditKeeperError::Validation(_))));
}

/// Verify that the run loop drains the channel and stops when it closes
#[tokio::test]
async fn test_run_consumes_until_channel_closes() {
    let mut sink = MockAuditSink::new();
    sink.expect_audit().times(2).returning(|_| Ok(()));
    let consumer = AuditMessageConsumer::new("log", Arc::new(sink));
    let (tx, rx) = mpsc::unbounded_channel();
    tx.send(message("c-4", "ACTIVE")).unwrap();
    tx.send(message("c-5", "PASSIVE")).unwrap();
    drop(tx);

    consumer.run(rx, CancellationToken::new()).await;
}
