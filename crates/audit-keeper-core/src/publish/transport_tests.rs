//! Tests for message transports.

use super::*;
use crate::broker::ManagementApiConfig;
use std::collections::BTreeMap;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn message(audit_id: &str) -> AuditMessage {
    let mut audit_parameters = BTreeMap::new();
    audit_parameters.insert("auditId".to_string(), audit_id.to_string());
    AuditMessage { audit_parameters }
}

mod in_memory {
    use super::*;

    /// Verify that forwarded messages reach the consumer channel
    #[tokio::test]
    async fn test_messages_are_forwarded() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let transport = InMemoryTransport::new().with_forwarding(tx);

        transport.send(&message("m-1")).await.unwrap();

        let forwarded = rx.recv().await.unwrap();
        assert_eq!(forwarded.correlation_id(), Some("m-1"));
    }

    /// Verify that sends fail while unavailable and are not stored
    #[tokio::test]
    async fn test_unavailable_transport_rejects_messages() {
        let transport = InMemoryTransport::new();
        transport.set_available(false);

        let result = transport.send(&message("m-2")).await;

        assert!(result.is_err());
        assert!(transport.is_empty());
    }
}

mod management_api {
    use super::*;

    async fn transport_for(server: &MockServer, confirms: PendingConfirms) -> ManagementApiTransport {
        let client = ManagementApiClient::new(ManagementApiConfig {
            base_url: server.uri(),
            ..ManagementApiConfig::default()
        })
        .unwrap();
        ManagementApiTransport::new(client, "audit", "audit").with_confirms(confirms)
    }

    /// Verify that a routed publish confirms the waiter
    #[tokio::test]
    async fn test_routed_publish_confirms() {
        // Arrange
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/exchanges/%2F/audit/publish"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"routed": true})))
            .mount(&server)
            .await;
        let confirms = PendingConfirms::new();
        let transport = transport_for(&server, confirms.clone()).await;
        let mut waiter = confirms.register("m-3");

        // Act
        transport.send(&message("m-3")).await.unwrap();

        // Assert
        assert_eq!(waiter.wait().await, Some(true));
    }

    /// Verify that an unrouted publish is an error
    #[tokio::test]
    async fn test_unrouted_publish_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/exchanges/%2F/audit/publish"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"routed": false})))
            .mount(&server)
            .await;
        let confirms = PendingConfirms::new();
        let transport = transport_for(&server, confirms.clone()).await;
        let mut waiter = confirms.register("m-4");

        let result = transport.send(&message("m-4")).await;

        assert!(matches!(result, Err(PublishError::NotRouted { .. })));
        assert_eq!(waiter.wait().await, Some(false));
    }
}
