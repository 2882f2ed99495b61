//! Tests for the intake retry loop.

use super::*;
use crate::publish::{MockRecordPublisher, PublishError};
use crate::sink::{MockAuditSink, SinkError};
use std::collections::HashMap;
use std::time::Duration;

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

fn quick_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::fixed(max_attempts, Duration::from_millis(1), Duration::from_secs(30))
}

fn timeout(audit_id: &str) -> PublishError {
    PublishError::ConfirmTimeout {
        audit_id: audit_id.to_string(),
        timeout_ms: 10,
    }
}

mod retries {
    use super::*;

    /// Verify that a first-attempt success publishes once
    #[tokio::test]
    async fn test_first_attempt_success() {
        // Arrange
        let mut publisher = MockRecordPublisher::new();
        publisher.expect_publish().times(1).returning(|_| Ok(()));
        let intake = AuditIntake::new(Arc::new(publisher), quick_policy(3));

        // Act
        let delivery = intake.audit(&params("i-1")).await.unwrap();

        // Assert
        assert_eq!(delivery, Delivery::Published);
    }

    /// Verify that transient failures are retried until one succeeds
    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let mut publisher = MockRecordPublisher::new();
        let mut seq = mockall::Sequence::new();
        publisher
            .expect_publish()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|p| Err(timeout(&p.audit_id)));
        publisher
            .expect_publish()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        let intake = AuditIntake::new(Arc::new(publisher), quick_policy(5));

        let delivery = intake.audit(&params("i-2")).await.unwrap();

        assert_eq!(delivery, Delivery::Published);
    }

    /// Verify that a permanent failure is not retried
    #[tokio::test]
    async fn test_permanent_failure_stops_retrying() {
        let mut publisher = MockRecordPublisher::new();
        publisher.expect_publish().times(1).returning(|_| {
            Err(PublishError::Serialization {
                message: "bad".to_string(),
            })
        });
        let intake = AuditIntake::new(Arc::new(publisher), quick_policy(5));

        let err = intake.audit(&params("i-3")).await.unwrap_err();

        assert_eq!(err.attempts, 1);
    }

    /// Verify the error message once every attempt fails without a fallback
    #[tokio::test]
    async fn test_exhaustion_without_fallback_fails() {
        let mut publisher = MockRecordPublisher::new();
        publisher
            .expect_publish()
            .times(3)
            .returning(|p| Err(timeout(&p.audit_id)));
        let intake = AuditIntake::new(Arc::new(publisher), quick_policy(3));

        let err = intake.audit(&params("i-4")).await.unwrap_err();

        assert_eq!(err.attempts, 3);
        assert_eq!(
            err.to_string(),
            "Unable to process audit message with id [i-4]"
        );
    }
}

mod fallback {
    use super::*;

    /// Verify that an exhausted record is written to the fallback sink
    #[tokio::test]
    async fn test_exhausted_record_goes_to_fallback() {
        // Arrange
        let mut publisher = MockRecordPublisher::new();
        publisher
            .expect_publish()
            .times(2)
            .returning(|p| Err(timeout(&p.audit_id)));
        let mut sink = MockAuditSink::new();
        sink.expect_audit()
            .withf(|p| p.audit_id == "i-5")
            .times(1)
            .returning(|_| Ok(()));
        let intake =
            AuditIntake::new(Arc::new(publisher), quick_policy(2)).with_fallback(Arc::new(sink));

        // Act
        let delivery = intake.audit(&params("i-5")).await.unwrap();

        // Assert
        assert_eq!(delivery, Delivery::Fallback);
    }

    /// Verify that a successful publish never touches the fallback
    #[tokio::test]
    async fn test_fallback_unused_on_success() {
        let mut publisher = MockRecordPublisher::new();
        publisher.expect_publish().returning(|_| Ok(()));
        let mut sink = MockAuditSink::new();
        sink.expect_audit().times(0);
        let intake =
            AuditIntake::new(Arc::new(publisher), quick_policy(2)).with_fallback(Arc::new(sink));

        intake.audit(&params("i-6")).await.unwrap();
    }

    /// Verify that a failing fallback surfaces the intake error
    #[tokio::test]
    async fn test_failing_fallback_is_an_error() {
        let mut publisher = MockRecordPublisher::new();
        publisher
            .expect_publish()
            .returning(|p| Err(timeout(&p.audit_id)));
        let mut sink = MockAuditSink::new();
        sink.expect_audit().returning(|_| {
            Err(SinkError::Io {
                path: "/audit".to_string(),
                message: "disk full".to_string(),
            })
        });
        let intake =
            AuditIntake::new(Arc::new(publisher), quick_policy(1)).with_fallback(Arc::new(sink));

        let err = intake.audit(&params("i-7")).await.unwrap_err();

        assert_eq!(err.audit_id, "i-7");
        assert!(err.last_error.contains("disk full"));
    }
}
