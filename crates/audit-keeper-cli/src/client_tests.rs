use super::*;
use audit_keeper_core::{ReplayId, ReplayState};
use wiremock::matchers::{body_string, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> ReplayClient {
    ReplayClient::new(&server.uri(), Duration::from_secs(5)).unwrap()
}

fn sample_status() -> ReplayStatus {
    ReplayStatus::new(
        ReplayId::new(),
        "/data/audits",
        100,
        vec!["/data/audits/audit-1.json".to_string()],
        false,
    )
}

mod construction {
    use super::*;

    /// Verify that a base URL with a path prefix keeps the prefix
    #[test]
    fn test_base_path_preserved() {
        let client = ReplayClient::new("http://host:8080/audit", Duration::from_secs(1)).unwrap();

        assert_eq!(client.base_url().as_str(), "http://host:8080/audit/");
    }

    /// Verify that an unparseable URL is an argument error
    #[test]
    fn test_invalid_url() {
        let result = ReplayClient::new("not a url", Duration::from_secs(1));

        assert!(matches!(result, Err(CliError::InvalidArgument { .. })));
    }
}

mod single {
    use super::*;

    /// Verify the create form fields
    #[tokio::test]
    async fn test_create_and_start_form() {
        // Arrange
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/replay/createAndStart"))
            .and(body_string(
                "pathUri=%2Fdata&sendRate=5&replayUnfinishedFiles=true",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_string("id-1\n"))
            .expect(1)
            .mount(&server)
            .await;

        // Act
        let id = client(&server).create("/data", 5, true, true).await.unwrap();

        // Assert
        assert_eq!(id, "id-1");
    }

    /// Verify that status decodes the replay JSON
    #[tokio::test]
    async fn test_status_decodes() {
        let server = MockServer::start().await;
        let status = sample_status();
        Mock::given(method("GET"))
            .and(path(format!("/v1/replay/{}/status", status.id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(&status))
            .mount(&server)
            .await;

        let decoded = client(&server)
            .status(&status.id.to_string())
            .await
            .unwrap();

        assert_eq!(decoded, status);
        assert_eq!(decoded.state, ReplayState::Created);
    }

    /// Verify that update sends the rate as a form field
    #[tokio::test]
    async fn test_update_form() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/replay/abc/update"))
            .and(body_string("sendRate=42"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        client(&server).update("abc", 42).await.unwrap();
    }

    /// Verify that a conflict without a JSON body keeps the raw text
    #[tokio::test]
    async fn test_plain_text_error() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v1/replay/abc/delete"))
            .respond_with(ResponseTemplate::new(409).set_body_string("busy"))
            .mount(&server)
            .await;

        let result = client(&server).delete("abc").await;

        match result {
            Err(CliError::Api { status, message }) => {
                assert_eq!(status, 409);
                assert_eq!(message, "busy");
            }
            other => panic!("Expected API error, got {:?}", other),
        }
    }
}

mod bulk {
    use super::*;

    /// Verify that each bulk control maps to its route
    #[tokio::test]
    async fn test_control_all_routes() {
        let server = MockServer::start().await;
        for route in ["startAll", "stopAll", "resumeAll"] {
            Mock::given(method("PUT"))
                .and(path(format!("/v1/replay/{}", route)))
                .respond_with(ResponseTemplate::new(200).set_body_json(BulkOutcome::default()))
                .expect(1)
                .mount(&server)
                .await;
        }
        let client = client(&server);

        for action in [ControlAction::Start, ControlAction::Stop, ControlAction::Resume] {
            let outcome = client.control_all(action).await.unwrap();
            assert!(outcome.is_success());
        }
    }

    /// Verify that status_all decodes an array
    #[tokio::test]
    async fn test_status_all() {
        let server = MockServer::start().await;
        let statuses = vec![sample_status(), sample_status()];
        Mock::given(method("GET"))
            .and(path("/v1/replay/statusAll"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&statuses))
            .mount(&server)
            .await;

        let decoded = client(&server).status_all().await.unwrap();

        assert_eq!(decoded, statuses);
    }
}

mod health {
    use super::*;

    /// Verify that an unhealthy answer is reported rather than raised
    #[tokio::test]
    async fn test_unhealthy_is_not_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health/ready"))
            .respond_with(
                ResponseTemplate::new(503).set_body_json(serde_json::json!({ "ready": false })),
            )
            .mount(&server)
            .await;

        let report = client(&server)
            .health(HealthComponent::Ready)
            .await
            .unwrap();

        assert!(!report.healthy);
        assert_eq!(report.status, 503);
        assert_eq!(report.body["ready"], serde_json::json!(false));
    }
}
