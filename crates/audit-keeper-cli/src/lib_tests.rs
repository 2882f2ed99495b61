//! Tests for the audit-keeper-cli library module.

use super::*;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn parse(args: &[&str]) -> Cli {
    Cli::try_parse_from(args).unwrap()
}

async fn run(server: &MockServer, args: &[&str]) -> (Result<(), CliError>, String) {
    let uri = server.uri();
    let mut argv = vec!["audit-keeper", "--url", uri.as_str()];
    argv.extend_from_slice(args);
    let cli = Cli::try_parse_from(argv).unwrap();

    let mut out = Vec::new();
    let result = execute(cli, &mut out).await;
    (result, String::from_utf8(out).unwrap())
}

mod parsing {
    use super::*;

    /// Verify that a single replay id is accepted as the target
    #[test]
    fn test_single_target() {
        let cli = parse(&["audit-keeper", "replay", "stop", "01HZX3K9V6T7W8Y9Z0A1B2C3D4"]);

        match cli.command {
            Commands::Replay {
                action: ReplayCommands::Stop(target),
            } => {
                assert_eq!(target.id.as_deref(), Some("01HZX3K9V6T7W8Y9Z0A1B2C3D4"));
                assert!(!target.all);
            }
            other => panic!("Expected replay stop, got {:?}", other),
        }
    }

    /// Verify that an id and --all cannot be combined
    #[test]
    fn test_id_and_all_conflict() {
        let result = Cli::try_parse_from(["audit-keeper", "replay", "start", "abc", "--all"]);

        assert!(result.is_err());
    }

    /// Verify that a target is required
    #[test]
    fn test_target_required() {
        let result = Cli::try_parse_from(["audit-keeper", "replay", "delete"]);

        assert!(result.is_err());
    }

    /// Verify that create carries the send rate and the unfinished flag
    #[test]
    fn test_create_arguments() {
        let cli = parse(&[
            "audit-keeper",
            "replay",
            "create-and-start",
            "/data/audits",
            "--send-rate",
            "250",
            "--unfinished",
        ]);

        match cli.command {
            Commands::Replay {
                action: ReplayCommands::CreateAndStart(args),
            } => {
                assert_eq!(args.path_uri, "/data/audits");
                assert_eq!(args.send_rate, 250);
                assert!(args.unfinished);
            }
            other => panic!("Expected create-and-start, got {:?}", other),
        }
    }

    /// Verify that negative rates reach the service for validation
    #[test]
    fn test_negative_send_rate_parses() {
        let cli = parse(&["audit-keeper", "replay", "update", "--all", "-r", "-5"]);

        match cli.command {
            Commands::Replay {
                action: ReplayCommands::Update { target, send_rate },
            } => {
                assert!(target.all);
                assert_eq!(send_rate, -5);
            }
            other => panic!("Expected update, got {:?}", other),
        }
    }

    /// Verify the global defaults
    #[test]
    fn test_defaults() {
        let cli = parse(&["audit-keeper", "health"]);

        assert_eq!(cli.url, "http://localhost:8080");
        assert_eq!(cli.timeout, 30);
        assert_eq!(cli.format, OutputFormat::Text);
        assert!(matches!(
            cli.command,
            Commands::Health {
                component: HealthComponent::Overall
            }
        ));
    }
}

mod execution {
    use super::*;

    /// Verify that create prints the id returned by the service
    #[tokio::test]
    async fn test_create_prints_id() {
        // Arrange
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/replay/create"))
            .and(body_string_contains("sendRate=10"))
            .respond_with(ResponseTemplate::new(200).set_body_string("01HZX3K9V6T7W8Y9Z0A1B2C3D4"))
            .expect(1)
            .mount(&server)
            .await;

        // Act
        let (result, out) = run(&server, &["replay", "create", "/data", "-r", "10"]).await;

        // Assert
        result.unwrap();
        assert_eq!(out.trim(), "01HZX3K9V6T7W8Y9Z0A1B2C3D4");
    }

    /// Verify that a rejected bulk command fails after printing the outcome
    #[tokio::test]
    async fn test_stop_all_partial_failure() {
        // Arrange
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/replay/stopAll"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "succeeded": ["a"],
                "failed": { "b": "Cannot stop audit replay with id b in state FINISHED" }
            })))
            .mount(&server)
            .await;

        // Act
        let (result, out) = run(&server, &["replay", "stop", "--all"]).await;

        // Assert
        assert!(matches!(
            result,
            Err(CliError::PartialFailure {
                failed: 1,
                total: 2
            })
        ));
        assert!(out.contains("Succeeded: 1"));
        assert!(out.contains("Failed: 1"));
    }

    /// Verify that service errors surface the message from the error body
    #[tokio::test]
    async fn test_service_error_message() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/replay/missing/resume"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "error": "No audit replay found with id missing",
                "status": 404,
                "timestamp": "2026-01-01T00:00:00Z"
            })))
            .mount(&server)
            .await;

        let (result, _) = run(&server, &["replay", "resume", "missing"]).await;

        match result {
            Err(CliError::Api { status, message }) => {
                assert_eq!(status, 404);
                assert_eq!(message, "No audit replay found with id missing");
            }
            other => panic!("Expected API error, got {:?}", other),
        }
    }

    /// Verify that an unhealthy service fails the health command
    #[tokio::test]
    async fn test_health_down() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health/broker"))
            .respond_with(
                ResponseTemplate::new(503).set_body_json(serde_json::json!({ "status": "DOWN" })),
            )
            .mount(&server)
            .await;

        let (result, out) = run(&server, &["health", "broker"]).await;

        assert!(matches!(result, Err(CliError::Unhealthy)));
        assert!(out.starts_with("DOWN (503)"));
    }

    /// Verify that completions are generated without contacting the service
    #[tokio::test]
    async fn test_completions() {
        let cli = parse(&["audit-keeper", "completions", "bash"]);
        let mut out = Vec::new();

        execute(cli, &mut out).await.unwrap();

        assert!(String::from_utf8(out).unwrap().contains("audit-keeper"));
    }
}
