use super::*;
use audit_keeper_core::{FileState, ReplayId, ReplayState};
use std::collections::BTreeMap;

fn status_with_files() -> ReplayStatus {
    let mut status = ReplayStatus::new(
        ReplayId::new(),
        "/data/audits",
        100,
        vec![
            "/data/audits/audit-1.json".to_string(),
            "/data/audits/audit-2.json".to_string(),
        ],
        false,
    );
    status.state = ReplayState::Running;
    status.files[0].state = FileState::Finished;
    status.files[0].lines_read = 7;
    status.files[0].audits_sent = 6;
    status.files[0].parse_failures = 1;
    status
}

mod status {
    use super::*;

    /// Verify that text status lists every file with its counters
    #[test]
    fn test_text_lists_files() {
        let status = status_with_files();

        let text = render_status(&status, OutputFormat::Text).unwrap();

        assert!(text.contains("State    RUNNING"));
        assert!(text.contains("Rate     100/s"));
        assert!(text.contains("read=7 sent=6 failed=0 parse_failures=1"));
        assert!(text.contains("QUEUED"));
    }

    /// Verify that JSON status uses the service field names
    #[test]
    fn test_json_matches_service_shape() {
        let status = status_with_files();

        let json = render_status(&status, OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["state"], "RUNNING");
        assert_eq!(value["sendRate"], 100);
        assert_eq!(value["files"][0]["linesRead"], 7);
    }

    /// Verify the summary line counts finished files
    #[test]
    fn test_status_all_summary() {
        let statuses = vec![status_with_files()];

        let text = render_statuses(&statuses, OutputFormat::Text).unwrap();

        assert!(text.contains("RUNNING"));
        assert!(text.contains("1/2 files"));
        assert!(text.ends_with("/data/audits"));
    }

    /// Verify that an empty list is reported in words
    #[test]
    fn test_status_all_empty() {
        assert_eq!(
            render_statuses(&[], OutputFormat::Text).unwrap(),
            "No audit replays"
        );
        assert_eq!(render_statuses(&[], OutputFormat::Json).unwrap(), "[]");
    }
}

mod bulk {
    use super::*;

    /// Verify that failures carry their reasons
    #[test]
    fn test_failures_listed() {
        let mut failed = BTreeMap::new();
        failed.insert("b".to_string(), "busy".to_string());
        let outcome = BulkOutcome {
            succeeded: vec!["a".to_string()],
            failed,
        };

        let text = render_bulk(&outcome, OutputFormat::Text).unwrap();

        assert_eq!(text, "Succeeded: 1\n  a\nFailed: 1\n  b: busy");
    }

    /// Verify that a clean outcome omits the failure section
    #[test]
    fn test_clean_outcome() {
        let text = render_bulk(&BulkOutcome::default(), OutputFormat::Text).unwrap();

        assert_eq!(text, "Succeeded: 0");
    }
}

mod acknowledgements {
    use super::*;

    /// Verify the created and accepted messages in both formats
    #[test]
    fn test_created_and_ack() {
        assert_eq!(render_created("x", OutputFormat::Text).unwrap(), "x");
        assert!(render_created("x", OutputFormat::Json)
            .unwrap()
            .contains("\"id\": \"x\""));
        assert_eq!(
            render_ack("x", "stop", OutputFormat::Text).unwrap(),
            "Audit replay x: stop accepted"
        );
    }

    /// Verify that health text shows the verdict and fields
    #[test]
    fn test_health_text() {
        let report = HealthReport {
            healthy: true,
            status: 200,
            body: serde_json::json!({ "status": "UP", "localReplays": 2 }),
        };

        let text = render_health(&report, OutputFormat::Text).unwrap();

        assert!(text.starts_with("UP (200)"));
        assert!(text.contains("localReplays: 2"));
    }
}
