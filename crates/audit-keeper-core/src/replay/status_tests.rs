//! Tests for replay status records.

use super::*;

fn two_file_status() -> ReplayStatus {
    ReplayStatus::new(
        ReplayId::new(),
        "file:///tmp/audit/",
        100,
        vec![
            "/tmp/audit/_QUEUED.audit-1.json".to_string(),
            "/tmp/audit/_QUEUED.audit-2.json".to_string(),
        ],
        false,
    )
}

/// Verify that a new status starts CREATED with QUEUED files
#[test]
fn test_new_status_is_created_with_queued_files() {
    let status = two_file_status();

    assert_eq!(status.state, ReplayState::Created);
    assert_eq!(status.files.len(), 2);
    assert!(status.files.iter().all(|f| f.state == FileState::Queued));
    assert_eq!(status.unfinished_files(), vec![0, 1]);
}

/// Verify that a running job settles to FINISHED only once every file is terminal
#[test]
fn test_settle_finishes_running_job_when_all_files_terminal() {
    let mut status = two_file_status();
    status.transition(ReplayState::Running);
    status.files[0].state = FileState::Finished;

    status.settle();
    assert_eq!(status.state, ReplayState::Running);

    status.files[1].state = FileState::Failed;
    status.settle();
    assert_eq!(status.state, ReplayState::Finished);
}

/// Verify that settle leaves a stopped job alone
#[test]
fn test_settle_does_not_touch_stopped_job() {
    let mut status = two_file_status();
    status.transition(ReplayState::Stopped);
    status.files[0].state = FileState::Finished;
    status.files[1].state = FileState::Finished;

    status.settle();

    assert_eq!(status.state, ReplayState::Stopped);
}

/// Verify the JSON field names of the status payload
#[test]
fn test_status_serializes_with_camel_case_fields() {
    let status = two_file_status();

    let json = serde_json::to_value(&status).unwrap();

    assert_eq!(json["state"], "CREATED");
    assert_eq!(json["sendRate"], 100);
    assert_eq!(json["replayUnfinishedFiles"], false);
    assert!(json["lastUpdated"].is_string());
    assert_eq!(json["files"][0]["state"], "QUEUED");
    assert_eq!(json["files"][0]["linesRead"], 0);
    assert_eq!(json["files"][0]["encounteredError"], false);
    assert!(json["files"][0]["pathUri"].is_string());
}
