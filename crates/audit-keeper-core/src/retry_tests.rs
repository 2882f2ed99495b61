//! Tests for retry policy module

use super::*;
use std::time::Duration;

// ============================================================================
// RetryPolicy Tests
// ============================================================================

#[test]
fn test_retry_policy_default_values() {
    let policy = RetryPolicy::default();

    assert_eq!(policy.max_attempts, 10);
    assert_eq!(policy.initial_delay, Duration::from_millis(100));
    assert_eq!(policy.max_delay, Duration::from_secs(2));
    assert_eq!(policy.fail_timeout, Duration::from_secs(5));
    assert_eq!(policy.backoff_multiplier, 2.0);
    assert!(policy.use_jitter);
}

#[test]
fn test_retry_policy_calculate_delay_without_jitter() {
    let policy = RetryPolicy::default().without_jitter();

    assert_eq!(policy.calculate_delay(0), Duration::from_millis(100));
    assert_eq!(policy.calculate_delay(1), Duration::from_millis(200));
    assert_eq!(policy.calculate_delay(2), Duration::from_millis(400));
    assert_eq!(policy.calculate_delay(3), Duration::from_millis(800));
    assert_eq!(policy.calculate_delay(4), Duration::from_millis(1600));

    // Capped at max_delay
    assert_eq!(policy.calculate_delay(5), Duration::from_secs(2));
    assert_eq!(policy.calculate_delay(12), Duration::from_secs(2));
}

#[test]
fn test_retry_policy_calculate_delay_with_jitter_stays_in_range() {
    let policy = RetryPolicy::default();

    for _ in 0..20 {
        let millis = policy.calculate_delay(0).as_secs_f64() * 1000.0;
        // 100ms ±25%
        assert!(
            (74.9..=125.1).contains(&millis),
            "Delay {}ms out of range",
            millis
        );
    }
}

#[test]
fn test_retry_policy_with_custom_jitter_percent_is_clamped() {
    let policy = RetryPolicy::default().with_jitter_percent(3.0);

    assert_eq!(policy.jitter_percent, 1.0);
}

#[test]
fn test_fixed_policy_uses_constant_interval() {
    let policy = RetryPolicy::fixed(3, Duration::from_millis(250), Duration::from_secs(1));

    assert_eq!(policy.calculate_delay(0), Duration::from_millis(250));
    assert_eq!(policy.calculate_delay(7), Duration::from_millis(250));
}

#[test]
fn test_should_retry_respects_attempt_budget() {
    let policy = RetryPolicy::fixed(3, Duration::from_millis(10), Duration::from_secs(60));

    assert!(policy.should_retry(1, Duration::ZERO));
    assert!(policy.should_retry(2, Duration::ZERO));
    assert!(!policy.should_retry(3, Duration::ZERO));
}

#[test]
fn test_should_retry_respects_time_budget() {
    let policy = RetryPolicy::fixed(100, Duration::from_millis(10), Duration::from_secs(1));

    assert!(policy.should_retry(1, Duration::from_millis(999)));
    assert!(!policy.should_retry(1, Duration::from_secs(1)));
}

// ============================================================================
// RetryState Tests
// ============================================================================

#[test]
fn test_retry_state_tracks_attempts() {
    let policy = RetryPolicy::fixed(2, Duration::from_millis(10), Duration::from_secs(60));
    let mut state = RetryState::new();

    state.record_attempt();
    assert!(state.can_retry(&policy));

    state.record_attempt();
    assert!(!state.can_retry(&policy));
    assert_eq!(state.attempts, 2);
}

#[test]
fn test_retry_state_delay_follows_policy() {
    let policy = RetryPolicy::default().without_jitter();
    let mut state = RetryState::new();

    state.record_attempt();
    assert_eq!(state.get_delay(&policy), Duration::from_millis(100));

    state.record_attempt();
    assert_eq!(state.get_delay(&policy), Duration::from_millis(200));
}

/// Verify that the elapsed-time budget ends the loop on the runtime clock
#[tokio::test(start_paused = true)]
async fn test_retry_state_honours_fail_timeout() {
    // Arrange
    let policy = RetryPolicy::fixed(100, Duration::from_millis(10), Duration::from_secs(5));
    let mut state = RetryState::new();
    state.record_attempt();
    assert!(state.can_retry(&policy));

    // Act
    tokio::time::advance(Duration::from_secs(6)).await;

    // Assert
    assert_eq!(state.elapsed(), Duration::from_secs(6));
    assert!(!state.can_retry(&policy));
}

#[test]
fn test_policy_deserializes_millisecond_durations() {
    let json = r#"{"max_attempts": 4, "initial_delay": 50, "fail_timeout": 750}"#;

    let policy: RetryPolicy = serde_json::from_str(json).unwrap();

    assert_eq!(policy.max_attempts, 4);
    assert_eq!(policy.initial_delay, Duration::from_millis(50));
    assert_eq!(policy.fail_timeout, Duration::from_millis(750));
    // Unspecified fields keep their defaults
    assert_eq!(policy.max_delay, Duration::from_secs(2));
}
