//! Tests for the pending confirmation registry.

use super::*;

/// Verify that confirm resolves the registered waiter
#[tokio::test]
async fn test_confirm_resolves_waiter() {
    let confirms = PendingConfirms::new();
    let mut waiter = confirms.register("audit-1");

    assert!(confirms.confirm("audit-1"));

    assert_eq!(waiter.wait().await, Some(true));
}

/// Verify that reject resolves the waiter as not acknowledged
#[tokio::test]
async fn test_reject_resolves_waiter_negatively() {
    let confirms = PendingConfirms::new();
    let mut waiter = confirms.register("audit-1");

    confirms.reject("audit-1");

    assert_eq!(waiter.wait().await, Some(false));
}

/// Verify that an unknown id is reported and ignored
#[test]
fn test_confirm_unknown_id_returns_false() {
    let confirms = PendingConfirms::new();

    assert!(!confirms.confirm("nobody"));
}

/// Verify that dropping a waiter removes its registration
#[test]
fn test_dropped_waiter_is_removed() {
    let confirms = PendingConfirms::new();

    let waiter = confirms.register("audit-1");
    assert_eq!(confirms.len(), 1);
    drop(waiter);

    assert!(confirms.is_empty());
}

/// Verify that a stale waiter does not remove its replacement
#[tokio::test]
async fn test_stale_waiter_drop_keeps_replacement() {
    // Arrange
    let confirms = PendingConfirms::new();
    let mut first = confirms.register("audit-1");
    let mut second = confirms.register("audit-1");

    // Act
    assert_eq!(first.wait().await, None);
    drop(first);

    // Assert
    assert_eq!(confirms.len(), 1);
    confirms.confirm("audit-1");
    assert_eq!(second.wait().await, Some(true));
}
