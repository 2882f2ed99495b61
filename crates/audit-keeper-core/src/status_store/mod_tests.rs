//! Tests for the read/modify/CAS helper.

use super::*;
use crate::replay::ReplayState;
use std::sync::Arc;

fn sample_status() -> ReplayStatus {
    ReplayStatus::new(ReplayId::new(), "/audit", 5, Vec::new(), false)
}

/// Verify that mutate applies the change and returns the written record
#[tokio::test]
async fn test_mutate_applies_change() {
    let store = InMemoryStatusStore::new();
    let status = sample_status();
    store.insert(status.clone()).await.unwrap();

    let updated = mutate::<_, StoreError>(&store, &status.id, |s| {
        s.send_rate = 99;
        Ok(())
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(updated.send_rate, 99);
    let stored = store.get(&status.id).await.unwrap().unwrap();
    assert_eq!(stored.version, 2);
}

/// Verify that mutate reports a missing record as None
#[tokio::test]
async fn test_mutate_missing_record_returns_none() {
    let store = InMemoryStatusStore::new();

    let result = mutate::<_, StoreError>(&store, &ReplayId::new(), |_| Ok(()))
        .await
        .unwrap();

    assert!(result.is_none());
}

/// Verify that an error from the closure prevents the write
#[tokio::test]
async fn test_mutate_closure_error_aborts_write() {
    let store = InMemoryStatusStore::new();
    let status = sample_status();
    store.insert(status.clone()).await.unwrap();

    let result = mutate(&store, &status.id, |_| {
        Err(StoreError::NotFound {
            key: "rejected".to_string(),
        })
    })
    .await;

    assert!(result.is_err());
    assert_eq!(store.get(&status.id).await.unwrap().unwrap().version, 1);
}

/// Verify that concurrent mutations never lose updates
#[tokio::test]
async fn test_concurrent_mutations_are_all_applied() {
    // Arrange
    let store = Arc::new(InMemoryStatusStore::new());
    let mut status = sample_status();
    status.transition(ReplayState::Running);
    status.send_rate = 0;
    store.insert(status.clone()).await.unwrap();

    // Act
    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        let id = status.id;
        handles.push(tokio::spawn(async move {
            for _ in 0..5 {
                mutate::<_, StoreError>(store.as_ref(), &id, |s| {
                    s.send_rate += 1;
                    Ok(())
                })
                .await
                .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // Assert
    let stored = store.get(&status.id).await.unwrap().unwrap();
    assert_eq!(stored.value.send_rate, 40);
}
