use super::*;

/// Verify that an unlimited rate never waits
#[tokio::test(start_paused = true)]
async fn test_zero_rate_is_unthrottled() {
    let pacer = Pacer::new(0);
    let start = Instant::now();

    for _ in 0..100 {
        pacer.acquire().await;
    }

    assert_eq!(start.elapsed(), Duration::ZERO);
}

/// Verify that sends are spaced by the configured rate
#[tokio::test(start_paused = true)]
async fn test_rate_spaces_sends() {
    // Arrange
    let pacer = Pacer::new(10);
    let start = Instant::now();

    // Act
    for _ in 0..11 {
        pacer.acquire().await;
    }

    // Assert
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(1000), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(1100), "{elapsed:?}");
}

/// Verify that a rate change applies to the next send
#[tokio::test(start_paused = true)]
async fn test_rate_update_applies_immediately() {
    let pacer = Pacer::new(1);
    pacer.acquire().await;
    pacer.set_rate(0);
    let start = Instant::now();

    pacer.acquire().await;
    pacer.acquire().await;

    assert_eq!(start.elapsed(), Duration::ZERO);
}
