//! Test helper functions and utilities.

use oxide_core::{BuildStatus, StageId};
use oxide_scheduler::DispatchCoordinator;
use std::time::Duration;

/// Wait for a condition with timeout.
pub async fn wait_for<F, Fut>(timeout: Duration, interval: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition().await {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    false
}

/// Assert that a future completes within a timeout.
pub async fn assert_completes_within<F, T>(future: F, timeout: Duration) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(timeout, future)
        .await
        .expect("Operation timed out")
}

/// Wait until at least `count` requests are suspended.
pub async fn wait_for_pollers(scheduler: &DispatchCoordinator, count: usize) -> bool {
    wait_for(Duration::from_secs(2), Duration::from_millis(5), || async move {
        scheduler.queue_stats().await.pollers >= count
    })
    .await
}

/// Wait until a stage reaches `status`.
pub async fn wait_for_status(
    scheduler: &DispatchCoordinator,
    stage: &StageId,
    status: BuildStatus,
) -> bool {
    wait_for(Duration::from_secs(5), Duration::from_millis(5), || async move {
        scheduler
            .stage(stage)
            .await
            .is_ok_and(|s| s.status == status)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_for_immediate() {
        let result = wait_for(
            Duration::from_secs(1),
            Duration::from_millis(10),
            || async { true },
        )
        .await;
        assert!(result);
    }

    #[tokio::test]
    async fn test_wait_for_timeout() {
        let result = wait_for(
            Duration::from_millis(100),
            Duration::from_millis(10),
            || async { false },
        )
        .await;
        assert!(!result);
    }
}
